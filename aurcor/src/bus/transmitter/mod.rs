pub mod threaded;
pub mod udp;

pub use threaded::ThreadedTransmitter;
pub use udp::UdpTransmitter;

use super::Completion;

/// Puts a laid-out frame on the wire.
///
/// `data` always covers the whole configured length of the bus. The
/// implementation signals `completion` when the frame has been sent,
/// either before returning or later from another context.
pub trait Transmitter: Send {
    fn type_name(&self) -> &'static str;
    fn transmit(&mut self, data: &[u8], completion: Completion);
}
