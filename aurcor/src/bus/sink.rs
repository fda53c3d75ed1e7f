use enum_dispatch::enum_dispatch;

use crate::{BYTES_PER_LED, MAX_LEDS};

use super::{transmitter::Transmitter, Completion};

const MAX_BYTES: usize = MAX_LEDS * BYTES_PER_LED;

/// Hardware-specific half of a bus.
///
/// `start` is called with the bus's access token held and must arrange
/// for `completion` to be signalled once the transmission has finished,
/// possibly before returning.
#[enum_dispatch]
pub trait LEDBusSink: Send {
    fn type_name(&self) -> &'static str;
    fn start(&mut self, data: &[u8], length: usize, reverse: bool, completion: Completion);
}

#[enum_dispatch(LEDBusSink)]
pub enum LEDBusSinkType {
    Null(NullSink),
    ByteBuffer(ByteBufferSink),
}

/// Discards everything and completes immediately.
#[derive(Default)]
pub struct NullSink {}

impl NullSink {
    pub fn new() -> Self {
        NullSink {}
    }
}

impl LEDBusSink for NullSink {
    fn type_name(&self) -> &'static str {
        "null"
    }

    fn start(&mut self, _data: &[u8], _length: usize, _reverse: bool, completion: Completion) {
        completion.finish();
    }
}

/// Lays the frame out in a buffer covering the whole configured length
/// and hands that buffer to a transmitter.
pub struct ByteBufferSink {
    buffer: Box<[u8; MAX_BYTES]>,
    transmitter: Box<dyn Transmitter>,
}

impl ByteBufferSink {
    pub fn new(transmitter: Box<dyn Transmitter>) -> Self {
        ByteBufferSink {
            buffer: Box::new([0; MAX_BYTES]),
            transmitter,
        }
    }

    /// Fills the first `length` pixels of the buffer from `data`, blanking
    /// whatever `data` doesn't cover, and returns that part of the buffer.
    fn layout(&mut self, data: &[u8], length: usize, reverse: bool) -> &[u8] {
        let length = length.min(MAX_LEDS);
        let pixels = (data.len() / BYTES_PER_LED).min(length);
        let buffer = &mut self.buffer[..length * BYTES_PER_LED];

        if reverse {
            let blank = (length - pixels) * BYTES_PER_LED;

            for (pixel, out) in data
                .chunks_exact(BYTES_PER_LED)
                .take(pixels)
                .zip(buffer.chunks_exact_mut(BYTES_PER_LED).rev())
            {
                out.copy_from_slice(pixel);
            }
            buffer[..blank].fill(0);
        } else {
            let used = pixels * BYTES_PER_LED;

            buffer[..used].copy_from_slice(&data[..used]);
            buffer[used..].fill(0);
        }

        buffer
    }
}

impl LEDBusSink for ByteBufferSink {
    fn type_name(&self) -> &'static str {
        self.transmitter.type_name()
    }

    fn start(&mut self, data: &[u8], length: usize, reverse: bool, completion: Completion) {
        self.layout(data, length, reverse);

        // The whole configured length goes out every time so that every
        // frame on this bus takes the same time to transmit
        let bytes = length.min(MAX_LEDS) * BYTES_PER_LED;
        self.transmitter.transmit(&self.buffer[..bytes], completion);
    }
}
