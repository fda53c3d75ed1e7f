use std::thread::{self, JoinHandle};

use crossbeam::channel::{bounded, Sender};
use log::{error, trace};

use crate::bus::Completion;

use super::Transmitter;

struct Frame {
    data: Vec<u8>,
    completion: Completion,
}

/// Runs another transmitter on a worker thread.
///
/// `transmit` returns as soon as the frame has been queued. The wrapped
/// transmitter signals completion from the worker, so the bus stays busy
/// in the meantime the way it would during a DMA transfer.
pub struct ThreadedTransmitter {
    type_name: &'static str,
    frames: Option<Sender<Frame>>,
    handle: Option<JoinHandle<()>>,
}

impl ThreadedTransmitter {
    pub fn new(mut inner: Box<dyn Transmitter>) -> Self {
        let type_name = inner.type_name();
        // The bus never starts a frame before the previous one completes
        let (frames, receiver) = bounded::<Frame>(1);

        // Runs until the sending half is dropped
        let handle = thread::spawn(move || {
            for frame in receiver.iter() {
                trace!(
                    "Worker sending {} bytes for bus {}",
                    frame.data.len(),
                    frame.completion.bus_name()
                );
                inner.transmit(&frame.data, frame.completion);
            }
        });

        ThreadedTransmitter {
            type_name,
            frames: Some(frames),
            handle: Some(handle),
        }
    }

    /// Stops the worker once any queued frame has been sent.
    pub fn stop(&mut self) {
        self.frames.take();

        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Transmitter worker thread panicked");
            }
        }
    }
}

impl Transmitter for ThreadedTransmitter {
    fn type_name(&self) -> &'static str {
        self.type_name
    }

    fn transmit(&mut self, data: &[u8], completion: Completion) {
        let frame = Frame {
            data: data.to_vec(),
            completion,
        };

        match &self.frames {
            Some(frames) => {
                if let Err(err) = frames.send(frame) {
                    error!("Transmitter worker has gone away, frame dropped");
                    err.into_inner().completion.finish();
                }
            }
            None => {
                error!("Transmitter has been stopped, frame dropped");
                frame.completion.finish();
            }
        }
    }
}

impl Drop for ThreadedTransmitter {
    fn drop(&mut self) {
        self.stop();
    }
}
