pub mod config;
pub mod format;
pub mod manager;
pub mod sink;
pub mod transmitter;

use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use crossbeam::channel::{bounded, Receiver, Sender};
use log::{error, trace};
use parking_lot::Mutex;

use crate::{
    profile::{ProfileKind, ProfileSet, RatioProfile},
    storage::Storage,
    BYTES_PER_LED,
};

use self::{
    config::BusConfig,
    format::ChannelFormat,
    sink::{LEDBusSink, LEDBusSinkType},
};

pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// Binary access token plus busy flag shared between a bus and the
/// hardware that signals completion.
///
/// The token lives in a single-slot channel: taking it out grants the
/// right to start a transmission, putting it back ends that transmission.
struct Handshake {
    token_tx: Sender<()>,
    token_rx: Receiver<()>,
    busy: AtomicBool,
}

impl Handshake {
    fn new() -> Self {
        let (token_tx, token_rx) = bounded(1);
        let handshake = Handshake {
            token_tx,
            token_rx,
            busy: AtomicBool::new(false),
        };

        handshake.release();
        handshake
    }

    fn acquire(&self, timeout: Duration) -> bool {
        self.token_rx.recv_timeout(timeout).is_ok()
    }

    // Wait-free: an atomic store and a send on a channel with a free slot
    fn release(&self) -> bool {
        self.busy.store(false, Ordering::Release);
        self.token_tx.try_send(()).is_ok()
    }
}

/// Handle given to a hardware sink for the transmission it has been
/// asked to start. Exactly one of [`Completion::finish`] and
/// [`Completion::finish_isr`] should be called once the data is out.
#[derive(Clone)]
pub struct Completion {
    bus_name: Arc<str>,
    handshake: Arc<Handshake>,
}

impl Completion {
    pub fn bus_name(&self) -> &str {
        &self.bus_name
    }

    /// Ends the transmission from ordinary task context.
    pub fn finish(&self) {
        if !self.handshake.release() {
            error!("Bus {} finished while not transmitting", self.bus_name);
        }
    }

    /// Ends the transmission from interrupt context.
    ///
    /// Only wait-free operations happen here: no locks, no allocation
    /// and no logging. Returns `false` if the bus was not transmitting.
    /// Any writer blocked on the token is woken by the release.
    pub fn finish_isr(&self) -> bool {
        self.handshake.release()
    }
}

/// One physical LED output.
///
/// Writes are serialised: a second [`LEDBus::write`] waits until the
/// previous transmission has completed or the write timeout expires.
pub struct LEDBus {
    name: Arc<str>,
    config: BusConfig,
    profiles: ProfileSet,
    handshake: Arc<Handshake>,
    sink: Mutex<LEDBusSinkType>,
    write_timeout: Duration,
    epoch: Instant,
    last_update_ms: AtomicU64,
}

impl LEDBus {
    pub fn new(
        name: &str,
        default_length: usize,
        storage: Arc<dyn Storage>,
        sink: LEDBusSinkType,
    ) -> Self {
        LEDBus {
            name: Arc::from(name),
            config: BusConfig::new(name, default_length, Arc::clone(&storage)),
            profiles: ProfileSet::new(name, storage),
            handshake: Arc::new(Handshake::new()),
            sink: Mutex::new(sink),
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            epoch: Instant::now(),
            last_update_ms: AtomicU64::new(0),
        }
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_name(&self) -> &'static str {
        self.sink.lock().type_name()
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    pub fn profiles(&self) -> &ProfileSet {
        &self.profiles
    }

    pub fn profile(&self, kind: ProfileKind) -> &RatioProfile {
        self.profiles.get(kind)
    }

    pub fn length(&self) -> usize {
        self.config.length()
    }

    pub fn reverse(&self) -> bool {
        self.config.reverse()
    }

    pub fn format(&self) -> ChannelFormat {
        self.config.format()
    }

    pub fn default_fps(&self) -> u32 {
        self.config.default_fps()
    }

    pub fn write_timeout(&self) -> Duration {
        self.write_timeout
    }

    /// Milliseconds after the bus was created that the most recent
    /// transmission started.
    pub fn last_update_ms(&self) -> u64 {
        self.last_update_ms.load(Ordering::Relaxed)
    }

    /// Whether the previous transmission has completed.
    pub fn ready(&self) -> bool {
        !self.handshake.busy.load(Ordering::Acquire)
    }

    /// Starts transmitting `data`, waiting for any previous transmission
    /// to complete first.
    ///
    /// `reverse_order` is combined with the configured wiring direction.
    /// A trailing partial pixel is ignored. If the bus doesn't become
    /// ready within the write timeout the frame is dropped.
    pub fn write(&self, data: &[u8], reverse_order: bool) {
        if !self.handshake.acquire(self.write_timeout) {
            error!(
                "Timed out after {:?} waiting for bus {}, frame dropped",
                self.write_timeout, self.name
            );
            return;
        }

        let elapsed = u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.last_update_ms.store(elapsed, Ordering::Relaxed);
        self.handshake.busy.store(true, Ordering::Release);

        let data = &data[..data.len() - data.len() % BYTES_PER_LED];
        let length = self.config.length();
        let reverse = reverse_order ^ self.config.reverse();

        trace!(
            "Bus {} writing {} bytes to {} LEDs (reverse {})",
            self.name,
            data.len(),
            length,
            reverse
        );

        self.sink
            .lock()
            .start(data, length, reverse, self.completion());
    }

    /// Turns every LED off.
    pub fn clear(&self) {
        self.write(&[], false);
    }

    /// Task-context completion, for sinks that don't hold a [`Completion`].
    pub fn finish(&self) {
        self.completion().finish();
    }

    pub fn finish_isr(&self) -> bool {
        self.handshake.release()
    }

    fn completion(&self) -> Completion {
        Completion {
            bus_name: Arc::clone(&self.name),
            handshake: Arc::clone(&self.handshake),
        }
    }
}
