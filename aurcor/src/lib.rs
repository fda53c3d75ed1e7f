#![deny(clippy::all)]
#![warn(clippy::perf)]
#![warn(clippy::complexity)]
#![deny(clippy::style)]
#![deny(clippy::print_stdout)]
#![deny(clippy::cast_lossless)]

//! Per-bus runtime state for a multi-channel addressable LED controller:
//! colour ratio profiles, persisted bus configuration and the LED bus
//! write handshake.

pub mod bus;
pub mod cbor;
pub mod config;
pub mod profile;
pub mod result;
pub mod storage;

pub use bus::{
    config::{BusConfig, BusConfigField},
    format::ChannelFormat,
    manager::Buses,
    sink::{ByteBufferSink, LEDBusSink, LEDBusSinkType, NullSink},
    transmitter::{ThreadedTransmitter, Transmitter, UdpTransmitter},
    Completion, LEDBus,
};
pub use profile::{ProfileKind, ProfileSet, Ratio, RatioProfile};
pub use result::{Error, Result};
pub use storage::{DirStorage, MemoryStorage, Storage};

pub const MAX_LEDS: usize = 1000;
/// Smallest run of LEDs a profile is expected to need its own ratio for.
pub const MIN_RATIO_LEDS: usize = 50;
pub const BYTES_PER_LED: usize = 3;
