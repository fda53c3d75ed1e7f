use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use ciborium::value::Value;
use log::{debug, error, info, trace};
use parking_lot::RwLock;
use strum_macros::{Display, EnumIter, IntoStaticStr};

use crate::{
    cbor::{self, Container},
    result::{Error, Result, Worst},
    storage::Storage,
    MAX_LEDS,
};

use super::format::ChannelFormat;

const DIRECTORY_NAME: &str = "/buses";

pub const MIN_LEDS: usize = 1;
pub const MAX_PRESET_NAME_LENGTH: usize = 48;

pub const DEFAULT_RESET_TIME_US: u32 = 280;
pub const MAX_RESET_TIME_US: u32 = 1_000_000;

pub const DEFAULT_FPS: u32 = 60;
pub const MIN_FPS: u32 = 1;
pub const MAX_FPS: u32 = 1000;

/// Port 0 disables UDP receive.
pub const DEFAULT_UDP_PORT: u16 = 0;

pub const DEFAULT_UDP_QUEUE_SIZE: usize = 3;
pub const MIN_UDP_QUEUE_SIZE: usize = 1;
pub const MAX_UDP_QUEUE_SIZE: usize = 50;

/// Settings that fall back to a built-in default until configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum BusConfigField {
    Format,
    ResetTimeUs,
    DefaultFps,
    UdpPort,
    UdpQueueSize,
}

impl BusConfigField {
    /// Key used in the persisted map.
    pub fn key(self) -> &'static str {
        self.into()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct BusConfigData {
    length: usize,
    reverse: bool,
    default_preset: String,
    format: Option<ChannelFormat>,
    reset_time_us: Option<u32>,
    default_fps: Option<u32>,
    udp_port: Option<u16>,
    udp_queue_size: Option<usize>,
}

impl BusConfigData {
    fn new(default_length: usize) -> Self {
        BusConfigData {
            length: default_length,
            reverse: false,
            default_preset: String::new(),
            format: None,
            reset_time_us: None,
            default_fps: None,
            udp_port: None,
            udp_queue_size: None,
        }
    }
}

fn constrain_length(value: usize) -> usize {
    value.clamp(MIN_LEDS, MAX_LEDS)
}

fn constrain_preset(value: &str) -> String {
    value.chars().take(MAX_PRESET_NAME_LENGTH).collect()
}

fn constrain_u64(value: u64, min: u64, max: u64) -> u64 {
    value.clamp(min, max)
}

/// Persisted settings for one bus.
///
/// A single reader-writer lock covers the whole record so a reload is
/// never observed half applied. Changes are kept in memory until
/// [`BusConfig::save`] is called.
pub struct BusConfig {
    bus_name: String,
    default_length: usize,
    storage: Arc<dyn Storage>,
    data: RwLock<BusConfigData>,
    modified: AtomicBool,
}

impl BusConfig {
    pub fn new(bus_name: &str, default_length: usize, storage: Arc<dyn Storage>) -> Self {
        let default_length = constrain_length(default_length);
        let config = BusConfig {
            bus_name: bus_name.to_string(),
            default_length,
            storage,
            data: RwLock::new(BusConfigData::new(default_length)),
            modified: AtomicBool::new(false),
        };

        // Failures are logged and leave the defaults in place
        config.read(true).ok();
        config
    }

    pub fn bus_name(&self) -> &str {
        &self.bus_name
    }

    pub fn filename(&self) -> String {
        format!("{}/{}.cbor", DIRECTORY_NAME, self.bus_name)
    }

    pub fn length(&self) -> usize {
        self.data.read().length
    }

    pub fn set_length(&self, value: usize) {
        self.update(|data| data.length = constrain_length(value));
    }

    pub fn reverse(&self) -> bool {
        self.data.read().reverse
    }

    pub fn set_reverse(&self, value: bool) {
        self.update(|data| data.reverse = value);
    }

    /// Empty when there is no default preset.
    pub fn default_preset(&self) -> String {
        self.data.read().default_preset.clone()
    }

    pub fn set_default_preset(&self, value: &str) {
        self.update(|data| data.default_preset = constrain_preset(value));
    }

    pub fn format(&self) -> ChannelFormat {
        self.data.read().format.unwrap_or_default()
    }

    pub fn set_format(&self, value: ChannelFormat) {
        self.update(|data| data.format = Some(value));
    }

    pub fn reset_time_us(&self) -> u32 {
        self.data.read().reset_time_us.unwrap_or(DEFAULT_RESET_TIME_US)
    }

    pub fn set_reset_time_us(&self, value: u32) {
        self.update(|data| data.reset_time_us = Some(value.min(MAX_RESET_TIME_US)));
    }

    pub fn default_fps(&self) -> u32 {
        self.data.read().default_fps.unwrap_or(DEFAULT_FPS)
    }

    pub fn set_default_fps(&self, value: u32) {
        self.update(|data| data.default_fps = Some(value.clamp(MIN_FPS, MAX_FPS)));
    }

    pub fn udp_port(&self) -> u16 {
        self.data.read().udp_port.unwrap_or(DEFAULT_UDP_PORT)
    }

    pub fn set_udp_port(&self, value: u16) {
        self.update(|data| data.udp_port = Some(value));
    }

    pub fn udp_queue_size(&self) -> usize {
        self.data.read().udp_queue_size.unwrap_or(DEFAULT_UDP_QUEUE_SIZE)
    }

    pub fn set_udp_queue_size(&self, value: usize) {
        self.update(|data| {
            data.udp_queue_size = Some(value.clamp(MIN_UDP_QUEUE_SIZE, MAX_UDP_QUEUE_SIZE))
        });
    }

    pub fn is_configured(&self, field: BusConfigField) -> bool {
        let data = self.data.read();

        match field {
            BusConfigField::Format => data.format.is_some(),
            BusConfigField::ResetTimeUs => data.reset_time_us.is_some(),
            BusConfigField::DefaultFps => data.default_fps.is_some(),
            BusConfigField::UdpPort => data.udp_port.is_some(),
            BusConfigField::UdpQueueSize => data.udp_queue_size.is_some(),
        }
    }

    /// Returns `field` to its built-in default.
    pub fn unset(&self, field: BusConfigField) {
        self.update(|data| match field {
            BusConfigField::Format => data.format = None,
            BusConfigField::ResetTimeUs => data.reset_time_us = None,
            BusConfigField::DefaultFps => data.default_fps = None,
            BusConfigField::UdpPort => data.udp_port = None,
            BusConfigField::UdpQueueSize => data.udp_queue_size = None,
        });
    }

    /// Returns every field to its default. The persisted file is left
    /// alone until the next save.
    pub fn reset(&self) {
        let default_length = self.default_length;
        self.update(|data| *data = BusConfigData::new(default_length));
    }

    /// Whether there are changes that haven't been saved.
    pub fn modified(&self) -> bool {
        self.modified.load(Ordering::Relaxed)
    }

    /// Replaces the in-memory settings with the persisted ones.
    ///
    /// A missing or malformed file leaves every field at its default;
    /// an individual invalid field is skipped and stays unset.
    pub fn load(&self) -> Result {
        self.read(false)
    }

    /// Picks up changes made to the persisted file by someone else.
    pub fn reload(&self) -> Result {
        self.read(false)
    }

    // A missing file is the normal state of an unconfigured bus, so
    // automatic loads only mention it at debug level
    fn read(&self, automatic: bool) -> Result {
        let filename = self.filename();
        let mut data = BusConfigData::new(self.default_length);

        if automatic {
            debug!("Reading config from file {}", filename);
        } else {
            info!("Reading config from file {}", filename);
        }

        let result = match self.storage.read(&filename) {
            Ok(bytes) => {
                let result = Self::parse(&bytes, &mut data);
                if result.is_err() {
                    error!("Config file {} contains invalid data that has been ignored", filename);
                }
                result
            }
            Err(err) => {
                if automatic {
                    debug!("Unable to open config file {} for reading: {}", filename, err);
                } else {
                    error!("Unable to open config file {} for reading: {}", filename, err);
                }
                Err(Error::IoError)
            }
        };

        *self.data.write() = data;
        self.modified.store(false, Ordering::Relaxed);
        result
    }

    pub fn save(&self) -> Result {
        let filename = self.filename();
        let data = self.data.read();

        info!("Writing config to file {}", filename);

        let result = cbor::write_document(Self::serialise(&data))
            .and_then(|bytes| self.storage.write(&filename, &bytes));

        match result {
            Ok(()) => {
                self.modified.store(false, Ordering::Relaxed);
                Ok(())
            }
            Err(err) => {
                error!("Failed to write config file {}: {}", filename, err);
                Err(Error::IoError)
            }
        }
    }

    fn update<F: FnOnce(&mut BusConfigData)>(&self, f: F) {
        let mut data = self.data.write();
        let before = data.clone();

        f(&mut data);

        if *data != before {
            self.modified.store(true, Ordering::Relaxed);
        }
    }

    fn parse(bytes: &[u8], data: &mut BusConfigData) -> Result {
        let entries = match cbor::read_document(bytes, Container::Map)? {
            Value::Map(entries) => entries,
            _ => return Err(Error::ParseError),
        };
        let mut worst = Worst::new();

        for (key, value) in &entries {
            let key = match key {
                Value::Text(key) => key.as_str(),
                _ => {
                    trace!("Config key is not text");
                    worst.record::<()>(Err(Error::ParseError)).ok();
                    continue;
                }
            };

            if let Err(err) = worst.record(Self::parse_field(data, key, value)) {
                trace!("Config field {} is invalid: {}", key, err);
            }
        }

        worst.result()
    }

    fn parse_field(data: &mut BusConfigData, key: &str, value: &Value) -> Result {
        match key {
            "length" => {
                let value = cbor::read_unsigned(value)?;
                data.length = constrain_u64(value, MIN_LEDS as u64, MAX_LEDS as u64) as usize;
            }
            "reverse" => match value {
                Value::Bool(value) => data.reverse = *value,
                _ => return Err(Error::ParseError),
            },
            "default_preset" => match value {
                Value::Text(value) => data.default_preset = constrain_preset(value),
                _ => return Err(Error::ParseError),
            },
            "format" => match value {
                Value::Text(value) => {
                    data.format = Some(ChannelFormat::from_name(value).ok_or(Error::OutOfRange)?)
                }
                _ => return Err(Error::ParseError),
            },
            "reset_time_us" => {
                let value = cbor::read_unsigned(value)?;
                data.reset_time_us = Some(constrain_u64(value, 0, u64::from(MAX_RESET_TIME_US)) as u32);
            }
            "default_fps" => {
                let value = cbor::read_unsigned(value)?;
                data.default_fps =
                    Some(constrain_u64(value, u64::from(MIN_FPS), u64::from(MAX_FPS)) as u32);
            }
            "udp_port" => {
                let value = cbor::read_unsigned(value)?;
                data.udp_port = Some(u16::try_from(value).map_err(|_| Error::OutOfRange)?);
            }
            "udp_queue_size" => {
                let value = cbor::read_unsigned(value)?;
                data.udp_queue_size = Some(constrain_u64(
                    value,
                    MIN_UDP_QUEUE_SIZE as u64,
                    MAX_UDP_QUEUE_SIZE as u64,
                ) as usize);
            }
            _ => trace!("Ignoring unknown config field {}", key),
        }

        Ok(())
    }

    fn serialise(data: &BusConfigData) -> Value {
        let text = |value: &str| Value::Text(value.to_string());
        let mut entries = vec![
            (text("length"), Value::Integer((data.length as u64).into())),
            (text("reverse"), Value::Bool(data.reverse)),
            (text("default_preset"), text(&data.default_preset)),
        ];

        if let Some(format) = data.format {
            entries.push((text(BusConfigField::Format.key()), text(format.name())));
        }
        if let Some(value) = data.reset_time_us {
            entries.push((text(BusConfigField::ResetTimeUs.key()), Value::Integer(value.into())));
        }
        if let Some(value) = data.default_fps {
            entries.push((text(BusConfigField::DefaultFps.key()), Value::Integer(value.into())));
        }
        if let Some(value) = data.udp_port {
            entries.push((text(BusConfigField::UdpPort.key()), Value::Integer(value.into())));
        }
        if let Some(value) = data.udp_queue_size {
            entries.push((
                text(BusConfigField::UdpQueueSize.key()),
                Value::Integer((value as u64).into()),
            ));
        }

        Value::Map(entries)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Once;

    use log::{Level, Log, Metadata, Record};
    use parking_lot::Mutex;
    use strum::IntoEnumIterator;

    use super::*;
    use crate::storage::MemoryStorage;

    static MESSAGES: Mutex<Vec<(Level, String)>> = parking_lot::const_mutex(Vec::new());
    static INIT: Once = Once::new();

    struct Capture;

    impl Log for Capture {
        fn enabled(&self, _metadata: &Metadata) -> bool {
            true
        }

        fn log(&self, record: &Record) {
            MESSAGES.lock().push((record.level(), record.args().to_string()));
        }

        fn flush(&self) {}
    }

    static CAPTURE: Capture = Capture;

    fn capture_logs() {
        INIT.call_once(|| {
            log::set_logger(&CAPTURE).unwrap();
            log::set_max_level(log::LevelFilter::Trace);
        });
    }

    fn levels_mentioning(text: &str) -> Vec<Level> {
        MESSAGES
            .lock()
            .iter()
            .filter(|(_, message)| message.starts_with("Unable to open") && message.contains(text))
            .map(|(level, _)| *level)
            .collect()
    }

    #[test]
    fn test_field_keys() {
        let keys: Vec<&str> = BusConfigField::iter().map(BusConfigField::key).collect();
        assert_eq!(
            keys,
            vec!["format", "reset_time_us", "default_fps", "udp_port", "udp_queue_size"]
        );
    }

    #[test]
    fn test_mutators_clamp() {
        let config = BusConfig::new("led0", 100, Arc::new(MemoryStorage::new()));

        config.set_length(0);
        assert_eq!(config.length(), MIN_LEDS);
        config.set_length(MAX_LEDS + 1);
        assert_eq!(config.length(), MAX_LEDS);

        config.set_default_fps(0);
        assert_eq!(config.default_fps(), MIN_FPS);
        config.set_default_fps(5000);
        assert_eq!(config.default_fps(), MAX_FPS);

        config.set_udp_queue_size(0);
        assert_eq!(config.udp_queue_size(), MIN_UDP_QUEUE_SIZE);

        config.set_reset_time_us(u32::MAX);
        assert_eq!(config.reset_time_us(), MAX_RESET_TIME_US);

        config.set_default_preset(&"x".repeat(100));
        assert_eq!(config.default_preset().len(), MAX_PRESET_NAME_LENGTH);
    }

    #[test]
    fn test_missing_file_log_level() {
        capture_logs();
        let config = BusConfig::new("quiet0", 100, Arc::new(MemoryStorage::new()));
        assert_eq!(levels_mentioning("/buses/quiet0.cbor"), vec![Level::Debug]);

        assert_eq!(config.reload(), Err(Error::IoError));
        assert_eq!(
            levels_mentioning("/buses/quiet0.cbor"),
            vec![Level::Debug, Level::Error]
        );

        assert_eq!(config.load(), Err(Error::IoError));
        assert_eq!(
            levels_mentioning("/buses/quiet0.cbor"),
            vec![Level::Debug, Level::Error, Level::Error]
        );
    }

    #[test]
    fn test_default_length_is_constrained() {
        let config = BusConfig::new("led0", 0, Arc::new(MemoryStorage::new()));
        assert_eq!(config.length(), MIN_LEDS);
    }

    #[test]
    fn test_unchanged_value_is_not_modified() {
        let config = BusConfig::new("led0", 100, Arc::new(MemoryStorage::new()));
        config.set_length(100);
        config.set_reverse(false);
        assert!(!config.modified());

        config.set_reverse(true);
        assert!(config.modified());
    }
}
