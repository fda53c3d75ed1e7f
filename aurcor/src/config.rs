//! Startup configuration for the host runner: the static list of buses.

use std::{fs, io, path::Path, sync::Arc, time::Duration};

use log::info;
use serde::{Deserialize, Serialize};

use crate::{
    bus::{
        manager::Buses,
        sink::{ByteBufferSink, LEDBusSinkType, NullSink},
        transmitter::{udp::UdpTransmitterConfig, ThreadedTransmitter, Transmitter, UdpTransmitter},
        LEDBus, DEFAULT_WRITE_TIMEOUT,
    },
    storage::Storage,
};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AurcorConfig {
    write_timeout_ms: u64,
    buses: Vec<StartupBus>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct StartupBus {
    pub name: String,
    pub default_length: usize,
    pub output: StartupOutput,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub enum StartupOutput {
    Null,
    Udp(UdpTransmitterConfig),
}

impl Default for AurcorConfig {
    fn default() -> Self {
        AurcorConfig {
            write_timeout_ms: DEFAULT_WRITE_TIMEOUT.as_millis() as u64,
            buses: (0..4)
                .map(|index| StartupBus {
                    name: format!("led{}", index),
                    default_length: 100,
                    output: StartupOutput::Null,
                })
                .collect(),
        }
    }
}

impl AurcorConfig {
    pub fn new(write_timeout_ms: u64, buses: Vec<StartupBus>) -> Self {
        AurcorConfig {
            write_timeout_ms,
            buses,
        }
    }

    /// Reads the config at `path`, writing out the default first if there
    /// isn't one.
    pub fn load_or_create(path: &Path) -> io::Result<Self> {
        if !path.exists() {
            info!("Creating default config {}", path.display());
            fs::write(path, serde_json::to_string_pretty(&AurcorConfig::default())?)?;
        }

        let json = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn buses(&self) -> &[StartupBus] {
        &self.buses
    }

    /// Creates every configured bus, loading its persisted configuration
    /// from `storage`.
    pub fn build_buses(&self, storage: &Arc<dyn Storage>) -> io::Result<Buses> {
        let mut buses = Buses::new();

        for startup in &self.buses {
            let sink = match &startup.output {
                StartupOutput::Null => LEDBusSinkType::from(NullSink::new()),
                StartupOutput::Udp(udp) => {
                    let mut transmitter: Box<dyn Transmitter> = Box::new(UdpTransmitter::new(udp)?);

                    if udp.threaded {
                        transmitter = Box::new(ThreadedTransmitter::new(transmitter));
                    }
                    LEDBusSinkType::from(ByteBufferSink::new(transmitter))
                }
            };

            let bus = LEDBus::new(&startup.name, startup.default_length, Arc::clone(storage), sink)
                .with_write_timeout(self.write_timeout());

            buses.add(bus).map_err(|_| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("Duplicate bus name {}", startup.name),
                )
            })?;
        }

        Ok(buses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    #[test]
    fn test_parse_outputs() {
        let json = r#"{
            "write_timeout_ms": 500,
            "buses": [
                { "name": "led0", "default_length": 300, "output": "Null" },
                {
                    "name": "led1",
                    "default_length": 50,
                    "output": { "Udp": { "host": "127.0.0.1", "port": 4000, "threaded": true } }
                },
                {
                    "name": "led2",
                    "default_length": 50,
                    "output": { "Udp": { "host": "127.0.0.1", "port": 4001 } }
                }
            ]
        }"#;
        let config: AurcorConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.write_timeout(), Duration::from_millis(500));
        assert_eq!(config.buses()[0].output, StartupOutput::Null);
        assert_eq!(
            config.buses()[1].output,
            StartupOutput::Udp(UdpTransmitterConfig {
                host: "127.0.0.1".to_string(),
                port: 4000,
                threaded: true
            })
        );
        assert!(matches!(
            config.buses()[2].output,
            StartupOutput::Udp(UdpTransmitterConfig { threaded: false, .. })
        ));
    }

    #[test]
    fn test_build_default_buses() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let buses = AurcorConfig::default().build_buses(&storage).unwrap();

        assert_eq!(buses.names(), vec!["led0", "led1", "led2", "led3"]);
        let bus = buses.get("led3").unwrap();
        assert_eq!(bus.length(), 100);
        assert_eq!(bus.write_timeout(), DEFAULT_WRITE_TIMEOUT);
    }

    #[test]
    fn test_duplicate_bus_names() {
        let bus = StartupBus {
            name: "led0".to_string(),
            default_length: 1,
            output: StartupOutput::Null,
        };
        let config = AurcorConfig::new(10, vec![bus.clone(), bus]);
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());

        assert_eq!(
            config.build_buses(&storage).err().map(|err| err.kind()),
            Some(io::ErrorKind::InvalidInput)
        );
    }
}
