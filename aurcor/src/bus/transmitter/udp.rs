use std::{
    io,
    net::{ToSocketAddrs, UdpSocket},
};

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::bus::Completion;

use super::Transmitter;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct UdpTransmitterConfig {
    pub host: String,
    pub port: u16,
    /// Send from a worker thread instead of the writing thread.
    #[serde(default)]
    pub threaded: bool,
}

/// Sends each frame as a single datagram.
pub struct UdpTransmitter {
    socket: UdpSocket,
    address: String,
}

impl UdpTransmitter {
    pub fn new(config: &UdpTransmitterConfig) -> io::Result<Self> {
        let address = format!("{}:{}", config.host, config.port);

        // Resolve once up front so that a bad address fails here
        if address.to_socket_addrs()?.next().is_none() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("No addresses for {}", address),
            ));
        }

        let socket = UdpSocket::bind("0.0.0.0:0")?;
        debug!("Sending frames from {} to {}", socket.local_addr()?, address);

        Ok(UdpTransmitter { socket, address })
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

impl Transmitter for UdpTransmitter {
    fn type_name(&self) -> &'static str {
        "udp"
    }

    fn transmit(&mut self, data: &[u8], completion: Completion) {
        if let Err(err) = self.socket.send_to(data, &self.address) {
            warn!(
                "Unable to send frame for bus {} to {}: {}",
                completion.bus_name(),
                self.address,
                err
            );
        }

        completion.finish();
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::*;
    use crate::{
        bus::{sink::ByteBufferSink, LEDBus},
        storage::MemoryStorage,
    };

    #[test]
    fn test_frame_arrives_as_one_datagram() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

        let config = UdpTransmitterConfig {
            host: "127.0.0.1".to_string(),
            port: receiver.local_addr().unwrap().port(),
            threaded: false,
        };
        let transmitter = UdpTransmitter::new(&config).unwrap();
        let bus = LEDBus::new(
            "led0",
            4,
            Arc::new(MemoryStorage::new()),
            ByteBufferSink::new(Box::new(transmitter)).into(),
        );

        assert_eq!(bus.type_name(), "udp");
        bus.write(&[1, 2, 3], false);
        assert!(bus.ready());

        let mut buffer = [0xff; 64];
        let size = receiver.recv(&mut buffer).unwrap();
        assert_eq!(&buffer[..size], &[1, 2, 3, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
    }
}
