pub mod connection;
#[cfg(test)]
pub mod mock;
pub mod scanner;
pub mod session;

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use bluer::{Session, Uuid};
use tracing::{debug, info, warn};

use crate::error::ConnectError;
use connection::RfcommSink;

pub use session::{
    CancelHandle, ConnectionState, DeviceSession, PendingSend, SessionConfig, SessionHandle,
};

/// Opens a byte stream to a named accessory.
#[async_trait]
pub trait Connector: Send {
    /// Resolve `identifier` among known devices and open a stream to `service`.
    async fn open(
        &mut self,
        identifier: &str,
        service: Uuid,
    ) -> Result<Box<dyn FrameSink>, ConnectError>;
}

/// Write side of an open stream.
#[async_trait]
pub trait FrameSink: Send {
    /// Write one complete frame.
    async fn write_frame(&mut self, frame: &[u8]) -> io::Result<()>;

    /// Release the stream. Errors are irrelevant at this point.
    async fn shutdown(&mut self) {}
}

/// BlueZ-backed connector: paired-device lookup over D-Bus, then a raw
/// RFCOMM socket on the first channel that accepts.
pub struct BluezConnector {
    channels: Vec<u8>,
    socket_timeout: Duration,
}

impl BluezConnector {
    pub fn new(channels: Vec<u8>, socket_timeout: Duration) -> Self {
        Self {
            channels,
            socket_timeout,
        }
    }
}

#[async_trait]
impl Connector for BluezConnector {
    async fn open(
        &mut self,
        identifier: &str,
        service: Uuid,
    ) -> Result<Box<dyn FrameSink>, ConnectError> {
        let session = Session::new()
            .await
            .map_err(|e| ConnectError::AdapterUnavailable(e.to_string()))?;
        let adapter = session
            .default_adapter()
            .await
            .map_err(|e| ConnectError::AdapterUnavailable(e.to_string()))?;
        if !adapter.is_powered().await.unwrap_or(false) {
            return Err(ConnectError::AdapterUnavailable(format!(
                "adapter {} is powered off",
                adapter.name()
            )));
        }

        let device = scanner::find_paired(&adapter, identifier)
            .await
            .map_err(|e| ConnectError::AdapterUnavailable(e.to_string()))?
            .ok_or_else(|| ConnectError::DeviceNotFound(identifier.to_string()))?;

        if device.services.contains(&service) {
            debug!("{} advertises service {}", device.name, service);
        } else {
            debug!(
                "{} does not list service {}, trying RFCOMM anyway",
                device.name, service
            );
        }

        let mut last_err = None;
        for &channel in &self.channels {
            match RfcommSink::connect(device.address, channel, self.socket_timeout).await {
                Ok(sink) => {
                    info!("Opened {} ({}) on channel {}", device.name, device.address, channel);
                    return Ok(Box::new(sink));
                }
                Err(e) => {
                    warn!("RFCOMM channel {} failed: {}", channel, e);
                    last_err = Some(e);
                }
            }
        }

        Err(ConnectError::ConnectFailed(last_err.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "no RFCOMM channels configured")
        })))
    }
}
