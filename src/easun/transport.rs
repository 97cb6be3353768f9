use crate::prelude::*;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// A byte-oriented duplex channel to one inverter.
///
/// Implementations are used strictly sequentially: one write, then one read,
/// before the next command is issued. Dropping a transport closes it.
#[async_trait]
pub trait Transport: Send {
    fn device(&self) -> &str;

    async fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Read at most `max` bytes; a short reply returns only what the device
    /// had available.
    async fn read(&mut self, max: usize) -> Result<Vec<u8>, TransportError>;
}

/// Opens transports by device path.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, device: &str) -> Result<Box<dyn Transport>, TransportError>;
}

// Hid {{{
/// A `/dev/hidrawN` node used as a raw read/write channel.
pub struct HidTransport {
    device: String,
    file: tokio::fs::File,
}

impl HidTransport {
    pub async fn open(device: &str) -> Result<Self, TransportError> {
        let file = tokio::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(device)
            .await
            .map_err(|err| TransportError::unavailable(device, err))?;

        info!("opened {}", device);

        Ok(Self {
            device: device.to_owned(),
            file,
        })
    }
}

#[async_trait]
impl Transport for HidTransport {
    fn device(&self) -> &str {
        &self.device
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.file
            .write_all(bytes)
            .await
            .map_err(|err| TransportError::io(&self.device, err))?;

        self.file
            .flush()
            .await
            .map_err(|err| TransportError::io(&self.device, err))
    }

    async fn read(&mut self, max: usize) -> Result<Vec<u8>, TransportError> {
        let mut buf = vec![0; max];

        let len = self
            .file
            .read(&mut buf)
            .await
            .map_err(|err| TransportError::io(&self.device, err))?;
        buf.truncate(len);

        Ok(buf)
    }
}

impl Drop for HidTransport {
    fn drop(&mut self) {
        debug!("closing {}", self.device);
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct HidConnector;

#[async_trait]
impl Connector for HidConnector {
    async fn open(&self, device: &str) -> Result<Box<dyn Transport>, TransportError> {
        Ok(Box::new(HidTransport::open(device).await?))
    }
} // }}}
