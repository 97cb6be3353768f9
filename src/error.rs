use thiserror::Error;

/// Failures talking to the inverter's HID device. The poller treats the two
/// variants differently: `Unavailable` produces fallback telemetry, `Io`
/// only abandons the current target's cycle.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("device {device} unavailable: {source}")]
    Unavailable {
        device: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error on {device}: {source}")]
    Io {
        device: String,
        #[source]
        source: std::io::Error,
    },
}

impl TransportError {
    pub fn unavailable(device: &str, source: std::io::Error) -> Self {
        Self::Unavailable {
            device: device.to_owned(),
            source,
        }
    }

    pub fn io(device: &str, source: std::io::Error) -> Self {
        Self::Io {
            device: device.to_owned(),
            source,
        }
    }

    pub fn device(&self) -> &str {
        match self {
            Self::Unavailable { device, .. } | Self::Io { device, .. } => device,
        }
    }
}
