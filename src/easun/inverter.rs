use crate::prelude::*;
use crate::easun::packet::Command;
use crate::easun::telemetry::TelemetryRecord;
use crate::easun::transport::{Connector, Transport};

use std::time::Duration;

/// Result of polling one inverter once.
#[derive(Debug)]
pub enum PollOutcome {
    Telemetry(TelemetryRecord),
    /// The device answered but the reply held no usable telemetry.
    Empty,
    /// The exchange failed part way; the handle has been closed.
    TransportError(TransportError),
    /// The device could not be opened at all.
    Unavailable(TransportError),
}

impl PollOutcome {
    pub fn is_telemetry(&self) -> bool {
        matches!(self, PollOutcome::Telemetry(_))
    }
}

/// Timing and sizing of a single command/reply exchange.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Exchange {
    /// Time the firmware needs between receiving a command and having its
    /// reply ready to read.
    pub settle_delay: Duration,
    /// Upper bound for the single read; replies are not length-prefixed.
    pub read_size: usize,
}

/// One configured target and its (possibly closed) transport handle.
pub struct Inverter {
    config: config::Inverter,
    transport: Option<Box<dyn Transport>>,
    frames_written: u64,
}

impl Inverter {
    pub fn new(config: config::Inverter) -> Self {
        Self {
            config,
            transport: None,
            frames_written: 0,
        }
    }

    pub fn config(&self) -> &config::Inverter {
        &self.config
    }

    /// Frames fully written to the device since startup.
    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    pub fn is_open(&self) -> bool {
        self.transport.is_some()
    }

    pub async fn open(&mut self, connector: &dyn Connector) -> Result<(), TransportError> {
        let transport = connector.open(self.config.device()).await?;
        self.transport = Some(transport);
        Ok(())
    }

    pub fn close(&mut self) {
        self.transport = None;
    }

    /// frame -> write -> settle -> read -> parse. Reopens the transport first
    /// if an earlier failure closed it.
    pub async fn poll(&mut self, connector: &dyn Connector, exchange: Exchange) -> PollOutcome {
        let mut transport = match self.transport.take() {
            Some(transport) => transport,
            None => match connector.open(self.config.device()).await {
                Ok(transport) => transport,
                Err(err) => return PollOutcome::Unavailable(err),
            },
        };

        let result = Self::exchange(
            transport.as_mut(),
            &Command::qpigs(),
            exchange,
            &mut self.frames_written,
        )
        .await;

        match result {
            Ok(reply) => {
                self.transport = Some(transport);
                match TelemetryRecord::parse(&reply) {
                    Some(record) => PollOutcome::Telemetry(record),
                    None => PollOutcome::Empty,
                }
            }
            // transport is dropped here, next cycle reopens it
            Err(err) => PollOutcome::TransportError(err),
        }
    }

    async fn exchange(
        transport: &mut dyn Transport,
        command: &Command,
        exchange: Exchange,
        frames_written: &mut u64,
    ) -> Result<Vec<u8>, TransportError> {
        let frame = command.frame();
        debug!("{}: TX {} {:?}", transport.device(), command, frame);
        transport.write(frame.bytes()).await?;
        *frames_written += 1;

        tokio::time::sleep(exchange.settle_delay).await;

        let reply = transport.read(exchange.read_size).await?;
        debug!("{}: RX {} bytes", transport.device(), reply.len());

        Ok(reply)
    }
}
