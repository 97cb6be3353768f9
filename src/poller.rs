use crate::prelude::*;
use crate::easun::inverter::{Exchange, Inverter, PollOutcome};
use crate::easun::transport::Connector;

use std::sync::{Arc, Mutex};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PollStats {
    pub cycles: u64,
    pub frames_written: u64,
    pub telemetry_records: u64,
    pub empty_replies: u64,
    pub transport_errors: u64,
    pub fallbacks: u64,
    pub messages_dropped: u64,
    pub mqtt_messages_sent: u64,
    pub mqtt_errors: u64,
}

impl PollStats {
    pub fn print_summary(&self) {
        info!("Poll Statistics:");
        info!("  Cycles: {}", self.cycles);
        info!("  Frames written: {}", self.frames_written);
        info!("  Telemetry records: {}", self.telemetry_records);
        info!("  Empty replies: {}", self.empty_replies);
        info!("  Transport errors: {}", self.transport_errors);
        info!("  Fallback records: {}", self.fallbacks);
        info!("  MQTT:");
        info!("    Messages sent: {}", self.mqtt_messages_sent);
        info!("    Errors: {}", self.mqtt_errors);
        info!("    Dropped (not connected): {}", self.messages_dropped);
    }
}

/// What one pass over the inverters produced. `stopped` is set when a stop
/// signal arrived part way, in which case `outcomes` is shorter than the
/// number of inverters.
#[derive(Debug, Default)]
pub struct Cycle {
    pub outcomes: Vec<PollOutcome>,
    pub stopped: bool,
}

/// Drives the QPIGS cycle over every enabled inverter, one at a time, and
/// hands the results to the MQTT channel.
pub struct Poller {
    config: ConfigWrapper,
    channels: Channels,
    connector: Arc<dyn Connector>,
    inverters: Vec<Inverter>,
    shared_stats: Arc<Mutex<PollStats>>,
}

impl Poller {
    pub fn new(
        config: ConfigWrapper,
        channels: Channels,
        connector: Arc<dyn Connector>,
        shared_stats: Arc<Mutex<PollStats>>,
    ) -> Self {
        let inverters = config
            .enabled_inverters()
            .into_iter()
            .map(Inverter::new)
            .collect();

        Self {
            config,
            channels,
            connector,
            inverters,
            shared_stats,
        }
    }

    pub fn inverters(&self) -> &[Inverter] {
        &self.inverters
    }

    /// Open every inverter's transport. Failures are logged only; those
    /// inverters get fallback telemetry until a later cycle manages to open
    /// them.
    pub async fn open(&mut self) {
        for inverter in &mut self.inverters {
            let name = inverter.config().name().to_owned();
            match inverter.open(self.connector.as_ref()).await {
                Ok(()) => info!("inverter {}: transport open", name),
                Err(err) => warn!("inverter {}: {}", name, err),
            }
        }
    }

    pub fn close(&mut self) {
        for inverter in &mut self.inverters {
            inverter.close();
        }
    }

    /// Poll until a stop signal arrives. The signal is honoured between
    /// inverters and during the sleep, never in the middle of an exchange.
    pub async fn run(&mut self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        info!(
            "polling {} inverter(s) every {}s",
            self.inverters.len(),
            self.config.poll_interval().as_secs()
        );

        self.open().await;

        loop {
            let cycle = self.poll_cycle(&mut shutdown_rx).await;
            if cycle.stopped {
                break;
            }

            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = tokio::time::sleep(self.config.poll_interval()) => {}
            }
        }

        info!("stop requested, poller exiting");
        self.close();

        Ok(())
    }

    pub async fn poll_cycle(&mut self, shutdown_rx: &mut broadcast::Receiver<()>) -> Cycle {
        let exchange = Exchange {
            settle_delay: self.config.settle_delay(),
            read_size: self.config.read_size(),
        };

        if let Ok(mut stats) = self.shared_stats.lock() {
            stats.cycles += 1;
        }

        let mut cycle = Cycle::default();

        for i in 0..self.inverters.len() {
            if Self::stop_requested(shutdown_rx) {
                cycle.stopped = true;
                break;
            }

            let written = self.inverters[i].frames_written();
            let outcome = self.inverters[i]
                .poll(self.connector.as_ref(), exchange)
                .await;
            let written = self.inverters[i].frames_written() - written;
            self.count(|s| s.frames_written += written);
            let inverter = self.inverters[i].config().clone();
            self.handle_outcome(&inverter, &outcome);
            cycle.outcomes.push(outcome);
        }

        cycle
    }

    fn handle_outcome(&self, inverter: &config::Inverter, outcome: &PollOutcome) {
        let timestamp = chrono::Utc::now().timestamp();

        match outcome {
            PollOutcome::Telemetry(record) => {
                self.count(|s| s.telemetry_records += 1);
                match mqtt::Message::for_telemetry(
                    inverter,
                    record,
                    self.config.publish_mode(),
                    timestamp,
                ) {
                    Ok(messages) => {
                        for message in messages {
                            self.publish(message);
                        }
                    }
                    Err(err) => error!("inverter {}: {}", inverter.name(), err),
                }
            }
            PollOutcome::Empty => {
                self.count(|s| s.empty_replies += 1);
                warn!("inverter {}: no telemetry in reply", inverter.name());
            }
            PollOutcome::TransportError(err) => {
                self.count(|s| s.transport_errors += 1);
                error!("inverter {}: {}", inverter.name(), err);
            }
            PollOutcome::Unavailable(err) => {
                self.count(|s| s.fallbacks += 1);
                warn!(
                    "inverter {}: {}, publishing fallback telemetry",
                    inverter.name(),
                    err
                );
                match mqtt::Message::for_fallback(inverter, timestamp) {
                    Ok(message) => self.publish(message),
                    Err(err) => error!("inverter {}: {}", inverter.name(), err),
                }
            }
        }
    }

    fn publish(&self, message: mqtt::Message) {
        debug!("queueing {} = {}", message.topic, message.payload);

        if let Err(err) = self
            .channels
            .to_mqtt
            .send(mqtt::ChannelData::Message(message))
        {
            if let mqtt::ChannelData::Message(message) = err.0 {
                warn!("MQTT not connected, dropping {} = {}", message.topic, message.payload);
            }
            self.count(|s| s.messages_dropped += 1);
        }
    }

    fn count(&self, f: impl FnOnce(&mut PollStats)) {
        if let Ok(mut stats) = self.shared_stats.lock() {
            f(&mut stats);
        }
    }

    fn stop_requested(shutdown_rx: &mut broadcast::Receiver<()>) -> bool {
        !matches!(
            shutdown_rx.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        )
    }
}
