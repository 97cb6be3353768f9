use crate::prelude::*;
use crate::config::PublishMode;
use crate::easun::telemetry::TelemetryRecord;
use crate::poller::PollStats;

use rumqttc::{AsyncClient, Event, EventLoop, Incoming, LastWill, MqttOptions, QoS};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const STATUS_OK: &str = "ok";
pub const STATUS_NO_DEVICE: &str = "no_device";

/// Requests rumqttc buffers between the sender and the event loop. Holds
/// several cycles of `both`-mode output for a handful of inverters, so the
/// burst sent before the first ConnAck fits.
pub const REQUEST_QUEUE_SIZE: usize = 100;

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

// Message {{{
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct Message {
    pub topic: String,
    pub retain: bool,
    pub payload: String,
}

impl Message {
    /// `<prefix>/<field>` = scalar, one message per field.
    pub fn for_fields(prefix: &str, record: &TelemetryRecord) -> Result<Vec<Message>> {
        let mut r = Vec::new();

        for (field, value) in record.pairs() {
            r.push(mqtt::Message {
                topic: format!("{}/{}", prefix, field),
                retain: false,
                payload: value.to_payload()?,
            });
        }

        Ok(r)
    }

    /// Whole record as one JSON object on `<prefix>/telemetry`.
    pub fn for_record(
        inverter: &config::Inverter,
        record: &TelemetryRecord,
        timestamp: i64,
    ) -> Result<Message> {
        let mut object = match serde_json::to_value(record)? {
            serde_json::Value::Object(object) => object,
            other => bail!("telemetry serialised to {:?}, expected an object", other),
        };
        object.insert("name".to_string(), json!(inverter.name()));
        object.insert("status".to_string(), json!(STATUS_OK));
        object.insert("timestamp".to_string(), json!(timestamp));

        Ok(mqtt::Message {
            topic: Self::telemetry_topic(inverter),
            retain: false,
            payload: serde_json::to_string(&object)?,
        })
    }

    pub fn for_telemetry(
        inverter: &config::Inverter,
        record: &TelemetryRecord,
        mode: PublishMode,
        timestamp: i64,
    ) -> Result<Vec<Message>> {
        let mut r = Vec::new();

        if mode.fields() {
            r.extend(Self::for_fields(&inverter.mqtt_prefix(), record)?);
        }
        if mode.record() {
            r.push(Self::for_record(inverter, record, timestamp)?);
        }

        Ok(r)
    }

    /// Zeroed stand-in published when the device can't be opened, so
    /// consumers still see one message per interval.
    pub fn for_fallback(inverter: &config::Inverter, timestamp: i64) -> Result<Message> {
        let payload = json!({
            "name": inverter.name(),
            "status": STATUS_NO_DEVICE,
            "power_w": 0,
            "voltage_v": 0,
            "timestamp": timestamp,
        });

        Ok(mqtt::Message {
            topic: Self::telemetry_topic(inverter),
            retain: false,
            payload: serde_json::to_string(&payload)?,
        })
    }

    fn telemetry_topic(inverter: &config::Inverter) -> String {
        format!("{}/telemetry", inverter.mqtt_prefix())
    }
} // }}}

#[derive(Eq, PartialEq, Debug, Clone)]
pub enum ChannelData {
    Message(Message),
    Shutdown,
}

/// Broker connection. Drains `to_mqtt` until it sees `Shutdown`, then
/// disconnects.
pub struct Mqtt {
    config: ConfigWrapper,
    messages: broadcast::Receiver<ChannelData>,
    shutdown: broadcast::Receiver<ChannelData>,
    shared_stats: Arc<Mutex<PollStats>>,
}

impl Mqtt {
    // receivers are taken here so messages sent before start() runs are
    // buffered rather than dropped
    pub fn new(config: ConfigWrapper, channels: Channels, shared_stats: Arc<Mutex<PollStats>>) -> Self {
        Self {
            config,
            messages: channels.to_mqtt.subscribe(),
            shutdown: channels.to_mqtt.subscribe(),
            shared_stats,
        }
    }

    pub async fn start(self) -> Result<()> {
        let c = &self.config;

        if !c.mqtt_enabled() {
            info!("mqtt disabled, skipping");
            return Ok(());
        }

        let mut options = MqttOptions::new("easun-bridge", c.mqtt_host(), c.mqtt_port());

        let lwt_topic = self.lwt_topic();
        let will = LastWill {
            topic: lwt_topic.clone(),
            message: bytes::Bytes::from("offline"),
            qos: QoS::AtLeastOnce,
            retain: true,
        };
        options.set_last_will(will);

        options.set_keep_alive(Duration::from_secs(60));
        if let (Some(u), Some(p)) = (c.mqtt_user(), c.mqtt_password()) {
            options.set_credentials(u, p);
        } else if let Some(u) = c.mqtt_user() {
            options.set_credentials(u, "");
        }

        info!("initializing mqtt at {}:{}", c.mqtt_host(), c.mqtt_port());

        let (client, eventloop) = AsyncClient::new(options, REQUEST_QUEUE_SIZE);
        let connected = Arc::new(AtomicBool::new(false));

        let Self {
            config,
            messages,
            shutdown,
            shared_stats,
        } = self;

        futures::try_join!(
            Self::receiver(
                &config,
                &lwt_topic,
                client.clone(),
                eventloop,
                shutdown,
                &connected
            ),
            Self::sender(client, messages, &shared_stats, &connected)
        )?;

        Ok(())
    }

    // keeps the connection alive and tracks whether the broker is reachable;
    // rumqttc reconnects on the next poll after an error
    async fn receiver(
        config: &ConfigWrapper,
        lwt_topic: &str,
        client: AsyncClient,
        mut eventloop: EventLoop,
        mut shutdown: broadcast::Receiver<ChannelData>,
        connected: &AtomicBool,
    ) -> Result<()> {
        loop {
            tokio::select! {
                _ = Self::shutdown_requested(&mut shutdown) => break,

                event = eventloop.poll() => match event {
                    Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                        info!("connected to mqtt at {}:{}", config.mqtt_host(), config.mqtt_port());
                        connected.store(true, Ordering::Relaxed);
                        if let Err(err) = client.try_publish(lwt_topic, QoS::AtLeastOnce, true, "online") {
                            warn!("failed to publish {}: {}", lwt_topic, err);
                        }
                    }
                    Ok(_) => {} // keepalives etc
                    Err(e) => {
                        connected.store(false, Ordering::Relaxed);
                        error!("{}", e);
                        info!("reconnecting in {}s", RECONNECT_DELAY.as_secs());
                        tokio::select! {
                            _ = Self::shutdown_requested(&mut shutdown) => break,
                            _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                        }
                    }
                },
            }
        }

        info!("MQTT receiver loop exiting");
        Ok(())
    }

    async fn shutdown_requested(shutdown: &mut broadcast::Receiver<ChannelData>) {
        loop {
            match shutdown.recv().await {
                Ok(ChannelData::Shutdown) | Err(broadcast::error::RecvError::Closed) => return,
                _ => {}
            }
        }
    }

    // poller -> mqtt
    async fn sender(
        client: AsyncClient,
        mut receiver: broadcast::Receiver<ChannelData>,
        shared_stats: &Arc<Mutex<PollStats>>,
        connected: &AtomicBool,
    ) -> Result<()> {
        loop {
            match receiver.recv().await {
                Ok(ChannelData::Shutdown) => {
                    info!("MQTT sender received shutdown signal");
                    let _ = if connected.load(Ordering::Relaxed) {
                        client.disconnect().await
                    } else {
                        client.try_disconnect()
                    };
                    break;
                }
                Ok(ChannelData::Message(message)) => {
                    Self::publish(&client, message, shared_stats, connected).await
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("MQTT sender lagging, {} messages dropped", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }

        info!("MQTT sender loop exiting");
        Ok(())
    }

    // While connected, waits for room in the client queue. While the broker is
    // unreachable nothing drains that queue, so once it is full further
    // messages are dropped with an error instead.
    async fn publish(
        client: &AsyncClient,
        message: Message,
        shared_stats: &Arc<Mutex<PollStats>>,
        connected: &AtomicBool,
    ) {
        debug!("publishing: {} = {}", message.topic, message.payload);

        let payload = message.payload.into_bytes();
        let result = if connected.load(Ordering::Relaxed) {
            client
                .publish(&message.topic, QoS::AtLeastOnce, message.retain, payload)
                .await
        } else {
            client.try_publish(&message.topic, QoS::AtLeastOnce, message.retain, payload)
        };

        match result {
            Ok(()) => {
                if let Ok(mut stats) = shared_stats.lock() {
                    stats.mqtt_messages_sent += 1;
                }
            }
            Err(err) => {
                error!("MQTT publish to {} failed: {}", message.topic, err);
                if let Ok(mut stats) = shared_stats.lock() {
                    stats.mqtt_errors += 1;
                }
            }
        }
    }

    fn lwt_topic(&self) -> String {
        format!("{}/LWT", self.config.mqtt_namespace())
    }
}
