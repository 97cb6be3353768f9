#![allow(dead_code)]

pub use easun_bridge::prelude::*;
pub use easun_bridge::easun::transport::{Connector, Transport};

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const QPIGS_REPLY: &[u8] =
    b"(230.1 50.0 230.0 50.0 0500 0400 00 00 51.2 080 00 00 0120\r\x00";

pub fn common_setup() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub struct Factory();
impl Factory {
    pub fn inverter(n: u8) -> config::Inverter {
        config::Inverter::new(
            &format!("easun{}", n),
            &format!("/dev/hidraw{}", n),
            &format!("easun/{}", n),
        )
    }

    pub fn config(inverters: Vec<config::Inverter>) -> Config {
        Config {
            inverters,
            settle_delay: Duration::ZERO,
            poll_interval: Duration::from_secs(3600),
            ..Config::default()
        }
    }

    pub fn config_wrapper(inverters: Vec<config::Inverter>) -> ConfigWrapper {
        ConfigWrapper::from_config(Self::config(inverters))
    }
}

/// Everything the mock transports saw, in order, across all devices.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    Open(String),
    Write(String, Vec<u8>),
    Read(String),
}

#[derive(Clone, Debug)]
pub enum Reply {
    Bytes(Vec<u8>),
    IoError,
}

#[derive(Default)]
struct State {
    events: Vec<Event>,
    unavailable: HashSet<String>,
    replies: HashMap<String, VecDeque<Reply>>,
}

#[derive(Clone, Default)]
pub struct MockConnector {
    state: Arc<Mutex<State>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, device: &str, unavailable: bool) {
        let mut state = self.state.lock().unwrap();
        if unavailable {
            state.unavailable.insert(device.to_owned());
        } else {
            state.unavailable.remove(device);
        }
    }

    pub fn push_reply(&self, device: &str, reply: Reply) {
        self.state
            .lock()
            .unwrap()
            .replies
            .entry(device.to_owned())
            .or_default()
            .push_back(reply);
    }

    pub fn events(&self) -> Vec<Event> {
        self.state.lock().unwrap().events.clone()
    }

    pub fn writes(&self) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| matches!(e, Event::Write(_, _)))
            .collect()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn open(&self, device: &str) -> Result<Box<dyn Transport>, TransportError> {
        let mut state = self.state.lock().unwrap();
        state.events.push(Event::Open(device.to_owned()));

        if state.unavailable.contains(device) {
            return Err(TransportError::unavailable(
                device,
                std::io::Error::new(std::io::ErrorKind::NotFound, "no such device"),
            ));
        }

        Ok(Box::new(MockTransport {
            device: device.to_owned(),
            state: self.state.clone(),
        }))
    }
}

pub struct MockTransport {
    device: String,
    state: Arc<Mutex<State>>,
}

#[async_trait]
impl Transport for MockTransport {
    fn device(&self) -> &str {
        &self.device
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.state
            .lock()
            .unwrap()
            .events
            .push(Event::Write(self.device.clone(), bytes.to_vec()));
        Ok(())
    }

    async fn read(&mut self, max: usize) -> Result<Vec<u8>, TransportError> {
        let mut state = self.state.lock().unwrap();
        state.events.push(Event::Read(self.device.clone()));

        let reply = state
            .replies
            .get_mut(&self.device)
            .and_then(|q| q.pop_front());

        match reply {
            Some(Reply::Bytes(mut bytes)) => {
                bytes.truncate(max);
                Ok(bytes)
            }
            Some(Reply::IoError) => Err(TransportError::io(
                &self.device,
                std::io::Error::new(std::io::ErrorKind::BrokenPipe, "device went away"),
            )),
            None => Ok(Vec::new()),
        }
    }
}

/// Drain everything currently queued for MQTT.
pub fn drain_messages(rx: &mut broadcast::Receiver<mqtt::ChannelData>) -> Vec<mqtt::Message> {
    let mut r = Vec::new();
    while let Ok(data) = rx.try_recv() {
        if let mqtt::ChannelData::Message(message) = data {
            r.push(message);
        }
    }
    r
}

/// Minimal MQTT 3.1.1 broker for one client: answers CONNECT with a
/// successful CONNACK, acks QoS 1 publishes and records their topics.
#[derive(Clone, Default)]
pub struct FakeBroker {
    topics: Arc<Mutex<Vec<String>>>,
}

impl FakeBroker {
    /// Listen on an ephemeral localhost port; returns the broker and port.
    pub async fn start() -> (Self, u16) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let broker = Self::default();
        let topics = broker.topics.clone();
        tokio::spawn(async move {
            if let Ok((socket, _)) = listener.accept().await {
                let _ = Self::serve(socket, topics).await;
            }
        });

        (broker, port)
    }

    pub fn topics(&self) -> Vec<String> {
        self.topics.lock().unwrap().clone()
    }

    async fn serve(
        mut socket: tokio::net::TcpStream,
        topics: Arc<Mutex<Vec<String>>>,
    ) -> std::io::Result<()> {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        loop {
            let header = socket.read_u8().await?;

            let mut len = 0usize;
            let mut shift = 0;
            loop {
                let b = socket.read_u8().await?;
                len |= ((b & 0x7F) as usize) << shift;
                if b & 0x80 == 0 {
                    break;
                }
                shift += 7;
            }

            let mut body = vec![0; len];
            socket.read_exact(&mut body).await?;

            match header >> 4 {
                // CONNECT
                1 => socket.write_all(&[0x20, 0x02, 0x00, 0x00]).await?,
                // PUBLISH
                3 => {
                    let topic_len = u16::from_be_bytes([body[0], body[1]]) as usize;
                    let topic = String::from_utf8_lossy(&body[2..2 + topic_len]).to_string();
                    topics.lock().unwrap().push(topic);

                    if header & 0x06 != 0 {
                        let id = &body[2 + topic_len..4 + topic_len];
                        socket.write_all(&[0x40, 0x02, id[0], id[1]]).await?;
                    }
                }
                // PINGREQ
                12 => socket.write_all(&[0xD0, 0x00]).await?,
                // DISCONNECT
                14 => return Ok(()),
                _ => {}
            }
        }
    }
}

/// Poll `f` every 10ms for up to 5s.
pub async fn wait_for(mut f: impl FnMut() -> bool) -> bool {
    for _ in 0..500 {
        if f() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    f()
}
