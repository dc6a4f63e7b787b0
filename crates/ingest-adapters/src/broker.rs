//! Broker Adapter (C2): one logical subscription session per broker
//! `Client`, backed by `rumqttc`'s `AsyncClient` + `EventLoop` pair.
//!
//! Grounded on `original_source/mqtt_client.py`'s `subscribe_to_topics`
//! retry-forever loop: the Python original wraps `async with self.client`
//! in a `while True`/`except aiomqtt.MqttError: sleep(interval)` loop;
//! `rumqttc::EventLoop::poll()` already surfaces connect/disconnect as
//! events rather than exceptions, so the loop below matches it on a single
//! `match eventloop.poll().await` instead.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ingest_core::engine::{ChainEngine, SourceShape};
use ingest_core::errors::CoreError;
use ingest_core::registry::BrokerClient;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

const RECONNECT_INTERVAL: Duration = Duration::from_secs(10);
const KEEPALIVE_TOPIC: &str = "$SYS/keepalive";

pub struct RumqttcBroker {
    client_id: String,
    async_client: AsyncClient,
    desired_topics: Arc<RwLock<HashSet<String>>>,
}

impl RumqttcBroker {
    /// Builds the client and its event loop; the event loop must be driven
    /// by `run` for the connection to actually come up.
    pub fn new(client_id: impl Into<String>, host: &str, port: u16, username: Option<&str>, password: Option<&str>) -> (Self, rumqttc::EventLoop) {
        let client_id = client_id.into();
        let mut options = MqttOptions::new(client_id.clone(), host, port);
        options.set_keep_alive(Duration::from_secs(30));
        if let (Some(user), Some(pass)) = (username, password) {
            options.set_credentials(user, pass);
        }
        let (async_client, eventloop) = AsyncClient::new(options, 64);
        (Self { client_id, async_client, desired_topics: Arc::new(RwLock::new(HashSet::new())) }, eventloop)
    }

    /// Adds `topics` to the desired subscription set. Effective
    /// subscription happens on the next `CONNECTED` transition inside
    /// `run`, and on every reconnect after that (spec §4.2).
    pub async fn subscribe(&self, topics: &[String]) {
        let mut desired = self.desired_topics.write().await;
        for topic in topics {
            desired.insert(topic.clone());
        }
    }

    /// Drives the event loop forever: reconnects with unbounded retry on
    /// any transport error, re-subscribes the full desired topic set on
    /// every `CONNECTED` entry, and forwards inbound publishes to
    /// `engine.handle`. Runs until `shutdown` is cancelled.
    pub async fn run(&self, mut eventloop: rumqttc::EventLoop, engine: Arc<ChainEngine>, shutdown: CancellationToken) {
        loop {
            if shutdown.is_cancelled() {
                return;
            }
            let poll = tokio::select! {
                _ = shutdown.cancelled() => return,
                poll = eventloop.poll() => poll,
            };
            match poll {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    log::info!("broker client '{}' connected", self.client_id);
                    self.resubscribe_all().await;
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let topic = publish.topic.clone();
                    let raw = String::from_utf8_lossy(&publish.payload).to_string();
                    let engine = engine.clone();
                    let client_id = self.client_id.clone();
                    tokio::spawn(async move {
                        engine.handle(&raw, &client_id, SourceShape::Broker { topic: &topic }).await;
                    });
                }
                Ok(_) => {}
                Err(err) => {
                    log::error!("broker client '{}' transport error: {}; reconnecting in {:?}", self.client_id, err, RECONNECT_INTERVAL);
                    tokio::time::sleep(RECONNECT_INTERVAL).await;
                }
            }
        }
    }

    async fn resubscribe_all(&self) {
        let mut topics: Vec<String> = self.desired_topics.read().await.iter().cloned().collect();
        if topics.is_empty() {
            topics.push(KEEPALIVE_TOPIC.to_string());
        }
        for topic in topics {
            if let Err(err) = self.async_client.subscribe(&topic, QoS::AtLeastOnce).await {
                log::error!("broker client '{}' failed to subscribe to '{}': {}", self.client_id, topic, err);
            }
        }
    }
}

#[async_trait]
impl BrokerClient for RumqttcBroker {
    fn client_id(&self) -> &str {
        &self.client_id
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), CoreError> {
        self.async_client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|err| crate::errors::from_rumqttc_client(&self.client_id, err))
    }

    async fn close(&self) {
        if let Err(err) = self.async_client.disconnect().await {
            log::warn!("broker client '{}' failed to disconnect cleanly: {}", self.client_id, err);
        }
    }
}
