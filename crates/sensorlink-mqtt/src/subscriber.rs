//! Inbound message channel with subscription replay.
//!
//! The channel records every subscribed topic in an explicit, append-only,
//! deduplicated list. After a disconnect it backs off, reconnects, and
//! replays the whole list before resuming dispatch; skipping the replay
//! would silently and permanently end inbound traffic after any network
//! blip. All lifecycle handling runs through [`ChannelState::handle_event`],
//! a single serial state machine fed by the polled event loop; there are
//! no lifecycle callbacks and no state captured in closures.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, Packet};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use sensorlink_core::{Error, Result};

use crate::config::{MqttConfig, Qos};
use crate::publisher::await_first_connack;
use crate::topic::TopicPattern;
use crate::ConnectionStatus;

/// A message received from the broker.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Concrete topic the message arrived on.
    pub topic: String,
    /// Raw payload bytes.
    pub payload: Vec<u8>,
}

/// Link-level events consumed by the reconnect state machine.
#[derive(Debug)]
enum LinkEvent {
    /// Broker acknowledged a (re)connection.
    Connected,
    /// A message arrived.
    Message(InboundMessage),
    /// The connection dropped.
    Disconnected,
}

/// Subscribe operations the state machine issues during replay.
///
/// `AsyncClient` is the production sink; tests record the calls instead.
#[async_trait]
trait SubscribeSink: Send + Sync {
    async fn subscribe(&self, topic: &str, qos: Qos) -> Result<()>;
}

#[async_trait]
impl SubscribeSink for AsyncClient {
    async fn subscribe(&self, topic: &str, qos: Qos) -> Result<()> {
        AsyncClient::subscribe(self, topic, qos.into())
            .await
            .map_err(|e| Error::Connectivity(format!("subscribe to {} failed: {}", topic, e)))
    }
}

/// Owned channel state: connection status plus the recorded subscriptions.
struct ChannelState {
    status: RwLock<ConnectionStatus>,
    subscriptions: RwLock<Vec<(String, Qos)>>,
}

impl ChannelState {
    fn new() -> Self {
        Self {
            status: RwLock::new(ConnectionStatus::Connecting),
            subscriptions: RwLock::new(Vec::new()),
        }
    }

    async fn set_status(&self, status: ConnectionStatus) {
        *self.status.write().await = status;
    }

    async fn status(&self) -> ConnectionStatus {
        *self.status.read().await
    }

    /// Record a topic; returns `false` when it was already recorded.
    async fn record(&self, topic: &str, qos: Qos) -> bool {
        let mut subscriptions = self.subscriptions.write().await;
        if subscriptions.iter().any(|(t, _)| t == topic) {
            return false;
        }
        subscriptions.push((topic.to_string(), qos));
        true
    }

    async fn snapshot(&self) -> Vec<(String, Qos)> {
        self.subscriptions.read().await.clone()
    }

    /// Advance the state machine by one event.
    ///
    /// Events arrive serially from the event loop, so a `Connected` replay
    /// always completes before any later `Message` is forwarded.
    async fn handle_event(
        &self,
        event: LinkEvent,
        sink: &dyn SubscribeSink,
        inbound: &mpsc::Sender<InboundMessage>,
    ) {
        match event {
            LinkEvent::Connected => {
                let topics = self.snapshot().await;
                for (topic, qos) in &topics {
                    if let Err(e) = sink.subscribe(topic, *qos).await {
                        warn!(topic = %topic, error = %e, "resubscription failed");
                    }
                }
                if !topics.is_empty() {
                    info!(topics = topics.len(), "replayed recorded subscriptions");
                }
                self.set_status(ConnectionStatus::Connected).await;
            }
            LinkEvent::Message(message) => {
                if inbound.send(message).await.is_err() {
                    debug!("inbound receiver dropped, discarding message");
                }
            }
            LinkEvent::Disconnected => {
                self.set_status(ConnectionStatus::Reconnecting).await;
            }
        }
    }
}

/// MQTT subscriber that survives broker disconnects.
pub struct SubscribeChannel {
    client: AsyncClient,
    state: Arc<ChannelState>,
    running: Arc<AtomicBool>,
    receiver: Mutex<Option<mpsc::Receiver<InboundMessage>>>,
}

impl SubscribeChannel {
    /// Connect to the broker; failure of the initial connection is fatal.
    pub async fn connect(config: MqttConfig) -> Result<Self> {
        let (client, mut event_loop) = config.build_client("sub");
        await_first_connack(
            &mut event_loop,
            config.connection_timeout_secs,
            &config.broker_addr(),
        )
        .await?;
        info!(broker = %config.broker_addr(), "subscribe channel connected");

        let state = Arc::new(ChannelState::new());
        state.set_status(ConnectionStatus::Connected).await;
        let (inbound_tx, inbound_rx) = mpsc::channel(1024);
        let running = Arc::new(AtomicBool::new(true));
        tokio::spawn(drive(
            event_loop,
            client.clone(),
            state.clone(),
            running.clone(),
            inbound_tx,
            config.reconnect_backoff(),
            config.broker_addr(),
        ));

        Ok(Self {
            client,
            state,
            running,
            receiver: Mutex::new(Some(inbound_rx)),
        })
    }

    /// Subscribe to a topic, recording it for replay after reconnects.
    pub async fn subscribe(&self, topic: &str, qos: Qos) -> Result<()> {
        if self.state.record(topic, qos).await {
            debug!(topic, "recorded subscription");
        }
        SubscribeSink::subscribe(&self.client, topic, qos).await
    }

    /// Snapshot of the recorded subscription topics.
    pub async fn subscriptions(&self) -> Vec<String> {
        self.state
            .snapshot()
            .await
            .into_iter()
            .map(|(topic, _)| topic)
            .collect()
    }

    /// Current connection status.
    pub async fn status(&self) -> ConnectionStatus {
        self.state.status().await
    }

    /// Take the inbound message stream; available once per channel.
    pub async fn take_messages(&self) -> Option<mpsc::Receiver<InboundMessage>> {
        self.receiver.lock().await.take()
    }

    /// Stop the event loop and disconnect.
    pub async fn disconnect(&self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.client.disconnect().await;
        self.state.set_status(ConnectionStatus::Disconnected).await;
    }
}

/// Translate event-loop notifications into state-machine events; fixed
/// backoff between reconnect attempts.
async fn drive(
    mut event_loop: EventLoop,
    client: AsyncClient,
    state: Arc<ChannelState>,
    running: Arc<AtomicBool>,
    inbound: mpsc::Sender<InboundMessage>,
    backoff: Duration,
    broker: String,
) {
    while running.load(Ordering::SeqCst) {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack)))
                if ack.code == ConnectReturnCode::Success =>
            {
                info!(broker = %broker, "subscribe channel reconnected");
                state
                    .handle_event(LinkEvent::Connected, &client, &inbound)
                    .await;
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let message = InboundMessage {
                    topic: publish.topic,
                    payload: publish.payload.to_vec(),
                };
                state
                    .handle_event(LinkEvent::Message(message), &client, &inbound)
                    .await;
            }
            Ok(_) => {}
            Err(e) => {
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                state
                    .handle_event(LinkEvent::Disconnected, &client, &inbound)
                    .await;
                warn!(
                    broker = %broker,
                    error = %e,
                    backoff_secs = backoff.as_secs(),
                    "subscribe channel disconnected, backing off"
                );
                sleep(backoff).await;
            }
        }
    }
    debug!(broker = %broker, "subscribe channel event loop stopped");
}

/// Handler invoked for inbound messages whose topic matches a route.
#[async_trait]
pub trait InboundHandler: Send + Sync {
    /// `id` is the identifier extracted from the topic pattern.
    async fn handle(&self, id: &str, payload: &[u8]);
}

/// Routes inbound messages to handlers by id-bearing topic pattern.
#[derive(Default)]
pub struct MessageDispatcher {
    routes: Vec<(TopicPattern, Arc<dyn InboundHandler>)>,
}

impl MessageDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a route; the first matching pattern wins.
    pub fn route(mut self, pattern: TopicPattern, handler: Arc<dyn InboundHandler>) -> Self {
        self.routes.push((pattern, handler));
        self
    }

    /// Dispatch one message; returns whether a route matched.
    pub async fn dispatch(&self, message: &InboundMessage) -> bool {
        for (pattern, handler) in &self.routes {
            if let Some(id) = pattern.extract(&message.topic) {
                handler.handle(id, &message.payload).await;
                return true;
            }
        }
        debug!(topic = %message.topic, "no route for inbound message");
        false
    }

    /// Drain a channel's messages until it closes.
    pub async fn run(self, mut messages: mpsc::Receiver<InboundMessage>) {
        while let Some(message) = messages.recv().await {
            self.dispatch(&message).await;
        }
        debug!("inbound dispatch loop ended");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    struct RecordingSink {
        subscribed: StdMutex<Vec<String>>,
    }

    impl RecordingSink {
        fn new() -> Self {
            Self {
                subscribed: StdMutex::new(Vec::new()),
            }
        }

        fn topics(&self) -> Vec<String> {
            self.subscribed.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SubscribeSink for RecordingSink {
        async fn subscribe(&self, topic: &str, _qos: Qos) -> Result<()> {
            self.subscribed.lock().unwrap().push(topic.to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_reconnect_replays_all_recorded_topics_before_dispatch() {
        let state = ChannelState::new();
        let sink = RecordingSink::new();
        let (tx, mut rx) = mpsc::channel(8);

        for topic in ["a/1", "b/2", "c/3"] {
            assert!(state.record(topic, Qos::AtLeastOnce).await);
        }

        state.handle_event(LinkEvent::Disconnected, &sink, &tx).await;
        assert_eq!(state.status().await, ConnectionStatus::Reconnecting);

        state.handle_event(LinkEvent::Connected, &sink, &tx).await;
        let message = InboundMessage {
            topic: "a/1".into(),
            payload: b"42".to_vec(),
        };
        state
            .handle_event(LinkEvent::Message(message), &sink, &tx)
            .await;

        // All three topics were replayed before the message came through.
        assert_eq!(sink.topics(), vec!["a/1", "b/2", "c/3"]);
        assert_eq!(state.status().await, ConnectionStatus::Connected);
        let delivered = rx.recv().await.unwrap();
        assert_eq!(delivered.topic, "a/1");
    }

    #[tokio::test]
    async fn test_subscription_list_dedups_by_topic() {
        let state = ChannelState::new();
        assert!(state.record("devices/+/position", Qos::AtLeastOnce).await);
        assert!(!state.record("devices/+/position", Qos::ExactlyOnce).await);
        assert_eq!(state.snapshot().await.len(), 1);
    }

    #[tokio::test]
    async fn test_replay_survives_individual_failures() {
        struct FlakySink {
            calls: StdMutex<Vec<String>>,
        }

        #[async_trait]
        impl SubscribeSink for FlakySink {
            async fn subscribe(&self, topic: &str, _qos: Qos) -> Result<()> {
                self.calls.lock().unwrap().push(topic.to_string());
                if topic == "b/2" {
                    return Err(Error::Connectivity("boom".into()));
                }
                Ok(())
            }
        }

        let state = ChannelState::new();
        let sink = FlakySink {
            calls: StdMutex::new(Vec::new()),
        };
        let (tx, _rx) = mpsc::channel(8);
        for topic in ["a/1", "b/2", "c/3"] {
            state.record(topic, Qos::AtLeastOnce).await;
        }

        state.handle_event(LinkEvent::Connected, &sink, &tx).await;

        // A failed resubscription does not stop the rest of the replay.
        assert_eq!(sink.calls.lock().unwrap().len(), 3);
        assert_eq!(state.status().await, ConnectionStatus::Connected);
    }

    struct CapturingHandler {
        seen: StdMutex<Vec<(String, Vec<u8>)>>,
    }

    #[async_trait]
    impl InboundHandler for CapturingHandler {
        async fn handle(&self, id: &str, payload: &[u8]) {
            self.seen
                .lock()
                .unwrap()
                .push((id.to_string(), payload.to_vec()));
        }
    }

    #[tokio::test]
    async fn test_dispatcher_routes_by_extracted_id() {
        let handler = Arc::new(CapturingHandler {
            seen: StdMutex::new(Vec::new()),
        });
        let dispatcher = MessageDispatcher::new().route(
            TopicPattern::new("v1.0/Things({id})/Locations").unwrap(),
            handler.clone(),
        );

        let matched = dispatcher
            .dispatch(&InboundMessage {
                topic: "v1.0/Things(42)/Locations".into(),
                payload: b"{}".to_vec(),
            })
            .await;
        let unmatched = dispatcher
            .dispatch(&InboundMessage {
                topic: "v1.0/Sensors(42)".into(),
                payload: b"{}".to_vec(),
            })
            .await;

        assert!(matched);
        assert!(!unmatched);
        let seen = handler.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, "42");
    }
}
