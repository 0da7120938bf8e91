use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, Outgoing, QoS};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::{sleep, timeout, Instant},
};
use tracing::{debug, info, warn};

use spouty_common::{document_topic, AppConfig, DeviceSnapshot, DocumentState, MqttConfig};

const EVENT_BUFFER: usize = 32;
const RECONNECT_DELAY: Duration = Duration::from_secs(2);
const CLOSE_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq)]
pub enum MirrorEvent {
    Snapshot(DeviceSnapshot),
    Absent,
    Error(String),
}

impl MirrorEvent {
    /// The document state this event establishes, if it carries one.
    pub fn document(&self) -> Option<DocumentState> {
        match self {
            Self::Snapshot(snapshot) => Some(DocumentState::Present(snapshot.clone())),
            Self::Absent => Some(DocumentState::Absent),
            Self::Error(_) => None,
        }
    }
}

/// Raw happenings on the push connection, before decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    Subscribed,
    Document(Vec<u8>),
    Idle,
}

#[async_trait]
pub trait PushSource: Send {
    async fn next(&mut self) -> Result<FeedEvent, String>;

    /// Ends the connection cleanly before the feed stops.
    async fn close(&mut self) {}
}

#[derive(Debug, Clone)]
pub struct MirrorContext {
    pub device_id: String,
    pub mqtt: MqttConfig,
    pub initial_sync: Duration,
}

impl MirrorContext {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            device_id: config.device_id.clone(),
            mqtt: config.mqtt.clone(),
            initial_sync: Duration::from_millis(config.initial_sync_ms),
        }
    }
}

struct MqttSource {
    client: AsyncClient,
    eventloop: EventLoop,
    topic: String,
}

#[async_trait]
impl PushSource for MqttSource {
    async fn next(&mut self) -> Result<FeedEvent, String> {
        match self.eventloop.poll().await {
            Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                info!("mqtt connected; subscribing to {}", self.topic);
                // Clean sessions drop subscriptions, so resubscribe on every connect.
                self.client
                    .subscribe(&self.topic, QoS::AtLeastOnce)
                    .await
                    .map_err(|err| format!("subscribe failed: {err}"))?;
                Ok(FeedEvent::Idle)
            }
            Ok(Event::Incoming(Incoming::SubAck(_))) => Ok(FeedEvent::Subscribed),
            Ok(Event::Incoming(Incoming::Publish(message))) if message.topic == self.topic => {
                Ok(FeedEvent::Document(message.payload.to_vec()))
            }
            Ok(_) => Ok(FeedEvent::Idle),
            Err(err) => Err(err.to_string()),
        }
    }

    async fn close(&mut self) {
        if let Err(err) = self.client.try_disconnect() {
            warn!("mqtt disconnect failed: {err}");
            return;
        }

        // The DISCONNECT packet only leaves when the event loop is polled.
        let flushed = timeout(CLOSE_GRACE, async {
            loop {
                match self.eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        })
        .await;
        if flushed.is_err() {
            debug!("mqtt disconnect for {} not flushed in time", self.topic);
        }
    }
}

pub struct DeviceMirror;

impl DeviceMirror {
    /// Opens the live push connection for one device document.
    pub fn subscribe(context: &MirrorContext) -> Subscription {
        let client_id = format!("spouty-app-{}-{}", context.device_id, std::process::id());
        let mut options = MqttOptions::new(client_id, &context.mqtt.host, context.mqtt.port);
        options.set_keep_alive(Duration::from_secs(30));
        if !context.mqtt.user.is_empty() {
            options.set_credentials(&context.mqtt.user, &context.mqtt.pass);
        }

        let (client, eventloop) = AsyncClient::new(options, 16);
        let source = MqttSource {
            client,
            eventloop,
            topic: document_topic(&context.device_id),
        };
        Self::subscribe_with(&context.device_id, source, context.initial_sync)
    }

    pub fn subscribe_with<S>(device_id: &str, source: S, initial_sync: Duration) -> Subscription
    where
        S: PushSource + 'static,
    {
        let (events, receiver) = mpsc::channel(EVENT_BUFFER);
        let (close, closing) = oneshot::channel();
        let task = tokio::spawn(run_feed(
            device_id.to_string(),
            source,
            events,
            closing,
            initial_sync,
        ));

        Subscription {
            device_id: device_id.to_string(),
            events: receiver,
            close: Some(close),
            task,
        }
    }
}

/// A live subscription. [`Subscription::unsubscribe`] disconnects from the
/// broker; dropping it only aborts the feed task.
pub struct Subscription {
    device_id: String,
    events: mpsc::Receiver<MirrorEvent>,
    close: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl Subscription {
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Next event in delivery order; `None` once the feed has stopped.
    pub async fn next(&mut self) -> Option<MirrorEvent> {
        self.events.recv().await
    }

    pub async fn unsubscribe(mut self) {
        info!("unsubscribing from device {}", self.device_id);
        if let Some(close) = self.close.take() {
            let _ = close.send(());
        }
        if timeout(CLOSE_GRACE * 2, &mut self.task).await.is_err() {
            warn!("feed for device {} did not stop in time", self.device_id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub fn decode_push(payload: &[u8]) -> MirrorEvent {
    match DeviceSnapshot::from_payload(payload) {
        Ok(Some(snapshot)) => MirrorEvent::Snapshot(snapshot),
        Ok(None) => MirrorEvent::Absent,
        Err(err) => MirrorEvent::Error(err.to_string()),
    }
}

async fn run_feed<S: PushSource>(
    device_id: String,
    mut source: S,
    events: mpsc::Sender<MirrorEvent>,
    mut closing: oneshot::Receiver<()>,
    initial_sync: Duration,
) {
    let sync_timer = sleep(initial_sync);
    tokio::pin!(sync_timer);
    let mut awaiting_first = false;
    let mut seen_document = false;

    loop {
        let event = tokio::select! {
            biased;
            _ = &mut closing => {
                source.close().await;
                break;
            }
            polled = source.next() => match polled {
                Ok(FeedEvent::Subscribed) => {
                    debug!("subscription to device {device_id} acknowledged");
                    if !seen_document {
                        sync_timer.as_mut().reset(Instant::now() + initial_sync);
                        awaiting_first = true;
                    }
                    continue;
                }
                Ok(FeedEvent::Document(payload)) => {
                    seen_document = true;
                    awaiting_first = false;
                    let event = decode_push(&payload);
                    if let MirrorEvent::Error(err) = &event {
                        warn!("dropping push for device {device_id}: {err}");
                    }
                    event
                }
                Ok(FeedEvent::Idle) => continue,
                Err(err) => {
                    warn!("mqtt poll error for device {device_id}: {err}");
                    if events.send(MirrorEvent::Error(err)).await.is_err() {
                        break;
                    }
                    sleep(RECONNECT_DELAY).await;
                    continue;
                }
            },
            () = &mut sync_timer, if awaiting_first => {
                awaiting_first = false;
                seen_document = true;
                warn!("device document {device_id} does not exist; showing setup state");
                MirrorEvent::Absent
            }
        };

        if events.send(event).await.is_err() {
            break;
        }
    }

    debug!("feed for device {device_id} stopped");
}

#[cfg(test)]
pub(crate) mod testing {
    use std::{
        future::pending,
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc,
        },
    };

    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

    use super::*;

    /// Replays whatever the test pushes, then blocks like an idle connection.
    pub(crate) struct ChannelSource {
        events: UnboundedReceiver<Result<FeedEvent, String>>,
        pub(crate) closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl PushSource for ChannelSource {
        async fn next(&mut self) -> Result<FeedEvent, String> {
            match self.events.recv().await {
                Some(event) => event,
                None => pending().await,
            }
        }

        async fn close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    pub(crate) fn scripted() -> (UnboundedSender<Result<FeedEvent, String>>, ChannelSource) {
        let (tx, rx) = unbounded_channel();
        (
            tx,
            ChannelSource {
                events: rx,
                closed: Arc::default(),
            },
        )
    }

    pub(crate) fn document(json: &str) -> Result<FeedEvent, String> {
        Ok(FeedEvent::Document(json.as_bytes().to_vec()))
    }
}
