//! Event fan-out
//!
//! Every subscriber owns an unbounded queue, so a slow subscriber never
//! blocks the session and each one sees events in receive order.

use super::GatewayEventType;
use crate::protocol::Disposition;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// One accepted dispatch frame
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchEvent {
    /// Wire name from `t`
    pub name: String,
    /// Typed name, if the event is a known one
    pub kind: Option<GatewayEventType>,
    /// `None` when the frame carried no sequence
    pub sequence: Option<u64>,
    pub data: Value,
}

impl DispatchEvent {
    pub fn new(name: impl Into<String>, sequence: impl Into<Option<u64>>, data: Value) -> Self {
        let name = name.into();
        Self {
            kind: GatewayEventType::parse(&name),
            name,
            sequence: sequence.into(),
            data,
        }
    }
}

/// Why the connection went away
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectInfo {
    pub code: Option<u16>,
    pub reason: String,
    pub disposition: Disposition,
}

impl DisconnectInfo {
    pub fn is_fatal(&self) -> bool {
        self.disposition == Disposition::Fatal
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    Dispatch(Arc<DispatchEvent>),
    Disconnected(DisconnectInfo),
}

/// Receiving end of a subscription
pub type EventStream = mpsc::UnboundedReceiver<GatewayEvent>;

/// Callback-style subscriber
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    async fn on_event(&self, event: GatewayEvent);
}

#[derive(Default)]
pub struct EventHub {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<GatewayEvent>>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> EventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Run `handler` on its own task for every event, one at a time and in order
    pub fn subscribe_handler(&self, handler: Arc<dyn EventHandler>) -> JoinHandle<()> {
        let mut events = self.subscribe();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                handler.on_event(event).await;
            }
        })
    }

    /// Deliver to every live subscriber; dropped receivers are pruned
    pub fn publish(&self, event: GatewayEvent) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

impl std::fmt::Debug for EventHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHub")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
