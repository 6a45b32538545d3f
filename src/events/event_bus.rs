/// Event Bus - pub/sub broadcaster for the Observability Hooks (spec §2.8,
/// §4.6, §4.7). The Trade Engine calls `publish` after tick updates,
/// position opens/closes, and toast-style messages; registered handlers
/// (WebSocket fan-out, logging sinks, ...) run independently of the hot
/// tick loop.
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error};

use super::types::{Event, EventType};
use crate::error::Result;

pub type EventHandler = Arc<dyn Fn(Event) -> futures_util::future::BoxFuture<'static, Result<()>> + Send + Sync>;

/// Event bus for publish-subscribe pattern
pub struct EventBus {
    subscribers: Arc<RwLock<HashMap<EventType, Vec<EventHandler>>>>,
    tx: mpsc::UnboundedSender<Event>,
    rx: Arc<RwLock<Option<mpsc::UnboundedReceiver<Event>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        EventBus {
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            tx,
            rx: Arc::new(RwLock::new(Some(rx))),
        }
    }

    /// Subscribe to an event type.
    pub async fn subscribe(&self, event_type: EventType, handler: EventHandler) {
        let mut subscribers = self.subscribers.write().await;
        subscribers.entry(event_type).or_insert_with(Vec::new).push(handler);
        debug!("subscribed handler to event: {:?}", event_type);
    }

    /// Publish an event to the processing queue. Never blocks the caller on
    /// handler execution — the tick loop must not wait on observability.
    pub fn publish(&self, event: Event) {
        if self.tx.send(event).is_err() {
            error!("event bus receiver dropped; event lost");
        }
    }

    /// Start processing events from the queue. Call once at startup.
    pub async fn start_processing(&self) {
        let subscribers = Arc::clone(&self.subscribers);
        let rx = {
            let mut guard = self.rx.write().await;
            guard.take()
        };
        let Some(mut rx) = rx else {
            return;
        };
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let event_type = event.event_type;
                let handlers = {
                    let subs = subscribers.read().await;
                    subs.get(&event_type).cloned()
                };
                let Some(handlers) = handlers else {
                    continue;
                };
                for handler in handlers {
                    if let Err(e) = handler(event.clone()).await {
                        error!("observability handler failed for {:?}: {}", event_type, e);
                    }
                }
            }
        });
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::types::EventPayload;

    #[tokio::test]
    async fn publish_reaches_subscribed_handler() {
        let bus = EventBus::new();
        let called = Arc::new(RwLock::new(false));
        let called_clone = Arc::clone(&called);

        let handler: EventHandler = Arc::new(move |_event| {
            let called = Arc::clone(&called_clone);
            Box::pin(async move {
                *called.write().await = true;
                Ok(())
            })
        });

        bus.subscribe(EventType::Toast, handler).await;
        bus.start_processing().await;

        bus.publish(Event::new("u1", EventType::Toast, EventPayload::Toast {
            message: "AUTO_SQ_OFF triggered (3 positions)".to_string(),
        }));

        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        assert!(*called.read().await);
    }

    #[tokio::test]
    async fn unsubscribed_event_types_are_dropped_silently() {
        let bus = EventBus::new();
        bus.start_processing().await;
        bus.publish(Event::new("u1", EventType::PositionRefresh, EventPayload::PositionRefresh {
            symbol: "SBIN".to_string(),
        }));
        tokio::time::sleep(tokio::time::Duration::from_millis(20)).await;
    }
}
