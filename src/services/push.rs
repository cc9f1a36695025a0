//! Delivery of push payloads sent by provisioned devices
//!
//! Listeners see a payload in registration order until one of them consumes it. Device events
//! nobody consumed are turned into user notifications.

use log::{debug, warn};
#[cfg(any(test, feature = "mock"))]
use mockall::automock;
use serde::Deserialize;
use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, MutexGuard, Weak,
        atomic::{AtomicU64, Ordering},
    },
};

/// Action of payloads published by devices
pub const DEVICE_EVENT_ACTION: &str = "com.parse.anydevice.EVENT";

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PushPayload {
    pub action: Option<String>,
    pub user_session_id: Option<String>,
    pub alert: Option<String>,
    pub installation_id: Option<String>,
}

/// Whether later listeners still see a payload
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Propagation {
    Continue,
    Consumed,
}

/// User facing notification for a device event
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notification {
    /// Session the event belongs to
    pub tag: String,
    pub id: u32,
    pub title: String,
    pub installation_id: Option<String>,
}

#[cfg_attr(any(test, feature = "mock"), automock)]
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: Notification);
}

type Listener = Arc<dyn Fn(&PushPayload) -> Propagation + Send + Sync>;

pub struct PushBus {
    listeners: Mutex<Vec<(u64, Listener)>>,
    next_listener: AtomicU64,
    notification_ids: Mutex<HashMap<String, u32>>,
    sink: Option<Arc<dyn NotificationSink>>,
}

impl PushBus {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(0),
            notification_ids: Mutex::new(HashMap::new()),
            sink: None,
        }
    }

    /// Bus that notifies the user about device events no listener consumed
    pub fn with_notifications(sink: Arc<dyn NotificationSink>) -> Self {
        Self {
            sink: Some(sink),
            ..Self::new()
        }
    }

    fn listeners(&self) -> MutexGuard<'_, Vec<(u64, Listener)>> {
        self.listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a listener behind all existing ones
    ///
    /// The listener stays registered until the returned subscription is dropped.
    pub fn register<F>(self: &Arc<Self>, listener: F) -> Subscription
    where
        F: Fn(&PushPayload) -> Propagation + Send + Sync + 'static,
    {
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        let listener: Listener = Arc::new(listener);
        self.listeners().push((id, listener));

        Subscription {
            bus: Arc::downgrade(self),
            id,
        }
    }

    fn unregister(&self, id: u64) {
        self.listeners().retain(|(listener_id, _)| *listener_id != id);
    }

    /// Deliver a raw JSON payload
    ///
    /// # Returns
    /// `Consumed` if a listener took the payload, `Continue` otherwise
    pub fn dispatch(&self, payload: &str) -> Propagation {
        let payload: PushPayload = match serde_json::from_str(payload) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("failed to parse push payload: {e}");
                return Propagation::Continue;
            }
        };

        // listeners may drop subscriptions while being called
        let listeners: Vec<Listener> = self
            .listeners()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();

        for listener in listeners {
            if listener(&payload) == Propagation::Consumed {
                debug!("push payload consumed");
                return Propagation::Consumed;
            }
        }

        self.notify(payload);
        Propagation::Continue
    }

    fn notify(&self, payload: PushPayload) {
        let Some(sink) = &self.sink else {
            return;
        };

        if payload.action.as_deref() != Some(DEVICE_EVENT_ACTION) {
            debug!("ignoring push payload with action {:?}", payload.action);
            return;
        }

        let tag = payload.user_session_id.unwrap_or_default();
        let id = {
            let mut ids = self
                .notification_ids
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let next = ids.len() as u32 + 1;
            *ids.entry(tag.clone()).or_insert(next)
        };

        sink.notify(Notification {
            tag,
            id,
            title: payload.alert.unwrap_or_default(),
            installation_id: payload.installation_id,
        });
    }
}

impl Default for PushBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Registration of a push listener; unregisters on drop
pub struct Subscription {
    bus: Weak<PushBus>,
    id: u64,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unregister(self.id);
        }
    }
}
