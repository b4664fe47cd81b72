//! Live-update fan-out.
//!
//! Every subscriber gets its own bounded channel. Publishing never blocks:
//! a full subscriber misses the event, a disconnected one is dropped from the
//! list. Delivery problems never reach the publisher.

use serde::Serialize;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TryRecvError, TrySendError};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::alert::AlertRecord;

/// Per-subscriber queue depth.
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 256;

/// Named events pushed to live viewers.
#[derive(Clone, Debug, PartialEq)]
pub enum LiveEvent {
    /// Raised by the detection loop.
    Alert(AlertRecord),
    /// Status or assignee changed.
    AlertUpdate(AlertRecord),
    /// Reported manually.
    NewAlert(AlertRecord),
    /// Full list, sent once to each new subscriber.
    Alerts(Vec<AlertRecord>),
}

impl LiveEvent {
    pub fn name(&self) -> &'static str {
        match self {
            LiveEvent::Alert(_) => "alert",
            LiveEvent::AlertUpdate(_) => "alert_update",
            LiveEvent::NewAlert(_) => "new_alert",
            LiveEvent::Alerts(_) => "alerts",
        }
    }

    /// JSON body of the event without its name.
    pub fn payload_json(&self) -> serde_json::Result<Vec<u8>> {
        match self {
            LiveEvent::Alert(record)
            | LiveEvent::AlertUpdate(record)
            | LiveEvent::NewAlert(record) => serde_json::to_vec(record),
            LiveEvent::Alerts(records) => serde_json::to_vec(records),
        }
    }

    /// `{"event": name, "data": payload}` for transports without topics.
    pub fn envelope(&self) -> serde_json::Result<serde_json::Value> {
        #[derive(Serialize)]
        struct Envelope<'a, T: Serialize> {
            event: &'a str,
            data: T,
        }
        match self {
            LiveEvent::Alert(record)
            | LiveEvent::AlertUpdate(record)
            | LiveEvent::NewAlert(record) => serde_json::to_value(Envelope {
                event: self.name(),
                data: record,
            }),
            LiveEvent::Alerts(records) => serde_json::to_value(Envelope {
                event: self.name(),
                data: records,
            }),
        }
    }
}

struct Subscriber {
    id: u64,
    tx: SyncSender<LiveEvent>,
}

#[derive(Default)]
struct BusInner {
    subscribers: Vec<Subscriber>,
    next_id: u64,
    dropped_events: u64,
}

/// Cloneable handle to one fan-out bus.
#[derive(Clone)]
pub struct LiveUpdateBus {
    inner: Arc<Mutex<BusInner>>,
    capacity: usize,
}

impl LiveUpdateBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_SUBSCRIBER_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(BusInner::default())),
            capacity: capacity.max(1),
        }
    }

    pub fn subscribe(&self) -> Subscription {
        self.attach(None)
    }

    /// Subscribe and queue the `alerts` snapshot ahead of any later event.
    pub fn subscribe_with_snapshot(&self, snapshot: Vec<AlertRecord>) -> Subscription {
        self.attach(Some(LiveEvent::Alerts(snapshot)))
    }

    fn attach(&self, first: Option<LiveEvent>) -> Subscription {
        let (tx, rx) = mpsc::sync_channel(self.capacity);
        if let Some(event) = first {
            // A fresh channel always has room for one event.
            let _ = tx.try_send(event);
        }
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        let id = inner.next_id;
        inner.next_id += 1;
        inner.subscribers.push(Subscriber { id, tx });
        log::debug!("live bus: subscriber {} attached", id);
        Subscription { id, rx }
    }

    /// Fan `event` out to every subscriber. Returns how many received it.
    pub fn publish(&self, event: LiveEvent) -> usize {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        let mut delivered = 0;
        let mut dropped = 0;
        inner.subscribers.retain(|sub| match sub.tx.try_send(event.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                dropped += 1;
                log::debug!(
                    "live bus: subscriber {} is full, dropped '{}'",
                    sub.id,
                    event.name()
                );
                true
            }
            Err(TrySendError::Disconnected(_)) => {
                log::debug!("live bus: subscriber {} disconnected", sub.id);
                false
            }
        });
        inner.dropped_events += dropped;
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .subscribers
            .len()
    }

    /// Events lost to full subscriber queues since startup.
    pub fn dropped_events(&self) -> u64 {
        self.inner
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .dropped_events
    }
}

impl Default for LiveUpdateBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving end of a bus subscription. Dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    rx: Receiver<LiveEvent>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next event if one is queued.
    pub fn try_next(&self) -> Option<LiveEvent> {
        match self.rx.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Wait up to `timeout`. `Err` means the bus is gone.
    pub fn next_timeout(&self, timeout: Duration) -> Result<Option<LiveEvent>, BusClosed> {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => Ok(Some(event)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(BusClosed),
        }
    }

    /// Everything currently queued.
    pub fn drain(&self) -> Vec<LiveEvent> {
        std::iter::from_fn(|| self.try_next()).collect()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BusClosed;

impl std::fmt::Display for BusClosed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("live update bus closed")
    }
}

impl std::error::Error for BusClosed {}
