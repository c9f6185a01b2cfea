//! Fan-out broadcast of a session's output to any number of live clients.
//!
//! Each subscriber gets its own bounded mailbox. Producers (the PTY read
//! loop, the status tracker) never suspend on a slow consumer: a full
//! mailbox just drops the event for that one subscriber, logged at debug.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::session::SessionMetadata;

const SUBSCRIBER_QUEUE_DEPTH: usize = 128;

/// Sum type broadcast to every subscriber of a session.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Data(Vec<u8>),
    Metadata(Box<SessionMetadata>),
    Exit(Option<String>),
}

/// A live subscriber handle returned from `Session::subscribe`.
///
/// Dropping this handle (or calling `unsubscribe`) removes the subscriber
/// from the hub; no further events are delivered afterward.
pub struct Subscription {
    pub id: u64,
    pub rx: mpsc::Receiver<StreamEvent>,
    hub: Arc<Hub>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.hub.remove(self.id);
    }
}

struct Slot {
    tx: mpsc::Sender<StreamEvent>,
}

/// Owns the set of live subscriber mailboxes for one session.
pub struct Hub {
    next_id: std::sync::atomic::AtomicU64,
    slots: dashmap::DashMap<u64, Slot>,
    exited: AtomicBool,
    session_id: String,
}

impl Hub {
    pub fn new(session_id: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            next_id: std::sync::atomic::AtomicU64::new(1),
            slots: dashmap::DashMap::new(),
            exited: AtomicBool::new(false),
            session_id: session_id.into(),
        })
    }

    /// Registers a new subscriber, first replaying `backlog` (typically a
    /// scrollback snapshot) into its mailbox as `Data` events so a
    /// late-attaching client still sees the session's recent output. If the
    /// session has already exited, the returned subscription replays the
    /// backlog and then immediately yields a single `Exit` event and closes,
    /// per the "pending subscribers receive an Exit" invariant.
    pub fn subscribe(self: &Arc<Self>, last_exit: Option<Option<String>>, backlog: Vec<Vec<u8>>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE_DEPTH);

        for chunk in backlog {
            if let Err(mpsc::error::TrySendError::Full(_)) = tx.try_send(StreamEvent::Data(chunk)) {
                log::debug!(
                    "session {}: dropping backlog chunk for new subscriber {}, mailbox full",
                    self.session_id,
                    id
                );
            }
        }

        if self.exited.load(Ordering::Acquire) {
            if let Some(reason) = last_exit {
                let _ = tx.try_send(StreamEvent::Exit(reason));
            }
        } else {
            self.slots.insert(id, Slot { tx });
        }

        Subscription {
            id,
            rx,
            hub: self.clone(),
        }
    }

    pub fn remove(&self, id: u64) {
        self.slots.remove(&id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.slots.len()
    }

    /// Non-blocking fan-out. Drops the event for any subscriber whose
    /// mailbox is currently full, leaving the subscriber live.
    pub fn broadcast(&self, event: StreamEvent) {
        for entry in self.slots.iter() {
            if let Err(mpsc::error::TrySendError::Full(_)) = entry.value().tx.try_send(event.clone()) {
                log::debug!(
                    "session {}: dropping event for slow subscriber {}",
                    self.session_id,
                    entry.key()
                );
            }
        }
    }

    /// Broadcasts exactly one `Exit` event, even if called concurrently or
    /// repeatedly (e.g. from both the read loop and an explicit `close`).
    pub fn notify_exit(&self, reason: Option<String>) {
        if self.exited.swap(true, Ordering::AcqRel) {
            return;
        }
        for entry in self.slots.iter() {
            let _ = entry.value().tx.try_send(StreamEvent::Exit(reason.clone()));
        }
        self.slots.clear();
    }

    pub fn has_exited(&self) -> bool {
        self.exited.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn broadcast_delivers_in_order_to_each_subscriber() {
        let hub = Hub::new("s1");
        let mut a = hub.subscribe(None, Vec::new());
        let mut b = hub.subscribe(None, Vec::new());

        hub.broadcast(StreamEvent::Data(b"one".to_vec()));
        hub.broadcast(StreamEvent::Data(b"two".to_vec()));

        for sub in [&mut a, &mut b] {
            match sub.recv().await {
                Some(StreamEvent::Data(d)) => assert_eq!(d, b"one"),
                other => panic!("unexpected: {other:?}"),
            }
            match sub.recv().await {
                Some(StreamEvent::Data(d)) => assert_eq!(d, b"two"),
                other => panic!("unexpected: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn backlog_is_replayed_before_live_events() {
        let hub = Hub::new("s1");
        let mut sub = hub.subscribe(None, vec![b"one".to_vec(), b"two".to_vec()]);
        hub.broadcast(StreamEvent::Data(b"three".to_vec()));

        for expected in [b"one".as_slice(), b"two", b"three"] {
            match sub.recv().await {
                Some(StreamEvent::Data(d)) => assert_eq!(d, expected),
                other => panic!("unexpected: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn notify_exit_fires_exactly_once() {
        let hub = Hub::new("s1");
        let mut sub = hub.subscribe(None, Vec::new());
        hub.notify_exit(None);
        hub.notify_exit(Some("ignored".to_string()));

        assert!(matches!(sub.recv().await, Some(StreamEvent::Exit(None))));
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn late_subscriber_after_exit_gets_exit_event() {
        let hub = Hub::new("s1");
        hub.notify_exit(Some("boom".to_string()));
        let mut sub = hub.subscribe(Some(Some("boom".to_string())), Vec::new());
        assert!(matches!(sub.recv().await, Some(StreamEvent::Exit(Some(_)))));
    }

    #[tokio::test]
    async fn slow_subscriber_drops_events_without_blocking_others() {
        let hub = Hub::new("s1");
        let mut slow = hub.subscribe(None, Vec::new());
        let mut fast = hub.subscribe(None, Vec::new());

        // Fill the slow subscriber's mailbox without ever draining it.
        for i in 0..(SUBSCRIBER_QUEUE_DEPTH + 10) {
            hub.broadcast(StreamEvent::Data(vec![i as u8]));
        }

        // The fast subscriber (drained concurrently in real use) still has
        // its first message available; the slow one simply lost some.
        assert!(fast.recv().await.is_some());
        assert!(slow.recv().await.is_some());
    }
}
