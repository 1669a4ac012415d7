//! Typed publish/subscribe channels.
//!
//! One [`Publisher`] per event kind. The publisher owns its subscriber list;
//! a [`Subscription`] removes itself from that list when dropped, so a torn
//! down consumer never leaks a sender.
//!
//! ```text
//! MinerManager ── Publisher<MinerEvent> ──┬── Subscription (ExplorerNode)
//!                                         └── Subscription (UI)
//! ```

use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

struct Subscribers<T> {
    next_id: u64,
    senders: Vec<(u64, UnboundedSender<T>)>,
}

/// Fan-out end of a typed channel. Cloning shares the subscriber list.
pub struct Publisher<T> {
    inner: Arc<Mutex<Subscribers<T>>>,
}

impl<T> Clone for Publisher<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> Default for Publisher<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> Publisher<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Subscribers {
                next_id: 0,
                senders: Vec::new(),
            })),
        }
    }

    pub fn subscribe(&self) -> Subscription<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut subs = self.inner.lock();
        let id = subs.next_id;
        subs.next_id += 1;
        subs.senders.push((id, tx));
        Subscription {
            id,
            rx,
            owner: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver `event` to every live subscriber. Never blocks. Returns the
    /// number of subscribers reached.
    pub fn publish(&self, event: T) -> usize {
        let mut subs = self.inner.lock();
        subs.senders.retain(|(_, tx)| tx.send(event.clone()).is_ok());
        subs.senders.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().senders.len()
    }
}

/// Receiving end of a typed channel.
pub struct Subscription<T> {
    id: u64,
    rx: UnboundedReceiver<T>,
    owner: Weak<Mutex<Subscribers<T>>>,
}

impl<T> Subscription<T> {
    /// Wait for the next event. `None` once the publisher is gone.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Every event queued so far, without waiting.
    pub fn drain(&mut self) -> Vec<T> {
        let mut out = Vec::new();
        while let Ok(ev) = self.rx.try_recv() {
            out.push(ev);
        }
        out
    }

    /// Explicit teardown; equivalent to dropping the subscription.
    pub fn unsubscribe(self) {}
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(owner) = self.owner.upgrade() {
            let id = self.id;
            owner.lock().senders.retain(|(sid, _)| *sid != id);
        }
    }
}
