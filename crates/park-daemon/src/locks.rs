//! Per-key exclusion in arrival order.
//!
//! The lookup → reconcile → write sequence for one slot must not interleave
//! with another for the same slot, and must run in the order the messages
//! arrived, not the order their tasks happen to get scheduled. A caller takes
//! its place with [`ArrivalLocks::reserve`], which never awaits, and later
//! waits for its turn with [`Ticket::wait`].
//!
//! Each key is a chain of oneshot channels: a ticket waits until the sender
//! held by the ticket reserved before it is gone. The map keeps only the tail
//! of each chain; the entry is removed when the tail's turn ends.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use park_reconcile::SlotId;
use tokio::sync::oneshot;

/// Per-slot turns for the status topic.
pub type SlotLocks = ArrivalLocks<SlotId>;

#[derive(Debug)]
struct Tail {
    seq: u64,
    released: oneshot::Receiver<()>,
}

#[derive(Debug)]
struct Lanes<K> {
    tails: HashMap<K, Tail>,
    next_seq: u64,
}

type Shared<K> = Arc<Mutex<Lanes<K>>>;

fn lanes<K>(shared: &Mutex<Lanes<K>>) -> MutexGuard<'_, Lanes<K>> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
pub struct ArrivalLocks<K> {
    shared: Shared<K>,
}

/// A reserved place in line for one key.
///
/// Dropping a ticket before its turn is safe: the turn is passed on only
/// after the ticket ahead of it finishes.
#[derive(Debug)]
pub struct Ticket<K: Eq + Hash + Copy + Send + 'static> {
    key: K,
    seq: u64,
    ahead: Option<oneshot::Receiver<()>>,
    release: Option<oneshot::Sender<()>>,
    shared: Shared<K>,
}

/// Exclusive access to one key; the next ticket runs when this is dropped.
#[derive(Debug)]
pub struct Turn<K: Eq + Hash + Copy> {
    key: K,
    seq: u64,
    release: Option<oneshot::Sender<()>>,
    shared: Shared<K>,
}

impl<K: Eq + Hash + Copy> Default for ArrivalLocks<K> {
    fn default() -> Self {
        Self {
            shared: Arc::new(Mutex::new(Lanes {
                tails: HashMap::new(),
                next_seq: 0,
            })),
        }
    }
}

impl<K: Eq + Hash + Copy + Send + 'static> ArrivalLocks<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the next place in line for `key`.
    pub fn reserve(&self, key: K) -> Ticket<K> {
        let (release, released) = oneshot::channel();
        let mut lanes = lanes(&self.shared);
        let seq = lanes.next_seq;
        lanes.next_seq += 1;
        let ahead = lanes
            .tails
            .insert(key, Tail { seq, released })
            .map(|t| t.released);
        Ticket {
            key,
            seq,
            ahead,
            release: Some(release),
            shared: Arc::clone(&self.shared),
        }
    }

    /// Reserve and wait in one step.
    pub async fn lock(&self, key: K) -> Turn<K> {
        self.reserve(key).wait().await
    }

    /// Keys with a live entry (held or awaited).
    pub fn active(&self) -> usize {
        lanes(&self.shared).tails.len()
    }
}

impl<K: Eq + Hash + Copy + Send + 'static> Ticket<K> {
    /// Wait until every ticket reserved earlier for this key has finished.
    pub async fn wait(mut self) -> Turn<K> {
        if let Some(ahead) = self.ahead.as_mut() {
            // Err only means the sender is gone, which is the signal.
            let _ = ahead.await;
        }
        self.ahead = None;
        Turn {
            key: self.key,
            seq: self.seq,
            release: self.release.take(),
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<K: Eq + Hash + Copy + Send + 'static> Drop for Ticket<K> {
    fn drop(&mut self) {
        let Some(release) = self.release.take() else {
            return;
        };
        let turn = Turn {
            key: self.key,
            seq: self.seq,
            release: Some(release),
            shared: Arc::clone(&self.shared),
        };
        let Some(ahead) = self.ahead.take() else {
            drop(turn);
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                rt.spawn(async move {
                    let _ = ahead.await;
                    drop(turn);
                });
            }
            // No runtime: nothing can be waiting on this key any more.
            Err(_) => drop(turn),
        }
    }
}

impl<K: Eq + Hash + Copy> Turn<K> {
    pub fn key(&self) -> K {
        self.key
    }
}

impl<K: Eq + Hash + Copy> Drop for Turn<K> {
    fn drop(&mut self) {
        let mut lanes = lanes(&self.shared);
        if lanes
            .tails
            .get(&self.key)
            .is_some_and(|t| t.seq == self.seq)
        {
            lanes.tails.remove(&self.key);
        }
        // Wakes the next ticket, if any.
        drop(self.release.take());
    }
}
