//! Mailbox Module - Inter-Executor Messaging
//!
//! Each executor owns a bounded mailbox and the synchronisation it needs
//! to hand messages across heaps safely (§4.6): an entries lock
//! serialising mutation of the queue, and a wait lock paired with a
//! condition variable for blocking receivers. Messages are always copied
//! deep into the receiver's own heap (§4.7) before they are enqueued, so a
//! receiver's collector never has to reason about sender-owned pointers.

use crate::error::VmError;
use crate::value::Value;
use parking_lot::{Condvar, Mutex};
use std::time::Duration;

/// One undelivered message: who sent it, and the payload already copied
/// into the receiving executor's heap.
#[derive(Debug, Clone, Copy)]
pub struct Entry {
    pub sender: u64,
    pub message: Value,
}

pub struct Mailbox {
    entries: Mutex<Vec<Entry>>,
    block: Mutex<()>,
    condvar: Condvar,
    capacity: usize,
    poll_interval: Duration,
}

impl Mailbox {
    pub fn new(capacity: usize, poll_interval: Duration) -> Self {
        Mailbox {
            entries: Mutex::new(Vec::with_capacity(capacity)),
            block: Mutex::new(()),
            condvar: Condvar::new(),
            capacity,
            poll_interval,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Lock the entry queue for direct mutable access, used by the
    /// collector to rewrite every live mailbox entry's message in place
    /// during a collection (§4.4 roots).
    pub fn entries_mut(&self) -> parking_lot::MutexGuard<'_, Vec<Entry>> {
        self.entries.lock()
    }

    /// Enqueue an already-copied message, waking any blocked receiver.
    /// Fatal if the mailbox is already at capacity (§4.6 step 4): there is
    /// no back-pressure, matching the original runtime's abort-on-overflow
    /// behaviour.
    pub fn deliver(&self, executor_id: u64, entry: Entry) -> Result<(), VmError> {
        {
            let mut entries = self.entries.lock();
            if entries.len() >= self.capacity {
                return Err(VmError::InboxFull {
                    executor_id,
                    capacity: self.capacity,
                });
            }
            entries.push(entry);
        }
        let _guard = self.block.lock();
        self.condvar.notify_all();
        Ok(())
    }

    /// Non-blocking scan for the first entry matching `from`, if any.
    pub fn check(&self, from: Option<u64>) -> Option<Entry> {
        self.entries
            .lock()
            .iter()
            .find(|e| from.map_or(true, |s| e.sender == s))
            .copied()
    }

    /// Remove and return the first entry matching `from`, sliding later
    /// entries down to keep the queue FIFO-ordered among what remains.
    fn take(&self, from: Option<u64>) -> Option<Entry> {
        let mut entries = self.entries.lock();
        let idx = entries
            .iter()
            .position(|e| from.map_or(true, |s| e.sender == s))?;
        Some(entries.remove(idx))
    }

    /// Block until a matching entry is available, then remove and return
    /// it. Uses a timed wait purely to guard against a missed wakeup
    /// between the emptiness check and parking on the condvar (§9);
    /// emptiness is what actually governs the loop.
    pub fn recv(&self, executor_id: u64, from: Option<u64>) -> Result<Entry, VmError> {
        loop {
            if let Some(entry) = self.take(from) {
                return Ok(entry);
            }
            let mut guard = self.block.lock();
            if self.check(from).is_some() {
                continue;
            }
            log::trace!("executor {executor_id} blocking on empty mailbox");
            self.condvar.wait_for(&mut guard, self.poll_interval);
        }
    }
}
