//! Executor Module - The Per-Process Virtual Machine
//!
//! An [`Executor`] aggregates everything one lightweight VM process owns: a
//! value stack, a single active semispace, a return register, a scratch
//! register, a mailbox, and its own statistics (§2, §4.1). Every executor
//! can be shared behind an `Arc` so other executors can reach its mailbox,
//! but only the owning thread is expected to drive its stack and heap.
//!
//! The allocation lock is re-entrant so the `reserve`/`done_reserve`
//! protocol (§4.1) can be implemented as "lock, maybe collect, then hand
//! the caller a guard they may re-lock through" without a second lock type.

use crate::config::VmConfig;
use crate::error::VmError;
use crate::gc;
use crate::heap::Heap;
use crate::mailbox::{Entry, Mailbox};
use crate::stack::ValueStack;
use crate::stats::{Phase, VmStats, VmStatsSnapshot};
use crate::value::{align_up, HEADER_SIZE};
use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// A handle held across a `reserve`/`done_reserve` window (§4.1). Dropping
/// it (or calling [`Reservation::done_reserve`] explicitly) releases the
/// allocation lock.
pub struct Reservation<'a> {
    _guard: ReentrantMutexGuard<'a, RefCell<Heap>>,
}

impl Reservation<'_> {
    pub fn done_reserve(self) {}
}

pub struct Executor {
    id: u64,
    heap: ReentrantMutex<RefCell<Heap>>,
    stack: parking_lot::Mutex<ValueStack>,
    ret: AtomicUsize,
    reg1: AtomicUsize,
    mailbox: Mailbox,
    stats: VmStats,
    config: VmConfig,
}

impl Executor {
    pub fn new(id: u64, config: VmConfig) -> Result<Self, VmError> {
        config.validate()?;
        let heap = Heap::new(config.initial_heap_size)?;
        Ok(Executor {
            id,
            heap: ReentrantMutex::new(RefCell::new(heap)),
            stack: parking_lot::Mutex::new(ValueStack::new(config.stack_size)),
            ret: AtomicUsize::new(crate::value::Value::NULL.0),
            reg1: AtomicUsize::new(crate::value::Value::NULL.0),
            mailbox: Mailbox::new(config.mailbox_capacity, config.recv_poll_interval),
            stats: VmStats::new(),
            config,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    pub fn stats(&self) -> VmStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn stack(&self) -> parking_lot::MutexGuard<'_, ValueStack> {
        self.stack.lock()
    }

    pub fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    pub fn ret(&self) -> crate::value::Value {
        crate::value::Value(self.ret.load(Ordering::Acquire))
    }

    pub fn set_ret(&self, v: crate::value::Value) {
        self.ret.store(v.0, Ordering::Release);
    }

    pub fn reg1(&self) -> crate::value::Value {
        crate::value::Value(self.reg1.load(Ordering::Acquire))
    }

    pub fn set_reg1(&self, v: crate::value::Value) {
        self.reg1.store(v.0, Ordering::Release);
    }

    /// Non-destructively report whether `size` bytes plus a header fit
    /// without triggering a collection (§4.1 `space` contract).
    pub fn space(&self, size: usize) -> bool {
        let guard = self.heap.lock();
        let required = HEADER_SIZE + align_up(size);
        guard.borrow().remaining() >= required
    }

    /// Bump-allocate `payload_size` bytes. If `already_reserved` is false
    /// and free space is short, runs a collection first (§4.1); if true,
    /// the caller is expected to have called [`Executor::reserve`] and
    /// guaranteed enough room already, so no collection is attempted here
    /// (a mid-sequence collection would relocate the partially built
    /// closure out from under the caller).
    pub fn allocate(&self, payload_size: usize, already_reserved: bool) -> Result<usize, VmError> {
        let guard = self.heap.lock();
        if !already_reserved {
            self.ensure_space(&guard, payload_size)?;
        }
        let mut heap = guard.borrow_mut();
        let remaining = heap.remaining();
        let addr = heap.allocate(payload_size).ok_or(VmError::OutOfHeap {
            requested: payload_size,
            available: remaining,
        })?;
        self.stats.record_allocation(payload_size);
        Ok(addr)
    }

    /// Guarantee `size` bytes are available, then hold the allocation lock
    /// until the returned [`Reservation`] is dropped or explicitly ended
    /// (§4.1).
    pub fn reserve(&self, size: usize) -> Result<Reservation<'_>, VmError> {
        let guard = self.heap.lock();
        self.ensure_space(&guard, size)?;
        Ok(Reservation { _guard: guard })
    }

    fn ensure_space(
        &self,
        heap: &ReentrantMutexGuard<'_, RefCell<Heap>>,
        payload_size: usize,
    ) -> Result<(), VmError> {
        let required = HEADER_SIZE + align_up(payload_size);
        if heap.borrow().remaining() >= required {
            return Ok(());
        }

        let mut target_size = heap.borrow().capacity().max(required * 2);
        loop {
            let used = self.collect(heap, target_size)?;
            let density = used as f64 / target_size as f64;
            let remaining = heap.borrow().remaining();
            let fits = remaining >= required;

            if fits && density <= self.config.heap_growth_threshold {
                return Ok(());
            }
            if target_size >= self.config.max_heap_size {
                return if fits {
                    Ok(())
                } else {
                    Err(VmError::OutOfHeap {
                        requested: required,
                        available: remaining,
                    })
                };
            }
            target_size = (target_size * 2).min(self.config.max_heap_size);
        }
    }

    /// Run one stop-the-world collection into a fresh `new_size`-byte
    /// semispace, rewriting the stack, both registers, and every live
    /// mailbox entry in place. Returns the number of live bytes copied.
    fn collect(
        &self,
        heap: &ReentrantMutexGuard<'_, RefCell<Heap>>,
        new_size: usize,
    ) -> Result<usize, VmError> {
        let timer = self.stats.start_timer(Phase::Gc);
        let mut stack = self.stack.lock();
        let mut entries = self.mailbox.entries_mut();

        let mut ret_val = self.ret();
        let mut reg1_val = self.reg1();

        let used = {
            let old = heap.borrow();
            let mut roots: Vec<&mut crate::value::Value> = Vec::new();
            roots.extend(stack.roots_mut().iter_mut());
            roots.push(&mut ret_val);
            roots.push(&mut reg1_val);
            for e in entries.iter_mut() {
                roots.push(&mut e.message);
            }
            let (new_heap, used) = gc::collect(&old, new_size, roots)?;
            drop(old);
            *heap.borrow_mut() = new_heap;
            used
        };

        self.set_ret(ret_val);
        self.set_reg1(reg1_val);
        drop(entries);
        drop(stack);
        timer.stop();
        self.stats.record_collection(used);
        log::debug!(
            "executor {} collected {used} live bytes into a {new_size} byte semispace",
            self.id
        );
        Ok(used)
    }

    /// Deliver `msg` (copied into this executor's heap) into `self`'s
    /// mailbox on behalf of `sender` (§4.6 `send`).
    pub fn send(&self, sender: u64, msg: crate::value::Value) -> Result<(), VmError> {
        let before = self.stats.snapshot().collection_count;
        let mut copied = self.deep_copy_in(msg)?;
        let after = self.stats.snapshot().collection_count;
        if after > before {
            // A collection ran while copying; redo it. The enlarged heap
            // from that collection guarantees this retry completes
            // without triggering another one (§4.6 step 3).
            copied = self.deep_copy_in(msg)?;
        }
        self.mailbox.deliver(
            self.id,
            Entry {
                sender,
                message: copied,
            },
        )
    }

    fn deep_copy_in(&self, msg: crate::value::Value) -> Result<crate::value::Value, VmError> {
        let guard = self.heap.lock();
        self.ensure_space_for_copy(&guard)?;
        let mut heap = guard.borrow_mut();
        crate::interchange::copy_to(msg, &mut heap)
    }

    /// Deep copy can need several allocations of unknown total size; run
    /// it optimistically and only collect if the copy itself reports
    /// `OutOfHeap` is imminent is impractical to predict up front, so we
    /// simply make sure there is at least some slack before starting.
    fn ensure_space_for_copy(
        &self,
        heap: &ReentrantMutexGuard<'_, RefCell<Heap>>,
    ) -> Result<(), VmError> {
        let slack = self.config.initial_heap_size / 4;
        self.ensure_space(heap, slack)
    }
}
