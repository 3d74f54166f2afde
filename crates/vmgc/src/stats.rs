//! Stats Module - Allocation and Collection Counters
//!
//! A live struct of atomics every executor updates lock-free from the
//! allocation and collection hot paths, plus a plain snapshot struct cheap
//! to log or hand across an FFI boundary.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Live, atomically-updated counters for a single executor.
#[derive(Debug, Default)]
pub struct VmStats {
    allocation_count: AtomicU64,
    allocation_bytes: AtomicU64,
    collection_count: AtomicU64,
    bytes_copied_last_collection: AtomicU64,
    bytes_copied_total: AtomicU64,
    init_nanos: AtomicU64,
    mutator_nanos: AtomicU64,
    gc_nanos: AtomicU64,
    exit_nanos: AtomicU64,
}

/// An immutable point-in-time copy of [`VmStats`], safe to log, serialize,
/// or pass across the C ABI without holding any lock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VmStatsSnapshot {
    pub allocation_count: u64,
    pub allocation_bytes: u64,
    pub collection_count: u64,
    pub bytes_copied_last_collection: u64,
    pub bytes_copied_total: u64,
    pub init_nanos: u64,
    pub mutator_nanos: u64,
    pub gc_nanos: u64,
    pub exit_nanos: u64,
}

/// Which wall-clock phase bucket a [`Timer`] contributes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    Mutator,
    Gc,
    Exit,
}

impl VmStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful allocation of `bytes`.
    pub fn record_allocation(&self, bytes: usize) {
        self.allocation_count.fetch_add(1, Ordering::Relaxed);
        self.allocation_bytes
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Record the end of a collection cycle that copied `bytes_copied` live
    /// bytes into the new to-space.
    pub fn record_collection(&self, bytes_copied: usize) {
        self.collection_count.fetch_add(1, Ordering::Relaxed);
        self.bytes_copied_last_collection
            .store(bytes_copied as u64, Ordering::Relaxed);
        self.bytes_copied_total
            .fetch_add(bytes_copied as u64, Ordering::Relaxed);
    }

    /// Add `elapsed` to the running total for `phase`.
    pub fn record_duration(&self, phase: Phase, elapsed: Duration) {
        let nanos = elapsed.as_nanos() as u64;
        let counter = match phase {
            Phase::Init => &self.init_nanos,
            Phase::Mutator => &self.mutator_nanos,
            Phase::Gc => &self.gc_nanos,
            Phase::Exit => &self.exit_nanos,
        };
        counter.fetch_add(nanos, Ordering::Relaxed);
    }

    /// Start a scoped timer that records into `phase` when dropped or
    /// explicitly [`Timer::stop`]ped.
    pub fn start_timer(&self, phase: Phase) -> Timer<'_> {
        Timer {
            stats: self,
            phase,
            start: Instant::now(),
            stopped: false,
        }
    }

    /// Take an immutable snapshot of every counter.
    pub fn snapshot(&self) -> VmStatsSnapshot {
        VmStatsSnapshot {
            allocation_count: self.allocation_count.load(Ordering::Relaxed),
            allocation_bytes: self.allocation_bytes.load(Ordering::Relaxed),
            collection_count: self.collection_count.load(Ordering::Relaxed),
            bytes_copied_last_collection: self
                .bytes_copied_last_collection
                .load(Ordering::Relaxed),
            bytes_copied_total: self.bytes_copied_total.load(Ordering::Relaxed),
            init_nanos: self.init_nanos.load(Ordering::Relaxed),
            mutator_nanos: self.mutator_nanos.load(Ordering::Relaxed),
            gc_nanos: self.gc_nanos.load(Ordering::Relaxed),
            exit_nanos: self.exit_nanos.load(Ordering::Relaxed),
        }
    }
}

/// RAII timer returned by [`VmStats::start_timer`]. Records elapsed wall
/// clock time into its phase bucket on drop, unless already stopped.
pub struct Timer<'a> {
    stats: &'a VmStats,
    phase: Phase,
    start: Instant,
    stopped: bool,
}

impl Timer<'_> {
    /// Stop the timer early and record the elapsed duration now.
    pub fn stop(mut self) {
        self.record();
        self.stopped = true;
    }

    fn record(&mut self) {
        self.stats.record_duration(self.phase, self.start.elapsed());
    }
}

impl Drop for Timer<'_> {
    fn drop(&mut self) {
        if !self.stopped {
            self.record();
        }
    }
}

impl VmStatsSnapshot {
    /// Average live bytes copied per collection, or 0 if none have run.
    pub fn mean_bytes_copied(&self) -> u64 {
        if self.collection_count == 0 {
            0
        } else {
            self.bytes_copied_total / self.collection_count
        }
    }
}
