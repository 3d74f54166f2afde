//! Interning Module - Nullary Constructor Singletons
//!
//! Nullary constructors (`ctag < 256`, arity 0) carry no payload worth
//! copying, so every executor shares one process-wide instance per tag
//! instead of allocating its own. These singletons are allocated once,
//! outside of any executor's semispace, and never moved: the collector
//! checks each address against the exact set of singleton addresses and
//! skips the ones it finds there entirely (§4.5).

use crate::closure::{con_init, con_payload_size};
use crate::value::Value;
use lazy_static::lazy_static;
use std::alloc::{alloc_zeroed, Layout};
use std::collections::HashSet;

/// Number of interned nullary constructor singletons.
pub const SINGLETON_COUNT: usize = 256;

struct SingletonTable {
    values: [Value; SINGLETON_COUNT],
    /// Exact addresses of every singleton's backing allocation. Each is a
    /// separate 8-byte-aligned allocation from the global allocator, so
    /// they are not guaranteed to be contiguous or ordered; membership is
    /// checked by exact address rather than by range.
    addrs: HashSet<usize>,
}

// Safety: every Value in the table points into an allocation that is never
// written to after `SingletonTable::build` and never freed.
unsafe impl Send for SingletonTable {}
unsafe impl Sync for SingletonTable {}

impl SingletonTable {
    fn build() -> Self {
        let mut values = [Value::NULL; SINGLETON_COUNT];
        let mut addrs = HashSet::with_capacity(SINGLETON_COUNT);

        for (ctag, slot) in values.iter_mut().enumerate() {
            let size = con_payload_size(0);
            // A plain `Vec<u8>`'s element alignment is 1; nothing in the
            // allocator API guarantees the 8-byte alignment `Value::from_addr`
            // requires, only that real allocators happen to over-align small
            // requests. Request the alignment explicitly instead.
            let layout = Layout::from_size_align(size, 8).expect("valid singleton layout");
            let addr = unsafe {
                let ptr = alloc_zeroed(layout);
                assert!(!ptr.is_null(), "allocation failure building singleton table");
                ptr as usize
            };
            unsafe {
                con_init(addr, ctag as u16, 0);
            }
            *slot = Value::from_addr(addr);
            addrs.insert(addr);
        }

        SingletonTable { values, addrs }
    }
}

lazy_static! {
    static ref SINGLETONS: SingletonTable = SingletonTable::build();
}

/// Look up the shared singleton for nullary constructor `ctag`.
///
/// # Panics
/// Panics if `ctag >= SINGLETON_COUNT`; callers are expected to have
/// already checked `arity == 0 && ctag < 256` before reaching here.
pub fn singleton(ctag: u16) -> Value {
    SINGLETONS.values[ctag as usize]
}

/// Whether `addr` is exactly one of the singleton table's backing
/// allocations.
///
/// Used by the collector to recognise singleton closures by address alone,
/// without dereferencing memory that may not belong to the executor's own
/// semispace.
pub fn is_singleton_addr(addr: usize) -> bool {
    SINGLETONS.addrs.contains(&addr)
}
