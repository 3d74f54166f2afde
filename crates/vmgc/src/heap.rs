//! Heap Module - Single-Semispace Bump Allocator
//!
//! Each [`Executor`](crate::executor::Executor) owns exactly one active
//! semispace at a time (§4.1): a `memmap2` anonymous mapping bump-allocated
//! from `start` towards `end`. A collection replaces the whole mapping with
//! a fresh one sized by the resizing policy in §4.4; the old mapping is
//! simply dropped once nothing references it any more.
//!
//! Every chunk this allocator hands out is prefixed by a `HEADER_SIZE`-byte
//! total-chunk-size word, written before the content address is returned.
//! The collector uses that header to skip whole chunks while scanning
//! to-space without knowing anything about a chunk's tag-specific layout.

use crate::error::VmError;
use crate::value::{align_up, read_usize, write_usize, HEADER_SIZE};
use memmap2::{MmapMut, MmapOptions};

/// Round `size` up to the OS page size, queried at runtime since it is not
/// always 4096 (16 KiB pages on some platforms): `memmap2` mappings are
/// already page-granular underneath, so this just keeps request sizes
/// tidy.
fn align_to_page(size: usize) -> usize {
    let page = page_size::get();
    (size + page - 1) & !(page - 1)
}

/// A single bump-allocated semispace.
pub struct Heap {
    mmap: MmapMut,
    start: usize,
    next: usize,
    end: usize,
}

impl Heap {
    /// Map a fresh semispace of at least `size` bytes.
    pub fn new(size: usize) -> Result<Self, VmError> {
        let aligned = align_to_page(size.max(page_size::get()));
        let mmap = MmapOptions::new().len(aligned).map_anon().map_err(|e| {
            VmError::Configuration(format!("failed to map {aligned} byte semispace: {e}"))
        })?;
        let start = mmap.as_ptr() as usize;
        Ok(Heap {
            mmap,
            start,
            next: start,
            end: start + aligned,
        })
    }

    /// Total capacity of this semispace in bytes.
    pub fn capacity(&self) -> usize {
        self.end - self.start
    }

    /// Bytes already handed out (including headers and alignment padding).
    pub fn used(&self) -> usize {
        self.next - self.start
    }

    /// Bytes still available for allocation.
    pub fn remaining(&self) -> usize {
        self.end - self.next
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn next(&self) -> usize {
        self.next
    }

    /// Whether `addr` is backed by this semispace's mapping.
    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.start && addr < self.end
    }

    /// Bump-allocate `payload_size` bytes, returning the content address
    /// just past the chunk's header. Returns `None` if the semispace has
    /// no room; the caller (the executor, per §4.1) is responsible for
    /// triggering a collection and retrying.
    pub fn allocate(&mut self, payload_size: usize) -> Option<usize> {
        let chunk_size = HEADER_SIZE + align_up(payload_size);
        if self.next + chunk_size > self.end {
            return None;
        }
        let chunk_start = self.next;
        unsafe {
            write_usize(chunk_start, 0, chunk_size);
        }
        self.next += chunk_size;
        Some(chunk_start + HEADER_SIZE)
    }

    /// Total chunk size (header + payload + padding) for a content address
    /// previously returned by [`Heap::allocate`].
    ///
    /// # Safety
    /// `content_addr` must be a live chunk's content address within this or
    /// a prior semispace that has not been unmapped.
    pub unsafe fn chunk_size(content_addr: usize) -> usize {
        read_usize(content_addr - HEADER_SIZE, 0)
    }

    /// Bump-allocate a chunk of exactly `chunk_size` bytes (header
    /// included, no further rounding), used by the collector to replicate
    /// a from-space chunk's footprint verbatim in to-space.
    pub fn allocate_exact(&mut self, chunk_size: usize) -> Option<usize> {
        if self.next + chunk_size > self.end {
            return None;
        }
        let chunk_start = self.next;
        unsafe {
            write_usize(chunk_start, 0, chunk_size);
        }
        self.next += chunk_size;
        Some(chunk_start + HEADER_SIZE)
    }

    /// Replace this heap's backing mapping with a freshly sized one,
    /// discarding everything previously allocated. Used by the collector
    /// to install a new to-space after a cycle completes (§4.4).
    pub fn replace(&mut self, size: usize) -> Result<(), VmError> {
        *self = Heap::new(size)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_bumps_pointer_and_respects_capacity() {
        let mut heap = Heap::new(page_size::get()).unwrap();
        let a = heap.allocate(16).unwrap();
        let b = heap.allocate(16).unwrap();
        assert!(b > a);
        assert_eq!(unsafe { Heap::chunk_size(a) }, HEADER_SIZE + 16);
    }

    #[test]
    fn allocate_fails_when_exhausted() {
        let mut heap = Heap::new(page_size::get()).unwrap();
        let cap = heap.capacity();
        assert!(heap.allocate(cap).is_none());
        assert!(heap.allocate(cap - HEADER_SIZE).is_some());
    }

    #[test]
    fn contains_checks_the_mapped_range() {
        let heap = Heap::new(page_size::get()).unwrap();
        assert!(heap.contains(heap.start()));
        assert!(!heap.contains(heap.start() + heap.capacity()));
    }

    #[test]
    fn replace_resets_bump_pointer() {
        let mut heap = Heap::new(page_size::get()).unwrap();
        heap.allocate(32).unwrap();
        assert!(heap.used() > 0);
        heap.replace(page_size::get() * 2).unwrap();
        assert_eq!(heap.used(), 0);
        assert!(heap.capacity() >= page_size::get() * 2);
    }
}
