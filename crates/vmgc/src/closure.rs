//! Closure Layouts - Per-Tag Payload Accessors
//!
//! Every closure begins with a full-word [`Tag`](crate::value::Tag) at
//! offset 0, followed by a tag-specific payload. This module is the single
//! source of truth for those layouts: the size a payload needs before
//! allocation, and the unsafe reads/writes used once an address has been
//! allocated.
//!
//! 128-bit lane values (`Bits8x16` .. `Bits64x2`) are the one shape whose
//! *size* is independent of content but whose *data pointer* still needs
//! computing at access time, because the bump allocator only guarantees
//! 8-byte alignment: 40 bytes are always reserved (tag + up to 16 bytes of
//! padding + 16 bytes of payload), enough to find a 16-byte-aligned window
//! no matter how the allocator's return address falls.

use crate::value::{align_addr, copy_bytes, read_u64, read_usize, write_u64, write_usize, Tag};

/// Fixed header word size within every payload (the tag itself).
const TAG_SIZE: usize = 8;

// ---------------------------------------------------------------------
// Constructor
// ---------------------------------------------------------------------

pub const CON_HEADER_SIZE: usize = TAG_SIZE + 2 + 2 + 4; // tag, ctag, arity, pad

pub fn con_payload_size(arity: u16) -> usize {
    CON_HEADER_SIZE + arity as usize * 8
}

/// # Safety
/// `addr` must be a live Con closure's address.
pub unsafe fn con_init(addr: usize, ctag: u16, arity: u16) {
    write_usize(addr, 0, Tag::Con as usize);
    ((addr + TAG_SIZE) as *mut u16).write_unaligned(ctag);
    ((addr + TAG_SIZE + 2) as *mut u16).write_unaligned(arity);
}

/// # Safety
/// `addr` must be a live Con closure's address.
pub unsafe fn con_ctag(addr: usize) -> u16 {
    ((addr + TAG_SIZE) as *const u16).read_unaligned()
}

/// # Safety
/// `addr` must be a live Con closure's address.
pub unsafe fn con_arity(addr: usize) -> u16 {
    ((addr + TAG_SIZE + 2) as *const u16).read_unaligned()
}

/// # Safety
/// `addr` must be a live Con closure's address and `i < arity`.
pub unsafe fn con_child(addr: usize, i: u16) -> crate::value::Value {
    crate::value::Value(read_usize(addr, CON_HEADER_SIZE + i as usize * 8))
}

/// # Safety
/// `addr` must be a live Con closure's address and `i < arity`.
pub unsafe fn con_set_child(addr: usize, i: u16, v: crate::value::Value) {
    write_usize(addr, CON_HEADER_SIZE + i as usize * 8, v.0);
}

// ---------------------------------------------------------------------
// Float
// ---------------------------------------------------------------------

pub const FLOAT_PAYLOAD_SIZE: usize = TAG_SIZE + 8;

/// # Safety
/// `addr` must be a live Float closure's address.
pub unsafe fn float_write(addr: usize, value: f64) {
    write_usize(addr, 0, Tag::Float as usize);
    ((addr + TAG_SIZE) as *mut f64).write_unaligned(value);
}

/// # Safety
/// `addr` must be a live Float closure's address.
pub unsafe fn float_read(addr: usize) -> f64 {
    ((addr + TAG_SIZE) as *const f64).read_unaligned()
}

// ---------------------------------------------------------------------
// String: [tag][len: usize][bytes..][NUL]
// ---------------------------------------------------------------------

pub const STR_HEADER_SIZE: usize = TAG_SIZE + 8;

pub fn str_payload_size(len: usize) -> usize {
    STR_HEADER_SIZE + len + 1
}

/// # Safety
/// `addr..addr+str_payload_size(len)` must be a live, owned allocation.
pub unsafe fn str_init(addr: usize, len: usize, bytes: &[u8]) {
    write_usize(addr, 0, Tag::Str as usize);
    write_usize(addr, TAG_SIZE, len);
    let data = str_data_ptr(addr);
    if len > 0 {
        copy_bytes(bytes.as_ptr() as usize, data, len);
    }
    (data as *mut u8).add(len).write(0);
}

/// # Safety
/// `addr` must be a live Str closure's address.
pub unsafe fn str_len(addr: usize) -> usize {
    read_usize(addr, TAG_SIZE)
}

/// # Safety
/// `addr` must be a live Str closure's address.
pub unsafe fn str_data_ptr(addr: usize) -> usize {
    addr + STR_HEADER_SIZE
}

// ---------------------------------------------------------------------
// String-offset: [tag][root: Value][offset: usize]
// ---------------------------------------------------------------------

pub const STROFFSET_PAYLOAD_SIZE: usize = TAG_SIZE + 8 + 8;

/// # Safety
/// `addr` must be a live StrOffset closure's address.
pub unsafe fn stroffset_init(addr: usize, root: crate::value::Value, offset: usize) {
    write_usize(addr, 0, Tag::StrOffset as usize);
    write_usize(addr, TAG_SIZE, root.0);
    write_usize(addr, TAG_SIZE + 8, offset);
}

/// # Safety
/// `addr` must be a live StrOffset closure's address.
pub unsafe fn stroffset_root(addr: usize) -> crate::value::Value {
    crate::value::Value(read_usize(addr, TAG_SIZE))
}

/// # Safety
/// `addr` must be a live StrOffset closure's address.
pub unsafe fn stroffset_offset(addr: usize) -> usize {
    read_usize(addr, TAG_SIZE + 8)
}

/// # Safety
/// `addr` must be a live StrOffset closure's address.
pub unsafe fn stroffset_set_root(addr: usize, root: crate::value::Value) {
    write_usize(addr, TAG_SIZE, root.0);
}

// ---------------------------------------------------------------------
// Bigint: opaque blob, [tag][len: usize][bytes..]
// ---------------------------------------------------------------------

pub const BIGINT_HEADER_SIZE: usize = TAG_SIZE + 8;

pub fn bigint_payload_size(len: usize) -> usize {
    BIGINT_HEADER_SIZE + len
}

/// # Safety
/// `addr..addr+bigint_payload_size(len)` must be a live, owned allocation.
pub unsafe fn bigint_init(addr: usize, bytes: &[u8]) {
    write_usize(addr, 0, Tag::Bigint as usize);
    write_usize(addr, TAG_SIZE, bytes.len());
    if !bytes.is_empty() {
        copy_bytes(bytes.as_ptr() as usize, addr + BIGINT_HEADER_SIZE, bytes.len());
    }
}

/// # Safety
/// `addr` must be a live Bigint closure's address.
pub unsafe fn bigint_len(addr: usize) -> usize {
    read_usize(addr, TAG_SIZE)
}

/// # Safety
/// `addr` must be a live Bigint closure's address.
pub unsafe fn bigint_data_ptr(addr: usize) -> usize {
    addr + BIGINT_HEADER_SIZE
}

// ---------------------------------------------------------------------
// Unmanaged pointer
// ---------------------------------------------------------------------

pub const PTR_PAYLOAD_SIZE: usize = TAG_SIZE + 8;

/// # Safety
/// `addr` must be a live Ptr closure's address.
pub unsafe fn ptr_write(addr: usize, raw: usize) {
    write_usize(addr, 0, Tag::Ptr as usize);
    write_usize(addr, TAG_SIZE, raw);
}

/// # Safety
/// `addr` must be a live Ptr closure's address.
pub unsafe fn ptr_read(addr: usize) -> usize {
    read_usize(addr, TAG_SIZE)
}

// ---------------------------------------------------------------------
// Managed pointer: [tag][size: usize][data_ptr: usize][bytes..]
// ---------------------------------------------------------------------

pub const MANAGEDPTR_HEADER_SIZE: usize = TAG_SIZE + 8 + 8;

pub fn managedptr_payload_size(size: usize) -> usize {
    MANAGEDPTR_HEADER_SIZE + size
}

/// # Safety
/// `addr..addr+managedptr_payload_size(size)` must be a live, owned
/// allocation, and `src` must be valid for `size` bytes.
pub unsafe fn managedptr_init(addr: usize, size: usize, src: usize) {
    write_usize(addr, 0, Tag::ManagedPtr as usize);
    write_usize(addr, TAG_SIZE, size);
    let data = addr + MANAGEDPTR_HEADER_SIZE;
    write_usize(addr, TAG_SIZE + 8, data);
    if size > 0 {
        copy_bytes(src, data, size);
    }
}

/// # Safety
/// `addr` must be a live ManagedPtr closure's address.
pub unsafe fn managedptr_size(addr: usize) -> usize {
    read_usize(addr, TAG_SIZE)
}

/// # Safety
/// `addr` must be a live ManagedPtr closure's address.
pub unsafe fn managedptr_data_ptr(addr: usize) -> usize {
    read_usize(addr, TAG_SIZE + 8)
}

/// # Safety
/// `addr` must be a live ManagedPtr closure's address.
pub unsafe fn managedptr_set_data_ptr(addr: usize, data: usize) {
    write_usize(addr, TAG_SIZE + 8, data);
}

// ---------------------------------------------------------------------
// Buffer: [tag][capacity: usize][fill: usize][store: usize][bytes..]
// ---------------------------------------------------------------------

pub const BUFFER_HEADER_SIZE: usize = TAG_SIZE + 8 + 8 + 8;

pub fn buffer_payload_size(capacity: usize) -> usize {
    BUFFER_HEADER_SIZE + capacity
}

/// # Safety
/// `addr..addr+buffer_payload_size(capacity)` must be a live, owned
/// allocation.
pub unsafe fn buffer_init(addr: usize, capacity: usize, fill: usize) {
    write_usize(addr, 0, Tag::Buffer as usize);
    write_usize(addr, TAG_SIZE, capacity);
    write_usize(addr, TAG_SIZE + 8, fill);
    write_usize(addr, TAG_SIZE + 16, addr + BUFFER_HEADER_SIZE);
}

/// # Safety
/// `addr` must be a live Buffer closure's address.
pub unsafe fn buffer_capacity(addr: usize) -> usize {
    read_usize(addr, TAG_SIZE)
}

/// # Safety
/// `addr` must be a live Buffer closure's address.
pub unsafe fn buffer_fill(addr: usize) -> usize {
    read_usize(addr, TAG_SIZE + 8)
}

/// # Safety
/// `addr` must be a live Buffer closure's address.
pub unsafe fn buffer_set_fill(addr: usize, fill: usize) {
    write_usize(addr, TAG_SIZE + 8, fill);
}

/// # Safety
/// `addr` must be a live Buffer closure's address.
pub unsafe fn buffer_store(addr: usize) -> usize {
    read_usize(addr, TAG_SIZE + 16)
}

/// # Safety
/// `addr` must be a live Buffer closure's address.
pub unsafe fn buffer_set_store(addr: usize, store: usize) {
    write_usize(addr, TAG_SIZE + 16, store);
}

// ---------------------------------------------------------------------
// Fixed-width bitwords
// ---------------------------------------------------------------------

pub const BITWORD_PAYLOAD_SIZE: usize = TAG_SIZE + 8;

/// # Safety
/// `addr` must be a live Bits8/16/32/64 closure's address.
pub unsafe fn bitword_write(addr: usize, tag: Tag, value: u64) {
    write_usize(addr, 0, tag as usize);
    write_u64(addr, TAG_SIZE, value);
}

/// # Safety
/// `addr` must be a live Bits8/16/32/64 closure's address.
pub unsafe fn bitword_read(addr: usize) -> u64 {
    read_u64(addr, TAG_SIZE)
}

// ---------------------------------------------------------------------
// 128-bit lane vectors
// ---------------------------------------------------------------------

/// Always 40 bytes: tag (8) + worst-case alignment padding (16) + payload
/// (16). See module docs.
pub const BITS128_PAYLOAD_SIZE: usize = TAG_SIZE + 16 + 16;

/// # Safety
/// `addr` must be a live Bits8x16/Bits16x8/Bits32x4/Bits64x2 closure's
/// address.
pub unsafe fn bits128_data_ptr(addr: usize) -> usize {
    align_addr(addr + TAG_SIZE, 16)
}

/// # Safety
/// `addr..addr+BITS128_PAYLOAD_SIZE` must be a live, owned allocation, and
/// `bytes` must be exactly 16 bytes.
pub unsafe fn bits128_init(addr: usize, tag: Tag, bytes: &[u8; 16]) {
    write_usize(addr, 0, tag as usize);
    let data = bits128_data_ptr(addr);
    copy_bytes(bytes.as_ptr() as usize, data, 16);
}

/// # Safety
/// `addr` must be a live 128-bit closure's address.
pub unsafe fn bits128_bytes(addr: usize) -> [u8; 16] {
    let data = bits128_data_ptr(addr);
    let mut out = [0u8; 16];
    copy_bytes(data, out.as_mut_ptr() as usize, 16);
    out
}

// ---------------------------------------------------------------------
// Forward marker
// ---------------------------------------------------------------------

pub const FORWARD_PAYLOAD_SIZE: usize = TAG_SIZE + 8;

/// # Safety
/// `addr..addr+FORWARD_PAYLOAD_SIZE` must be a live, owned allocation (it
/// overwrites whatever closure used to live there).
pub unsafe fn forward_write(addr: usize, new_addr: usize) {
    write_usize(addr, 0, Tag::Forward as usize);
    write_usize(addr, TAG_SIZE, new_addr);
}

/// # Safety
/// `addr` must currently hold a Forward tag.
pub unsafe fn forward_target(addr: usize) -> usize {
    read_usize(addr, TAG_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn con_layout_roundtrips() {
        let mut buf = vec![0u8; con_payload_size(2)];
        let addr = buf.as_mut_ptr() as usize;
        unsafe {
            con_init(addr, 7, 2);
            con_set_child(addr, 0, Value::from_int(1));
            con_set_child(addr, 1, Value::from_int(2));
            assert_eq!(con_ctag(addr), 7);
            assert_eq!(con_arity(addr), 2);
            assert_eq!(con_child(addr, 0), Value::from_int(1));
            assert_eq!(con_child(addr, 1), Value::from_int(2));
        }
    }

    #[test]
    fn string_layout_roundtrips() {
        let mut buf = vec![0u8; str_payload_size(5)];
        let addr = buf.as_mut_ptr() as usize;
        unsafe {
            str_init(addr, 5, b"hello");
            assert_eq!(str_len(addr), 5);
            let data = str_data_ptr(addr);
            let s = std::slice::from_raw_parts(data as *const u8, 5);
            assert_eq!(s, b"hello");
            assert_eq!(*(data as *const u8).add(5), 0);
        }
    }

    #[test]
    fn bits128_data_ptr_is_aligned_regardless_of_base() {
        // allocate extra to allow shifting the base by 1..8 bytes and still
        // have room for the full BITS128_PAYLOAD_SIZE window
        let mut buf = vec![0u8; BITS128_PAYLOAD_SIZE + 8];
        for shift in 0..8 {
            let addr = buf.as_mut_ptr() as usize + shift;
            unsafe {
                let data = bits128_data_ptr(addr);
                assert_eq!(data % 16, 0);
                let bytes = [1u8; 16];
                bits128_init(addr, Tag::Bits8x16, &bytes);
                assert_eq!(bits128_bytes(addr), bytes);
            }
        }
    }

    #[test]
    fn buffer_layout_tracks_fill_and_store() {
        let mut buf = vec![0u8; buffer_payload_size(16)];
        let addr = buf.as_mut_ptr() as usize;
        unsafe {
            buffer_init(addr, 16, 0);
            assert_eq!(buffer_capacity(addr), 16);
            assert_eq!(buffer_fill(addr), 0);
            buffer_set_fill(addr, 4);
            assert_eq!(buffer_fill(addr), 4);
            assert_eq!(buffer_store(addr), addr + BUFFER_HEADER_SIZE);
        }
    }
}
