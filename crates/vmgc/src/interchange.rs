//! Interchange Module - Deep Copy Across Heaps
//!
//! `copy_to` is the only way a value ever crosses from one executor's heap
//! into another's (§4.7): every closure reachable from the copied value is
//! reallocated fresh inside the destination heap, so a receiver's
//! collector never has to reason about a pointer it doesn't own. Unlike
//! the in-place collector in [`crate::gc`], the source heap belongs to a
//! live, possibly-running executor and must not be mutated, so sharing is
//! tracked with a `HashMap` memo keyed by source address instead of
//! forward markers.

use crate::closure::*;
use crate::error::VmError;
use crate::heap::Heap;
use crate::intern::{is_singleton_addr, singleton};
use crate::value::{Tag, Value};
use std::collections::HashMap;

/// Deep-copy `v` into `dest`, returning the equivalent value now owned
/// entirely by `dest`. Immediate integers and interned singletons are
/// returned unchanged (§4.5, §4.7).
pub fn copy_to(v: Value, dest: &mut Heap) -> Result<Value, VmError> {
    let mut memo = HashMap::new();
    copy_to_memo(v, dest, &mut memo)
}

fn alloc(dest: &mut Heap, size: usize) -> Result<usize, VmError> {
    dest.allocate(size).ok_or_else(|| VmError::OutOfHeap {
        requested: size,
        available: dest.remaining(),
    })
}

fn copy_to_memo(
    v: Value,
    dest: &mut Heap,
    memo: &mut HashMap<usize, Value>,
) -> Result<Value, VmError> {
    if v.is_int() {
        return Ok(v);
    }
    let addr = v.addr();
    if is_singleton_addr(addr) {
        return Ok(v);
    }
    if let Some(&copied) = memo.get(&addr) {
        return Ok(copied);
    }

    let tag = unsafe { v.tag() };
    let copied = match tag {
        Tag::Con => {
            let ctag = unsafe { con_ctag(addr) };
            let arity = unsafe { con_arity(addr) };
            if arity == 0 && ctag < 256 {
                let s = singleton(ctag);
                memo.insert(addr, s);
                return Ok(s);
            }
            let new_addr = alloc(dest, con_payload_size(arity))?;
            unsafe { con_init(new_addr, ctag, arity) };
            let new_val = Value::from_addr(new_addr);
            memo.insert(addr, new_val);
            for i in 0..arity {
                let child = unsafe { con_child(addr, i) };
                let copied_child = copy_to_memo(child, dest, memo)?;
                unsafe { con_set_child(new_addr, i, copied_child) };
            }
            new_val
        }
        Tag::Float => {
            let value = unsafe { float_read(addr) };
            let new_addr = alloc(dest, FLOAT_PAYLOAD_SIZE)?;
            unsafe { float_write(new_addr, value) };
            Value::from_addr(new_addr)
        }
        Tag::Str => {
            let len = unsafe { str_len(addr) };
            let bytes =
                unsafe { std::slice::from_raw_parts(str_data_ptr(addr) as *const u8, len) };
            let new_addr = alloc(dest, str_payload_size(len))?;
            unsafe { str_init(new_addr, len, bytes) };
            Value::from_addr(new_addr)
        }
        Tag::StrOffset => {
            let root = unsafe { stroffset_root(addr) };
            let offset = unsafe { stroffset_offset(addr) };
            let new_root = copy_to_memo(root, dest, memo)?;
            let new_addr = alloc(dest, STROFFSET_PAYLOAD_SIZE)?;
            unsafe { stroffset_init(new_addr, new_root, offset) };
            Value::from_addr(new_addr)
        }
        Tag::Bigint => {
            let len = unsafe { bigint_len(addr) };
            let bytes =
                unsafe { std::slice::from_raw_parts(bigint_data_ptr(addr) as *const u8, len) };
            let new_addr = alloc(dest, bigint_payload_size(len))?;
            unsafe { bigint_init(new_addr, bytes) };
            Value::from_addr(new_addr)
        }
        Tag::Ptr => {
            let raw = unsafe { ptr_read(addr) };
            let new_addr = alloc(dest, PTR_PAYLOAD_SIZE)?;
            unsafe { ptr_write(new_addr, raw) };
            Value::from_addr(new_addr)
        }
        Tag::ManagedPtr => {
            let size = unsafe { managedptr_size(addr) };
            let src = unsafe { managedptr_data_ptr(addr) };
            let new_addr = alloc(dest, managedptr_payload_size(size))?;
            unsafe { managedptr_init(new_addr, size, src) };
            Value::from_addr(new_addr)
        }
        Tag::Buffer => {
            let capacity = unsafe { buffer_capacity(addr) };
            let fill = unsafe { buffer_fill(addr) };
            let store = unsafe { buffer_store(addr) };
            let new_addr = alloc(dest, buffer_payload_size(capacity))?;
            unsafe {
                buffer_init(new_addr, capacity, fill);
                let new_store = buffer_store(new_addr);
                if fill > 0 {
                    crate::value::copy_bytes(store, new_store, fill);
                }
            }
            Value::from_addr(new_addr)
        }
        Tag::Bits8 | Tag::Bits16 | Tag::Bits32 | Tag::Bits64 => {
            let value = unsafe { bitword_read(addr) };
            let new_addr = alloc(dest, BITWORD_PAYLOAD_SIZE)?;
            unsafe { bitword_write(new_addr, tag, value) };
            Value::from_addr(new_addr)
        }
        Tag::Bits8x16 | Tag::Bits16x8 | Tag::Bits32x4 | Tag::Bits64x2 => {
            let bytes = unsafe { bits128_bytes(addr) };
            let new_addr = alloc(dest, BITS128_PAYLOAD_SIZE)?;
            unsafe { bits128_init(new_addr, tag, &bytes) };
            Value::from_addr(new_addr)
        }
        Tag::Forward => {
            return Err(VmError::UnexpectedForward { address: addr });
        }
    };

    memo.insert(addr, copied);
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::closure::{con_init, con_set_child};

    #[test]
    fn copies_immediate_integers_unchanged() {
        let mut dest = Heap::new(4096).unwrap();
        let v = Value::from_int(7);
        assert_eq!(copy_to(v, &mut dest).unwrap(), v);
    }

    #[test]
    fn copies_a_float_into_destination_heap() {
        let mut src = Heap::new(4096).unwrap();
        let addr = src.allocate(FLOAT_PAYLOAD_SIZE).unwrap();
        unsafe { float_write(addr, 2.25) };
        let mut dest = Heap::new(4096).unwrap();
        let copied = copy_to(Value::from_addr(addr), &mut dest).unwrap();
        assert!(dest.contains(copied.addr()));
        assert_eq!(unsafe { float_read(copied.addr()) }, 2.25);
    }

    #[test]
    fn shared_string_offset_root_is_copied_once() {
        let mut src = Heap::new(4096).unwrap();
        let str_addr = src.allocate(str_payload_size(5)).unwrap();
        unsafe { str_init(str_addr, 5, b"hello") };
        let root = Value::from_addr(str_addr);

        let off1_addr = src.allocate(STROFFSET_PAYLOAD_SIZE).unwrap();
        unsafe { stroffset_init(off1_addr, root, 1) };
        let off2_addr = src.allocate(STROFFSET_PAYLOAD_SIZE).unwrap();
        unsafe { stroffset_init(off2_addr, root, 3) };

        let ctor_addr = src.allocate(con_payload_size(2)).unwrap();
        unsafe {
            con_init(ctor_addr, 1, 2);
            con_set_child(ctor_addr, 0, Value::from_addr(off1_addr));
            con_set_child(ctor_addr, 1, Value::from_addr(off2_addr));
        }

        let mut dest = Heap::new(4096).unwrap();
        let copied = copy_to(Value::from_addr(ctor_addr), &mut dest).unwrap();
        let c0 = unsafe { con_child(copied.addr(), 0) };
        let c1 = unsafe { con_child(copied.addr(), 1) };
        let root0 = unsafe { stroffset_root(c0.addr()) };
        let root1 = unsafe { stroffset_root(c1.addr()) };
        assert_eq!(root0, root1);
    }

    #[test]
    fn nullary_constructor_below_256_becomes_the_singleton() {
        let mut src = Heap::new(4096).unwrap();
        let addr = src.allocate(con_payload_size(0)).unwrap();
        unsafe { con_init(addr, 5, 0) };
        let mut dest = Heap::new(4096).unwrap();
        let copied = copy_to(Value::from_addr(addr), &mut dest).unwrap();
        assert_eq!(copied, crate::intern::singleton(5));
    }
}
