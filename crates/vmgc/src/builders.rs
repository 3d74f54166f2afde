//! Builders Module - Value Construction and String/Buffer Operations
//!
//! One function per primary builder from §4.2, each taking the "caller
//! already reserved" flag and threading it straight into
//! [`Executor::allocate`]. Builders that need more than one allocation
//! (buffer append's grow-in-place-or-copy choice, string concat/cons)
//! build their bytes in a local `Vec` first and make exactly one heap
//! allocation, so there is no window where a partially built closure
//! could be relocated out from under them.

use crate::closure::*;
use crate::error::VmError;
use crate::executor::Executor;
use crate::value::{Tag, Value};

/// Pack an integer into an immediate value. Never allocates.
pub fn integer(n: i64) -> Value {
    Value::from_int(n)
}

pub fn float_new(exec: &Executor, v: f64, reserved: bool) -> Result<Value, VmError> {
    let addr = exec.allocate(FLOAT_PAYLOAD_SIZE, reserved)?;
    unsafe { float_write(addr, v) };
    Ok(Value::from_addr(addr))
}

pub fn ptr_new(exec: &Executor, raw: usize, reserved: bool) -> Result<Value, VmError> {
    let addr = exec.allocate(PTR_PAYLOAD_SIZE, reserved)?;
    unsafe { ptr_write(addr, raw) };
    Ok(Value::from_addr(addr))
}

pub fn managedptr_new(exec: &Executor, src: &[u8], reserved: bool) -> Result<Value, VmError> {
    let addr = exec.allocate(managedptr_payload_size(src.len()), reserved)?;
    unsafe { managedptr_init(addr, src.len(), src.as_ptr() as usize) };
    Ok(Value::from_addr(addr))
}

pub fn bits8(exec: &Executor, v: u8, reserved: bool) -> Result<Value, VmError> {
    bitword(exec, Tag::Bits8, v as u64, reserved)
}

pub fn bits16(exec: &Executor, v: u16, reserved: bool) -> Result<Value, VmError> {
    bitword(exec, Tag::Bits16, v as u64, reserved)
}

pub fn bits32(exec: &Executor, v: u32, reserved: bool) -> Result<Value, VmError> {
    bitword(exec, Tag::Bits32, v as u64, reserved)
}

pub fn bits64(exec: &Executor, v: u64, reserved: bool) -> Result<Value, VmError> {
    bitword(exec, Tag::Bits64, v, reserved)
}

fn bitword(exec: &Executor, tag: Tag, v: u64, reserved: bool) -> Result<Value, VmError> {
    let addr = exec.allocate(BITWORD_PAYLOAD_SIZE, reserved)?;
    unsafe { bitword_write(addr, tag, v) };
    Ok(Value::from_addr(addr))
}

/// Width in bytes of a bitword/peek tag's element.
fn bitword_width(tag: Tag) -> usize {
    match tag {
        Tag::Bits8 => 1,
        Tag::Bits16 => 2,
        Tag::Bits32 => 4,
        Tag::Bits64 => 8,
        other => panic!("not a bitword tag: {other}"),
    }
}

/// 128-bit lane builder from 16 individual byte values.
pub fn bits8x16(exec: &Executor, lanes: [u8; 16], reserved: bool) -> Result<Value, VmError> {
    bits128(exec, Tag::Bits8x16, &lanes, reserved)
}

/// 128-bit lane builder from 8 halfword values.
pub fn bits16x8(exec: &Executor, lanes: [u16; 8], reserved: bool) -> Result<Value, VmError> {
    let mut bytes = [0u8; 16];
    for (i, lane) in lanes.iter().enumerate() {
        bytes[i * 2..i * 2 + 2].copy_from_slice(&lane.to_ne_bytes());
    }
    bits128(exec, Tag::Bits16x8, &bytes, reserved)
}

/// 128-bit lane builder from 4 word values.
pub fn bits32x4(exec: &Executor, lanes: [u32; 4], reserved: bool) -> Result<Value, VmError> {
    let mut bytes = [0u8; 16];
    for (i, lane) in lanes.iter().enumerate() {
        bytes[i * 4..i * 4 + 4].copy_from_slice(&lane.to_ne_bytes());
    }
    bits128(exec, Tag::Bits32x4, &bytes, reserved)
}

/// 128-bit lane builder from 2 long values.
pub fn bits64x2(exec: &Executor, lanes: [u64; 2], reserved: bool) -> Result<Value, VmError> {
    let mut bytes = [0u8; 16];
    bytes[0..8].copy_from_slice(&lanes[0].to_ne_bytes());
    bytes[8..16].copy_from_slice(&lanes[1].to_ne_bytes());
    bits128(exec, Tag::Bits64x2, &bytes, reserved)
}

fn bits128(exec: &Executor, tag: Tag, bytes: &[u8; 16], reserved: bool) -> Result<Value, VmError> {
    let addr = exec.allocate(BITS128_PAYLOAD_SIZE, reserved)?;
    unsafe { bits128_init(addr, tag, bytes) };
    Ok(Value::from_addr(addr))
}

/// Build a fresh string closure from raw bytes. An empty slice still gets
/// a one-byte NUL-terminated payload (§4.2).
pub fn string_new(exec: &Executor, bytes: &[u8], reserved: bool) -> Result<Value, VmError> {
    let addr = exec.allocate(str_payload_size(bytes.len()), reserved)?;
    unsafe { str_init(addr, bytes.len(), bytes) };
    Ok(Value::from_addr(addr))
}

/// Bytes backing a string or string-offset value, following offsets down
/// to their root.
///
/// # Safety
/// `v` must be a pointer to a live Str or StrOffset closure that remains
/// unreachable by a collection for as long as the returned pointer/length
/// pair is used.
unsafe fn string_bytes(v: Value) -> (usize, usize) {
    match v.tag() {
        Tag::Str => (str_data_ptr(v.addr()), str_len(v.addr())),
        Tag::StrOffset => {
            let root = stroffset_root(v.addr());
            let offset = stroffset_offset(v.addr());
            let (data, len) = string_bytes(root);
            (data + offset, len - offset)
        }
        other => panic!("not a string: {other}"),
    }
}

/// # Safety
/// See [`string_bytes`].
unsafe fn string_slice(v: Value) -> &'static [u8] {
    let (data, len) = string_bytes(v);
    std::slice::from_raw_parts(data as *const u8, len)
}

fn canonical_root(v: Value) -> (Value, usize) {
    unsafe {
        match v.tag() {
            Tag::Str => (v, 0),
            Tag::StrOffset => (stroffset_root(v.addr()), stroffset_offset(v.addr())),
            other => panic!("not a string: {other}"),
        }
    }
}

/// Advance a string by one byte. Prefers allocating a fresh offset cell
/// over copying when there is room (§4.2 string-offset tail).
pub fn string_tail(exec: &Executor, v: Value) -> Result<Value, VmError> {
    let (root, offset) = canonical_root(v);
    let new_offset = offset + 1;
    if exec.space(STROFFSET_PAYLOAD_SIZE) {
        let addr = exec.allocate(STROFFSET_PAYLOAD_SIZE, false)?;
        unsafe { stroffset_init(addr, root, new_offset) };
        Ok(Value::from_addr(addr))
    } else {
        let bytes = unsafe { string_slice(v) };
        string_new(exec, &bytes[1..], false)
    }
}

pub fn string_cons(exec: &Executor, head: u8, tail: Value) -> Result<Value, VmError> {
    let tail_bytes = unsafe { string_slice(tail) };
    let mut bytes = Vec::with_capacity(tail_bytes.len() + 1);
    bytes.push(head);
    bytes.extend_from_slice(tail_bytes);
    string_new(exec, &bytes, false)
}

pub fn string_reverse(exec: &Executor, v: Value) -> Result<Value, VmError> {
    let mut bytes = unsafe { string_slice(v) }.to_vec();
    bytes.reverse();
    string_new(exec, &bytes, false)
}

/// Return the byte at `index` as an immediate integer. Never allocates.
pub fn string_index(v: Value, index: usize) -> i64 {
    unsafe { string_slice(v)[index] as i64 }
}

pub fn string_length(v: Value) -> i64 {
    unsafe { string_slice(v).len() as i64 }
}

pub fn string_concat(exec: &Executor, a: Value, b: Value) -> Result<Value, VmError> {
    let a_bytes = unsafe { string_slice(a) };
    let b_bytes = unsafe { string_slice(b) };
    let mut bytes = Vec::with_capacity(a_bytes.len() + b_bytes.len());
    bytes.extend_from_slice(a_bytes);
    bytes.extend_from_slice(b_bytes);
    string_new(exec, &bytes, false)
}

pub fn string_compare(a: Value, b: Value) -> i64 {
    match unsafe { string_slice(a).cmp(string_slice(b)) } {
        std::cmp::Ordering::Less => -1,
        std::cmp::Ordering::Equal => 0,
        std::cmp::Ordering::Greater => 1,
    }
}

pub fn string_less(a: Value, b: Value) -> bool {
    unsafe { string_slice(a) < string_slice(b) }
}

pub fn string_equal(a: Value, b: Value) -> bool {
    unsafe { string_slice(a) == string_slice(b) }
}

/// Widest decimal rendering of a 64-bit value plus a NUL (§4.2).
const MAX_DECIMAL_STRING: usize = 21;

pub fn cast_int_to_string(exec: &Executor, n: i64) -> Result<Value, VmError> {
    let rendered = n.to_string();
    debug_assert!(rendered.len() + 1 <= MAX_DECIMAL_STRING);
    string_new(exec, rendered.as_bytes(), false)
}

fn parse_trimmed<T: std::str::FromStr>(bytes: &[u8], default: T) -> T {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.trim_end_matches('\0').parse().ok())
        .unwrap_or(default)
}

pub fn cast_string_to_int(v: Value) -> i64 {
    parse_trimmed(unsafe { string_slice(v) }, 0)
}

pub fn cast_float_to_string(exec: &Executor, f: f64) -> Result<Value, VmError> {
    string_new(exec, f.to_string().as_bytes(), false)
}

pub fn cast_string_to_float(v: Value) -> f64 {
    parse_trimmed(unsafe { string_slice(v) }, 0.0)
}

pub fn cast_bits_to_string(exec: &Executor, v: Value) -> Result<Value, VmError> {
    let n = unsafe { bitword_read(v.addr()) };
    string_new(exec, n.to_string().as_bytes(), false)
}

/// Allocate a new buffer whose capacity is the next power of two at least
/// `hint + headers` bytes, with a zeroed fill (§4.2).
pub fn buffer_allocate(exec: &Executor, hint: usize, reserved: bool) -> Result<Value, VmError> {
    let capacity = (hint + BUFFER_HEADER_SIZE).next_power_of_two();
    let addr = exec.allocate(buffer_payload_size(capacity), reserved)?;
    unsafe { buffer_init(addr, capacity, 0) };
    Ok(Value::from_addr(addr))
}

/// Bytes currently stored in `buf`, `[0, fill)`.
///
/// # Safety
/// `buf` must be a pointer to a live Buffer closure.
pub unsafe fn buffer_bytes(buf: Value) -> &'static [u8] {
    let store = buffer_store(buf.addr());
    let fill = buffer_fill(buf.addr());
    std::slice::from_raw_parts(store as *const u8, fill)
}

/// Append `bytes` onto `buf`. Extends in place when capacity allows,
/// otherwise allocates a fresh, larger buffer and copies the old contents
/// across (§4.2).
pub fn buffer_append(exec: &Executor, buf: Value, bytes: &[u8]) -> Result<Value, VmError> {
    let added = bytes.len();
    let fill = unsafe { buffer_fill(buf.addr()) };
    let capacity = unsafe { buffer_capacity(buf.addr()) };

    if fill + added <= capacity {
        unsafe {
            let store = buffer_store(buf.addr());
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), (store + fill) as *mut u8, added);
            buffer_set_fill(buf.addr(), fill + added);
        }
        return Ok(buf);
    }

    // Snapshot the old contents into a local `Vec` before reserving: `reserve`
    // can trigger a collection, which relocates `buf` (and frees its old
    // semispace outright), so `buf.addr()` must not be read again afterwards.
    let old_bytes = if fill > 0 {
        unsafe { buffer_bytes(buf) }.to_vec()
    } else {
        Vec::new()
    };

    let new_capacity = (fill + added).next_power_of_two().max(capacity * 2);
    let reservation = exec.reserve(buffer_payload_size(new_capacity))?;
    let new_addr = exec.allocate(buffer_payload_size(new_capacity), true)?;
    unsafe {
        buffer_init(new_addr, new_capacity, fill + added);
        let new_store = buffer_store(new_addr);
        if !old_bytes.is_empty() {
            crate::value::copy_bytes(old_bytes.as_ptr() as usize, new_store, fill);
        }
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), (new_store + fill) as *mut u8, added);
    }
    reservation.done_reserve();
    Ok(Value::from_addr(new_addr))
}

/// Append `count` copies of a single byte. The platform fill primitive
/// fast path referenced in §4.2.
pub fn buffer_append_repeated(
    exec: &Executor,
    buf: Value,
    byte: u8,
    count: usize,
) -> Result<Value, VmError> {
    let bytes = vec![byte; count];
    buffer_append(exec, buf, &bytes)
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

fn encode_bits(tag: Tag, value: u64, endian: Endian) -> Vec<u8> {
    let width = bitword_width(tag);
    let mut bytes = value.to_le_bytes()[..width].to_vec();
    if endian == Endian::Big {
        bytes.reverse();
    }
    bytes
}

fn decode_bits(bytes: &[u8], endian: Endian) -> u64 {
    let mut ordered = bytes.to_vec();
    if endian == Endian::Big {
        ordered.reverse();
    }
    let mut buf = [0u8; 8];
    buf[..ordered.len()].copy_from_slice(&ordered);
    u64::from_le_bytes(buf)
}

/// Append a single bitword's bytes, composed in the requested endianness
/// (§4.2 buffer append-bits / little-endian / big-endian).
pub fn buffer_append_bits(
    exec: &Executor,
    buf: Value,
    tag: Tag,
    value: u64,
    endian: Endian,
) -> Result<Value, VmError> {
    let bytes = encode_bits(tag, value, endian);
    buffer_append(exec, buf, &bytes)
}

/// Decode a fresh bitword value from the buffer's bytes at `offset` in
/// the requested endianness (§4.2 buffer peek).
pub fn buffer_peek(
    exec: &Executor,
    buf: Value,
    offset: usize,
    tag: Tag,
    endian: Endian,
    reserved: bool,
) -> Result<Value, VmError> {
    let width = bitword_width(tag);
    let store = unsafe { buffer_store(buf.addr()) };
    let bytes = unsafe { std::slice::from_raw_parts((store + offset) as *const u8, width) };
    let value = decode_bits(bytes, endian);
    bitword(exec, tag, value, reserved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VmConfig;

    fn exec() -> Executor {
        Executor::new(1, VmConfig::default()).unwrap()
    }

    #[test]
    fn integer_builder_never_allocates() {
        assert_eq!(integer(42), Value::from_int(42));
    }

    #[test]
    fn float_roundtrips() {
        let e = exec();
        let v = float_new(&e, 1.5, false).unwrap();
        assert_eq!(unsafe { float_read(v.addr()) }, 1.5);
    }

    #[test]
    fn string_builders_roundtrip() {
        let e = exec();
        let s = string_new(&e, b"hello", false).unwrap();
        assert_eq!(string_length(s), 5);
        assert_eq!(string_index(s, 1), b'e' as i64);

        let tail = string_tail(&e, s).unwrap();
        assert_eq!(string_length(tail), 4);
        assert_eq!(string_index(tail, 0), b'e' as i64);

        let consed = string_cons(&e, b'x', tail).unwrap();
        assert!(string_equal(consed, string_new(&e, b"xello", false).unwrap()));

        let reversed = string_reverse(&e, s).unwrap();
        assert!(string_equal(reversed, string_new(&e, b"olleh", false).unwrap()));

        let concatenated = string_concat(&e, s, tail).unwrap();
        assert!(string_equal(
            concatenated,
            string_new(&e, b"helloello", false).unwrap()
        ));

        assert!(string_less(
            string_new(&e, b"abc", false).unwrap(),
            string_new(&e, b"abd", false).unwrap()
        ));
        assert_eq!(string_compare(s, s), 0);
    }

    #[test]
    fn cast_round_trips() {
        let e = exec();
        let s = cast_int_to_string(&e, -42).unwrap();
        assert_eq!(cast_string_to_int(s), -42);

        let f = cast_float_to_string(&e, 3.5).unwrap();
        assert_eq!(cast_string_to_float(f), 3.5);
    }

    #[test]
    fn buffer_append_extends_in_place_then_grows() {
        let e = exec();
        let buf = buffer_allocate(&e, 4, false).unwrap();
        let appended = buffer_append(&e, buf, &[7]).unwrap();
        assert_eq!(unsafe { buffer_fill(appended.addr()) }, 1);

        let grown = buffer_append_repeated(&e, appended, 1, 64).unwrap();
        assert!(unsafe { buffer_fill(grown.addr()) } >= 65);
    }

    #[test]
    fn buffer_append_grow_survives_a_collection_during_reserve() {
        let small = VmConfig {
            stack_size: 64,
            initial_heap_size: 128,
            max_heap_size: 1024 * 1024,
            heap_growth_threshold: 0.75,
            mailbox_capacity: 8,
            recv_poll_interval: std::time::Duration::from_millis(50),
            verbose: false,
        };
        let e = Executor::new(1, small).unwrap();
        let buf = buffer_allocate(&e, 4, false).unwrap();
        let buf = buffer_append(&e, buf, b"hi").unwrap();
        // Root it on the stack: the grow below needs enough extra capacity
        // that reserving it cannot help but collect against this tiny heap,
        // and the old contents must survive that relocation.
        e.stack().push(buf).unwrap();

        let before = e.stats().collection_count;
        let buf = e.stack().pop();
        let grown = buffer_append_repeated(&e, buf, b'x', 512).unwrap();
        assert!(e.stats().collection_count > before);

        assert_eq!(unsafe { buffer_fill(grown.addr()) }, 2 + 512);
        assert_eq!(&unsafe { buffer_bytes(grown) }[..2], b"hi");
    }

    #[test]
    fn buffer_peek_decodes_little_and_big_endian() {
        let e = exec();
        let buf = buffer_allocate(&e, 8, false).unwrap();
        let appended = buffer_append_bits(&e, buf, Tag::Bits32, 0x01020304, Endian::Big).unwrap();
        let peeked = buffer_peek(&e, appended, 0, Tag::Bits32, Endian::Big, false).unwrap();
        assert_eq!(unsafe { bitword_read(peeked.addr()) }, 0x01020304);

        let little = buffer_peek(&e, appended, 0, Tag::Bits32, Endian::Little, false).unwrap();
        assert_eq!(unsafe { bitword_read(little.addr()) }, 0x04030201);
    }

    #[test]
    fn bits128_builders_pack_lanes() {
        let e = exec();
        let v = bits32x4(&e, [1, 2, 3, 4], false).unwrap();
        let bytes = unsafe { bits128_bytes(v.addr()) };
        assert_eq!(&bytes[0..4], &1u32.to_ne_bytes());
        assert_eq!(&bytes[12..16], &4u32.to_ne_bytes());
    }
}
