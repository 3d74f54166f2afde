//! ABI Module - C-Compatible Executor Surface
//!
//! One `extern "C"` function per upward-interface operation from §6:
//! executor lifecycle, stack frame primitives, value builders, the
//! reserve/done_reserve protocol, mailbox send/check/recv, argv capture and
//! the system-info probe. Executors are handed out as leaked raw pointers:
//! a sender simply holds the receiver's pointer and calls `vm_send` on it,
//! generalising the single leaked-singleton-runtime idiom to many
//! independently addressable executors.
//!
//! Every function that can fail with one of the fatal conditions in §7
//! (out-of-heap, stack overflow, mailbox full, unexpected tag, spurious
//! receive) converts that `VmError` into the stderr message + exit code the
//! contract specifies, rather than returning an error code a generated
//! caller would have to check. This is the one place in the workspace where
//! that conversion happens; every other crate deals in typed `VmError`s.

use std::ffi::{c_char, CString};
use std::sync::OnceLock;

use vmgc::builders::{self, Endian};
use vmgc::{config::VmConfig, Executor, Tag, Value, VmError};

// ---------------------------------------------------------------------
// Fatal error handling (§7)
// ---------------------------------------------------------------------

fn abort_on_error(err: VmError) -> ! {
    match &err {
        VmError::StackOverflow { .. } => eprintln!("Stack overflow"),
        VmError::InboxFull { .. } => eprintln!("Inbox full"),
        VmError::SpuriousReceive { executor_id } => {
            eprintln!("receive claimed a message but executor {executor_id}'s mailbox was empty")
        }
        VmError::BadTag { tag, operation } => {
            eprintln!("unexpected closure tag {tag} during {operation}")
        }
        other => eprintln!("{other}"),
    }
    std::process::exit(1);
}

fn unwrap_or_abort<T>(result: Result<T, VmError>) -> T {
    match result {
        Ok(v) => v,
        Err(e) => abort_on_error(e),
    }
}

// ---------------------------------------------------------------------
// Logging (§4.8 ambient stack)
// ---------------------------------------------------------------------

/// Initialise `env_logger` from the `RUST_LOG` environment variable.
/// Idempotent; safe to call more than once or not at all (generated code
/// that never calls this just runs with logging disabled).
#[no_mangle]
pub extern "C" fn vm_init_logging() {
    let _ = env_logger::try_init();
}

// ---------------------------------------------------------------------
// Executor lifecycle
// ---------------------------------------------------------------------

/// Construct an executor with the given stack slot count and initial/max
/// heap sizes in bytes, returning an opaque handle. Aborts on invalid
/// configuration.
#[no_mangle]
pub extern "C" fn vm_executor_new(
    id: u64,
    stack_size: usize,
    initial_heap_size: usize,
    max_heap_size: usize,
    mailbox_capacity: usize,
) -> *mut Executor {
    let config = VmConfig {
        stack_size,
        initial_heap_size,
        max_heap_size,
        mailbox_capacity,
        ..VmConfig::default()
    };
    let exec = unwrap_or_abort(Executor::new(id, config));
    Box::into_raw(Box::new(exec))
}

/// Construct an executor from `VMGC_*` environment variables (§4.8).
#[no_mangle]
pub extern "C" fn vm_executor_new_from_env(id: u64) -> *mut Executor {
    let exec = unwrap_or_abort(Executor::new(id, VmConfig::from_env()));
    Box::into_raw(Box::new(exec))
}

/// Reclaim an executor's heap, stack and mailbox. `exec` must not be used
/// again after this call.
///
/// # Safety
/// `exec` must be a pointer returned by [`vm_executor_new`] and not
/// already freed.
#[no_mangle]
pub unsafe extern "C" fn vm_executor_free(exec: *mut Executor) {
    if !exec.is_null() {
        drop(Box::from_raw(exec));
    }
}

/// # Safety
/// `exec` must be live.
#[no_mangle]
pub unsafe extern "C" fn vm_executor_id(exec: *const Executor) -> u64 {
    (*exec).id()
}

#[repr(C)]
pub struct VmStatsAbi {
    pub allocation_count: u64,
    pub allocation_bytes: u64,
    pub collection_count: u64,
    pub bytes_copied_last_collection: u64,
    pub bytes_copied_total: u64,
}

/// # Safety
/// `exec` must be live.
#[no_mangle]
pub unsafe extern "C" fn vm_executor_stats(exec: *const Executor) -> VmStatsAbi {
    let snap = (*exec).stats();
    VmStatsAbi {
        allocation_count: snap.allocation_count,
        allocation_bytes: snap.allocation_bytes,
        collection_count: snap.collection_count,
        bytes_copied_last_collection: snap.bytes_copied_last_collection,
        bytes_copied_total: snap.bytes_copied_total,
    }
}

// ---------------------------------------------------------------------
// Stack frame operations (§4.3)
// ---------------------------------------------------------------------

/// # Safety
/// `exec` must be live.
#[no_mangle]
pub unsafe extern "C" fn vm_stack_push(exec: *const Executor, value: u64) {
    unwrap_or_abort((*exec).stack().push(Value(value as usize)));
}

/// # Safety
/// `exec` must be live and its stack non-empty below the current frame.
#[no_mangle]
pub unsafe extern "C" fn vm_stack_pop(exec: *const Executor) -> u64 {
    (*exec).stack().pop().0 as u64
}

/// # Safety
/// `exec` must be live.
#[no_mangle]
pub unsafe extern "C" fn vm_stack_top(exec: *const Executor) -> usize {
    (*exec).stack().top()
}

/// # Safety
/// `exec` must be live.
#[no_mangle]
pub unsafe extern "C" fn vm_stack_base(exec: *const Executor) -> usize {
    (*exec).stack().base()
}

/// # Safety
/// `exec` must be live.
#[no_mangle]
pub unsafe extern "C" fn vm_stack_set_base(exec: *const Executor, base: usize) {
    (*exec).stack().set_base(base);
}

/// # Safety
/// `exec` must be live and `index` within bounds.
#[no_mangle]
pub unsafe extern "C" fn vm_stack_get(exec: *const Executor, index: usize) -> u64 {
    (*exec).stack().get(index).0 as u64
}

/// # Safety
/// `exec` must be live and `index` within bounds.
#[no_mangle]
pub unsafe extern "C" fn vm_stack_set(exec: *const Executor, index: usize, value: u64) {
    (*exec).stack().set(index, Value(value as usize));
}

/// # Safety
/// `exec` must be live, `value` a live constructor closure of arity
/// `>= arity`, and `base..base+arity` in bounds.
#[no_mangle]
pub unsafe extern "C" fn vm_stack_project(
    exec: *const Executor,
    value: u64,
    base: usize,
    arity: u16,
) {
    (*exec)
        .stack()
        .project(Value(value as usize), base, arity);
}

/// # Safety
/// `exec` must be live and `n <= top - base`.
#[no_mangle]
pub unsafe extern "C" fn vm_stack_slide(exec: *const Executor, n: usize) {
    (*exec).stack().slide(n);
}

// ---------------------------------------------------------------------
// Registers
// ---------------------------------------------------------------------

/// # Safety
/// `exec` must be live.
#[no_mangle]
pub unsafe extern "C" fn vm_get_ret(exec: *const Executor) -> u64 {
    (*exec).ret().0 as u64
}

/// # Safety
/// `exec` must be live.
#[no_mangle]
pub unsafe extern "C" fn vm_set_ret(exec: *const Executor, value: u64) {
    (*exec).set_ret(Value(value as usize));
}

/// # Safety
/// `exec` must be live.
#[no_mangle]
pub unsafe extern "C" fn vm_get_reg1(exec: *const Executor) -> u64 {
    (*exec).reg1().0 as u64
}

/// # Safety
/// `exec` must be live.
#[no_mangle]
pub unsafe extern "C" fn vm_set_reg1(exec: *const Executor, value: u64) {
    (*exec).set_reg1(Value(value as usize));
}

// ---------------------------------------------------------------------
// Reserve / allocate (§4.1)
// ---------------------------------------------------------------------

/// Guarantee `size` bytes are available and hold the allocation lock until
/// [`vm_done_reserve`] is called on the returned handle. Aborts on
/// out-of-heap.
///
/// # Safety
/// `exec` must outlive the returned reservation.
#[no_mangle]
pub unsafe extern "C" fn vm_reserve(exec: *const Executor, size: usize) -> *mut vmgc::Reservation<'static> {
    let reservation = unwrap_or_abort((*exec).reserve(size));
    // The reservation borrows `exec` for as long as the handle is held by
    // the C caller; `exec` is a leaked, never-moved allocation for exactly
    // that lifetime, so extending it to 'static here is sound as long as
    // the caller drops the reservation before freeing the executor.
    let reservation: vmgc::Reservation<'static> = std::mem::transmute(reservation);
    Box::into_raw(Box::new(reservation))
}

/// End a reservation, releasing the allocation lock.
///
/// # Safety
/// `reservation` must be a pointer returned by [`vm_reserve`] and not
/// already consumed.
#[no_mangle]
pub unsafe extern "C" fn vm_done_reserve(reservation: *mut vmgc::Reservation<'static>) {
    if !reservation.is_null() {
        Box::from_raw(reservation).done_reserve();
    }
}

/// Bump-allocate `payload_size` bytes, running a collection first unless
/// `already_reserved` is set. Aborts on out-of-heap.
///
/// # Safety
/// `exec` must be live.
#[no_mangle]
pub unsafe extern "C" fn vm_allocate(
    exec: *const Executor,
    payload_size: usize,
    already_reserved: bool,
) -> usize {
    unwrap_or_abort((*exec).allocate(payload_size, already_reserved))
}

/// Non-destructively report whether `size` bytes fit without a collection.
///
/// # Safety
/// `exec` must be live.
#[no_mangle]
pub unsafe extern "C" fn vm_space(exec: *const Executor, size: usize) -> bool {
    (*exec).space(size)
}

// ---------------------------------------------------------------------
// Value tag / immediate accessors
// ---------------------------------------------------------------------

#[no_mangle]
pub extern "C" fn vm_value_from_int(n: i64) -> u64 {
    builders::integer(n).0 as u64
}

#[no_mangle]
pub extern "C" fn vm_value_is_int(value: u64) -> bool {
    Value(value as usize).is_int()
}

#[no_mangle]
pub extern "C" fn vm_value_as_int(value: u64) -> i64 {
    Value(value as usize).as_int()
}

/// # Safety
/// `value` must be a pointer value to a live closure.
#[no_mangle]
pub unsafe extern "C" fn vm_value_tag(value: u64) -> u8 {
    Value(value as usize).tag() as u8
}

// ---------------------------------------------------------------------
// Value builders (§4.2)
// ---------------------------------------------------------------------

macro_rules! fallible_builder {
    ($abi_name:ident => $name:ident($($arg:ident : $ty:ty),*)) => {
        /// # Safety
        /// `exec` must be live.
        #[no_mangle]
        pub unsafe extern "C" fn $abi_name(exec: *const Executor, $($arg: $ty),*, reserved: bool) -> u64 {
            unwrap_or_abort(builders::$name(&*exec, $($arg),*, reserved)).0 as u64
        }
    };
}

fallible_builder!(vm_float_new => float_new(v: f64));
fallible_builder!(vm_ptr_new => ptr_new(raw: usize));
fallible_builder!(vm_bits8 => bits8(v: u8));
fallible_builder!(vm_bits16 => bits16(v: u16));
fallible_builder!(vm_bits32 => bits32(v: u32));
fallible_builder!(vm_bits64 => bits64(v: u64));

/// # Safety
/// `exec` must be live, `src`/`len` a valid byte range.
#[no_mangle]
pub unsafe extern "C" fn vm_managedptr_new(
    exec: *const Executor,
    src: *const u8,
    len: usize,
    reserved: bool,
) -> u64 {
    let bytes = std::slice::from_raw_parts(src, len);
    unwrap_or_abort(builders::managedptr_new(&*exec, bytes, reserved)).0 as u64
}

/// # Safety
/// `exec` must be live, `src`/`len` a valid UTF-8-or-not byte range.
#[no_mangle]
pub unsafe extern "C" fn vm_string_new(
    exec: *const Executor,
    src: *const u8,
    len: usize,
    reserved: bool,
) -> u64 {
    let bytes = std::slice::from_raw_parts(src, len);
    unwrap_or_abort(builders::string_new(&*exec, bytes, reserved)).0 as u64
}

/// # Safety
/// `exec` live, `v` a live Str/StrOffset closure.
#[no_mangle]
pub unsafe extern "C" fn vm_string_tail(exec: *const Executor, v: u64) -> u64 {
    unwrap_or_abort(builders::string_tail(&*exec, Value(v as usize))).0 as u64
}

/// # Safety
/// `exec` live, `tail` a live Str/StrOffset closure.
#[no_mangle]
pub unsafe extern "C" fn vm_string_cons(exec: *const Executor, head: u8, tail: u64) -> u64 {
    unwrap_or_abort(builders::string_cons(&*exec, head, Value(tail as usize))).0 as u64
}

/// # Safety
/// `exec` live, `v` a live Str/StrOffset closure.
#[no_mangle]
pub unsafe extern "C" fn vm_string_reverse(exec: *const Executor, v: u64) -> u64 {
    unwrap_or_abort(builders::string_reverse(&*exec, Value(v as usize))).0 as u64
}

/// # Safety
/// `v` a live Str/StrOffset closure, `index` within its length.
#[no_mangle]
pub unsafe extern "C" fn vm_string_index(v: u64, index: usize) -> i64 {
    builders::string_index(Value(v as usize), index)
}

/// # Safety
/// `v` a live Str/StrOffset closure.
#[no_mangle]
pub unsafe extern "C" fn vm_string_length(v: u64) -> i64 {
    builders::string_length(Value(v as usize))
}

/// # Safety
/// `exec` live, `a`/`b` live Str/StrOffset closures.
#[no_mangle]
pub unsafe extern "C" fn vm_string_concat(exec: *const Executor, a: u64, b: u64) -> u64 {
    unwrap_or_abort(builders::string_concat(
        &*exec,
        Value(a as usize),
        Value(b as usize),
    ))
    .0 as u64
}

/// # Safety
/// `a`/`b` live Str/StrOffset closures.
#[no_mangle]
pub unsafe extern "C" fn vm_string_compare(a: u64, b: u64) -> i64 {
    builders::string_compare(Value(a as usize), Value(b as usize))
}

/// # Safety
/// `a`/`b` live Str/StrOffset closures.
#[no_mangle]
pub unsafe extern "C" fn vm_string_less(a: u64, b: u64) -> bool {
    builders::string_less(Value(a as usize), Value(b as usize))
}

/// # Safety
/// `a`/`b` live Str/StrOffset closures.
#[no_mangle]
pub unsafe extern "C" fn vm_string_equal(a: u64, b: u64) -> bool {
    builders::string_equal(Value(a as usize), Value(b as usize))
}

/// # Safety
/// `exec` must be live.
#[no_mangle]
pub unsafe extern "C" fn vm_cast_int_to_string(exec: *const Executor, n: i64) -> u64 {
    unwrap_or_abort(builders::cast_int_to_string(&*exec, n)).0 as u64
}

/// # Safety
/// `v` a live Str/StrOffset closure.
#[no_mangle]
pub unsafe extern "C" fn vm_cast_string_to_int(v: u64) -> i64 {
    builders::cast_string_to_int(Value(v as usize))
}

/// # Safety
/// `exec` must be live.
#[no_mangle]
pub unsafe extern "C" fn vm_cast_float_to_string(exec: *const Executor, f: f64) -> u64 {
    unwrap_or_abort(builders::cast_float_to_string(&*exec, f)).0 as u64
}

/// # Safety
/// `v` a live Str/StrOffset closure.
#[no_mangle]
pub unsafe extern "C" fn vm_cast_string_to_float(v: u64) -> f64 {
    builders::cast_string_to_float(Value(v as usize))
}

/// # Safety
/// `exec` live, `v` a live bitword closure.
#[no_mangle]
pub unsafe extern "C" fn vm_cast_bits_to_string(exec: *const Executor, v: u64) -> u64 {
    unwrap_or_abort(builders::cast_bits_to_string(&*exec, Value(v as usize))).0 as u64
}

/// # Safety
/// `exec` must be live.
#[no_mangle]
pub unsafe extern "C" fn vm_buffer_allocate(exec: *const Executor, hint: usize, reserved: bool) -> u64 {
    unwrap_or_abort(builders::buffer_allocate(&*exec, hint, reserved)).0 as u64
}

/// # Safety
/// `exec` live, `buf` a live Buffer closure, `src`/`len` a valid byte range.
#[no_mangle]
pub unsafe extern "C" fn vm_buffer_append(
    exec: *const Executor,
    buf: u64,
    src: *const u8,
    len: usize,
) -> u64 {
    let bytes = std::slice::from_raw_parts(src, len);
    unwrap_or_abort(builders::buffer_append(&*exec, Value(buf as usize), bytes)).0 as u64
}

/// # Safety
/// `exec` live, `buf` a live Buffer closure.
#[no_mangle]
pub unsafe extern "C" fn vm_buffer_append_repeated(
    exec: *const Executor,
    buf: u64,
    byte: u8,
    count: usize,
) -> u64 {
    unwrap_or_abort(builders::buffer_append_repeated(
        &*exec,
        Value(buf as usize),
        byte,
        count,
    ))
    .0 as u64
}

fn tag_from_width(width: u8) -> Tag {
    match width {
        1 => Tag::Bits8,
        2 => Tag::Bits16,
        4 => Tag::Bits32,
        8 => Tag::Bits64,
        other => abort_on_error(VmError::BadTag {
            tag: other,
            operation: "buffer append/peek bits width",
        }),
    }
}

fn endian_from_flag(big_endian: bool) -> Endian {
    if big_endian {
        Endian::Big
    } else {
        Endian::Little
    }
}

/// # Safety
/// `exec` live, `buf` a live Buffer closure. `width` is the element width
/// in bytes (1, 2, 4 or 8).
#[no_mangle]
pub unsafe extern "C" fn vm_buffer_append_bits(
    exec: *const Executor,
    buf: u64,
    width: u8,
    value: u64,
    big_endian: bool,
) -> u64 {
    unwrap_or_abort(builders::buffer_append_bits(
        &*exec,
        Value(buf as usize),
        tag_from_width(width),
        value,
        endian_from_flag(big_endian),
    ))
    .0 as u64
}

/// # Safety
/// `exec` live, `buf` a live Buffer closure with at least `offset + width`
/// bytes filled.
#[no_mangle]
pub unsafe extern "C" fn vm_buffer_peek(
    exec: *const Executor,
    buf: u64,
    offset: usize,
    width: u8,
    big_endian: bool,
    reserved: bool,
) -> u64 {
    unwrap_or_abort(builders::buffer_peek(
        &*exec,
        Value(buf as usize),
        offset,
        tag_from_width(width),
        endian_from_flag(big_endian),
        reserved,
    ))
    .0 as u64
}

// ---------------------------------------------------------------------
// Mailbox (§4.6)
// ---------------------------------------------------------------------

#[repr(C)]
pub struct VmEntry {
    pub ok: bool,
    pub sender: u64,
    pub message: u64,
}

const NO_SENDER: u64 = u64::MAX;

fn from_filter(from: u64) -> Option<u64> {
    if from == NO_SENDER {
        None
    } else {
        Some(from)
    }
}

/// Deep-copy `msg` into `dest`'s heap and enqueue it on behalf of `sender`.
/// Aborts if `dest`'s mailbox is full.
///
/// # Safety
/// `dest` must be live.
#[no_mangle]
pub unsafe extern "C" fn vm_send(dest: *const Executor, sender: u64, msg: u64) {
    unwrap_or_abort((*dest).send(sender, Value(msg as usize)));
}

/// Non-blocking check for a message from `from` (pass [`NO_SENDER`]/`u64::MAX`
/// to match any sender).
///
/// # Safety
/// `exec` must be live.
#[no_mangle]
pub unsafe extern "C" fn vm_mailbox_check(exec: *const Executor, from: u64) -> VmEntry {
    match (*exec).mailbox().check(from_filter(from)) {
        Some(entry) => VmEntry {
            ok: true,
            sender: entry.sender,
            message: entry.message.0 as u64,
        },
        None => VmEntry {
            ok: false,
            sender: 0,
            message: 0,
        },
    }
}

/// Block until a message from `from` arrives, then remove and return it.
///
/// # Safety
/// `exec` must be live.
#[no_mangle]
pub unsafe extern "C" fn vm_mailbox_recv(exec: *const Executor, from: u64) -> VmEntry {
    let entry = unwrap_or_abort((*exec).mailbox().recv((*exec).id(), from_filter(from)));
    VmEntry {
        ok: true,
        sender: entry.sender,
        message: entry.message.0 as u64,
    }
}

#[no_mangle]
pub extern "C" fn vm_entry_get_sender(entry: VmEntry) -> u64 {
    entry.sender
}

#[no_mangle]
pub extern "C" fn vm_entry_get_message(entry: VmEntry) -> u64 {
    entry.message
}

/// No-op: entries carry no heap-owned resources of their own (the message
/// they wrap is freed the same way any other value is, by the next
/// collection). Kept so generated code's free-message call site has
/// somewhere to go per §6.
#[no_mangle]
pub extern "C" fn vm_entry_free(_entry: VmEntry) {}

// ---------------------------------------------------------------------
// Process argv capture (§6 downward interface)
// ---------------------------------------------------------------------

static ARGV: OnceLock<Vec<CString>> = OnceLock::new();

fn captured_argv() -> &'static [CString] {
    ARGV.get_or_init(|| {
        std::env::args()
            .map(|a| CString::new(a).unwrap_or_default())
            .collect()
    })
}

#[no_mangle]
pub extern "C" fn vm_args_len() -> usize {
    captured_argv().len()
}

/// Returns a pointer valid for the lifetime of the process; the caller
/// must not free it.
#[no_mangle]
pub extern "C" fn vm_args_get(index: usize) -> *const c_char {
    captured_argv()
        .get(index)
        .map(|s| s.as_ptr())
        .unwrap_or(std::ptr::null())
}

// ---------------------------------------------------------------------
// System-info probe (§6)
// ---------------------------------------------------------------------

/// Query 0: backend identity, always `"c"` since generated code matches on
/// it. Query 1: target OS string. Query 2: target triple. Any other index
/// returns an empty string.
#[no_mangle]
pub extern "C" fn vm_system_info(query: i32) -> *const c_char {
    static IDENTITY: OnceLock<CString> = OnceLock::new();
    static OS: OnceLock<CString> = OnceLock::new();
    static TRIPLE: OnceLock<CString> = OnceLock::new();
    static EMPTY: OnceLock<CString> = OnceLock::new();

    let cstr = match query {
        0 => IDENTITY.get_or_init(|| CString::new("c").unwrap()),
        1 => OS.get_or_init(|| CString::new(std::env::consts::OS).unwrap()),
        2 => TRIPLE.get_or_init(|| {
            CString::new(format!(
                "{}-{}",
                std::env::consts::ARCH,
                std::env::consts::OS
            ))
            .unwrap()
        }),
        _ => EMPTY.get_or_init(|| CString::new("").unwrap()),
    };
    cstr.as_ptr()
}
