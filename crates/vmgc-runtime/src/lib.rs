//! vmgc-runtime - C ABI Surface
//!
//! Exposes [`vmgc`] as a flat `extern "C"` function surface for generated
//! executor code: executor lifecycle, stack frame primitives, value
//! builders, the mailbox, argv capture and the system-info probe (§6).

mod abi;

pub use abi::*;
