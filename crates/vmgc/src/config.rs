//! Configuration Module - Executor and Heap Tuning Parameters
//!
//! Manages the small set of parameters that affect how an [`Executor`]
//! (`crate::executor::Executor`) sizes its stack, its heap, and its mailbox.
//! Unlike a generational or concurrent collector there is no pause-time
//! target or thread count to tune; the knobs that exist are the ones the
//! copying-collector contract in §4 actually depends on.

use crate::error::VmError;

const MB: usize = 1024 * 1024;

/// Configuration for a single [`Executor`](crate::executor::Executor).
///
/// # Examples
///
/// ```
/// use vmgc::config::VmConfig;
///
/// let config = VmConfig::default();
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct VmConfig {
    /// Maximum number of [`Value`](crate::value::Value) slots on the value
    /// stack. Exceeding this is a fatal stack overflow (§4.3); there is no
    /// dynamic resizing.
    ///
    /// Default: 4096 slots.
    pub stack_size: usize,

    /// Size in bytes of the initial semispace. The mutator never allocates
    /// across this boundary without triggering a collection first.
    ///
    /// Default: 1MB.
    pub initial_heap_size: usize,

    /// Hard ceiling on a single semispace. A collection that would need to
    /// grow the heap past this is a fatal out-of-heap condition.
    ///
    /// Default: 512MB.
    pub max_heap_size: usize,

    /// Fraction of the previous semispace the live set must occupy before
    /// the next to-space is grown (§4.4 resizing policy). Must be in
    /// `(0.0, 1.0]`.
    ///
    /// Default: 0.75.
    pub heap_growth_threshold: f64,

    /// Maximum number of undelivered `(sender, message)` entries a mailbox
    /// holds before `send` aborts with `InboxFull` (§4.6).
    ///
    /// Default: 256.
    pub mailbox_capacity: usize,

    /// Timed-wait interval used by a blocking receive between polls of the
    /// mailbox (§4.6, §9: belt-and-braces guard against missed wakeups).
    ///
    /// Default: 3 seconds.
    pub recv_poll_interval: std::time::Duration,

    /// Emit `log::debug!` traces for every allocation and mailbox
    /// operation, not just collections and sends. Noisy; off by default.
    pub verbose: bool,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            stack_size: 4096,
            initial_heap_size: MB,
            max_heap_size: 512 * MB,
            heap_growth_threshold: 0.75,
            mailbox_capacity: 256,
            recv_poll_interval: std::time::Duration::from_secs(3),
            verbose: false,
        }
    }
}

impl VmConfig {
    /// Validate the configuration, returning a descriptive error for the
    /// first violated constraint.
    pub fn validate(&self) -> Result<(), VmError> {
        if self.stack_size == 0 {
            return Err(VmError::Configuration("stack_size must be > 0".into()));
        }
        if self.initial_heap_size == 0 {
            return Err(VmError::Configuration(
                "initial_heap_size must be > 0".into(),
            ));
        }
        if self.max_heap_size < self.initial_heap_size {
            return Err(VmError::Configuration(
                "max_heap_size must be >= initial_heap_size".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.heap_growth_threshold) || self.heap_growth_threshold <= 0.0
        {
            return Err(VmError::Configuration(
                "heap_growth_threshold must be in (0.0, 1.0]".into(),
            ));
        }
        if self.mailbox_capacity == 0 {
            return Err(VmError::Configuration(
                "mailbox_capacity must be > 0".into(),
            ));
        }
        Ok(())
    }

    /// Build a configuration from defaults, overridden by `VMGC_*`
    /// environment variables, in the style of a `GcConfig::from_env`
    /// constructor.
    ///
    /// Recognised variables: `VMGC_STACK_SIZE`, `VMGC_INITIAL_HEAP`,
    /// `VMGC_MAX_HEAP`, `VMGC_MAILBOX_CAPACITY`, `VMGC_VERBOSE`.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("VMGC_STACK_SIZE") {
            if let Ok(n) = val.parse() {
                config.stack_size = n;
            }
        }
        if let Ok(val) = std::env::var("VMGC_INITIAL_HEAP") {
            if let Ok(n) = val.parse() {
                config.initial_heap_size = n;
            }
        }
        if let Ok(val) = std::env::var("VMGC_MAX_HEAP") {
            if let Ok(n) = val.parse() {
                config.max_heap_size = n;
            }
        }
        if let Ok(val) = std::env::var("VMGC_MAILBOX_CAPACITY") {
            if let Ok(n) = val.parse() {
                config.mailbox_capacity = n;
            }
        }
        if let Ok(val) = std::env::var("VMGC_VERBOSE") {
            config.verbose = val == "1" || val.eq_ignore_ascii_case("true");
        }

        config
    }
}
