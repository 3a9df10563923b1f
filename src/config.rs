//! Kernel configuration
//!
//! Compile-time sizing constants plus the runtime tunables a board
//! support package is expected to override.
//!
//! Author: Moroya Sakamoto

/// Task table capacity (idle task included)
pub const MAX_TASKS: usize = 8;

/// Task name buffer length, terminator included
pub const MAX_TASK_NAME_LENGTH: usize = 16;

/// Smallest stack a task may request (bytes)
pub const MIN_STACK_SIZE: u32 = 128;

/// Stack used when the application passes a zero budget (bytes)
pub const DEFAULT_STACK_SIZE: u32 = 256;

/// Round-robin time slice (ms)
pub const TIME_SLICE_MS: u32 = 10;

/// Core clock feeding the slice timer (Hz)
pub const SYSTEM_CLOCK_HZ: u32 = 48_000_000;

/// Heap arena size (bytes)
pub const HEAP_SIZE: usize = 4096;

/// Number of message queues
pub const QUEUE_MAX_COUNT: usize = 2;

/// Items per message queue
pub const QUEUE_MAX_SIZE: usize = 8;

/// Runtime kernel configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelConfig {
    /// Slice timer input clock (Hz)
    pub clock_hz: u32,
    /// Time slice per dispatch turn (ms)
    pub time_slice_ms: u32,
    /// Minimum accepted stack budget (bytes)
    pub min_stack_size: u32,
    /// Stack budget substituted for a zero request (bytes)
    pub default_stack_size: u32,
}

impl KernelConfig {
    pub const fn new() -> Self {
        Self {
            clock_hz: SYSTEM_CLOCK_HZ,
            time_slice_ms: TIME_SLICE_MS,
            min_stack_size: MIN_STACK_SIZE,
            default_stack_size: DEFAULT_STACK_SIZE,
        }
    }

    pub const fn with_clock_hz(self, clock_hz: u32) -> Self {
        Self { clock_hz, ..self }
    }

    pub const fn with_time_slice_ms(self, time_slice_ms: u32) -> Self {
        Self { time_slice_ms, ..self }
    }

    pub const fn with_min_stack_size(self, min_stack_size: u32) -> Self {
        Self { min_stack_size, ..self }
    }

    pub const fn with_default_stack_size(self, default_stack_size: u32) -> Self {
        Self { default_stack_size, ..self }
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self::new()
    }
}
