//! Slicer-RTOS — cooperative round-robin task runner
//!
//! Don't preempt functions, re-invoke them.
//!
//! Minimal single-core kernel for resource-constrained microcontrollers:
//! - Fixed-capacity task table, every task stack backed by a block heap
//! - First-fit heap with split and address-based coalescing
//! - Round-robin dispatch, time slices measured by a polled hardware timer
//! - Small fixed message queues for inter-task communication
//!
//! Author: Moroya Sakamoto

#![cfg_attr(not(any(test, feature = "std")), no_std)]

pub mod config;
pub mod error;
pub mod sync;
pub mod heap;
pub mod task;
pub mod scheduler;
pub mod timer;
pub mod queue;
pub mod kernel;

pub use config::KernelConfig;
pub use error::{Result, RtosError};
pub use heap::{Heap, HeapPtr, HeapStats};
pub use task::{StackRegion, Task, TaskContext, TaskFn, TaskId, TaskRegistry, TaskState};
pub use scheduler::{ReadyRing, Scheduler, SchedulerStats, Turn};
pub use timer::{ticks_for, SliceTimer, SoftTimer};
pub use queue::{MessageQueues, QueueError};
pub use kernel::{Kernel, KernelStats};
