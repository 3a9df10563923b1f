//! Kernel — top-level RTOS context
//!
//! Owns the heap, task registry, scheduler, slice timer and message
//! queues as one value created at startup. Entry point for Slicer-RTOS
//! usage.
//!
//! Author: Moroya Sakamoto

use log::warn;

use crate::config::{KernelConfig, HEAP_SIZE};
use crate::error::{Result, RtosError};
use crate::heap::Heap;
use crate::queue::MessageQueues;
use crate::scheduler::{Scheduler, Turn};
use crate::task::{Task, TaskFn, TaskId, TaskRegistry, TaskState};
use crate::timer::SliceTimer;

/// Name given to tasks registered without one
const DEFAULT_TASK_NAME: &str = "Task";

/// Slicer-RTOS kernel
///
/// Memory footprint is dominated by the `HEAP` byte arena; the task
/// table and queues add a few hundred bytes.
pub struct Kernel<T: SliceTimer, const HEAP: usize = HEAP_SIZE> {
    config: KernelConfig,
    heap: Heap<HEAP>,
    tasks: TaskRegistry,
    scheduler: Scheduler,
    queues: MessageQueues,
    timer: T,
}

impl<T: SliceTimer, const HEAP: usize> Kernel<T, HEAP> {
    /// Bring up heap, task table, scheduler (with its idle task) and queues
    pub fn new(config: KernelConfig, timer: T) -> Result<Self> {
        let mut kernel = Self {
            config,
            heap: Heap::new(),
            tasks: TaskRegistry::new(config.min_stack_size),
            scheduler: Scheduler::new(),
            queues: MessageQueues::new(),
            timer,
        };
        kernel.heap.init()?;
        kernel.tasks.init();
        kernel.scheduler.init(&mut kernel.tasks, &kernel.heap)?;
        kernel.queues.init();
        Ok(kernel)
    }

    /// Register a task
    ///
    /// A missing name becomes `"Task"` and a zero budget the configured
    /// default stack size.
    pub fn register_task(
        &mut self,
        func: TaskFn,
        name: Option<&str>,
        stack_budget: u32,
    ) -> Result<TaskId> {
        let stack_size = if stack_budget == 0 {
            self.config.default_stack_size
        } else {
            stack_budget
        };
        self.tasks
            .create(
                &self.heap,
                func,
                name.unwrap_or(DEFAULT_TASK_NAME),
                stack_size,
            )
            .inspect_err(|e| warn!("kernel: task registration failed: {}", e))
    }

    /// Run the dispatch loop forever
    pub fn run(&mut self) -> ! {
        self.scheduler
            .run(&mut self.tasks, &mut self.timer, &self.config)
    }

    /// Run a single dispatch turn, starting the scheduler if needed
    pub fn step(&mut self) -> Turn {
        if !self.scheduler.is_running() {
            self.scheduler.start(&mut self.tasks, &self.config);
        }
        self.scheduler.dispatch(&mut self.tasks, &mut self.timer)
    }

    /// Run until `turns` slices have been dispatched
    ///
    /// Returns early if a full lap of the ring finds nothing to dispatch.
    pub fn run_turns(&mut self, turns: u64) -> KernelStats {
        let before = self.scheduler.stats();
        let mut done = 0u64;
        let mut idle_laps = 0usize;

        while done < turns {
            match self.step() {
                Turn::Skipped(_) => {
                    idle_laps += 1;
                    if idle_laps > self.tasks.ring().len() {
                        warn!("kernel: every task is parked, stopping");
                        break;
                    }
                }
                Turn::Idle | Turn::Dispatched { .. } => {
                    idle_laps = 0;
                    done += 1;
                }
            }
        }

        let after = self.scheduler.stats();
        KernelStats {
            turns: done,
            invocations: after.invocations - before.invocations,
            skips: after.skips - before.skips,
            idle_runs: after.idle_runs - before.idle_runs,
        }
    }

    /// Look up a live task
    pub fn task(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(id)
    }

    /// Task last marked `Running`
    pub fn current_task(&self) -> Option<&Task> {
        self.tasks.get_current()
    }

    /// Change a task's state, e.g. to resume a parked task
    ///
    /// Marking a task `Deleted` also returns its stack to the heap. The
    /// idle task cannot be deleted.
    pub fn set_task_state(&mut self, id: TaskId, state: TaskState) -> Result<()> {
        if state != TaskState::Deleted {
            return self.tasks.set_state(id, state);
        }
        if Some(id) == self.scheduler.idle_task_id() {
            warn!("kernel: refusing to delete the idle task");
            return Err(RtosError::InvalidParameter);
        }
        let stack = self.tasks.get(id).and_then(Task::stack);
        self.tasks.set_state(id, state)?;
        match stack {
            Some(stack) => self.heap.free(Some(stack.base)),
            None => Ok(()),
        }
    }

    /// Live tasks, idle task included
    pub fn task_count(&self) -> usize {
        self.tasks.count()
    }

    pub fn tasks(&self) -> &TaskRegistry {
        &self.tasks
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn heap(&self) -> &Heap<HEAP> {
        &self.heap
    }

    pub fn queues(&self) -> &MessageQueues {
        &self.queues
    }

    pub fn queues_mut(&mut self) -> &mut MessageQueues {
        &mut self.queues
    }

    pub fn timer(&self) -> &T {
        &self.timer
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }
}

/// Kernel execution statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelStats {
    /// Slices dispatched
    pub turns: u64,
    /// Task body invocations
    pub invocations: u64,
    /// Ring entries passed over
    pub skips: u64,
    /// Slices given to the idle task
    pub idle_runs: u64,
}
