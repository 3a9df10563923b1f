//! Round-robin scheduler
//!
//! Cooperative time slicing over a circular ready ring. Each turn the
//! ring head is invoked repeatedly until its slice timer expires; a task
//! body is never interrupted mid-call, so "preemption" only ever happens
//! at invocation boundaries.
//!
//! Author: Moroya Sakamoto

use log::{info, trace};

use crate::config::KernelConfig;
use crate::error::Result;
use crate::heap::Heap;
use crate::task::{Task, TaskContext, TaskId, TaskRegistry, TaskState};
use crate::timer::{ticks_for, SliceTimer};

/// Diagnostic iteration counter wraps here
pub const ITERATION_WRAP: u32 = 1000;

/// Circular doubly-linked list of task ids, threaded through the task table
///
/// The head names the task the next dispatch turn will consider.
#[derive(Debug, Default)]
pub struct ReadyRing {
    head: Option<TaskId>,
    len: usize,
}

impl ReadyRing {
    pub const fn new() -> Self {
        Self { head: None, len: 0 }
    }

    /// Forget every member
    pub fn clear(&mut self) {
        self.head = None;
        self.len = 0;
    }

    pub fn head(&self) -> Option<TaskId> {
        self.head
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Insert `id` just before the head (the ring's tail)
    ///
    /// An empty ring becomes a self-linked singleton headed by `id`.
    pub(crate) fn add_ready(&mut self, tasks: &mut [Task], id: TaskId) {
        match self.head {
            None => {
                tasks[id.index()].next = id;
                tasks[id.index()].prev = id;
                self.head = Some(id);
            }
            Some(head) => {
                let tail = tasks[head.index()].prev;
                tasks[id.index()].next = head;
                tasks[id.index()].prev = tail;
                tasks[tail.index()].next = id;
                tasks[head.index()].prev = id;
            }
        }
        self.len += 1;
    }

    /// Unlink `id`, moving the head on if it pointed there
    pub(crate) fn remove(&mut self, tasks: &mut [Task], id: TaskId) {
        if self.len <= 1 {
            self.clear();
        } else {
            let (prev, next) = (tasks[id.index()].prev, tasks[id.index()].next);
            tasks[prev.index()].next = next;
            tasks[next.index()].prev = prev;
            if self.head == Some(id) {
                self.head = Some(next);
            }
            self.len -= 1;
        }
        tasks[id.index()].next = TaskId::NONE;
        tasks[id.index()].prev = TaskId::NONE;
    }

    /// Move the head to its successor
    pub(crate) fn advance(&mut self, tasks: &[Task]) {
        if let Some(head) = self.head {
            self.head = Some(tasks[head.index()].next);
        }
    }

    /// Ids in ring order, starting at the head
    pub fn iter<'a>(&self, tasks: &'a [Task]) -> impl Iterator<Item = TaskId> + 'a {
        let mut cur = self.head;
        (0..self.len).filter_map(move |_| {
            let id = cur?;
            cur = Some(tasks[id.index()].next);
            Some(id)
        })
    }

    /// Is `id` linked into the ring?
    pub fn contains(&self, tasks: &[Task], id: TaskId) -> bool {
        self.iter(tasks).any(|member| member == id)
    }
}

/// Outcome of one dispatch turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Turn {
    /// Ring empty, idle body invoked directly
    Idle,
    /// Head was parked (or was the idle task with work pending) and was passed over
    Skipped(TaskId),
    /// Head ran for one slice
    Dispatched { id: TaskId, invocations: u32 },
}

/// Scheduler diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Loop iterations, wrapping at `ITERATION_WRAP`
    pub iterations: u32,
    /// Completed slices
    pub dispatches: u64,
    /// Turns that passed over the head
    pub skips: u64,
    /// Slices (or direct calls) spent in the idle task
    pub idle_runs: u64,
    /// Task body invocations
    pub invocations: u64,
}

/// Idle task body
pub fn idle_task(_ctx: &mut TaskContext) {
    #[cfg(feature = "cortex-m")]
    cortex_m::asm::nop();
}

/// Round-robin scheduler
pub struct Scheduler {
    idle: Option<TaskId>,
    slice_ticks: u32,
    running: bool,
    stats: SchedulerStats,
}

impl Scheduler {
    pub const fn new() -> Self {
        Self {
            idle: None,
            slice_ticks: 1,
            running: false,
            stats: SchedulerStats {
                iterations: 0,
                dispatches: 0,
                skips: 0,
                idle_runs: 0,
                invocations: 0,
            },
        }
    }

    /// Register the idle task in an initialized registry
    pub fn init<const HEAP: usize>(
        &mut self,
        registry: &mut TaskRegistry,
        heap: &Heap<HEAP>,
    ) -> Result<()> {
        self.running = false;
        self.stats = SchedulerStats::default();
        let min_stack = registry.min_stack_size();
        let idle = registry.create(heap, idle_task, "IDLE", min_stack)?;
        self.idle = Some(idle);
        Ok(())
    }

    /// Mark the ring head `Running` and fix the slice length
    pub fn start(&mut self, registry: &mut TaskRegistry, config: &KernelConfig) {
        self.slice_ticks = ticks_for(config.time_slice_ms, config.clock_hz);
        self.running = true;
        if let Some(head) = registry.ring().head() {
            registry.set_live_state(head, TaskState::Running);
        }
        info!(
            "scheduler: started with {} tasks, {} ticks per slice",
            registry.count(),
            self.slice_ticks
        );
    }

    /// Run one turn of the dispatch loop
    pub fn dispatch<T: SliceTimer>(&mut self, registry: &mut TaskRegistry, timer: &mut T) -> Turn {
        self.stats.iterations += 1;
        if self.stats.iterations >= ITERATION_WRAP {
            trace!("scheduler: iteration counter wrapped");
            self.stats.iterations = 0;
        }

        let Some((id, state, func)) = registry
            .ring()
            .head()
            .and_then(|id| registry.get(id))
            .map(|task| (task.id(), task.state(), task.func()))
        else {
            idle_task(&mut TaskContext::new(TaskId::NONE));
            self.stats.idle_runs += 1;
            return Turn::Idle;
        };

        if state.is_parked() {
            return self.skip(registry, id);
        }
        if Some(id) == self.idle && self.has_runnable_peer(registry) {
            if state == TaskState::Running {
                registry.set_live_state(id, TaskState::Ready);
            }
            return self.skip(registry, id);
        }

        timer.start(self.slice_ticks);
        registry.set_live_state(id, TaskState::Running);

        let mut ctx = TaskContext::new(id);
        let mut invocations = 0u32;
        while !timer.expired() {
            let Some(func) = func else {
                break;
            };
            func(&mut ctx);
            invocations = invocations.wrapping_add(1);
            if ctx.state() != TaskState::Running {
                registry.set_live_state(id, ctx.state());
            }
        }
        timer.stop();

        if registry.get(id).map(Task::state) == Some(TaskState::Running) {
            registry.set_live_state(id, TaskState::Ready);
        }
        registry.advance_ring();

        self.stats.dispatches += 1;
        self.stats.invocations += u64::from(invocations);
        if Some(id) == self.idle {
            self.stats.idle_runs += 1;
        }
        trace!("scheduler: task #{} ran {} times", id.0, invocations);
        Turn::Dispatched { id, invocations }
    }

    /// Start and dispatch forever
    pub fn run<T: SliceTimer>(
        &mut self,
        registry: &mut TaskRegistry,
        timer: &mut T,
        config: &KernelConfig,
    ) -> ! {
        self.start(registry, config);
        loop {
            self.dispatch(registry, timer);
        }
    }

    fn skip(&mut self, registry: &mut TaskRegistry, id: TaskId) -> Turn {
        registry.advance_ring();
        self.stats.skips += 1;
        Turn::Skipped(id)
    }

    /// Any ring member other than idle that is not parked?
    fn has_runnable_peer(&self, registry: &TaskRegistry) -> bool {
        registry.ring().iter(registry.tasks()).any(|id| {
            Some(id) != self.idle
                && registry
                    .get(id)
                    .is_some_and(|task| !task.state().is_parked())
        })
    }

    pub fn idle_task_id(&self) -> Option<TaskId> {
        self.idle
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Slice length fixed by `start`
    pub fn slice_ticks(&self) -> u32 {
        self.slice_ticks
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::SoftTimer;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn dummy_task(_: &mut TaskContext) {}

    fn one_tick_config() -> KernelConfig {
        KernelConfig::new().with_clock_hz(1000).with_time_slice_ms(1)
    }

    fn setup() -> (Heap<4096>, TaskRegistry, Scheduler) {
        let heap = Heap::new();
        heap.init().unwrap();
        let mut registry = TaskRegistry::default();
        registry.init();
        let mut sched = Scheduler::new();
        sched.init(&mut registry, &heap).unwrap();
        (heap, registry, sched)
    }

    #[test]
    fn test_init_registers_idle() {
        let (_, registry, sched) = setup();
        let idle = sched.idle_task_id().unwrap();
        assert_eq!(registry.get(idle).unwrap().name(), "IDLE");
        assert_eq!(registry.ring().head(), Some(idle));
        assert_eq!(registry.ring().len(), 1);
        assert!(!sched.is_running());
    }

    #[test]
    fn test_ring_order_and_links() {
        let (heap, mut registry, mut sched) = setup();
        let a = registry.create(&heap, dummy_task, "a", 128).unwrap();
        let b = registry.create(&heap, dummy_task, "b", 128).unwrap();
        let idle = sched.idle_task_id().unwrap();

        let order: Vec<TaskId> = registry.ring().iter(registry.tasks()).collect();
        assert_eq!(order, vec![idle, a, b]);

        // Circular in both directions
        let tasks = registry.tasks();
        assert_eq!(tasks[b.index()].next, idle);
        assert_eq!(tasks[idle.index()].prev, b);
    }

    #[test]
    fn test_singleton_ring() {
        let heap = Heap::<1024>::new();
        heap.init().unwrap();
        let mut registry = TaskRegistry::default();
        let id = registry.create(&heap, dummy_task, "solo", 128).unwrap();
        let task = &registry.tasks()[id.index()];
        assert_eq!(task.next, id);
        assert_eq!(task.prev, id);
        registry.advance_ring();
        assert_eq!(registry.ring().head(), Some(id));
    }

    #[test]
    fn test_empty_ring_runs_idle_body() {
        let mut registry = TaskRegistry::default();
        let mut sched = Scheduler::new();
        let mut timer = SoftTimer::new();
        assert_eq!(sched.dispatch(&mut registry, &mut timer), Turn::Idle);
        assert_eq!(sched.stats().idle_runs, 1);
        assert_eq!(timer.slices(), 0);
    }

    #[test]
    fn test_start_marks_head_running() {
        let (_, mut registry, mut sched) = setup();
        sched.start(&mut registry, &KernelConfig::default());
        assert!(sched.is_running());
        assert_eq!(sched.slice_ticks(), 480_000);
        assert_eq!(registry.current_id(), sched.idle_task_id());
    }

    static SLICE_CALLS: AtomicUsize = AtomicUsize::new(0);

    fn slice_task(_: &mut TaskContext) {
        SLICE_CALLS.fetch_add(1, Ordering::Relaxed);
    }

    #[test]
    fn test_slice_invokes_until_expiry() {
        let (heap, mut registry, mut sched) = setup();
        let id = registry.create(&heap, slice_task, "s", 128).unwrap();
        let config = KernelConfig::new().with_clock_hz(1000).with_time_slice_ms(4);
        let mut timer = SoftTimer::new();
        sched.start(&mut registry, &config);

        let idle = sched.idle_task_id().unwrap();
        assert_eq!(sched.dispatch(&mut registry, &mut timer), Turn::Skipped(idle));
        assert_eq!(
            sched.dispatch(&mut registry, &mut timer),
            Turn::Dispatched { id, invocations: 4 }
        );
        assert_eq!(SLICE_CALLS.load(Ordering::Relaxed), 4);
        assert!(!timer.is_running());
        // Demoted back after the slice, but still the last one marked Running
        assert_eq!(registry.get(id).unwrap().state(), TaskState::Ready);
        assert_eq!(registry.current_id(), Some(id));
    }

    static SELF_BLOCK_CALLS: AtomicUsize = AtomicUsize::new(0);

    fn self_blocking_task(ctx: &mut TaskContext) {
        SELF_BLOCK_CALLS.fetch_add(1, Ordering::Relaxed);
        ctx.block();
    }

    #[test]
    fn test_self_blocked_task_keeps_state() {
        let (heap, mut registry, mut sched) = setup();
        let id = registry
            .create(&heap, self_blocking_task, "blk", 128)
            .unwrap();
        let mut timer = SoftTimer::new();
        sched.start(&mut registry, &one_tick_config());

        sched.dispatch(&mut registry, &mut timer); // idle skipped
        assert_eq!(
            sched.dispatch(&mut registry, &mut timer),
            Turn::Dispatched { id, invocations: 1 }
        );
        assert_eq!(registry.get(id).unwrap().state(), TaskState::Blocked);

        // Only idle left to run; the blocked task is passed over
        for _ in 0..6 {
            let turn = sched.dispatch(&mut registry, &mut timer);
            assert_ne!(turn, Turn::Dispatched { id, invocations: 1 });
        }
        assert_eq!(SELF_BLOCK_CALLS.load(Ordering::Relaxed), 1);
        assert!(registry.ring().contains(registry.tasks(), id));
    }

    #[test]
    fn test_idle_dispatched_when_nothing_else_runs() {
        let (heap, mut registry, mut sched) = setup();
        let id = registry.create(&heap, dummy_task, "t", 128).unwrap();
        registry.set_state(id, TaskState::Suspended).unwrap();
        let idle = sched.idle_task_id().unwrap();
        let mut timer = SoftTimer::new();
        sched.start(&mut registry, &one_tick_config());

        assert_eq!(
            sched.dispatch(&mut registry, &mut timer),
            Turn::Dispatched { id: idle, invocations: 1 }
        );
        assert_eq!(sched.dispatch(&mut registry, &mut timer), Turn::Skipped(id));
        assert_eq!(sched.stats().idle_runs, 1);
        assert_eq!(sched.stats().skips, 1);
    }

    #[test]
    fn test_iteration_counter_wraps() {
        let (_, mut registry, mut sched) = setup();
        let mut timer = SoftTimer::new();
        sched.start(&mut registry, &one_tick_config());
        for _ in 0..ITERATION_WRAP + 5 {
            sched.dispatch(&mut registry, &mut timer);
        }
        assert_eq!(sched.stats().iterations, 5);
        assert_eq!(sched.stats().dispatches, u64::from(ITERATION_WRAP) + 5);
    }
}
