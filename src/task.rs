//! Task records and the fixed-capacity task registry
//!
//! Every task owns a stack region carved from the block heap at creation
//! time and keeps it until it is marked `Deleted`. Records also carry the
//! ready-ring links; the registry owns the ring itself so that deletion can
//! unlink a record before its slot is reused.
//!
//! Author: Moroya Sakamoto

use heapless::String;
use log::{debug, warn};

use crate::config::{MAX_TASKS, MAX_TASK_NAME_LENGTH, MIN_STACK_SIZE};
use crate::error::{Result, RtosError};
use crate::heap::{Heap, HeapPtr};
use crate::scheduler::ReadyRing;

/// Task body, invoked repeatedly for the length of a time slice
pub type TaskFn = fn(&mut TaskContext);

/// Index into the task table
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub u8);

impl TaskId {
    /// Sentinel: "no task"
    pub const NONE: TaskId = TaskId(0xFF);

    /// Table index
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Task execution state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Waiting for its turn in the ring
    Ready,
    /// Owns the current time slice
    Running,
    /// Skipped by the scheduler until set back to `Ready`
    Blocked,
    /// Skipped by the scheduler until set back to `Ready`
    Suspended,
    /// Table slot is empty
    Deleted,
}

impl TaskState {
    /// Will the scheduler skip this task?
    pub fn is_parked(self) -> bool {
        matches!(self, TaskState::Blocked | TaskState::Suspended)
    }
}

/// Stack region owned by a task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackRegion {
    /// Start of the region inside the heap arena
    pub base: HeapPtr,
    /// Region length in bytes
    pub size: u32,
    /// Initial stack pointer: top of the region minus one word.
    /// No register context is ever saved there.
    pub initial_sp: usize,
}

impl StackRegion {
    fn new(base: HeapPtr, size: u32) -> Self {
        let word = core::mem::size_of::<u32>();
        let words = size as usize / word;
        Self {
            base,
            size,
            initial_sp: base.offset() + words.saturating_sub(1) * word,
        }
    }
}

/// Handle passed to a task body on every invocation
#[derive(Debug)]
pub struct TaskContext {
    id: TaskId,
    state: TaskState,
}

impl TaskContext {
    pub(crate) fn new(id: TaskId) -> Self {
        Self {
            id,
            state: TaskState::Running,
        }
    }

    /// Id of the running task
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// State the task will be left in after this invocation
    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Park the task as `Blocked`
    pub fn block(&mut self) {
        self.state = TaskState::Blocked;
    }

    /// Park the task as `Suspended`
    pub fn suspend(&mut self) {
        self.state = TaskState::Suspended;
    }
}

/// Task control block
#[derive(Clone)]
pub struct Task {
    id: TaskId,
    name: String<MAX_TASK_NAME_LENGTH>,
    func: Option<TaskFn>,
    state: TaskState,
    stack: Option<StackRegion>,
    /// Ready-ring successor
    pub(crate) next: TaskId,
    /// Ready-ring predecessor
    pub(crate) prev: TaskId,
}

impl Task {
    /// Empty table slot
    pub const fn empty() -> Self {
        Self {
            id: TaskId::NONE,
            name: String::new(),
            func: None,
            state: TaskState::Deleted,
            stack: None,
            next: TaskId::NONE,
            prev: TaskId::NONE,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    pub fn func(&self) -> Option<TaskFn> {
        self.func
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn stack(&self) -> Option<StackRegion> {
        self.stack
    }

    /// Is this slot in use?
    pub fn is_active(&self) -> bool {
        self.state != TaskState::Deleted
    }
}

/// Copy `name`, truncated on a char boundary so the terminator always fits
fn bounded_name(name: &str) -> String<MAX_TASK_NAME_LENGTH> {
    let mut out = String::new();
    for c in name.chars() {
        if out.len() + c.len_utf8() > MAX_TASK_NAME_LENGTH - 1 || out.push(c).is_err() {
            break;
        }
    }
    out
}

/// Fixed-capacity task table
pub struct TaskRegistry {
    tasks: [Task; MAX_TASKS],
    ring: ReadyRing,
    count: usize,
    current: Option<TaskId>,
    min_stack_size: u32,
}

impl TaskRegistry {
    /// Create a registry rejecting stacks below `min_stack_size`
    pub fn new(min_stack_size: u32) -> Self {
        Self {
            tasks: core::array::from_fn(|_| Task::empty()),
            ring: ReadyRing::new(),
            count: 0,
            current: None,
            min_stack_size,
        }
    }

    /// Mark every slot `Deleted`, empty the ring and forget the current task
    pub fn init(&mut self) {
        self.tasks.iter_mut().for_each(|t| *t = Task::empty());
        self.ring.clear();
        self.count = 0;
        self.current = None;
    }

    /// Register a task and append it to the ready ring
    ///
    /// Validation runs before the stack is allocated, and a failed
    /// allocation leaves the table untouched.
    pub fn create<const HEAP: usize>(
        &mut self,
        heap: &Heap<HEAP>,
        func: TaskFn,
        name: &str,
        stack_size: u32,
    ) -> Result<TaskId> {
        if name.is_empty() || stack_size < self.min_stack_size {
            warn!("task: rejected '{}' (stack {} bytes)", name, stack_size);
            return Err(RtosError::InvalidParameter);
        }
        let Some(slot) = self.tasks.iter().position(|t| !t.is_active()) else {
            warn!("task: table full, cannot create '{}'", name);
            return Err(RtosError::NoMemory);
        };
        let base = heap.alloc(stack_size as usize)?;

        let id = TaskId(slot as u8);
        let task = &mut self.tasks[slot];
        task.id = id;
        task.name = bounded_name(name);
        task.func = Some(func);
        task.state = TaskState::Ready;
        task.stack = Some(StackRegion::new(base, stack_size));
        self.count += 1;

        self.ring.add_ready(&mut self.tasks, id);
        debug!("task: created '{}' as #{} ({} byte stack)", name, id.0, stack_size);
        Ok(id)
    }

    /// Look up a live task
    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(id.index()).filter(|t| t.is_active())
    }

    /// Task last marked `Running`
    pub fn get_current(&self) -> Option<&Task> {
        self.current.and_then(|id| self.get(id))
    }

    /// Id of the task last marked `Running`
    pub fn current_id(&self) -> Option<TaskId> {
        self.current
    }

    /// Change a task's state
    ///
    /// Marking a task `Deleted` unlinks it from the ring, drops its stack
    /// region and frees the slot for reuse. The stack block itself stays
    /// allocated; `Kernel::set_task_state` returns it to the heap.
    pub fn set_state(&mut self, id: TaskId, state: TaskState) -> Result<()> {
        let task = self
            .tasks
            .get(id.index())
            .ok_or(RtosError::InvalidParameter)?;
        if !task.is_active() {
            return Err(RtosError::Generic);
        }
        if state == TaskState::Deleted {
            self.delete(id);
        } else {
            self.write_state(id, state);
        }
        Ok(())
    }

    /// Set the state of a task the caller knows to be live
    ///
    /// Used by the scheduler on ring members, which are live by construction.
    pub(crate) fn set_live_state(&mut self, id: TaskId, state: TaskState) {
        debug_assert!(
            self.get(id).is_some() && state != TaskState::Deleted,
            "task #{} is not live",
            id.0
        );
        self.write_state(id, state);
    }

    fn write_state(&mut self, id: TaskId, state: TaskState) {
        self.tasks[id.index()].state = state;
        if state == TaskState::Running {
            self.current = Some(id);
        }
    }

    fn delete(&mut self, id: TaskId) {
        self.ring.remove(&mut self.tasks, id);
        let task = &mut self.tasks[id.index()];
        task.state = TaskState::Deleted;
        task.func = None;
        task.stack = None;
        self.count -= 1;
        if self.current == Some(id) {
            self.current = None;
        }
        debug!("task: deleted #{}", id.0);
    }

    /// Number of live tasks
    pub fn count(&self) -> usize {
        self.count
    }

    /// Smallest stack budget accepted by `create`
    pub fn min_stack_size(&self) -> u32 {
        self.min_stack_size
    }

    /// Whole table, live and empty slots
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// Ring of live tasks, in dispatch order from the head
    pub fn ring(&self) -> &ReadyRing {
        &self.ring
    }

    /// Move the ring head to its successor
    pub(crate) fn advance_ring(&mut self) {
        self.ring.advance(&self.tasks);
    }

    /// Live tasks in table order
    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter().filter(|t| t.is_active())
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new(MIN_STACK_SIZE)
    }
}
