use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use smallvec::SmallVec;
use thiserror::Error;

use crate::config::TASK_NAME_LEN;
use crate::synch::mutex::Mutex;

/// The status of a task - used for scheduling
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TaskState {
	Ready,
	Running,
	Blocked,
	Suspended,
	Terminated,
}

/// Unique identifier for a task.
#[derive(PartialEq, Eq, PartialOrd, Ord, Debug, Clone, Copy)]
pub struct TaskId(i32);

impl TaskId {
	pub const fn into(self) -> i32 {
		self.0
	}

	pub const fn from(x: i32) -> Self {
		TaskId(x)
	}
}

impl fmt::Display for TaskId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// Priority of a task.
///
/// Lower numeric values denote stronger claims to the CPU: priority 0 is the
/// strongest regular priority, 255 is reserved for the idle task.
#[derive(PartialEq, Eq, PartialOrd, Ord, Debug, Clone, Copy)]
pub struct Priority(u8);

impl Priority {
	pub const fn into(self) -> u8 {
		self.0
	}

	pub const fn from(x: u8) -> Self {
		Priority(x)
	}
}

impl fmt::Display for Priority {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// Strongest claim a regular task can hold.
pub const HIGHEST_PRIO: Priority = Priority::from(0);
/// Reserved for the idle task.
pub const IDLE_PRIO: Priority = Priority::from(255);

/// Shared handle to a task control block.
pub type TaskRef = Rc<RefCell<Task>>;

/// A task control block.
pub struct Task {
	/// The ID of this task
	pub id: TaskId,
	/// Human-readable name, truncated to [`TASK_NAME_LEN`] characters
	pub name: String,
	/// Status of the task, e.g. if the task is ready or blocked
	pub state: TaskState,

	/// Current effective priority
	pub priority: Priority,
	/// Baseline priority; saved while a boost is active
	pub original_priority: Priority,
	/// True while the priority is inherited from a blocked waiter
	pub inherited: bool,

	/// Release period in ticks; 0 means aperiodic
	pub period: u64,
	pub relative_deadline: u64,
	/// Absolute tick of the next periodic activation
	pub next_release: u64,
	/// Absolute deadline of the current invocation
	pub absolute_deadline: u64,
	/// Ticks executed during the current invocation
	pub exec_time: u64,
	/// Worst execution time observed over all invocations
	pub wcet_observed: u64,
	pub total_exec_time: u64,
	/// Ticks of simulated work left
	pub remaining_work: u64,

	pub invocations: u32,
	pub deadline_misses: u32,
	pub preemptions: u32,
	pub priority_boosts: u32,

	/// Mutexes currently owned by this task
	pub held_mutexes: SmallVec<[Weak<Mutex>; 4]>,
	/// The mutex this task is waiting for, if any
	pub blocked_on: Option<Weak<Mutex>>,

	/// Tick at which the task last became ready
	pub ready_since: u64,
}

impl Task {
	pub(crate) fn new(
		id: TaskId,
		name: &str,
		priority: Priority,
		period: u64,
		deadline: u64,
		wcet: u64,
		now: u64,
	) -> Task {
		let relative_deadline = if deadline > 0 { deadline } else { period };

		Task {
			id,
			name: name.chars().take(TASK_NAME_LEN).collect(),
			state: TaskState::Ready,
			priority,
			original_priority: priority,
			inherited: false,
			period,
			relative_deadline,
			next_release: now + period,
			absolute_deadline: now + relative_deadline,
			exec_time: 0,
			wcet_observed: 0,
			total_exec_time: 0,
			remaining_work: wcet,
			invocations: 1,
			deadline_misses: 0,
			preemptions: 0,
			priority_boosts: 0,
			held_mutexes: SmallVec::new(),
			blocked_on: None,
			ready_since: now,
		}
	}

	/// Creates the idle task, which pretends to have infinite work left and
	/// lives outside the ready queue.
	pub(crate) fn new_idle(id: TaskId, now: u64) -> Task {
		let mut task = Task::new(id, "Idle", IDLE_PRIO, 0, 0, 0, now);
		task.remaining_work = u64::MAX;
		task
	}

	/// Returns `true` if this task currently owns `mutex`.
	pub fn holds(&self, mutex: &Rc<Mutex>) -> bool {
		self.held_mutexes
			.iter()
			.any(|held| held.as_ptr() == Rc::as_ptr(mutex))
	}

	pub(crate) fn drop_held(&mut self, mutex: &Rc<Mutex>) {
		self.held_mutexes
			.retain(|held| held.as_ptr() != Rc::as_ptr(mutex));
	}
}

impl fmt::Debug for Task {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Task")
			.field("id", &self.id)
			.field("name", &self.name)
			.field("state", &self.state)
			.field("priority", &self.priority)
			.finish_non_exhaustive()
	}
}

#[derive(Debug, Error)]
#[error("priority queue is full")]
pub struct QueueOverflow;

/// A task queue ordered by priority.
///
/// Index 0 holds the strongest claim (the lowest priority number). Tasks of
/// equal priority keep their insertion order.
pub struct PriorityQueue<const N: usize> {
	slots: heapless::Vec<TaskRef, N>,
}

impl<const N: usize> PriorityQueue<N> {
	pub fn new() -> Self {
		Self {
			slots: heapless::Vec::new(),
		}
	}

	/// Checks if the queue is empty.
	pub fn is_empty(&self) -> bool {
		self.slots.is_empty()
	}

	pub fn len(&self) -> usize {
		self.slots.len()
	}

	/// Inserts a task before any queued task with a strictly weaker priority.
	pub fn insert(&mut self, task: TaskRef) -> Result<(), QueueOverflow> {
		let prio = task.borrow().priority;
		let pos = self
			.slots
			.iter()
			.position(|queued| prio < queued.borrow().priority)
			.unwrap_or(self.slots.len());
		self.slots.insert(pos, task).map_err(|_| QueueOverflow)
	}

	/// Removes a specific task from the queue. Returns `true` if it was queued.
	pub fn remove(&mut self, task: &TaskRef) -> bool {
		if let Some(pos) = self.slots.iter().position(|queued| Rc::ptr_eq(queued, task)) {
			self.slots.remove(pos);
			true
		} else {
			false
		}
	}

	/// The task with the strongest claim, without removing it.
	pub fn peek(&self) -> Option<&TaskRef> {
		self.slots.first()
	}

	/// Pop the task with the strongest claim from the queue.
	pub fn pop(&mut self) -> Option<TaskRef> {
		if self.slots.is_empty() {
			None
		} else {
			Some(self.slots.remove(0))
		}
	}

	pub fn iter(&self) -> core::slice::Iter<'_, TaskRef> {
		self.slots.iter()
	}

	pub fn clear(&mut self) {
		self.slots.clear();
	}
}

impl<const N: usize> Default for PriorityQueue<N> {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn task(id: i32, prio: u8) -> TaskRef {
		Rc::new(RefCell::new(Task::new(
			TaskId::from(id),
			"test",
			Priority::from(prio),
			0,
			0,
			0,
			0,
		)))
	}

	#[test]
	fn orders_by_priority() {
		let mut queue = PriorityQueue::<8>::new();
		queue.insert(task(0, 7)).unwrap();
		queue.insert(task(1, 2)).unwrap();
		queue.insert(task(2, 5)).unwrap();

		let order: Vec<u8> = queue.iter().map(|t| t.borrow().priority.into()).collect();
		assert_eq!(order, [2, 5, 7]);
	}

	#[test]
	fn equal_priorities_keep_insertion_order() {
		let mut queue = PriorityQueue::<8>::new();
		queue.insert(task(0, 3)).unwrap();
		queue.insert(task(1, 3)).unwrap();
		queue.insert(task(2, 1)).unwrap();
		queue.insert(task(3, 3)).unwrap();

		let order: Vec<i32> = queue.iter().map(|t| t.borrow().id.into()).collect();
		assert_eq!(order, [2, 0, 1, 3]);
	}

	#[test]
	fn overflow_is_reported() {
		let mut queue = PriorityQueue::<2>::new();
		queue.insert(task(0, 1)).unwrap();
		queue.insert(task(1, 2)).unwrap();
		assert!(queue.insert(task(2, 3)).is_err());
		assert_eq!(queue.len(), 2);
	}

	#[test]
	fn remove_leaves_order_intact() {
		let mut queue = PriorityQueue::<8>::new();
		let victim = task(1, 4);
		queue.insert(task(0, 2)).unwrap();
		queue.insert(victim.clone()).unwrap();
		queue.insert(task(2, 6)).unwrap();

		assert!(queue.remove(&victim));
		assert!(!queue.remove(&victim));

		let order: Vec<u8> = queue.iter().map(|t| t.borrow().priority.into()).collect();
		assert_eq!(order, [2, 6]);
	}

	#[test]
	fn pop_returns_strongest_claim() {
		let mut queue = PriorityQueue::<8>::new();
		queue.insert(task(0, 9)).unwrap();
		queue.insert(task(1, 4)).unwrap();

		assert_eq!(queue.pop().unwrap().borrow().priority, Priority::from(4));
		assert_eq!(queue.pop().unwrap().borrow().priority, Priority::from(9));
		assert!(queue.pop().is_none());
	}
}
