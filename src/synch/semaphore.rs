//! Counting semaphore with a priority-ordered wait queue.
//!
//! Classic P/V semantics without ownership: any task may signal, so there is
//! no priority inheritance here.

use std::cell::RefCell;
use std::rc::Rc;

use crate::config::{TASK_NAME_LEN, WAIT_QUEUE_CAP};
use crate::scheduler::Scheduler;
use crate::scheduler::task::{PriorityQueue, TaskRef, TaskState};

struct SemaphoreState {
	/// Resource available count
	count: i32,
	max_count: i32,
	/// Priority queue of waiting tasks
	wait_queue: PriorityQueue<WAIT_QUEUE_CAP>,
}

/// A counting semaphore for simulated tasks.
pub struct Semaphore {
	name: String,
	state: RefCell<SemaphoreState>,
}

impl Semaphore {
	/// Creates a semaphore holding `initial` of at most `max_count` units.
	pub fn new(name: &str, initial: i32, max_count: i32) -> Rc<Self> {
		Rc::new(Self {
			name: name.chars().take(TASK_NAME_LEN).collect(),
			state: RefCell::new(SemaphoreState {
				count: initial,
				max_count,
				wait_queue: PriorityQueue::new(),
			}),
		})
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn count(&self) -> i32 {
		self.state.borrow().count
	}

	/// Waiting tasks in queue order (strongest claim first).
	pub fn waiters(&self) -> Vec<TaskRef> {
		self.state.borrow().wait_queue.iter().cloned().collect()
	}

	/// P operation: takes a unit, or blocks `task` until one is signaled.
	pub fn wait(&self, sched: &mut Scheduler, task: &TaskRef) {
		{
			let mut state = self.state.borrow_mut();
			if state.count > 0 {
				state.count -= 1;
				return;
			}
		}

		sched.set_task_state(task, TaskState::Blocked);
		if self.state.borrow_mut().wait_queue.insert(task.clone()).is_err() {
			warn!("semaphore wait queue full for {}", self.name);
		}
		sched.schedule();
	}

	/// V operation: hands the unit to the strongest waiter, or banks it up
	/// to `max_count`. A signal beyond `max_count` is lost.
	pub fn signal(&self, sched: &mut Scheduler) {
		let waiter = self.state.borrow_mut().wait_queue.pop();
		match waiter {
			Some(waiter) => {
				sched.set_task_state(&waiter, TaskState::Ready);
				sched.schedule();
			}
			None => {
				let mut state = self.state.borrow_mut();
				if state.count < state.max_count {
					state.count += 1;
				}
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::scheduler::SchedPolicy;
	use crate::scheduler::task::Priority;

	#[test]
	fn wait_decrements_until_empty_then_blocks() {
		let mut sched = Scheduler::new(SchedPolicy::FixedPriority, false);
		let task = sched.spawn("taker", Priority::from(2), 0, 0, 10).unwrap();
		sched.schedule();

		let sem = Semaphore::new("units", 2, 5);
		sem.wait(&mut sched, &task);
		sem.wait(&mut sched, &task);
		assert_eq!(sem.count(), 0);
		assert_eq!(task.borrow().state, TaskState::Running);

		sem.wait(&mut sched, &task);
		assert_eq!(task.borrow().state, TaskState::Blocked);
		assert_eq!(sem.waiters().len(), 1);
	}

	#[test]
	fn signal_wakes_strongest_waiter_without_banking() {
		let mut sched = Scheduler::new(SchedPolicy::FixedPriority, false);
		let weak = sched.spawn("weak", Priority::from(8), 0, 0, 10).unwrap();
		let strong = sched.spawn("strong", Priority::from(2), 0, 0, 10).unwrap();

		let sem = Semaphore::new("units", 0, 5);
		sem.wait(&mut sched, &weak);
		sem.wait(&mut sched, &strong);

		sem.signal(&mut sched);

		// The unit went straight to the waiter, not into the count.
		assert_eq!(sem.count(), 0);
		assert_eq!(strong.borrow().state, TaskState::Running);
		assert_eq!(weak.borrow().state, TaskState::Blocked);
	}

	#[test]
	fn signal_saturates_at_max_count() {
		let mut sched = Scheduler::new(SchedPolicy::FixedPriority, false);
		let sem = Semaphore::new("units", 2, 3);

		sem.signal(&mut sched);
		sem.signal(&mut sched);
		assert_eq!(sem.count(), 3);
	}
}
