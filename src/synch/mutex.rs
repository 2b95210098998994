//! Mutual exclusion with optional priority inheritance.
//!
//! A blocked high-priority task lends its priority to the mutex owner, and
//! the boost propagates along the blocked-on chain when the owner itself
//! waits on another mutex. Releasing a mutex restores the owner to the
//! strongest priority still demanded by the waiters of its remaining
//! mutexes, never below its baseline.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::config::{MAX_TASKS, TASK_NAME_LEN, WAIT_QUEUE_CAP};
use crate::scheduler::Scheduler;
use crate::scheduler::task::{Priority, PriorityQueue, TaskRef, TaskState};

struct MutexState {
	locked: bool,
	owner: Option<TaskRef>,
	/// Waiting tasks, strongest claim first
	wait_queue: PriorityQueue<WAIT_QUEUE_CAP>,
}

/// A mutex for simulated tasks.
///
/// Fixture-owned; tasks keep weak references to the mutexes they hold.
pub struct Mutex {
	name: String,
	state: RefCell<MutexState>,
}

impl Mutex {
	pub fn new(name: &str) -> Rc<Self> {
		Rc::new(Self {
			name: name.chars().take(TASK_NAME_LEN).collect(),
			state: RefCell::new(MutexState {
				locked: false,
				owner: None,
				wait_queue: PriorityQueue::new(),
			}),
		})
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn is_locked(&self) -> bool {
		self.state.borrow().locked
	}

	pub fn owner(&self) -> Option<TaskRef> {
		self.state.borrow().owner.clone()
	}

	/// Waiting tasks in queue order (strongest claim first).
	pub fn waiters(&self) -> Vec<TaskRef> {
		self.state.borrow().wait_queue.iter().cloned().collect()
	}

	/// Acquires the mutex on behalf of `task`, blocking it on contention.
	///
	/// With priority inheritance enabled, a stronger blocked claim boosts the
	/// owner (and, transitively, whoever the owner is waiting for).
	pub fn lock(self: &Rc<Self>, sched: &mut Scheduler, task: &TaskRef) {
		{
			let mut state = self.state.borrow_mut();
			if !state.locked {
				state.locked = true;
				state.owner = Some(task.clone());
				drop(state);

				task.borrow_mut().held_mutexes.push(Rc::downgrade(self));
				sched
					.timeline
					.record_mutex_lock(sched.system_ticks, &task.borrow(), &self.name);
				return;
			}
		}

		let Some(owner) = self.owner() else {
			warn!("mutex {} is locked but has no owner", self.name);
			return;
		};

		sched
			.timeline
			.record_contention(sched.system_ticks, &task.borrow(), &self.name, &owner.borrow());

		if sched.priority_inheritance {
			let blocked_prio = task.borrow().priority;
			if blocked_prio < owner.borrow().priority {
				sched.timeline.record_priority_inherit(
					sched.system_ticks,
					&owner.borrow(),
					&task.borrow(),
					&self.name,
				);
				priority_inherit(sched, &owner, blocked_prio);
			}
		}

		task.borrow_mut().blocked_on = Some(Rc::downgrade(self));
		sched.set_task_state(task, TaskState::Blocked);
		if self.state.borrow_mut().wait_queue.insert(task.clone()).is_err() {
			warn!("mutex wait queue full for {}", self.name);
		}

		sched.schedule();
	}

	/// Releases the mutex. Only the owner may unlock; anything else is a
	/// logged no-op.
	///
	/// The owner's priority is restored *before* ownership moves to the
	/// strongest waiter, so the handoff happens at the correct level.
	pub fn unlock(self: &Rc<Self>, sched: &mut Scheduler, task: &TaskRef) {
		{
			let state = self.state.borrow();
			let is_owner = state
				.owner
				.as_ref()
				.is_some_and(|owner| Rc::ptr_eq(owner, task));
			if !is_owner {
				warn!(
					"mutex_unlock: {} is not the owner of {}",
					task.borrow().name,
					self.name
				);
				return;
			}
		}

		sched
			.timeline
			.record_mutex_unlock(sched.system_ticks, &task.borrow(), &self.name);

		task.borrow_mut().drop_held(self);

		if sched.priority_inheritance {
			priority_restore(sched, task);
		}

		let waiter = self.state.borrow_mut().wait_queue.pop();
		match waiter {
			Some(waiter) => {
				waiter.borrow_mut().blocked_on = None;

				// Hand the mutex over without ever unlocking it.
				self.state.borrow_mut().owner = Some(waiter.clone());
				waiter.borrow_mut().held_mutexes.push(Rc::downgrade(self));

				sched.set_task_state(&waiter, TaskState::Ready);
				sched
					.timeline
					.record_mutex_acquire(sched.system_ticks, &waiter.borrow(), &self.name);
			}
			None => {
				let mut state = self.state.borrow_mut();
				state.locked = false;
				state.owner = None;
			}
		}

		sched.schedule();
	}
}

impl Drop for Mutex {
	fn drop(&mut self) {
		let state = self.state.get_mut();
		if state.locked {
			warn!("destroying locked mutex {}; force-releasing", self.name);
			state.locked = false;
			state.owner = None;
		}
	}
}

/// Boosts `task` to `new_priority` and walks the blocked-on chain.
///
/// Only strict boosts apply; a weaker or equal priority leaves the task
/// untouched. The walk is bounded by the task limit so that a cyclic
/// (deadlocked) chain cannot spin forever.
pub fn priority_inherit(sched: &mut Scheduler, task: &TaskRef, new_priority: Priority) {
	let mut current = task.clone();

	for _ in 0..MAX_TASKS {
		let old_priority = {
			let mut borrowed = current.borrow_mut();
			if new_priority >= borrowed.priority {
				return;
			}

			if !borrowed.inherited {
				borrowed.original_priority = borrowed.priority;
				borrowed.inherited = true;
			}

			let old = borrowed.priority;
			borrowed.priority = new_priority;
			borrowed.priority_boosts += 1;
			old
		};

		sched.timeline.record_priority_boost(
			sched.system_ticks,
			&current.borrow(),
			old_priority,
			new_priority,
		);
		sched.reorder_task(&current);

		// Transitive step: boost whoever the boosted task is waiting for.
		let next_owner = current
			.borrow()
			.blocked_on
			.as_ref()
			.and_then(Weak::upgrade)
			.and_then(|mutex| mutex.owner());
		match next_owner {
			Some(owner) => current = owner,
			None => return,
		}
	}

	warn!("priority inheritance chain exceeded {MAX_TASKS} links");
}

/// Drops `task` back to the strongest priority still demanded by waiters of
/// the mutexes it holds, clamped at its baseline.
///
/// The restoration is level-based: a task holding several contended mutexes
/// keeps the boost its remaining waiters justify.
pub fn priority_restore(sched: &mut Scheduler, task: &TaskRef) {
	if !task.borrow().inherited {
		return;
	}

	let mut needed = task.borrow().original_priority;
	let held: Vec<Rc<Mutex>> = task
		.borrow()
		.held_mutexes
		.iter()
		.filter_map(Weak::upgrade)
		.collect();
	for mutex in held {
		let state = mutex.state.borrow();
		for waiter in state.wait_queue.iter() {
			let prio = waiter.borrow().priority;
			if prio < needed {
				needed = prio;
			}
		}
	}

	let old_priority = {
		let mut borrowed = task.borrow_mut();
		let old = borrowed.priority;
		borrowed.priority = needed;
		if needed == borrowed.original_priority {
			borrowed.inherited = false;
		}
		old
	};

	sched
		.timeline
		.record_priority_restore(sched.system_ticks, &task.borrow(), old_priority, needed);
	sched.reorder_task(task);
}
