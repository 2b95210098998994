//! Virtual time: tick accounting, periodic releases, deadline supervision
//! and cooperative work simulation.
//!
//! Within one tick the order is fixed: the running task's counters advance,
//! then due periodic tasks are released, then deadlines are checked. A task
//! released this tick can therefore preempt at the very next dispatch call,
//! never retroactively.

use std::rc::Rc;

use crate::scheduler::Scheduler;
use crate::scheduler::task::{TaskRef, TaskState};

impl Scheduler {
	/// Advances virtual time by one tick.
	pub fn tick(&mut self) {
		self.system_ticks += 1;

		if let Some(curr) = self.current_task.clone() {
			if !Rc::ptr_eq(&curr, &self.idle_task) && curr.borrow().state == TaskState::Running {
				let mut borrowed = curr.borrow_mut();
				borrowed.exec_time += 1;
				borrowed.total_exec_time += 1;
				borrowed.remaining_work = borrowed.remaining_work.saturating_sub(1);
				if borrowed.exec_time > borrowed.wcet_observed {
					borrowed.wcet_observed = borrowed.exec_time;
				}
			}
		}

		self.check_periodic_releases();
		self.check_deadlines();
	}

	/// Releases every suspended periodic task whose activation tick is now.
	fn check_periodic_releases(&mut self) {
		for i in 0..self.tasks.len() {
			let task = self.tasks[i].clone();
			if Rc::ptr_eq(&task, &self.idle_task) {
				continue;
			}

			let due = {
				let borrowed = task.borrow();
				borrowed.period > 0
					&& borrowed.state == TaskState::Suspended
					&& self.system_ticks == borrowed.next_release
			};
			if !due {
				continue;
			}

			{
				let mut borrowed = task.borrow_mut();
				borrowed.next_release = self.system_ticks + borrowed.period;
				borrowed.absolute_deadline = self.system_ticks + borrowed.relative_deadline;
				borrowed.exec_time = 0;
				borrowed.invocations += 1;
			}

			self.set_task_state(&task, TaskState::Ready);
			self.timeline.record_released(self.system_ticks, &task.borrow());
		}
	}

	/// Records a deadline miss for every live task that overran its deadline
	/// with work still pending. A missed deadline fires once per invocation.
	fn check_deadlines(&mut self) {
		for i in 0..self.tasks.len() {
			let task = self.tasks[i].clone();
			if Rc::ptr_eq(&task, &self.idle_task) {
				continue;
			}

			let missed = {
				let borrowed = task.borrow();
				(borrowed.period > 0 || borrowed.relative_deadline > 0)
					&& matches!(borrowed.state, TaskState::Running | TaskState::Ready)
					&& borrowed.absolute_deadline > 0
					&& self.system_ticks > borrowed.absolute_deadline
					&& borrowed.remaining_work > 0
			};
			if !missed {
				continue;
			}

			let deadline = {
				let mut borrowed = task.borrow_mut();
				borrowed.deadline_misses += 1;
				let deadline = borrowed.absolute_deadline;
				// Park the deadline so the miss does not fire again before
				// the next release.
				borrowed.absolute_deadline = u64::MAX;
				deadline
			};

			self.timeline
				.record_deadline_miss(self.system_ticks, &task.borrow(), deadline, self.system_ticks);
		}
	}

	/// Runs `ticks` rounds of tick-then-dispatch.
	pub fn advance_time(&mut self, ticks: u64) {
		for _ in 0..ticks {
			self.tick();
			self.schedule();
		}
	}

	/// Simulates `work_ticks` ticks of work on behalf of `task`.
	///
	/// Returns early when the task is not current or when a stronger claim
	/// becomes ready; the fixture is expected to call in again once the task
	/// is dispatched anew.
	pub fn simulate_work(&mut self, task: &TaskRef, work_ticks: u64) {
		task.borrow_mut().remaining_work = work_ticks;

		for _ in 0..work_ticks {
			let is_current = self
				.current_task
				.as_ref()
				.is_some_and(|curr| Rc::ptr_eq(curr, task));
			if !is_current {
				return;
			}

			self.tick();

			if self.needs_preemption() {
				self.schedule();
				return;
			}
		}
	}
}
