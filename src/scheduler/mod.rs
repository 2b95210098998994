//! Priority-based preemptive scheduling core.
//!
//! The scheduler drives a single virtual CPU: it owns every task control
//! block, keeps the ready queue sorted by priority and performs the dispatch
//! decision. Time never advances on its own; fixtures call
//! [`Scheduler::tick`] and [`Scheduler::schedule`] to move the simulation
//! forward.

use std::cell::RefCell;
use std::rc::Rc;

use thiserror::Error;

use crate::config::{MAX_READY_TASKS, MAX_TASKS};
use crate::scheduler::task::{Priority, PriorityQueue, Task, TaskId, TaskRef, TaskState};
use crate::timeline::{Timeline, VisualState};

pub mod task;

/// Scheduling policy
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SchedPolicy {
	/// Fixed priorities, assigned at task creation
	FixedPriority,
	/// Priorities derived from periods (shorter period = stronger claim)
	RateMonotonic,
}

#[derive(Debug, Error)]
pub enum SpawnError {
	#[error("task table is full")]
	TooManyTasks,
}

/// Liu & Layland schedulability verdict.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RmsVerdict {
	/// `U <= n(2^(1/n)-1)`, guaranteed schedulable
	Schedulable,
	/// `bound < U <= 1.0`, simulation has to decide
	Possibly,
	/// `U > 1.0`
	NotSchedulable,
}

/// Result of the Liu & Layland utilization test.
#[derive(Copy, Clone, Debug)]
pub struct RmsAnalysis {
	/// Number of periodic tasks analyzed
	pub tasks: usize,
	/// Total utilization `U`
	pub utilization: f64,
	/// The bound `n(2^(1/n)-1)`
	pub bound: f64,
	pub verdict: RmsVerdict,
}

pub struct Scheduler {
	pub(crate) policy: SchedPolicy,
	pub(crate) priority_inheritance: bool,

	pub(crate) current_task: Option<TaskRef>,
	pub(crate) idle_task: TaskRef,

	pub(crate) ready_queue: PriorityQueue<MAX_READY_TASKS>,
	pub(crate) tasks: Vec<TaskRef>,

	pub(crate) system_ticks: u64,
	pub(crate) context_switches: u64,

	pub(crate) next_id: i32,
	pub(crate) timeline: Timeline,
}

impl Scheduler {
	/// Creates a scheduler together with its idle task.
	///
	/// The idle task carries priority 255 and lives outside the ready queue;
	/// the dispatcher falls back to it whenever no other task is ready.
	pub fn new(policy: SchedPolicy, priority_inheritance: bool) -> Self {
		let idle_task = Rc::new(RefCell::new(Task::new_idle(TaskId::from(0), 0)));
		let mut sched = Self {
			policy,
			priority_inheritance,
			current_task: None,
			idle_task: idle_task.clone(),
			ready_queue: PriorityQueue::new(),
			tasks: Vec::new(),
			system_ticks: 0,
			context_switches: 0,
			next_id: 1,
			timeline: Timeline::new(),
		};
		sched.tasks.push(idle_task.clone());
		sched.timeline.record_created(0, &idle_task.borrow());
		sched
	}

	/// Creates a task and registers it with the scheduler.
	///
	/// The task starts Ready with its first deadline at `now + deadline`
	/// (or `now + period` if no explicit deadline is given).
	pub fn spawn(
		&mut self,
		name: &str,
		priority: Priority,
		period: u64,
		deadline: u64,
		wcet: u64,
	) -> Result<TaskRef, SpawnError> {
		if self.tasks.len() >= MAX_TASKS {
			return Err(SpawnError::TooManyTasks);
		}

		let id = TaskId::from(self.next_id);
		self.next_id += 1;

		let mut task = Task::new(id, name, priority, period, deadline, wcet, self.system_ticks);

		// Under RMS the period stands in for the priority until
		// rms_recalculate_priorities assigns ranks.
		if self.policy == SchedPolicy::RateMonotonic && period > 0 {
			let prio = Priority::from(period.min(254) as u8);
			task.priority = prio;
			task.original_priority = prio;
		}

		debug!("creating task {id} ({}) with priority {}", task.name, task.priority);

		let task = Rc::new(RefCell::new(task));
		self.tasks.push(task.clone());
		if self.ready_queue.insert(task.clone()).is_err() {
			warn!("ready queue overflow while admitting {name}");
		}
		self.timeline.record_created(self.system_ticks, &task.borrow());

		Ok(task)
	}

	/// Moves a task into `new_state` and keeps the ready queue in sync.
	///
	/// Transitions to the current state are no-ops and Terminated is final.
	pub fn set_task_state(&mut self, task: &TaskRef, new_state: TaskState) {
		let old = task.borrow().state;
		if old == new_state || old == TaskState::Terminated {
			return;
		}

		task.borrow_mut().state = new_state;

		if old == TaskState::Ready && new_state != TaskState::Ready {
			self.ready_queue.remove(task);
		}
		if new_state == TaskState::Ready
			&& old != TaskState::Ready
			&& !Rc::ptr_eq(task, &self.idle_task)
		{
			task.borrow_mut().ready_since = self.system_ticks;
			if self.ready_queue.insert(task.clone()).is_err() {
				warn!("ready queue overflow while waking {}", task.borrow().name);
			}
		}

		self.timeline
			.record_state_change(self.system_ticks, &task.borrow(), VisualState::from(new_state));
	}

	pub fn suspend_task(&mut self, task: &TaskRef) {
		if task.borrow().state == TaskState::Terminated {
			return;
		}
		self.set_task_state(task, TaskState::Suspended);
	}

	pub fn resume_task(&mut self, task: &TaskRef) {
		if task.borrow().state != TaskState::Suspended {
			return;
		}
		self.set_task_state(task, TaskState::Ready);
	}

	pub fn terminate_task(&mut self, task: &TaskRef) {
		self.set_task_state(task, TaskState::Terminated);
	}

	/// The task the dispatcher would pick right now.
	pub fn next_task(&self) -> TaskRef {
		self.ready_queue
			.peek()
			.cloned()
			.unwrap_or_else(|| self.idle_task.clone())
	}

	/// Runs the dispatch decision and switches context if necessary.
	///
	/// The running task is only preempted by a strictly stronger claim;
	/// equal priorities never preempt each other.
	pub fn schedule(&mut self) {
		let next = self.next_task();

		if let Some(curr) = self.current_task.clone() {
			if Rc::ptr_eq(&curr, &next) {
				return;
			}

			let (state, prio) = {
				let borrowed = curr.borrow();
				(borrowed.state, borrowed.priority)
			};
			if state == TaskState::Running {
				if next.borrow().priority >= prio {
					return;
				}
				self.timeline
					.record_preemption(self.system_ticks, &curr.borrow(), &next.borrow());
			}
		}

		self.context_switch(next);
	}

	fn context_switch(&mut self, to: TaskRef) {
		if let Some(from) = self.current_task.take() {
			if Rc::ptr_eq(&from, &to) {
				self.current_task = Some(from);
				return;
			}

			if from.borrow().state == TaskState::Running {
				if Rc::ptr_eq(&from, &self.idle_task) {
					// The idle task parks outside the ready queue.
					from.borrow_mut().state = TaskState::Ready;
				} else {
					{
						let mut borrowed = from.borrow_mut();
						borrowed.state = TaskState::Ready;
						borrowed.ready_since = self.system_ticks;
						borrowed.preemptions += 1;
					}
					if self.ready_queue.insert(from.clone()).is_err() {
						warn!("ready queue overflow while parking {}", from.borrow().name);
					}
				}
				self.timeline
					.record_state_change(self.system_ticks, &from.borrow(), VisualState::Ready);
			}
		}

		self.ready_queue.remove(&to);
		to.borrow_mut().state = TaskState::Running;
		self.context_switches += 1;
		self.timeline
			.record_state_change(self.system_ticks, &to.borrow(), VisualState::Running);
		self.current_task = Some(to);
	}

	/// Returns `true` if a ready task holds a strictly stronger claim than
	/// the current one.
	pub fn needs_preemption(&self) -> bool {
		let Some(curr) = &self.current_task else {
			return true;
		};
		match self.ready_queue.peek() {
			Some(next) => next.borrow().priority < curr.borrow().priority,
			None => false,
		}
	}

	/// Re-sorts a ready task after its priority changed.
	pub(crate) fn reorder_task(&mut self, task: &TaskRef) {
		if task.borrow().state == TaskState::Ready && self.ready_queue.remove(task) {
			if self.ready_queue.insert(task.clone()).is_err() {
				warn!("ready queue overflow while reordering {}", task.borrow().name);
			}
		}
	}

	pub fn current_task(&self) -> Option<TaskRef> {
		self.current_task.clone()
	}

	pub fn idle_task(&self) -> &TaskRef {
		&self.idle_task
	}

	pub fn is_idle(&self, task: &TaskRef) -> bool {
		Rc::ptr_eq(task, &self.idle_task)
	}

	pub fn tasks(&self) -> &[TaskRef] {
		&self.tasks
	}

	pub fn task_by_name(&self, name: &str) -> Option<TaskRef> {
		self.tasks.iter().find(|t| t.borrow().name == name).cloned()
	}

	pub fn ready_queue(&self) -> &PriorityQueue<MAX_READY_TASKS> {
		&self.ready_queue
	}

	pub fn ticks(&self) -> u64 {
		self.system_ticks
	}

	pub fn context_switches(&self) -> u64 {
		self.context_switches
	}

	pub fn policy(&self) -> SchedPolicy {
		self.policy
	}

	pub fn priority_inheritance(&self) -> bool {
		self.priority_inheritance
	}

	pub fn timeline(&self) -> &Timeline {
		&self.timeline
	}

	pub fn render_timeline(&self) -> String {
		self.timeline.render(&self.tasks, self.context_switches)
	}

	/// Reassigns priorities by period rank: the shortest period gets rank 0.
	///
	/// Only live periodic tasks take part; the ready queue is rebuilt to
	/// reflect the new ordering.
	pub fn rms_recalculate_priorities(&mut self) {
		let mut periodic: Vec<TaskRef> = self
			.tasks
			.iter()
			.filter(|t| {
				let borrowed = t.borrow();
				borrowed.period > 0 && borrowed.state != TaskState::Terminated
			})
			.filter(|t| !Rc::ptr_eq(t, &self.idle_task))
			.cloned()
			.collect();

		periodic.sort_by_key(|t| t.borrow().period);

		for (rank, task) in periodic.iter().enumerate() {
			let prio = Priority::from(rank.min(254) as u8);
			let mut borrowed = task.borrow_mut();
			borrowed.priority = prio;
			borrowed.original_priority = prio;
		}

		self.ready_queue.clear();
		for task in self.tasks.clone() {
			if task.borrow().state == TaskState::Ready && !Rc::ptr_eq(&task, &self.idle_task) {
				if self.ready_queue.insert(task.clone()).is_err() {
					warn!("ready queue overflow while rebuilding for RMS");
				}
			}
		}
	}

	/// Total utilization `U = sum(Ci/Ti)` over all periodic tasks.
	pub fn rms_utilization(&self) -> f64 {
		self.tasks
			.iter()
			.filter(|t| !Rc::ptr_eq(t, &self.idle_task))
			.map(|t| {
				let borrowed = t.borrow();
				if borrowed.period > 0 {
					borrowed.remaining_work as f64 / borrowed.period as f64
				} else {
					0.0
				}
			})
			.sum()
	}

	/// Runs the Liu & Layland utilization test.
	///
	/// Returns `None` when there is no periodic task to analyze.
	pub fn rms_schedulability_test(&self) -> Option<RmsAnalysis> {
		let n = self
			.tasks
			.iter()
			.filter(|t| t.borrow().period > 0 && !Rc::ptr_eq(t, &self.idle_task))
			.count();
		if n == 0 {
			return None;
		}

		let utilization = self.rms_utilization();
		let bound = n as f64 * (2f64.powf(1.0 / n as f64) - 1.0);
		let verdict = if utilization <= bound {
			RmsVerdict::Schedulable
		} else if utilization <= 1.0 {
			RmsVerdict::Possibly
		} else {
			RmsVerdict::NotSchedulable
		};

		Some(RmsAnalysis {
			tasks: n,
			utilization,
			bound,
			verdict,
		})
	}

	/// Formats the RMS analysis report: per-task table plus verdict.
	pub fn rms_report(&self) -> String {
		let mut out = String::new();
		let rule = "=".repeat(64);

		out.push('\n');
		out.push_str(&rule);
		out.push_str("\n         RATE MONOTONIC SCHEDULING ANALYSIS\n");
		out.push_str(&rule);
		out.push_str("\n\n");

		out.push_str(&format!(
			"  {:<15} {:>8} {:>8} {:>8} {:>10}\n",
			"Task", "Period", "WCET", "Priority", "Util"
		));
		out.push_str(&format!(
			"  {:<15} {:>8} {:>8} {:>8} {:>10}\n",
			"----", "------", "----", "--------", "----"
		));

		for task in &self.tasks {
			let borrowed = task.borrow();
			if borrowed.period > 0 && !Rc::ptr_eq(task, &self.idle_task) {
				let util = borrowed.remaining_work as f64 / borrowed.period as f64;
				out.push_str(&format!(
					"  {:<15} {:>8} {:>8} {:>8} {:>9.3}\n",
					borrowed.name,
					borrowed.period,
					borrowed.remaining_work,
					borrowed.priority.into(),
					util
				));
			}
		}
		out.push('\n');

		match self.rms_schedulability_test() {
			None => out.push_str("  No periodic tasks to analyze.\n"),
			Some(analysis) => {
				out.push_str(&format!(
					"  Number of periodic tasks : {}\n",
					analysis.tasks
				));
				out.push_str(&format!(
					"  Total utilization (U)    : {:.3}\n",
					analysis.utilization
				));
				out.push_str(&format!(
					"  RMS bound n(2^(1/n)-1)   : {:.3}\n",
					analysis.bound
				));
				match analysis.verdict {
					RmsVerdict::Schedulable => {
						out.push_str("  Verdict: SCHEDULABLE (U <= bound, guaranteed)\n");
					}
					RmsVerdict::Possibly => {
						out.push_str("  Verdict: POSSIBLY schedulable (bound < U <= 1.0)\n");
						out.push_str("           Run simulation to verify.\n");
					}
					RmsVerdict::NotSchedulable => {
						out.push_str("  Verdict: NOT SCHEDULABLE (U > 1.0)\n");
					}
				}
			}
		}

		out
	}
}
