//! The eight demonstration scenarios.
//!
//! Each scenario builds its own scheduler, scripts the workload the same way
//! a fixture would, and hands back the driven scheduler together with a
//! per-scenario summary and a pass verdict. The CLI renders the timeline;
//! the integration tests assert on the returned state.

use std::rc::Rc;

use crate::scheduler::task::{Priority, TaskRef, TaskState};
use crate::scheduler::{SchedPolicy, Scheduler};
use crate::synch::mutex::Mutex;
use crate::synch::semaphore::Semaphore;

/// A driven scenario: the scheduler after the run, the key figures the
/// original demo prints, and its pass verdict.
pub struct ScenarioOutcome {
	pub sched: Scheduler,
	pub summary: Vec<String>,
	pub passed: bool,
}

/// Scenario registry in CLI order: title and entry point.
pub const SCENARIOS: [(&str, fn() -> ScenarioOutcome); 8] = [
	("Basic Priority Scheduling", basic_priority),
	("Preemption", preemption),
	("Priority Inversion WITH Priority Inheritance", inversion_with_pi),
	(
		"Priority Inversion WITHOUT Priority Inheritance",
		inversion_without_pi,
	),
	("Transitive Priority Inheritance", transitive_inheritance),
	("Rate Monotonic Scheduling", rate_monotonic),
	("Semaphore Producer-Consumer", semaphore_producer_consumer),
	("Deadline Miss Detection", deadline_miss),
];

fn is_current(sched: &Scheduler, task: &TaskRef) -> bool {
	sched
		.current_task()
		.is_some_and(|curr| Rc::ptr_eq(&curr, task))
}

/// Terminates the running task once it has no work left.
fn reap_finished(sched: &mut Scheduler) {
	if let Some(curr) = sched.current_task() {
		let done = !sched.is_idle(&curr)
			&& curr.borrow().remaining_work == 0
			&& curr.borrow().state == TaskState::Running;
		if done {
			sched.terminate_task(&curr);
		}
	}
}

/// Like [`reap_finished`], but parks periodic tasks until their next release.
fn park_finished(sched: &mut Scheduler) {
	if let Some(curr) = sched.current_task() {
		let done = !sched.is_idle(&curr)
			&& curr.borrow().remaining_work == 0
			&& curr.borrow().state == TaskState::Running;
		if done {
			if curr.borrow().period > 0 {
				sched.suspend_task(&curr);
			} else {
				sched.terminate_task(&curr);
			}
		}
	}
}

/// Three aperiodic tasks execute in strict priority order.
pub fn basic_priority() -> ScenarioOutcome {
	let mut sched = Scheduler::new(SchedPolicy::FixedPriority, false);

	let task_a = sched
		.spawn("TaskA", Priority::from(1), 0, 0, 5)
		.expect("task table has room");
	let task_b = sched
		.spawn("TaskB", Priority::from(2), 0, 0, 10)
		.expect("task table has room");
	let task_c = sched
		.spawn("TaskC", Priority::from(3), 0, 0, 8)
		.expect("task table has room");

	sched.schedule();
	for _ in 0..30 {
		sched.tick();
		reap_finished(&mut sched);
		sched.schedule();
	}

	let passed = [&task_a, &task_b, &task_c]
		.iter()
		.all(|t| t.borrow().state == TaskState::Terminated);
	let summary = vec![format!(
		"Completion order by priority: A at t={}, B at t={}, C at t={}",
		task_a.borrow().total_exec_time,
		task_a.borrow().total_exec_time + task_b.borrow().total_exec_time,
		task_a.borrow().total_exec_time
			+ task_b.borrow().total_exec_time
			+ task_c.borrow().total_exec_time
	)];

	ScenarioOutcome {
		sched,
		summary,
		passed,
	}
}

/// A high-priority task arrives at t=5 and preempts the running one.
pub fn preemption() -> ScenarioOutcome {
	let mut sched = Scheduler::new(SchedPolicy::FixedPriority, false);

	let low = sched
		.spawn("TaskLow", Priority::from(10), 0, 0, 20)
		.expect("task table has room");
	sched.schedule();

	for _ in 0..5 {
		sched.tick();
		sched.schedule();
	}

	let high = sched
		.spawn("TaskHigh", Priority::from(1), 0, 0, 10)
		.expect("task table has room");
	sched.schedule();

	for _ in 0..30 {
		sched.tick();
		reap_finished(&mut sched);
		sched.schedule();
	}

	let passed = high.borrow().state == TaskState::Terminated
		&& low.borrow().state == TaskState::Terminated
		&& low.borrow().preemptions >= 1;
	let summary = vec![
		format!("TaskLow preemptions: {}", low.borrow().preemptions),
		format!("Context switches:    {}", sched.context_switches()),
	];

	ScenarioOutcome {
		sched,
		summary,
		passed,
	}
}

/// Priority inversion resolved by inheritance: the lock owner is boosted to
/// the blocked high-priority task's level and finishes ahead of the medium
/// task.
pub fn inversion_with_pi() -> ScenarioOutcome {
	let mut sched = Scheduler::new(SchedPolicy::FixedPriority, true);
	let mutex_a = Mutex::new("MutexA");

	// t=0: TaskLow starts and takes the mutex immediately.
	let low = sched
		.spawn("TaskLow", Priority::from(10), 0, 0, 20)
		.expect("task table has room");
	sched.schedule();
	mutex_a.lock(&mut sched, &low);

	for _ in 0..2 {
		sched.tick();
		sched.schedule();
	}

	// t=2: TaskMed preempts TaskLow.
	let med = sched
		.spawn("TaskMed", Priority::from(5), 0, 0, 10)
		.expect("task table has room");
	sched.schedule();

	for _ in 0..3 {
		sched.tick();
		sched.schedule();
	}

	// t=5: TaskHigh arrives and blocks on the mutex; TaskLow inherits P1.
	let high = sched
		.spawn("TaskHigh", Priority::from(1), 0, 0, 8)
		.expect("task table has room");
	sched.schedule();
	mutex_a.lock(&mut sched, &high);

	let mut released = false;
	let mut low_work_done = 0u64;

	for _ in 0..15 {
		sched.tick();

		if is_current(&sched, &low) {
			low_work_done += 1;
		}

		let owns = mutex_a.owner().is_some_and(|owner| Rc::ptr_eq(&owner, &low));
		if is_current(&sched, &low) && !released && low_work_done >= 13 && owns {
			mutex_a.unlock(&mut sched, &low);
			released = true;
		}

		sched.schedule();
	}

	for _ in 0..30 {
		sched.tick();
		reap_finished(&mut sched);
		sched.schedule();
	}

	let high_done = matches!(
		high.borrow().state,
		TaskState::Terminated | TaskState::Running
	);
	let passed = low.borrow().priority_boosts >= 1;
	let summary = vec![
		format!("TaskLow  priority boosts: {}", low.borrow().priority_boosts),
		format!(
			"TaskHigh was blocked: {}",
			if high_done { "and completed" } else { "still" }
		),
		format!("TaskMed  preemptions: {}", med.borrow().preemptions),
	];

	ScenarioOutcome {
		sched,
		summary,
		passed,
	}
}

/// The same timing without inheritance: the medium task starves the blocked
/// high-priority one.
pub fn inversion_without_pi() -> ScenarioOutcome {
	let mut sched = Scheduler::new(SchedPolicy::FixedPriority, false);
	let mutex_a = Mutex::new("MutexA");

	let low = sched
		.spawn("TaskLow", Priority::from(10), 0, 0, 20)
		.expect("task table has room");
	sched.schedule();
	mutex_a.lock(&mut sched, &low);

	for _ in 0..2 {
		sched.tick();
		sched.schedule();
	}

	let med = sched
		.spawn("TaskMed", Priority::from(5), 0, 0, 10)
		.expect("task table has room");
	sched.schedule();

	for _ in 0..3 {
		sched.tick();
		sched.schedule();
	}

	let high = sched
		.spawn("TaskHigh", Priority::from(1), 0, 0, 8)
		.expect("task table has room");
	sched.schedule();
	mutex_a.lock(&mut sched, &high);

	// TaskMed keeps running because TaskLow stays at priority 10: the
	// inversion TaskHigh suffers from until the mutex is released.
	let mut released = false;
	let mut low_work_done = 0u64;

	for _ in 0..50 {
		sched.tick();

		if is_current(&sched, &low) {
			low_work_done += 1;
		}

		let owns = mutex_a.owner().is_some_and(|owner| Rc::ptr_eq(&owner, &low));
		if is_current(&sched, &low) && !released && low_work_done >= 13 && owns {
			mutex_a.unlock(&mut sched, &low);
			released = true;
		}

		reap_finished(&mut sched);
		sched.schedule();
	}

	let passed = low.borrow().priority_boosts == 0;
	let summary = vec![
		format!(
			"TaskLow  priority boosts: {} (should be 0)",
			low.borrow().priority_boosts
		),
		format!("TaskMed  preemptions: {}", med.borrow().preemptions),
	];

	ScenarioOutcome {
		sched,
		summary,
		passed,
	}
}

/// A chain High -> Low -> VeryLow through nested mutexes: the boost
/// propagates transitively down to the root owner.
pub fn transitive_inheritance() -> ScenarioOutcome {
	let mut sched = Scheduler::new(SchedPolicy::FixedPriority, true);
	let mutex_a = Mutex::new("MutexA");
	let mutex_b = Mutex::new("MutexB");

	// t=0: TaskVeryLow takes MutexA.
	let very_low = sched
		.spawn("TaskVeryLow", Priority::from(20), 0, 0, 30)
		.expect("task table has room");
	sched.schedule();
	mutex_a.lock(&mut sched, &very_low);

	sched.tick();
	sched.schedule();

	// t=1: TaskLow takes MutexB, then blocks on MutexA.
	let low = sched
		.spawn("TaskLow", Priority::from(15), 0, 0, 20)
		.expect("task table has room");
	sched.schedule();
	mutex_b.lock(&mut sched, &low);

	sched.tick();
	sched.schedule();

	// t=2: blocking on MutexA boosts TaskVeryLow to P15.
	mutex_a.lock(&mut sched, &low);

	sched.tick();
	let _med = sched
		.spawn("TaskMed", Priority::from(10), 0, 0, 15)
		.expect("task table has room");
	sched.schedule();

	sched.tick();
	sched.schedule();

	// t=4: TaskHigh blocks on MutexB; the boost runs down the chain and
	// both TaskLow and TaskVeryLow end up at P1.
	let high = sched
		.spawn("TaskHigh", Priority::from(1), 0, 0, 10)
		.expect("task table has room");
	sched.schedule();
	mutex_b.lock(&mut sched, &high);

	let mut a_released_by_very_low = false;
	let mut b_released_by_low = false;
	let mut a_released_by_low = false;

	for _ in 0..50 {
		sched.tick();

		let owns_a = mutex_a
			.owner()
			.is_some_and(|owner| Rc::ptr_eq(&owner, &very_low));
		if is_current(&sched, &very_low)
			&& !a_released_by_very_low
			&& very_low.borrow().remaining_work <= 15
			&& owns_a
		{
			mutex_a.unlock(&mut sched, &very_low);
			a_released_by_very_low = true;
		}

		let owns_b = mutex_b.owner().is_some_and(|owner| Rc::ptr_eq(&owner, &low));
		if is_current(&sched, &low)
			&& !b_released_by_low
			&& low.borrow().remaining_work <= 10
			&& owns_b
		{
			mutex_b.unlock(&mut sched, &low);
			b_released_by_low = true;
		}

		let owns_a = mutex_a.owner().is_some_and(|owner| Rc::ptr_eq(&owner, &low));
		if is_current(&sched, &low)
			&& !a_released_by_low
			&& low.borrow().remaining_work <= 8
			&& owns_a
		{
			mutex_a.unlock(&mut sched, &low);
			a_released_by_low = true;
		}

		reap_finished(&mut sched);
		sched.schedule();
	}

	let passed = very_low.borrow().priority_boosts >= 1 && low.borrow().priority_boosts >= 1;
	let summary = vec![
		format!("TaskVeryLow boosts: {}", very_low.borrow().priority_boosts),
		format!("TaskLow     boosts: {}", low.borrow().priority_boosts),
		"Transitive chain: High(P1) -> Low -> VeryLow".to_string(),
	];

	ScenarioOutcome {
		sched,
		summary,
		passed,
	}
}

/// Automatic priority assignment by period plus the Liu & Layland test,
/// simulated across one hyperperiod.
pub fn rate_monotonic() -> ScenarioOutcome {
	let mut sched = Scheduler::new(SchedPolicy::RateMonotonic, false);

	let t1 = sched
		.spawn("T1_p10", Priority::from(0), 10, 10, 3)
		.expect("task table has room");
	let t2 = sched
		.spawn("T2_p15", Priority::from(0), 15, 15, 4)
		.expect("task table has room");
	let t3 = sched
		.spawn("T3_p20", Priority::from(0), 20, 20, 5)
		.expect("task table has room");

	sched.rms_recalculate_priorities();

	let mut summary = vec![sched.rms_report()];
	summary.push("Assigned priorities:".to_string());
	summary.push(format!("  T1 (period=10): P{}", t1.borrow().priority));
	summary.push(format!("  T2 (period=15): P{}", t2.borrow().priority));
	summary.push(format!("  T3 (period=20): P{}", t3.borrow().priority));

	sched.schedule();

	// LCM of the periods: one hyperperiod.
	for _ in 0..60 {
		sched.tick();
		park_finished(&mut sched);
		sched.schedule();
	}

	let mut total_misses = 0;
	for task in [&t1, &t2, &t3] {
		let borrowed = task.borrow();
		total_misses += borrowed.deadline_misses;
		summary.push(format!(
			"{}: invocations={}, misses={}",
			borrowed.name, borrowed.invocations, borrowed.deadline_misses
		));
	}

	let passed =
		t1.borrow().priority < t2.borrow().priority && t2.borrow().priority < t3.borrow().priority;
	summary.push(format!(
		"Priority assignment correct: {}",
		if passed { "yes" } else { "no" }
	));
	summary.push(format!("Total deadline misses: {total_misses}"));

	ScenarioOutcome {
		sched,
		summary,
		passed,
	}
}

/// Producer and consumer exchanging buffer slots through two counting
/// semaphores; the slot count is conserved throughout.
pub fn semaphore_producer_consumer() -> ScenarioOutcome {
	let mut sched = Scheduler::new(SchedPolicy::FixedPriority, false);

	let sem_full = Semaphore::new("sem_full", 0, 5);
	let sem_empty = Semaphore::new("sem_empty", 5, 5);

	let producer = sched
		.spawn("Producer", Priority::from(2), 0, 0, 50)
		.expect("task table has room");
	let consumer = sched
		.spawn("Consumer", Priority::from(3), 0, 0, 50)
		.expect("task table has room");

	sched.schedule();

	let mut items_produced = 0;
	let mut items_consumed = 0;
	let mut conserved = true;

	for _ in 0..100 {
		sched.tick();

		// Producer puts one item every 3 ticks while slots are free.
		if is_current(&sched, &producer) && sched.ticks() % 3 == 0 && sem_empty.count() > 0 {
			sem_empty.wait(&mut sched, &producer);
			items_produced += 1;
			sem_full.signal(&mut sched);
		}

		// Consumer takes one item every 4 ticks while any are buffered.
		if is_current(&sched, &consumer) && sched.ticks() % 4 == 0 && sem_full.count() > 0 {
			sem_full.wait(&mut sched, &consumer);
			items_consumed += 1;
			sem_empty.signal(&mut sched);
		}

		conserved &= sem_full.count() + sem_empty.count() == 5;

		reap_finished(&mut sched);
		sched.schedule();
	}

	let passed = items_produced > 0
		&& items_consumed > 0
		&& sem_full.count() >= 0
		&& sem_empty.count() >= 0
		&& sem_full.count() + sem_empty.count() == 5
		&& conserved;
	let summary = vec![
		format!("Items produced: {items_produced}"),
		format!("Items consumed: {items_consumed}"),
		format!("sem_full count:  {}", sem_full.count()),
		format!("sem_empty count: {}", sem_empty.count()),
	];

	ScenarioOutcome {
		sched,
		summary,
		passed,
	}
}

/// A CPU hog delays a task with a tight deadline past its due tick.
pub fn deadline_miss() -> ScenarioOutcome {
	let mut sched = Scheduler::new(SchedPolicy::FixedPriority, false);

	let tight = sched
		.spawn("TaskTight", Priority::from(2), 0, 10, 15)
		.expect("task table has room");
	let relax = sched
		.spawn("TaskRelax", Priority::from(3), 0, 50, 8)
		.expect("task table has room");
	let hog = sched
		.spawn("TaskHog", Priority::from(1), 0, 100, 12)
		.expect("task table has room");

	sched.schedule();

	for _ in 0..50 {
		sched.tick();
		reap_finished(&mut sched);
		sched.schedule();
	}

	let passed = tight.borrow().deadline_misses >= 1;
	let summary = vec![
		format!("TaskHog   deadline misses: {}", hog.borrow().deadline_misses),
		format!(
			"TaskTight deadline misses: {}",
			tight.borrow().deadline_misses
		),
		format!(
			"TaskRelax deadline misses: {}",
			relax.borrow().deadline_misses
		),
	];

	ScenarioOutcome {
		sched,
		summary,
		passed,
	}
}
