//! End-to-end scenarios driving the scheduling kernel through virtual time.

use std::rc::Rc;

use rtos_sim::scenarios::SCENARIOS;
use rtos_sim::{Mutex, Priority, SchedPolicy, Scheduler, Semaphore, TaskRef, TaskState};

fn is_current(sched: &Scheduler, task: &TaskRef) -> bool {
	sched
		.current_task()
		.is_some_and(|curr| Rc::ptr_eq(&curr, task))
}

/// Terminates the running task once its work is exhausted. Returns the
/// reaped task.
fn reap_finished(sched: &mut Scheduler) -> Option<TaskRef> {
	let curr = sched.current_task()?;
	let done = !sched.is_idle(&curr)
		&& curr.borrow().remaining_work == 0
		&& curr.borrow().state == TaskState::Running;
	if done {
		sched.terminate_task(&curr);
		Some(curr)
	} else {
		None
	}
}

/// Parks finished periodic tasks until their next release, reaps the rest.
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

// Scenario A: three aperiodic tasks finish strictly in priority order.
#[test]
fn basic_priority_completes_in_order() {
	let mut sched = Scheduler::new(SchedPolicy::FixedPriority, false);
	let task_a = sched.spawn("TaskA", Priority::from(1), 0, 0, 5).unwrap();
	let task_b = sched.spawn("TaskB", Priority::from(2), 0, 0, 10).unwrap();
	let task_c = sched.spawn("TaskC", Priority::from(3), 0, 0, 8).unwrap();

	sched.schedule();

	let mut completions = Vec::new();
	for _ in 0..30 {
		sched.tick();
		if let Some(done) = reap_finished(&mut sched) {
			completions.push((done.borrow().name.clone(), sched.ticks()));
		}
		sched.schedule();
	}

	assert_eq!(
		completions,
		[
			("TaskA".to_string(), 5),
			("TaskB".to_string(), 15),
			("TaskC".to_string(), 23),
		]
	);
	for task in [&task_a, &task_b, &task_c] {
		assert_eq!(task.borrow().state, TaskState::Terminated);
	}
}

// Scenario B: a late-arriving strong claim preempts the running task.
#[test]
fn preemption_interrupts_weaker_task() {
	let mut sched = Scheduler::new(SchedPolicy::FixedPriority, false);
	let low = sched.spawn("TaskLow", Priority::from(10), 0, 0, 20).unwrap();
	sched.schedule();

	for _ in 0..5 {
		sched.tick();
		sched.schedule();
	}
	assert_eq!(low.borrow().remaining_work, 15);

	let high = sched.spawn("TaskHigh", Priority::from(1), 0, 0, 10).unwrap();
	sched.schedule();
	assert!(is_current(&sched, &high));

	for _ in 0..30 {
		sched.tick();
		reap_finished(&mut sched);
		sched.schedule();
	}

	assert_eq!(high.borrow().state, TaskState::Terminated);
	assert_eq!(low.borrow().state, TaskState::Terminated);
	assert!(low.borrow().preemptions >= 1);
	assert!(sched.context_switches() >= 2);
}

// Scenario C: priority inheritance lets the lock owner finish ahead of the
// medium task and the boost is dropped on release.
#[test]
fn priority_inversion_with_inheritance() {
	let mut sched = Scheduler::new(SchedPolicy::FixedPriority, true);
	let mutex_a = Mutex::new("MutexA");

	let low = sched.spawn("TaskLow", Priority::from(10), 0, 0, 20).unwrap();
	sched.schedule();
	mutex_a.lock(&mut sched, &low);

	for _ in 0..2 {
		sched.tick();
		sched.schedule();
	}

	let med = sched.spawn("TaskMed", Priority::from(5), 0, 0, 10).unwrap();
	sched.schedule();
	assert!(is_current(&sched, &med));

	for _ in 0..3 {
		sched.tick();
		sched.schedule();
	}

	let high = sched.spawn("TaskHigh", Priority::from(1), 0, 0, 8).unwrap();
	sched.schedule();
	mutex_a.lock(&mut sched, &high);

	// The owner inherited the blocked task's priority.
	assert_eq!(high.borrow().state, TaskState::Blocked);
	assert_eq!(low.borrow().priority, Priority::from(1));
	assert!(low.borrow().inherited);
	assert!(low.borrow().priority_boosts >= 1);
	assert!(is_current(&sched, &low));

	let mut released = false;
	let mut med_ran_while_boosted = false;
	let mut low_work_done = 0u64;

	for _ in 0..15 {
		sched.tick();

		if is_current(&sched, &low) {
			low_work_done += 1;
		}
		if is_current(&sched, &med) && low.borrow().inherited {
			med_ran_while_boosted = true;
		}

		let owns = mutex_a.owner().is_some_and(|owner| Rc::ptr_eq(&owner, &low));
		if is_current(&sched, &low) && !released && low_work_done >= 13 && owns {
			mutex_a.unlock(&mut sched, &low);
			released = true;
			// Restored to the baseline as soon as the mutex is gone.
			assert_eq!(low.borrow().priority, Priority::from(10));
			assert!(!low.borrow().inherited);
		}

		sched.schedule();
	}
	assert!(released);
	assert!(!med_ran_while_boosted);

	for _ in 0..30 {
		sched.tick();
		reap_finished(&mut sched);
		sched.schedule();
	}

	for task in [&low, &med, &high] {
		assert_eq!(task.borrow().state, TaskState::Terminated);
	}
}

// Scenario D: without inheritance the medium task starves the blocked
// high-priority one.
#[test]
fn priority_inversion_without_inheritance() {
	let mut sched = Scheduler::new(SchedPolicy::FixedPriority, false);
	let mutex_a = Mutex::new("MutexA");

	let low = sched.spawn("TaskLow", Priority::from(10), 0, 0, 20).unwrap();
	sched.schedule();
	mutex_a.lock(&mut sched, &low);

	for _ in 0..2 {
		sched.tick();
		sched.schedule();
	}

	let med = sched.spawn("TaskMed", Priority::from(5), 0, 0, 10).unwrap();
	sched.schedule();

	for _ in 0..3 {
		sched.tick();
		sched.schedule();
	}

	let high = sched.spawn("TaskHigh", Priority::from(1), 0, 0, 8).unwrap();
	sched.schedule();
	mutex_a.lock(&mut sched, &high);

	// No boost: the owner keeps its weak priority.
	assert_eq!(low.borrow().priority, Priority::from(10));
	assert!(!low.borrow().inherited);

	let mut released = false;
	let mut med_ran_while_high_blocked = false;
	let mut high_ran_before_release = false;
	let mut low_work_done = 0u64;

	for _ in 0..50 {
		sched.tick();

		if is_current(&sched, &med) && high.borrow().state == TaskState::Blocked {
			med_ran_while_high_blocked = true;
		}
		if is_current(&sched, &high) && !released {
			high_ran_before_release = true;
		}
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

	assert_eq!(low.borrow().priority_boosts, 0);
	assert!(med_ran_while_high_blocked);
	assert!(!high_ran_before_release);
	assert!(released);
}

// Scenario E: the boost propagates transitively along the blocked-on chain.
#[test]
fn transitive_inheritance_reaches_chain_root() {
	let mut sched = Scheduler::new(SchedPolicy::FixedPriority, true);
	let mutex_a = Mutex::new("MutexA");
	let mutex_b = Mutex::new("MutexB");

	let very_low = sched
		.spawn("TaskVeryLow", Priority::from(20), 0, 0, 30)
		.unwrap();
	sched.schedule();
	mutex_a.lock(&mut sched, &very_low);

	sched.tick();
	sched.schedule();

	let low = sched.spawn("TaskLow", Priority::from(15), 0, 0, 20).unwrap();
	sched.schedule();
	mutex_b.lock(&mut sched, &low);

	sched.tick();
	sched.schedule();

	// Blocking on MutexA lends TaskLow's priority to TaskVeryLow.
	mutex_a.lock(&mut sched, &low);
	assert_eq!(very_low.borrow().priority, Priority::from(15));

	sched.tick();
	let med = sched.spawn("TaskMed", Priority::from(10), 0, 0, 15).unwrap();
	sched.schedule();

	sched.tick();
	sched.schedule();
	assert!(is_current(&sched, &med));

	let high = sched.spawn("TaskHigh", Priority::from(1), 0, 0, 10).unwrap();
	sched.schedule();
	mutex_b.lock(&mut sched, &high);

	// Both links of the chain now carry the strongest claim.
	assert_eq!(low.borrow().priority, Priority::from(1));
	assert_eq!(very_low.borrow().priority, Priority::from(1));
	assert!(low.borrow().priority_boosts >= 1);
	assert!(very_low.borrow().priority_boosts >= 1);
	assert!(is_current(&sched, &very_low));

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
			// Nothing else boosts TaskVeryLow: straight back to baseline.
			assert_eq!(very_low.borrow().priority, Priority::from(20));
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

	assert!(a_released_by_very_low && b_released_by_low && a_released_by_low);
	assert_eq!(high.borrow().state, TaskState::Terminated);
	assert_eq!(med.borrow().state, TaskState::Terminated);

	// Drain the leftover work of the two weak tasks.
	for _ in 0..30 {
		sched.tick();
		reap_finished(&mut sched);
		sched.schedule();
	}
	for task in [&very_low, &low, &med, &high] {
		assert_eq!(task.borrow().state, TaskState::Terminated);
	}
}

// Scenario F: RMS priority assignment, Liu & Layland verdict, one
// hyperperiod of releases.
#[test]
fn rate_monotonic_assignment_and_hyperperiod() {
	let mut sched = Scheduler::new(SchedPolicy::RateMonotonic, false);

	let t1 = sched.spawn("T1_p10", Priority::from(0), 10, 10, 3).unwrap();
	let t2 = sched.spawn("T2_p15", Priority::from(0), 15, 15, 4).unwrap();
	let t3 = sched.spawn("T3_p20", Priority::from(0), 20, 20, 5).unwrap();

	sched.rms_recalculate_priorities();

	assert_eq!(t1.borrow().priority, Priority::from(0));
	assert_eq!(t2.borrow().priority, Priority::from(1));
	assert_eq!(t3.borrow().priority, Priority::from(2));

	let analysis = sched.rms_schedulability_test().unwrap();
	assert_eq!(analysis.tasks, 3);
	assert!((analysis.utilization - 0.81666).abs() < 1e-4);
	assert!((analysis.bound - 0.77976).abs() < 1e-4);
	assert_eq!(analysis.verdict, rtos_sim::RmsVerdict::Possibly);

	sched.schedule();
	for _ in 0..60 {
		sched.tick();
		park_finished(&mut sched);
		sched.schedule();
	}

	// Releases fire exactly at each period boundary.
	assert_eq!(t1.borrow().invocations, 7);
	assert_eq!(t2.borrow().invocations, 5);
	assert_eq!(t3.borrow().invocations, 4);

	for task in [&t1, &t2, &t3] {
		assert_eq!(task.borrow().deadline_misses, 0);
	}
}

// Scenario G: producer/consumer slot accounting is conserved at every
// observation point.
#[test]
fn semaphore_counts_are_conserved() {
	let mut sched = Scheduler::new(SchedPolicy::FixedPriority, false);

	let sem_full = Semaphore::new("sem_full", 0, 5);
	let sem_empty = Semaphore::new("sem_empty", 5, 5);

	let producer = sched.spawn("Producer", Priority::from(2), 0, 0, 50).unwrap();
	let consumer = sched.spawn("Consumer", Priority::from(3), 0, 0, 50).unwrap();

	sched.schedule();

	let mut items_produced = 0;
	let mut items_consumed = 0;

	for _ in 0..100 {
		sched.tick();

		if is_current(&sched, &producer) && sched.ticks() % 3 == 0 && sem_empty.count() > 0 {
			sem_empty.wait(&mut sched, &producer);
			items_produced += 1;
			sem_full.signal(&mut sched);
		}

		if is_current(&sched, &consumer) && sched.ticks() % 4 == 0 && sem_full.count() > 0 {
			sem_full.wait(&mut sched, &consumer);
			items_consumed += 1;
			sem_empty.signal(&mut sched);
		}

		assert!(sem_full.count() >= 0);
		assert!(sem_empty.count() >= 0);
		assert_eq!(sem_full.count() + sem_empty.count(), 5);

		reap_finished(&mut sched);
		sched.schedule();
	}

	assert!(items_produced > 0);
	assert!(items_consumed > 0);
}

// Scenario H: the tight deadline is missed exactly where expected.
#[test]
fn deadline_miss_is_attributed_to_the_tight_task() {
	let mut sched = Scheduler::new(SchedPolicy::FixedPriority, false);

	let tight = sched.spawn("TaskTight", Priority::from(2), 0, 10, 15).unwrap();
	let relax = sched.spawn("TaskRelax", Priority::from(3), 0, 50, 8).unwrap();
	let hog = sched.spawn("TaskHog", Priority::from(1), 0, 100, 12).unwrap();

	sched.schedule();

	for _ in 0..50 {
		sched.tick();
		reap_finished(&mut sched);
		sched.schedule();
	}

	assert!(tight.borrow().deadline_misses >= 1);
	assert_eq!(hog.borrow().deadline_misses, 0);
	assert_eq!(relax.borrow().deadline_misses, 0);
}

// The packaged demos must agree with their own pass criteria.
#[test]
fn all_demo_scenarios_pass() {
	for (title, run) in &SCENARIOS {
		let outcome = run();
		assert!(outcome.passed, "demo scenario failed: {title}");
		assert!(!outcome.sched.render_timeline().is_empty());
	}
}
