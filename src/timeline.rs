//! Scheduling event stream and ASCII timeline rendering.
//!
//! The scheduler publishes every state change, synchronization operation and
//! deadline violation as a typed [`Event`]. The [`Timeline`] collects the
//! stream chronologically; [`Timeline::render`] turns it into a Gantt chart
//! with an events log and a short analysis, one character per tick.

use crate::scheduler::task::{IDLE_PRIO, Priority, Task, TaskId, TaskRef, TaskState};

/// Rendering limit: at most this many ticks appear in one chart.
const RENDER_SPAN_MAX: usize = 500;

/// How a task appears in the Gantt chart at a given tick.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum VisualState {
	Running,
	Ready,
	Blocked,
	Suspended,
	/// Pure annotation, no state change
	None,
}

impl From<TaskState> for VisualState {
	fn from(state: TaskState) -> Self {
		match state {
			TaskState::Running => VisualState::Running,
			TaskState::Ready => VisualState::Ready,
			TaskState::Blocked => VisualState::Blocked,
			TaskState::Suspended | TaskState::Terminated => VisualState::Suspended,
		}
	}
}

impl VisualState {
	fn glyph(self) -> char {
		match self {
			VisualState::Running => '#',
			VisualState::Ready => '-',
			VisualState::Blocked => '.',
			VisualState::Suspended | VisualState::None => '_',
		}
	}
}

/// The kind of scheduling event.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EventKind {
	Created,
	StateChange,
	Released,
	Preempted,
	MutexLock,
	MutexUnlock,
	/// Ownership handoff to a waiting task
	MutexAcquire,
	Contention,
	PriorityInherit,
	PriorityBoost,
	PriorityRestore,
	DeadlineMiss,
}

/// A single recorded scheduling event.
#[derive(Clone, Debug)]
pub struct Event {
	pub tick: u64,
	pub kind: EventKind,
	pub task: Option<TaskId>,
	pub state: VisualState,
	pub annotation: String,
}

/// Chronological store of scheduling events.
pub struct Timeline {
	events: Vec<Event>,
	start_time: u64,
	end_time: u64,
}

impl Timeline {
	pub fn new() -> Self {
		Self {
			events: Vec::new(),
			start_time: u64::MAX,
			end_time: 0,
		}
	}

	pub fn events(&self) -> &[Event] {
		&self.events
	}

	pub fn record(&mut self, event: Event) {
		if event.tick < self.start_time {
			self.start_time = event.tick;
		}
		if event.tick > self.end_time {
			self.end_time = event.tick;
		}
		self.events.push(event);
	}

	pub(crate) fn record_created(&mut self, tick: u64, task: &Task) {
		self.record(Event {
			tick,
			kind: EventKind::Created,
			task: Some(task.id),
			state: VisualState::Ready,
			annotation: format!("{} created (P{})", task.name, task.priority),
		});
	}

	pub(crate) fn record_state_change(&mut self, tick: u64, task: &Task, state: VisualState) {
		self.record(Event {
			tick,
			kind: EventKind::StateChange,
			task: Some(task.id),
			state,
			annotation: String::new(),
		});
	}

	pub(crate) fn record_released(&mut self, tick: u64, task: &Task) {
		self.record(Event {
			tick,
			kind: EventKind::Released,
			task: Some(task.id),
			state: VisualState::None,
			annotation: format!(
				"{} released (period={}, deadline={})",
				task.name, task.period, task.absolute_deadline
			),
		});
	}

	pub(crate) fn record_preemption(&mut self, tick: u64, preempted: &Task, preemptor: &Task) {
		self.record(Event {
			tick,
			kind: EventKind::Preempted,
			task: Some(preempted.id),
			state: VisualState::None,
			annotation: format!(
				"{} preempted by {} (P{} > P{})",
				preempted.name, preemptor.name, preemptor.priority, preempted.priority
			),
		});
	}

	pub(crate) fn record_mutex_lock(&mut self, tick: u64, task: &Task, mutex: &str) {
		self.record(Event {
			tick,
			kind: EventKind::MutexLock,
			task: Some(task.id),
			state: VisualState::None,
			annotation: format!("{} locks {mutex}", task.name),
		});
	}

	pub(crate) fn record_mutex_unlock(&mut self, tick: u64, task: &Task, mutex: &str) {
		self.record(Event {
			tick,
			kind: EventKind::MutexUnlock,
			task: Some(task.id),
			state: VisualState::None,
			annotation: format!("{} unlocks {mutex}", task.name),
		});
	}

	pub(crate) fn record_mutex_acquire(&mut self, tick: u64, task: &Task, mutex: &str) {
		self.record(Event {
			tick,
			kind: EventKind::MutexAcquire,
			task: Some(task.id),
			state: VisualState::None,
			annotation: format!("{} acquires {mutex} (was waiting)", task.name),
		});
	}

	pub(crate) fn record_contention(&mut self, tick: u64, task: &Task, mutex: &str, owner: &Task) {
		self.record(Event {
			tick,
			kind: EventKind::Contention,
			task: Some(task.id),
			state: VisualState::None,
			annotation: format!(
				"{} tries to lock {mutex} (blocked by {})",
				task.name, owner.name
			),
		});
	}

	pub(crate) fn record_priority_inherit(
		&mut self,
		tick: u64,
		low_task: &Task,
		high_task: &Task,
		mutex: &str,
	) {
		self.record(Event {
			tick,
			kind: EventKind::PriorityInherit,
			task: Some(low_task.id),
			state: VisualState::None,
			annotation: format!(
				"PRIORITY INHERITANCE: {} (P{}) inherits from {} (P{}) via {mutex}",
				low_task.name, low_task.original_priority, high_task.name, high_task.priority
			),
		});
	}

	pub(crate) fn record_priority_boost(
		&mut self,
		tick: u64,
		task: &Task,
		old_prio: Priority,
		new_prio: Priority,
	) {
		self.record(Event {
			tick,
			kind: EventKind::PriorityBoost,
			task: Some(task.id),
			state: VisualState::None,
			annotation: format!(
				"{} priority boosted: P{old_prio} -> P{new_prio} (inherited)",
				task.name
			),
		});
	}

	pub(crate) fn record_priority_restore(
		&mut self,
		tick: u64,
		task: &Task,
		old_prio: Priority,
		new_prio: Priority,
	) {
		self.record(Event {
			tick,
			kind: EventKind::PriorityRestore,
			task: Some(task.id),
			state: VisualState::None,
			annotation: format!("PRIORITY RESTORED: {} (P{old_prio} -> P{new_prio})", task.name),
		});
	}

	pub(crate) fn record_deadline_miss(&mut self, tick: u64, task: &Task, deadline: u64, actual: u64) {
		self.record(Event {
			tick,
			kind: EventKind::DeadlineMiss,
			task: Some(task.id),
			state: VisualState::None,
			annotation: format!(
				"DEADLINE MISS: {} deadline={deadline} actual={actual} late={}",
				task.name,
				actual - deadline
			),
		});
	}

	/// Renders the Gantt chart, the events log and the analysis section.
	///
	/// `tasks` supplies the row order and labels; the idle task is skipped.
	pub fn render(&self, tasks: &[TaskRef], context_switches: u64) -> String {
		let mut out = String::new();

		if self.events.is_empty() {
			out.push_str("  (no timeline data)\n");
			return out;
		}

		let t_start = self.start_time;
		let mut span = (self.end_time + 1 - t_start) as usize;
		span = span.clamp(1, RENDER_SPAN_MAX);

		let rule = "=".repeat(65);
		out.push('\n');
		out.push_str(&rule);
		out.push_str("\n           RTOS SCHEDULER TIMELINE VISUALIZATION\n");
		out.push_str(&rule);
		out.push_str("\n\n");

		// Time axis with a label and a marker every 5 ticks.
		out.push_str("Time (ticks): ");
		let mut t = 0;
		while t < span {
			let tick = t_start + t as u64;
			if tick % 5 == 0 {
				let num = format!("{tick:<4}");
				t += num.len();
				out.push_str(&num);
			} else {
				out.push(' ');
				t += 1;
			}
		}
		out.push_str("\n              ");
		for t in 0..span {
			if (t_start + t as u64) % 5 == 0 {
				out.push('|');
			} else {
				out.push(' ');
			}
		}
		out.push_str("\n\n");

		for task in tasks {
			let task = task.borrow();
			if task.priority == IDLE_PRIO {
				continue;
			}

			out.push_str(&format!(
				"{:<11}(P{:<3}) ",
				task.name,
				task.original_priority.into()
			));
			out.push_str(&self.render_row(task.id, t_start, span));
			out.push('\n');
		}

		out.push_str("\nLegend: # = RUNNING  - = READY  . = BLOCKED  _ = SUSPENDED/NOT_RELEASED\n");

		out.push_str("\nEvents Log:\n");
		for event in &self.events {
			if !event.annotation.is_empty() {
				out.push_str(&format!("  [t={:<4}] {}\n", event.tick, event.annotation));
			}
		}

		let inherits = self
			.events
			.iter()
			.filter(|e| e.kind == EventKind::PriorityInherit)
			.count();
		let misses = self
			.events
			.iter()
			.filter(|e| e.kind == EventKind::DeadlineMiss)
			.count();

		out.push_str("\nAnalysis:\n");
		if inherits > 0 {
			out.push_str(&format!(
				"  * Priority inheritance triggered: {inherits} time(s)\n"
			));
		} else {
			out.push_str("  * No priority inheritance events\n");
		}
		if misses > 0 {
			out.push_str(&format!("  * Deadline misses detected: {misses}\n"));
		} else {
			out.push_str("  * No deadline misses\n");
		}
		out.push_str(&format!("  * Context switches: {context_switches}\n\n"));

		out
	}

	/// One chart row: replay this task's state changes across the span.
	fn render_row(&self, id: TaskId, t_start: u64, span: usize) -> String {
		let mut row = vec!['_'; span];
		let mut cur_state = VisualState::Suspended;
		let mut cur_pos: Option<usize> = None;

		for event in &self.events {
			if event.task != Some(id) || event.state == VisualState::None {
				continue;
			}
			let pos = (event.tick - t_start) as usize;
			if pos >= span {
				continue;
			}

			if let Some(from) = cur_pos {
				for slot in &mut row[from..pos] {
					*slot = cur_state.glyph();
				}
			}
			cur_state = event.state;
			cur_pos = Some(pos);
		}

		if let Some(from) = cur_pos {
			for slot in &mut row[from..] {
				*slot = cur_state.glyph();
			}
		}

		row.into_iter().collect()
	}
}

impl Default for Timeline {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use std::cell::RefCell;
	use std::rc::Rc;

	use super::*;

	fn task(id: i32, prio: u8) -> TaskRef {
		Rc::new(RefCell::new(Task::new(
			TaskId::from(id),
			&format!("Task{id}"),
			Priority::from(prio),
			0,
			0,
			0,
			0,
		)))
	}

	#[test]
	fn row_replays_state_changes() {
		let mut tl = Timeline::new();
		let t = task(1, 3);
		tl.record_created(0, &t.borrow());
		tl.record_state_change(2, &t.borrow(), VisualState::Running);
		tl.record_state_change(5, &t.borrow(), VisualState::Blocked);
		tl.record_state_change(7, &t.borrow(), VisualState::Running);

		let row = tl.render_row(TaskId::from(1), 0, 8);
		assert_eq!(row, "--###..#");
	}

	#[test]
	fn render_lists_annotated_events_and_counts() {
		let mut tl = Timeline::new();
		let low = task(1, 9);
		let high = task(2, 1);
		tl.record_created(0, &low.borrow());
		tl.record_created(0, &high.borrow());
		tl.record_priority_inherit(3, &low.borrow(), &high.borrow(), "MutexA");
		tl.record_deadline_miss(6, &high.borrow(), 5, 6);

		let rendered = tl.render(&[low, high], 4);
		assert!(rendered.contains("Task1 created (P9)"));
		assert!(rendered.contains("PRIORITY INHERITANCE"));
		assert!(rendered.contains("Priority inheritance triggered: 1 time(s)"));
		assert!(rendered.contains("Deadline misses detected: 1"));
		assert!(rendered.contains("Context switches: 4"));
	}

	#[test]
	fn empty_timeline_renders_placeholder() {
		let tl = Timeline::new();
		assert_eq!(tl.render(&[], 0), "  (no timeline data)\n");
	}
}
