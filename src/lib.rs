//! A deterministic, tick-driven real-time scheduler simulator.
//!
//! The crate models a single virtual CPU with fixed-priority preemptive
//! dispatch, Rate Monotonic analysis and a mutex implementing the Priority
//! Inheritance Protocol, including transitive inheritance chains. No OS
//! threads are involved: fixtures drive virtual time by calling
//! [`Scheduler::tick`] and [`Scheduler::schedule`], and every state change is
//! published to a [`timeline::Timeline`] that renders an ASCII Gantt chart.
//!
//! Priorities are numeric with inverted polarity: lower values denote
//! stronger claims, and 255 is reserved for the idle task.

#[macro_use]
extern crate log;

pub mod config;
pub mod logging;
pub mod scenarios;
pub mod scheduler;
pub mod synch;
mod time;
pub mod timeline;

pub use crate::scheduler::task::{
	HIGHEST_PRIO, IDLE_PRIO, Priority, PriorityQueue, Task, TaskId, TaskRef, TaskState,
};
pub use crate::scheduler::{RmsAnalysis, RmsVerdict, SchedPolicy, Scheduler, SpawnError};
pub use crate::synch::mutex::{Mutex, priority_inherit, priority_restore};
pub use crate::synch::semaphore::Semaphore;
