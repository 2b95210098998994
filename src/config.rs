/// Maximum number of tasks a single scheduler can manage, idle task included.
pub const MAX_TASKS: usize = 64;

/// Capacity of the ready queue.
pub const MAX_READY_TASKS: usize = 64;

/// Capacity of a mutex or semaphore wait queue.
pub const WAIT_QUEUE_CAP: usize = 16;

/// Task names are truncated to this many characters.
pub const TASK_NAME_LEN: usize = 31;
