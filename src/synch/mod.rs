//! Synchronization primitives

pub mod mutex;
pub mod semaphore;
