//! Bounded worker pool
//!
//! Scrape tasks are submitted as futures and drained by a fixed number of
//! workers through a FIFO dispatcher. Results come back on one-shot channels.

pub mod pool;

pub use pool::{Job, PoolError, WorkerPool};
