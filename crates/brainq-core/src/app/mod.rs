//! App - wires the queue, the task store and the worker pool together.
//!
//! # Components
//! - **QueueManagerBuilder**: startup validation and wiring
//! - **QueueManager**: submit / status / snapshot / shutdown
//! - **WorkerPool**: fixed set of workers running the dequeue -> invoke -> record loop

pub mod builder;
pub mod manager;
mod worker_pool;

pub use self::builder::{BuildError, QueueManagerBuilder};
pub use self::manager::QueueManager;
