//! Queue module: task state machine, records, retry policy, the priority
//! work queue and the task store.

mod priority;
mod record;
mod retry;
mod state;
mod store;

pub use priority::{PriorityQueue, QueueEntry};
pub use record::TaskRecord;
pub use retry::RetryPolicy;
pub use state::{Stage, TaskStatus};
pub use store::TaskStore;
