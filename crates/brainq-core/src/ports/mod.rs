//! Ports - seams to systems outside the queue.
//!
//! The pipeline seam lives in `crate::pipeline`; this module holds the
//! persistence callback.

pub mod result_sink;

pub use self::result_sink::{ResultSink, SinkError};
