//! Impls - ResultSink implementations.

pub mod logging_sink;
pub mod memory_sink;

pub use self::logging_sink::LoggingResultSink;
pub use self::memory_sink::MemoryResultSink;
