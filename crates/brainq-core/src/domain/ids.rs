//! Task identifiers.
//!
//! System-generated ids are `task-<ULID>`: unique without coordination and
//! sortable by creation time. Callers may bring their own opaque id instead
//! (for example a database key), so the id is a string rather than a bare ULID.

use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

const PREFIX: &str = "task-";

/// Identifier of a submitted task. Never reused within a process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Wrap a caller-supplied id.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Generate a fresh `task-<ULID>` id.
    pub fn generate() -> Self {
        Self::from_ulid(Ulid::new())
    }

    pub fn from_ulid(ulid: Ulid) -> Self {
        Self(format!("{PREFIX}{ulid}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_prefixed_and_distinct() {
        let a = TaskId::generate();
        let b = TaskId::generate();
        assert!(a.as_str().starts_with("task-"));
        assert_ne!(a, b);
    }

    #[test]
    fn generated_ids_sort_by_creation_time() {
        let id1 = TaskId::generate();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let id2 = TaskId::generate();
        assert!(id1 < id2);
    }

    #[test]
    fn serializes_as_plain_string() {
        let id = TaskId::new("scan-42");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"scan-42\"");
    }
}
