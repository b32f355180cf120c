//! Priority tiers for dequeue ordering.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Dequeue priority. `High` sorts lowest and is dequeued first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    High = 0,
    #[default]
    Normal = 1,
    Low = 2,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::High => "HIGH",
            Priority::Normal => "NORMAL",
            Priority::Low => "LOW",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown priority {0:?}, expected HIGH, NORMAL or LOW")]
pub struct ParsePriorityError(String);

impl FromStr for Priority {
    type Err = ParsePriorityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "HIGH" => Ok(Priority::High),
            "NORMAL" => Ok(Priority::Normal),
            "LOW" => Ok(Priority::Low),
            _ => Err(ParsePriorityError(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn high_orders_before_low() {
        assert!(Priority::High < Priority::Normal);
        assert!(Priority::Normal < Priority::Low);
    }

    #[rstest]
    #[case::upper("HIGH", Priority::High)]
    #[case::lower("normal", Priority::Normal)]
    #[case::mixed("Low", Priority::Low)]
    fn parses_case_insensitively(#[case] input: &str, #[case] expected: Priority) {
        assert_eq!(input.parse::<Priority>().unwrap(), expected);
    }

    #[test]
    fn rejects_unknown_tier() {
        assert!("urgent".parse::<Priority>().is_err());
    }

    #[test]
    fn serializes_as_required_names() {
        assert_eq!(serde_json::to_string(&Priority::High).unwrap(), "\"HIGH\"");
        let back: Priority = serde_json::from_str("\"LOW\"").unwrap();
        assert_eq!(back, Priority::Low);
    }
}
