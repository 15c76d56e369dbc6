use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Canonical operation id type used throughout the crate.
pub type OperationId = String;

/// Scheduling priority of an operation.
///
/// Priority is only a tie-break between operations that are *already* ready;
/// it never lets an operation overtake one of its own dependencies.
///
/// Variants are declared low to high so that the derived `Ord` sorts `High`
/// as the greatest value.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        };
        f.write_str(s)
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "high" => Ok(Priority::High),
            "medium" => Ok(Priority::Medium),
            "low" => Ok(Priority::Low),
            other => Err(format!(
                "invalid priority: {other} (expected \"high\", \"medium\" or \"low\")"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn high_sorts_above_low() {
        let mut v = vec![Priority::Low, Priority::High, Priority::Medium];
        v.sort();
        assert_eq!(v, vec![Priority::Low, Priority::Medium, Priority::High]);
    }

    #[test]
    fn parses_case_insensitively() {
        assert_eq!(" HIGH ".parse::<Priority>(), Ok(Priority::High));
        assert!("urgent".parse::<Priority>().is_err());
    }
}
