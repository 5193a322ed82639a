//! Task classes.
//!
//! A request is classified as `Long` or `Short` from its estimated cost. The
//! same two values name the role a backend currently serves as "home".

use serde::{Deserialize, Serialize};

/// Request class, doubling as a backend role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskClass {
    /// Long analytical prompts; expensive prefill.
    Long,
    /// Short conversational turns; latency sensitive.
    Short,
}

impl TaskClass {
    /// Both classes, in dispatch priority order.
    pub const PRIORITY: [TaskClass; 2] = [TaskClass::Short, TaskClass::Long];

    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Long => "long",
            Self::Short => "short",
        }
    }
}

impl std::fmt::Display for TaskClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_and_serde_agree() {
        for class in TaskClass::PRIORITY {
            let json = serde_json::to_string(&class).unwrap();
            assert_eq!(json, format!("\"{}\"", class));
        }
    }

    #[test]
    fn test_priority_puts_short_first() {
        assert_eq!(TaskClass::PRIORITY, [TaskClass::Short, TaskClass::Long]);
    }
}
