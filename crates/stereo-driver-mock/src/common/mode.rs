//! Operational modes for mock devices.
//!
//! - **Instant**: Zero delays, deterministic behavior for unit tests
//! - **Realistic**: Frame-period delays for demos and integration runs
//! - **Chaos**: Random capture timeouts and incomplete payloads

use serde::{Deserialize, Serialize};

/// Operational modes for mock devices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MockMode {
    /// Zero delays, deterministic - for unit tests
    #[default]
    Instant,
    /// Frame-period timing - for demos
    Realistic,
    /// Random failures - for resilience testing
    Chaos,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_instant() {
        assert_eq!(MockMode::default(), MockMode::Instant);
    }
}
