use std::fmt;

use serde::{Deserialize, Serialize};

/// Counts published to the diagnostics observer after each refresh.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSnapshot {
    pub pending: usize,
    pub delivered: usize,
    /// Delivered alerts whose span contains "now"; never exceeds `delivered`.
    pub current: usize,
}

impl fmt::Display for DiagnosticsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pending: {}, delivered: {}, current: {}",
            self.pending, self.delivered, self.current
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_lists_all_three_counts() {
        let snapshot = DiagnosticsSnapshot {
            pending: 1,
            delivered: 7,
            current: 2,
        };
        assert_eq!(snapshot.to_string(), "pending: 1, delivered: 7, current: 2");
    }
}
