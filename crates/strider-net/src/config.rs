//! Tunables for movement reconciliation

use serde::{Deserialize, Serialize};

/// Server and client reconciliation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetConfig {
    /// Longest time a single client move may simulate on the server
    pub max_move_delta_time: f32,
    /// Squared distance between client and server beyond which the client is corrected
    pub max_position_error_squared: f32,
    /// Minimum server time between two corrections
    pub client_error_update_rate_limit: f32,
    /// Adopt the client's position when it is within tolerance
    pub client_authoritative_position: bool,
    /// Saved moves kept for replay; the buffer is flushed when it fills up
    pub max_saved_moves: usize,
    /// Client timestamps wrap back by this much once they pass it, to keep float precision
    pub min_time_between_timestamp_resets: f32,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            max_move_delta_time: 0.125,
            max_position_error_squared: 3.0,
            client_error_update_rate_limit: 0.0,
            client_authoritative_position: false,
            max_saved_moves: 96,
            min_time_between_timestamp_resets: 240.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config: NetConfig = serde_json::from_str(r#"{"max_saved_moves": 8}"#).unwrap();
        assert_eq!(config.max_saved_moves, 8);
        assert_eq!(config.max_position_error_squared, 3.0);
        assert_eq!(config.min_time_between_timestamp_resets, 240.0);
    }
}
