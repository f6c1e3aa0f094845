//! Session timing configuration.
//!
//! Every threshold the registry and the maintenance jobs use lives here.
//! The config is plain data: reloading it is a matter of handing a new
//! value to [`SessionRegistry::set_config`](crate::SessionRegistry::set_config)
//! and rescheduling the periodic jobs with the new intervals.
//!
//! All fields are optional in JSON, so a config file only needs to name
//! what it changes:
//!
//! ```
//! use tether_session::SessionConfig;
//!
//! let config = SessionConfig::from_json(r#"{"link_dead_interval_secs": 90}"#).unwrap();
//! assert_eq!(config.link_dead_interval_secs, 90);
//! assert_eq!(config.link_dead_prune_secs, 300);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::SessionError;

/// Timing thresholds for link health, presence, and delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How often link health is checked. Default: 5 s.
    pub refresh_link_interval_secs: u64,
    /// How often presence is recomputed and broadcast. Default: 30 s.
    pub broadcast_interval_secs: u64,
    /// How long a session may stay link-dead before it is pruned.
    /// Default: 300 s.
    pub link_dead_prune_secs: u64,
    /// How long a session may go without a pending request before it is
    /// declared link-dead. Default: 60 s.
    pub link_dead_interval_secs: u64,
    /// How long a request may stay pending before a `keep_alive` is sent
    /// to recycle it. Keep this below the idle timeout of any proxy in
    /// front of the server. Default: 45 s.
    pub link_idle_refresh_secs: u64,
    /// How often queued output is flushed to pending requests.
    /// Default: 100 ms.
    pub pulse_interval_ms: u64,
    /// Per-subscriber buffer of the session event bus. Default: 256.
    pub event_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            refresh_link_interval_secs: 5,
            broadcast_interval_secs: 30,
            link_dead_prune_secs: 300,
            link_dead_interval_secs: 60,
            link_idle_refresh_secs: 45,
            pulse_interval_ms: 100,
            event_capacity: 256,
        }
    }
}

impl SessionConfig {
    /// Parses a JSON config document. Missing fields take their defaults.
    ///
    /// The result is not validated; call [`validated`](Self::validated).
    ///
    /// # Errors
    /// [`SessionError::InvalidConfig`] if the document is not valid JSON
    /// or a field has the wrong type.
    pub fn from_json(text: &str) -> Result<Self, SessionError> {
        serde_json::from_str(text).map_err(SessionError::InvalidConfig)
    }

    /// Clamp and fix any out-of-range values so the config is safe to use.
    ///
    /// Rules:
    /// - Zero intervals become 1 (a zero period would spin).
    /// - `event_capacity` is at least 1.
    pub fn validated(mut self) -> Self {
        clamp_min("refresh_link_interval_secs", &mut self.refresh_link_interval_secs, 1);
        clamp_min("broadcast_interval_secs", &mut self.broadcast_interval_secs, 1);
        clamp_min("link_dead_prune_secs", &mut self.link_dead_prune_secs, 1);
        clamp_min("link_dead_interval_secs", &mut self.link_dead_interval_secs, 1);
        clamp_min("link_idle_refresh_secs", &mut self.link_idle_refresh_secs, 1);
        clamp_min("pulse_interval_ms", &mut self.pulse_interval_ms, 1);
        if self.event_capacity == 0 {
            warn!(field = "event_capacity", min = 1, "config value below minimum, clamping");
            self.event_capacity = 1;
        }
        self
    }

    pub fn refresh_link_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_link_interval_secs)
    }

    pub fn broadcast_interval(&self) -> Duration {
        Duration::from_secs(self.broadcast_interval_secs)
    }

    pub fn link_dead_prune(&self) -> Duration {
        Duration::from_secs(self.link_dead_prune_secs)
    }

    pub fn link_dead_interval(&self) -> Duration {
        Duration::from_secs(self.link_dead_interval_secs)
    }

    pub fn link_idle_refresh(&self) -> Duration {
        Duration::from_secs(self.link_idle_refresh_secs)
    }

    pub fn pulse_interval(&self) -> Duration {
        Duration::from_millis(self.pulse_interval_ms)
    }
}

fn clamp_min(field: &'static str, value: &mut u64, min: u64) {
    if *value < min {
        warn!(field, value = *value, min, "config value below minimum, clamping");
        *value = min;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = SessionConfig::default();
        assert_eq!(config.refresh_link_interval(), Duration::from_secs(5));
        assert_eq!(config.broadcast_interval(), Duration::from_secs(30));
        assert_eq!(config.link_dead_prune(), Duration::from_secs(300));
        assert_eq!(config.link_dead_interval(), Duration::from_secs(60));
        assert_eq!(config.link_idle_refresh(), Duration::from_secs(45));
        assert_eq!(config.pulse_interval(), Duration::from_millis(100));
        assert_eq!(config.event_capacity, 256);
    }

    #[test]
    fn test_from_json_empty_object_is_default() {
        assert_eq!(SessionConfig::from_json("{}").unwrap(), SessionConfig::default());
    }

    #[test]
    fn test_from_json_partial_overrides() {
        let config =
            SessionConfig::from_json(r#"{"broadcast_interval_secs": 10, "pulse_interval_ms": 50}"#)
                .unwrap();
        assert_eq!(config.broadcast_interval_secs, 10);
        assert_eq!(config.pulse_interval_ms, 50);
        assert_eq!(config.link_dead_interval_secs, 60);
    }

    #[test]
    fn test_from_json_wrong_type_is_invalid_config() {
        let err = SessionConfig::from_json(r#"{"link_dead_prune_secs": "soon"}"#).unwrap_err();
        assert!(matches!(err, SessionError::InvalidConfig(_)));
    }

    #[test]
    fn test_from_json_garbage_is_invalid_config() {
        assert!(matches!(
            SessionConfig::from_json("not json"),
            Err(SessionError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_validated_clamps_zero_intervals() {
        let config = SessionConfig {
            refresh_link_interval_secs: 0,
            pulse_interval_ms: 0,
            event_capacity: 0,
            ..Default::default()
        }
        .validated();
        assert_eq!(config.refresh_link_interval_secs, 1);
        assert_eq!(config.pulse_interval_ms, 1);
        assert_eq!(config.event_capacity, 1);
    }

    #[test]
    fn test_validated_leaves_valid_config_alone() {
        let config = SessionConfig::default();
        assert_eq!(config.clone().validated(), config);
    }
}
