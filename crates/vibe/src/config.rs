//! Context configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::Result;

/// Knobs for one [`Vibe`](crate::Vibe) context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VibeConfig {
    /// Prefix for generated element ids
    pub id_prefix: String,
    /// Class added to every rendered element unless the mount options override it
    pub class_name: String,
    /// The ready gate opens after this long even if loading never finishes
    pub ready_fallback_ms: u64,
    /// Fixed tick between mount target checks
    pub mount_poll_interval_ms: u64,
    /// Failed ticks before a mount gives up
    pub mount_max_attempts: u32,
    /// Frame clock rate used by delays, animations and fades
    pub frame_rate: u32,
    /// Default delay between a mutation and an observer callback
    pub observer_delay_ms: u64,
    pub fetch_timeout_ms: u64,
}

impl Default for VibeConfig {
    fn default() -> Self {
        Self {
            id_prefix: "vibe-".to_string(),
            class_name: "vibe".to_string(),
            ready_fallback_ms: 3000,
            mount_poll_interval_ms: 100,
            mount_max_attempts: 60,
            frame_rate: 60,
            observer_delay_ms: 10,
            fetch_timeout_ms: 30_000,
        }
    }
}

impl VibeConfig {
    /// Parse a JSON object; missing keys keep their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn ready_fallback(&self) -> Duration {
        Duration::from_millis(self.ready_fallback_ms)
    }

    pub fn mount_poll_interval(&self) -> Duration {
        Duration::from_millis(self.mount_poll_interval_ms.max(1))
    }

    /// Length of one frame on the frame clock
    pub fn frame_period(&self) -> Duration {
        Duration::from_secs(1) / self.frame_rate.max(1)
    }

    pub fn observer_delay(&self) -> Duration {
        Duration::from_millis(self.observer_delay_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}
