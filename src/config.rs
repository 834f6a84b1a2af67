//! Client configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for one chat client instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Lowest port considered when binding the datagram socket.
    pub port_min: u16,

    /// Highest port considered when binding the datagram socket (exclusive).
    pub port_max: u16,

    /// How many random ports to try before giving up with a terminal error.
    pub max_bind_attempts: u32,

    /// Interval between directory check-ins while the directory is healthy.
    #[serde(with = "duration_serde")]
    pub checkin_interval: Duration,

    /// Delay before retrying after the directory reports unavailable.
    #[serde(with = "duration_serde")]
    pub offline_retry: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            port_min: 50_000,
            port_max: 60_000,
            max_bind_attempts: 16,
            checkin_interval: Duration::from_secs(5),
            offline_retry: Duration::from_secs(10),
        }
    }
}

impl ClientConfig {
    /// Save the config to a JSON file.
    pub fn save_to_file(&self, path: &Path) -> Result<(), String> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create directory: {e}"))?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize config: {e}"))?;
        std::fs::write(path, json).map_err(|e| format!("Failed to write config file: {e}"))
    }

    /// Load config from a JSON file, or return defaults if the file is missing.
    pub fn load_or_default(path: &Path) -> Self {
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(data) => match serde_json::from_str::<ClientConfig>(&data) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("Corrupt config file, using defaults: {e}");
                    }
                },
                Err(e) => {
                    tracing::warn!("Cannot read config file, using defaults: {e}");
                }
            }
        }
        Self::default()
    }
}

// ---------------------------------------------------------------------------
// Serde helpers
// ---------------------------------------------------------------------------

mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(dur: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(dur.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
