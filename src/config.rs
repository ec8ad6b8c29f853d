//! Environment-driven configuration, loaded once at startup.

use std::time::Duration;

/// Top-level process configuration, assembled from env vars (with `.env`
/// loaded first via `dotenvy`).
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    /// Reconnect grace window (§4.H): how long a dropped participant's hot
    /// record survives before recovery is refused.
    pub recovery_grace: Duration,
    /// Cadence of the `system_metrics` broadcaster (§6).
    pub metrics_interval: Duration,
    /// Where session snapshots are written by the persistent-store mirror.
    pub snapshot_dir: String,
    pub snapshot_interval: Duration,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        let recovery_grace_secs: u64 = std::env::var("RECOVERY_GRACE_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(300);

        let metrics_interval_secs: u64 = std::env::var("METRICS_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(5);

        let snapshot_dir =
            std::env::var("SNAPSHOT_DIR").unwrap_or_else(|_| "./data/sessions".to_string());

        let snapshot_interval_secs: u64 = std::env::var("SNAPSHOT_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(10);

        let config = Self {
            bind_addr,
            recovery_grace: Duration::from_secs(recovery_grace_secs),
            metrics_interval: Duration::from_secs(metrics_interval_secs),
            snapshot_dir,
            snapshot_interval: Duration::from_secs(snapshot_interval_secs),
        };

        tracing::info!(
            bind_addr = %config.bind_addr,
            recovery_grace_secs,
            metrics_interval_secs,
            snapshot_interval_secs,
            "loaded configuration"
        );

        config
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            recovery_grace: Duration::from_secs(300),
            metrics_interval: Duration::from_secs(5),
            snapshot_dir: "./data/sessions".to_string(),
            snapshot_interval: Duration::from_secs(10),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_documented_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.recovery_grace, Duration::from_secs(300));
        assert_eq!(config.metrics_interval, Duration::from_secs(5));
    }
}
