//! The authoritative per-session timer: one cancellable task per running
//! question, ticking once per second and fanned out on the `state` channel.
//! A `tokio::sync::oneshot` cancellation handle lets the timer be stopped
//! mid-run (pause, skip, void, end-of-quiz).

use crate::protocol::ServerMessage;
use crate::types::{QuestionId, SessionId};
use std::sync::Arc;
use tokio::sync::oneshot;

use super::AppState;

/// Handle to a live timer task. Dropping it without calling `cancel` leaves
/// the task running; callers that replace or remove a timer must cancel the
/// old one first to avoid two timers ticking for the same session.
pub struct TimerHandle {
    cancel_tx: oneshot::Sender<()>,
    /// Wall-clock deadline (ms since epoch) this handle was started with.
    pub end_time: i64,
}

impl TimerHandle {
    pub fn cancel(self) {
        let _ = self.cancel_tx.send(());
    }
}

impl AppState {
    /// Start (or replace) the running timer for `session_id`'s current
    /// question, ticking every second until `end_time` and firing
    /// `on_expiry` as a `ScoringWorkItem`-free side effect via `advance_after_timer_expiry`.
    ///
    /// Drift correction: rather than accumulating `sleep(1s)` calls (which
    /// drift under scheduler load), each tick computes the delay to the next
    /// whole second against `end_time`, a wall-clock value, so a slow tick
    /// never pushes the displayed countdown out of sync with when the
    /// question actually closes.
    pub async fn start_timer(self: &Arc<Self>, session_id: SessionId, question_id: QuestionId, end_time: i64) {
        self.cancel_timer(&session_id).await;

        let (cancel_tx, mut cancel_rx) = oneshot::channel();
        self.timers
            .write()
            .await
            .insert(session_id.clone(), TimerHandle { cancel_tx, end_time });

        let state = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let now = crate::now_ms();
                let remaining_ms = (end_time - now).max(0);
                let remaining_secs = ((remaining_ms + 999) / 1000) as u32;

                if let Some(channels) = state.channels_for(&session_id).await {
                    channels.broadcast_to_session(ServerMessage::TimerTick {
                        question_id: question_id.clone(),
                        remaining_seconds: remaining_secs,
                        server_time: now,
                    });
                }

                // The remainingSeconds=0 tick is the final tick (§4.E: "on
                // remainingSeconds reaching 0, stop ticking and invoke the
                // onExpired callback exactly once") — publish it, then stop.
                if remaining_secs == 0 {
                    break;
                }

                // Sleep to the next whole-second boundary before end_time, so
                // a late wakeup doesn't compound into a late next tick.
                let next_boundary_ms = remaining_ms % 1000;
                let sleep_ms = if next_boundary_ms == 0 { 1000 } else { next_boundary_ms };

                tokio::select! {
                    _ = &mut cancel_rx => return,
                    _ = tokio::time::sleep(std::time::Duration::from_millis(sleep_ms as u64)) => {}
                }
            }

            state.timers.write().await.remove(&session_id);
            state.handle_timer_expiry(&session_id).await;
        });
    }

    /// Cancel the running timer for a session, if any (pause, skip, void,
    /// manual reset, or end-of-session teardown).
    pub async fn cancel_timer(&self, session_id: &str) {
        if let Some(handle) = self.timers.write().await.remove(session_id) {
            handle.cancel();
        }
    }

    pub async fn timer_remaining_secs(&self, session_id: &str) -> Option<u32> {
        let timers = self.timers.read().await;
        let handle = timers.get(session_id)?;
        let remaining_ms = handle.end_time - crate::now_ms();
        Some(((remaining_ms.max(0)) as u32 + 999) / 1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use std::sync::Arc;

    #[tokio::test]
    async fn cancel_timer_on_unknown_session_is_a_noop() {
        let state = Arc::new(AppState::new(AppConfig::default()));
        state.cancel_timer("nonexistent").await;
    }

    #[tokio::test]
    async fn timer_remaining_reflects_end_time() {
        let state = Arc::new(AppState::new(AppConfig::default()));
        state.put_quiz(super::super::tests::sample_quiz()).await;
        let session = state.create_session("quiz-1".into(), "host-1".into()).await;

        let end = crate::now_ms() + 5_000;
        state.start_timer(session.id.clone(), "q1".into(), end).await;

        let remaining = state.timer_remaining_secs(&session.id).await;
        assert!(remaining.unwrap() <= 5);

        state.cancel_timer(&session.id).await;
        assert!(state.timer_remaining_secs(&session.id).await.is_none());
    }
}
