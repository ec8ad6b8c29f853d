//! The reconnect/recovery service: a grace-window reconnect procedure plus
//! a periodic TTL sweeper that clears stale connections once the
//! configurable grace window (`AppConfig`) elapses.

use super::AppState;
use crate::audit::AuditEvent;
use crate::error::{CoreError, CoreResult};
use crate::protocol::{CurrentStateSummary, ParticipantStatus, PublicOption, PublicQuestion, RevealAnswersSummary, RevealStatistics, ServerMessage};
use crate::types::*;
use std::sync::Arc;
use std::time::Duration;

pub struct RecoveryPayload {
    pub current_state: SessionState,
    pub current_question: Option<PublicQuestion>,
    pub remaining_time: Option<u32>,
    pub reveal: Option<RevealAnswersSummary>,
    pub total_score: i64,
    pub rank: u32,
    pub streak_count: u32,
    pub is_eliminated: bool,
    pub is_spectator: bool,
    pub leaderboard: Vec<LeaderboardEntry>,
}

impl AppState {
    /// `reconnect_session` (§4.H, steps 2-6; shape/schema validation is the
    /// connection-handler layer's job per §7's boundary-rendering policy).
    pub async fn reconnect_session(&self, session_id: &str, participant_id: &str, new_socket_id: String) -> CoreResult<RecoveryPayload> {
        let session = self.get_session(session_id).await.ok_or(CoreError::SessionNotFound)?;
        if session.state == SessionState::Ended {
            return Err(CoreError::SessionEnded);
        }
        let participant = self.get_participant(participant_id).await.ok_or(CoreError::ParticipantNotFound)?;
        if participant.session_id != session_id {
            return Err(CoreError::ParticipantNotFound);
        }
        if participant.is_banned {
            return Err(CoreError::ParticipantBanned);
        }

        let now = crate::now_ms();
        {
            let mut participants = self.participants.write().await;
            if let Some(p) = participants.get_mut(participant_id) {
                p.socket_id = Some(new_socket_id);
                p.last_connected_at = now;
            }
        }

        let payload = self.assemble_recovery_payload(&session, &participant).await?;

        if let Some(channels) = self.channels_for(session_id).await {
            channels.publish_to_controller(ServerMessage::ParticipantStatusChanged {
                participant_id: participant_id.to_string(),
                nickname: participant.nickname.clone(),
                status: ParticipantStatus::Connected,
                timestamp: now,
            });
        }

        self.audit
            .record(AuditEvent::RecoverySuccess, Some(session_id.to_string()), Some(participant_id.to_string()), None, serde_json::json!({}))
            .await;

        Ok(payload)
    }

    async fn assemble_recovery_payload(&self, session: &Session, participant: &Participant) -> CoreResult<RecoveryPayload> {
        let (current_question, remaining_time, reveal) = match session.state {
            SessionState::ActiveQuestion => {
                let quiz = self.get_quiz(&session.quiz_id).await.ok_or(CoreError::SessionNotFound)?;
                let question_id = session.current_question_id.as_deref().ok_or(CoreError::Internal("active question with no current question".into()))?;
                let question = quiz.questions.iter().find(|q| q.id == question_id).ok_or(CoreError::Internal("current question missing from quiz".into()))?;
                let options = if question.shuffle_options {
                    super::session::shuffled_options(question, &participant.id)
                } else {
                    question.options.iter().map(PublicOption::from).collect()
                };
                let public = PublicQuestion {
                    question_id: question.id.clone(),
                    question_text: question.text.clone(),
                    question_type: question.kind,
                    question_image_url: None,
                    options,
                    time_limit: question.time_limit_secs,
                    shuffle_options: question.shuffle_options,
                };
                let remaining = session
                    .timer_end_time
                    .map(|end| (((end - crate::now_ms()).max(0)) as u32 + 999) / 1000)
                    .unwrap_or(0);
                (Some(public), Some(remaining), None)
            }
            SessionState::Reveal => {
                let question_id = session.current_question_id.clone().unwrap_or_default();
                let quiz = self.get_quiz(&session.quiz_id).await;
                let correct_options = quiz
                    .as_ref()
                    .and_then(|q| q.questions.iter().find(|question| question.id == question_id))
                    .map(|q| q.options.iter().filter(|o| o.is_correct).map(|o| o.id.clone()).collect())
                    .unwrap_or_default();
                let answers = self.answers_for_question(&session.id, &question_id).await;
                let total = answers.len() as u32;
                let correct = answers.iter().filter(|a| a.is_correct).count() as u32;
                let avg = if answers.is_empty() { 0 } else { answers.iter().map(|a| a.response_time_ms).sum::<i64>() / answers.len() as i64 };
                (
                    None,
                    None,
                    Some(RevealAnswersSummary { correct_options, statistics: RevealStatistics { total_answers: total, correct_answers: correct, average_response_time: avg } }),
                )
            }
            _ => (None, None, None),
        };

        let leaderboard = self.leaderboard_snapshot(&session.id, 10).await;
        let rank = self.leaderboard_snapshot(&session.id, usize::MAX).await.into_iter().find(|e| e.participant_id == participant.id).map(|e| e.rank).unwrap_or(0);

        Ok(RecoveryPayload {
            current_state: session.state,
            current_question,
            remaining_time,
            reveal,
            total_score: participant.total_score,
            rank,
            streak_count: participant.streak_count,
            is_eliminated: participant.is_eliminated,
            is_spectator: participant.is_spectator,
            leaderboard,
        })
    }

    pub async fn recovery_failed(&self, session_id: Option<&str>, participant_id: Option<&str>, reason: &str) {
        self.audit
            .record_error(AuditEvent::RecoveryFailed, session_id.map(String::from), participant_id.map(String::from), reason)
            .await;
    }

    /// `current_state_summary` helper for the `authenticate` response (§4.C).
    pub async fn current_state_summary(&self, session_id: &str) -> Option<CurrentStateSummary> {
        let session = self.get_session(session_id).await?;
        let remaining_time = self.timer_remaining_secs(session_id).await;
        Some(CurrentStateSummary {
            state: session.state,
            current_question_index: session.current_question_index,
            participant_count: session.participant_count,
            remaining_time,
        })
    }

    /// Ambient TTL sweeper (§4.H [AMBIENT]): every 30s, mark any participant
    /// whose `lastConnectedAt` exceeds the configured grace window as
    /// permanently offline (socketId cleared). Does not touch `isActive` —
    /// expiring the TTL forfeits only the *recovery* path, not standing.
    pub fn spawn_recovery_sweeper(self: &Arc<Self>) {
        let state = Arc::clone(self);
        let grace = state.config.recovery_grace;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(30));
            loop {
                ticker.tick().await;
                state.sweep_expired_connections(grace).await;
            }
        });
    }

    async fn sweep_expired_connections(&self, grace: Duration) {
        let now = crate::now_ms();
        let grace_ms = grace.as_millis() as i64;
        let mut participants = self.participants.write().await;
        for p in participants.values_mut() {
            if p.socket_id.is_some() && now - p.last_connected_at > grace_ms {
                p.socket_id = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::state::tests::sample_quiz;

    async fn setup() -> (Arc<AppState>, Session, Participant) {
        let state = Arc::new(AppState::new(AppConfig::default()));
        state.put_quiz(sample_quiz()).await;
        let session = state.create_session("quiz-1".into(), "host-1".into()).await;
        let (session, participant) = state.join_session(&session.join_code, "alice".into(), "1.2.3.4".into()).await.unwrap();
        (state, session, participant)
    }

    #[tokio::test]
    async fn reconnect_in_lobby_reports_lobby_state() {
        let (state, session, participant) = setup().await;
        let payload = state.reconnect_session(&session.id, &participant.id, "sock-2".into()).await.unwrap();
        assert_eq!(payload.current_state, SessionState::Lobby);
        assert!(payload.current_question.is_none());
    }

    #[tokio::test]
    async fn reconnect_during_active_question_reports_remaining_time() {
        let (state, session, participant) = setup().await;
        state.start_quiz(&session.id, "host-1").await.unwrap();
        let payload = state.reconnect_session(&session.id, &participant.id, "sock-2".into()).await.unwrap();
        assert_eq!(payload.current_state, SessionState::ActiveQuestion);
        assert!(payload.current_question.is_some());
        assert!(payload.remaining_time.unwrap() <= 10);
    }

    #[tokio::test]
    async fn reconnect_unknown_participant_fails() {
        let (state, session, _participant) = setup().await;
        let err = state.reconnect_session(&session.id, "nonexistent", "sock-2".into()).await.unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::ParticipantNotFound);
    }

    #[tokio::test]
    async fn sweeper_clears_socket_id_past_grace_window() {
        let (state, session, participant) = setup().await;
        {
            let mut participants = state.participants.write().await;
            let p = participants.get_mut(&participant.id).unwrap();
            p.socket_id = Some("sock-1".into());
            p.last_connected_at = crate::now_ms() - Duration::from_secs(301).as_millis() as i64;
        }
        state.sweep_expired_connections(Duration::from_secs(300)).await;
        let updated = state.get_participant(&participant.id).await.unwrap();
        assert!(updated.socket_id.is_none());
        let session_still_active = state.get_session(&session.id).await.unwrap();
        assert_eq!(session_still_active.active_participants.len(), 1);
    }
}
