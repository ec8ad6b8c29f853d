//! Participant-role handshake, answer submission, and focus-monitoring
//! events: one function per client-originated operation.

use std::sync::Arc;

use crate::error::CoreError;
use crate::protocol::ServerMessage;
use crate::state::submission::SubmitAnswerRequest;
use crate::state::AppState;
use crate::types::{OptionId, QuestionId, Role};

use super::handlers::ConnContext;

/// `Authenticate(Participant{token})` (§6). This core has no separate
/// identity service signing tokens, so the token presented here IS the
/// participant's id, minted by `join_session`.
pub async fn handle_authenticate(token: String, ctx: &mut ConnContext, state: &Arc<AppState>) -> Option<ServerMessage> {
    let Some(participant) = state.get_participant(&token).await else {
        return Some(ServerMessage::AuthError { error: CoreError::ParticipantNotFound.code() });
    };
    if participant.is_banned {
        return Some(ServerMessage::AuthError { error: CoreError::ParticipantBanned.code() });
    }
    let Some(current_state) = state.current_state_summary(&participant.session_id).await else {
        return Some(ServerMessage::AuthError { error: CoreError::SessionNotFound.code() });
    };

    ctx.role = Some(Role::Participant);
    ctx.session_id = Some(participant.session_id.clone());
    ctx.participant_id = Some(participant.id.clone());

    Some(ServerMessage::Authenticated {
        success: true,
        session_id: participant.session_id,
        participant_id: Some(participant.id),
        nickname: Some(participant.nickname),
        current_state,
    })
}

/// `reconnect_session` (§4.H). Usable as an alternative first frame in place
/// of `Authenticate`, since a reconnecting participant already knows both ids.
pub async fn handle_reconnect(session_id: crate::types::SessionId, participant_id: crate::types::ParticipantId, ctx: &mut ConnContext, state: &Arc<AppState>) -> Option<ServerMessage> {
    match state.reconnect_session(&session_id, &participant_id, ctx.connection_id.clone()).await {
        Ok(payload) => {
            ctx.role = Some(Role::Participant);
            ctx.session_id = Some(session_id);
            ctx.participant_id = Some(participant_id);
            Some(ServerMessage::SessionRecovered {
                current_state: payload.current_state,
                current_question: payload.current_question,
                remaining_time: payload.remaining_time,
                reveal: payload.reveal,
                total_score: payload.total_score,
                rank: payload.rank,
                streak_count: payload.streak_count,
                is_eliminated: payload.is_eliminated,
                is_spectator: payload.is_spectator,
                leaderboard: payload.leaderboard,
            })
        }
        Err(err) => {
            state.recovery_failed(Some(&session_id), Some(&participant_id), &err.to_string()).await;
            Some(ServerMessage::RecoveryFailed { reason: err.code() })
        }
    }
}

/// `submit_answer` (§4.F). On success the fast-store layer has already
/// unicast `answer_accepted`, so this returns `None`; on rejection the
/// originator gets `answer_rejected` directly as the dispatch response.
pub async fn handle_submit_answer(
    session_id: &str,
    participant_id: &str,
    question_id: QuestionId,
    selected_options: Vec<OptionId>,
    answer_text: Option<String>,
    answer_number: Option<f64>,
    state: &Arc<AppState>,
) -> Option<ServerMessage> {
    let req = SubmitAnswerRequest { question_id: question_id.clone(), selected_option_ids: selected_options, answer_text, answer_number };
    match state.submit_answer(session_id, participant_id, req).await {
        Ok(_) => None,
        Err(err) => Some(ServerMessage::AnswerRejected { question_id: Some(question_id), reason: err.code(), message: err.to_string() }),
    }
}

pub async fn handle_focus_lost(session_id: &str, participant_id: &str, timestamp: i64, state: &Arc<AppState>) {
    state
        .record_focus_event(session_id, participant_id, crate::audit::AuditEvent::FocusLost, serde_json::json!({"timestamp": timestamp}))
        .await;
}

pub async fn handle_focus_regained(session_id: &str, participant_id: &str, timestamp: i64, duration_ms: i64, state: &Arc<AppState>) {
    state
        .record_focus_event(
            session_id,
            participant_id,
            crate::audit::AuditEvent::FocusRegained,
            serde_json::json!({"timestamp": timestamp, "durationMs": duration_ms}),
        )
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::state::tests::sample_quiz;

    async fn setup() -> (Arc<AppState>, crate::types::Session, crate::types::Participant) {
        let state = Arc::new(AppState::new(AppConfig::default()));
        state.put_quiz(sample_quiz()).await;
        let session = state.create_session("quiz-1".into(), "host-1".into()).await;
        let (session, participant) = state.join_session(&session.join_code, "alice".into(), "1.2.3.4".into()).await.unwrap();
        (state, session, participant)
    }

    #[tokio::test]
    async fn authenticate_with_valid_token_sets_participant_context() {
        let (state, _session, participant) = setup().await;
        let mut ctx = ConnContext::default();
        let response = handle_authenticate(participant.id.clone(), &mut ctx, &state).await;
        assert!(matches!(response, Some(ServerMessage::Authenticated { success: true, .. })));
        assert_eq!(ctx.participant_id, Some(participant.id));
    }

    #[tokio::test]
    async fn authenticate_with_unknown_token_fails() {
        let state = Arc::new(AppState::new(AppConfig::default()));
        let mut ctx = ConnContext::default();
        let response = handle_authenticate("nonexistent".into(), &mut ctx, &state).await;
        assert!(matches!(response, Some(ServerMessage::AuthError { .. })));
    }

    #[tokio::test]
    async fn submit_answer_on_inactive_question_is_rejected() {
        let (state, session, participant) = setup().await;
        let response = handle_submit_answer(&session.id, &participant.id, "q1".into(), vec!["o2".into()], None, None, &state).await;
        assert!(matches!(response, Some(ServerMessage::AnswerRejected { reason: crate::error::ErrorCode::QuestionNotActive, .. })));
    }

    #[tokio::test]
    async fn submit_answer_success_returns_none() {
        let (state, session, participant) = setup().await;
        state.start_quiz(&session.id, "host-1").await.unwrap();
        let response = handle_submit_answer(&session.id, &participant.id, "q1".into(), vec!["o2".into()], None, None, &state).await;
        assert!(response.is_none());
    }

    #[tokio::test]
    async fn reconnect_sets_context_and_returns_session_recovered() {
        let (state, session, participant) = setup().await;
        let mut ctx = ConnContext { connection_id: "sock-2".into(), ..ConnContext::default() };
        let response = handle_reconnect(session.id.clone(), participant.id.clone(), &mut ctx, &state).await;
        assert!(matches!(response, Some(ServerMessage::SessionRecovered { .. })));
        assert_eq!(ctx.participant_id, Some(participant.id));
    }
}
