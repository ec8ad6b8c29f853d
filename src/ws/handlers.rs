//! WebSocket message dispatch: a single `handle_message` entry point that
//! checks role authorization before handing off to role-specific modules.

use std::sync::Arc;

use crate::error::CoreError;
use crate::protocol::{AuthenticatePayload, ClientMessage, ServerMessage};
use crate::state::AppState;
use crate::types::{ParticipantId, Role, SessionId};

use super::{controller, participant};

/// Per-connection identity, built up as `Authenticate`/`JoinSession`/
/// `ReconnectSession` succeed. `None` fields mean "not yet authenticated".
#[derive(Debug, Default, Clone)]
pub struct ConnContext {
    pub role: Option<Role>,
    pub session_id: Option<SessionId>,
    pub participant_id: Option<ParticipantId>,
    /// The session's `hostId`, captured once at `Authenticate(Controller)`
    /// time so later ops don't have to re-present the credential.
    pub host_id: Option<String>,
    /// Client IP, used only by `join_session`'s ban check.
    pub ip: String,
    /// Opaque per-connection id, minted by the socket handler; stored as the
    /// participant's `socketId` on join/reconnect.
    pub connection_id: String,
}

/// Authorization guard: only a controller may invoke the wrapped op.
macro_rules! check_controller {
    ($ctx:expr, $op:expr) => {
        if $ctx.role != Some(Role::Controller) {
            return Some(ServerMessage::Error { event: $op.to_string(), error: crate::error::ErrorCode::InvalidRequest });
        }
    };
}

/// Authorization guard: the connection must have completed a handshake.
macro_rules! require_session {
    ($ctx:expr, $op:expr) => {
        match $ctx.session_id.clone() {
            Some(sid) => sid,
            None => return Some(ServerMessage::Error { event: $op.to_string(), error: crate::error::ErrorCode::InvalidRequest }),
        }
    };
}

/// Dispatch one client frame. Mutates `ctx` in place on a successful
/// handshake (`Authenticate`, `JoinSession`, `ReconnectSession`).
pub async fn handle_message(msg: ClientMessage, ctx: &mut ConnContext, state: &Arc<AppState>) -> Option<ServerMessage> {
    match msg {
        ClientMessage::Authenticate(payload) => handle_authenticate(payload, ctx, state).await,
        ClientMessage::JoinSession { join_code, nickname } => handle_join_session(join_code, nickname, ctx, state).await,
        ClientMessage::ReconnectSession { session_id, participant_id, last_known_question_id: _ } => {
            participant::handle_reconnect(session_id, participant_id, ctx, state).await
        }

        ClientMessage::SubmitAnswer { question_id, selected_options, answer_text, answer_number, client_timestamp: _ } => {
            let session_id = require_session!(ctx, "submit_answer");
            let Some(participant_id) = ctx.participant_id.clone() else {
                return Some(ServerMessage::Error { event: "submit_answer".into(), error: crate::error::ErrorCode::InvalidRequest });
            };
            participant::handle_submit_answer(&session_id, &participant_id, question_id, selected_options, answer_text, answer_number, state).await
        }
        ClientMessage::FocusLost { timestamp } => {
            let session_id = require_session!(ctx, "focus_lost");
            if let Some(participant_id) = ctx.participant_id.clone() {
                participant::handle_focus_lost(&session_id, &participant_id, timestamp, state).await;
            }
            None
        }
        ClientMessage::FocusRegained { timestamp, duration_ms } => {
            let session_id = require_session!(ctx, "focus_regained");
            if let Some(participant_id) = ctx.participant_id.clone() {
                participant::handle_focus_regained(&session_id, &participant_id, timestamp, duration_ms, state).await;
            }
            None
        }

        ClientMessage::StartQuiz => {
            check_controller!(ctx, "start_quiz");
            let session_id = require_session!(ctx, "start_quiz");
            controller::ack_or_error("start_quiz", state.start_quiz(&session_id, &host_id(ctx)).await.map(|_| ()))
        }
        ClientMessage::NextQuestion => {
            check_controller!(ctx, "next_question");
            let session_id = require_session!(ctx, "next_question");
            controller::ack_or_error("next_question", state.next_question(&session_id, &host_id(ctx)).await)
        }
        ClientMessage::EndQuiz => {
            check_controller!(ctx, "end_quiz");
            let session_id = require_session!(ctx, "end_quiz");
            controller::ack_or_error("end_quiz", state.end_quiz(&session_id, &host_id(ctx)).await)
        }
        ClientMessage::SkipQuestion => {
            check_controller!(ctx, "skip_question");
            let session_id = require_session!(ctx, "skip_question");
            controller::ack_or_error("skip_question", state.skip_question(&session_id, &host_id(ctx), "host skipped".into()).await)
        }
        ClientMessage::VoidQuestion { question_id, reason } => {
            check_controller!(ctx, "void_question");
            let session_id = require_session!(ctx, "void_question");
            controller::ack_or_error("void_question", state.void_question(&session_id, &host_id(ctx), &question_id, reason).await)
        }
        ClientMessage::PauseTimer => {
            check_controller!(ctx, "pause_timer");
            let session_id = require_session!(ctx, "pause_timer");
            controller::ack_or_error("pause_timer", state.pause_timer(&session_id, &host_id(ctx)).await)
        }
        ClientMessage::ResumeTimer { remaining_seconds } => {
            check_controller!(ctx, "resume_timer");
            let session_id = require_session!(ctx, "resume_timer");
            controller::ack_or_error("resume_timer", state.resume_timer(&session_id, &host_id(ctx), remaining_seconds).await)
        }
        ClientMessage::ResetTimer { new_time_limit } => {
            check_controller!(ctx, "reset_timer");
            let session_id = require_session!(ctx, "reset_timer");
            controller::ack_or_error("reset_timer", state.reset_timer(&session_id, &host_id(ctx), new_time_limit).await)
        }
        ClientMessage::KickParticipant { participant_id, reason } => {
            check_controller!(ctx, "kick_participant");
            let session_id = require_session!(ctx, "kick_participant");
            controller::ack_or_error("kick_participant", state.kick_participant(&session_id, &host_id(ctx), &participant_id, reason).await)
        }
        ClientMessage::BanParticipant { participant_id, reason } => {
            check_controller!(ctx, "ban_participant");
            let session_id = require_session!(ctx, "ban_participant");
            controller::ack_or_error("ban_participant", state.ban_participant(&session_id, &host_id(ctx), &participant_id, reason).await)
        }
        ClientMessage::ToggleLateJoiners { allow_late_joiners } => {
            check_controller!(ctx, "toggle_late_joiners");
            let session_id = require_session!(ctx, "toggle_late_joiners");
            controller::ack_or_error("toggle_late_joiners", state.toggle_late_joiners(&session_id, &host_id(ctx), allow_late_joiners).await)
        }
    }
}

fn host_id(ctx: &ConnContext) -> String {
    ctx.host_id.clone().unwrap_or_default()
}

async fn handle_authenticate(payload: AuthenticatePayload, ctx: &mut ConnContext, state: &Arc<AppState>) -> Option<ServerMessage> {
    match payload {
        AuthenticatePayload::Participant { token } => participant::handle_authenticate(token, ctx, state).await,
        AuthenticatePayload::Controller { session_id, host_credential } => controller::handle_authenticate(session_id, host_credential, ctx, state).await,
        AuthenticatePayload::BigScreen { session_id } => handle_authenticate_bigscreen(session_id, ctx, state).await,
    }
}

async fn handle_authenticate_bigscreen(session_id: SessionId, ctx: &mut ConnContext, state: &Arc<AppState>) -> Option<ServerMessage> {
    let Some(current_state) = state.current_state_summary(&session_id).await else {
        return Some(ServerMessage::AuthError { error: CoreError::SessionNotFound.code() });
    };
    ctx.role = Some(Role::BigScreen);
    ctx.session_id = Some(session_id.clone());
    Some(ServerMessage::Authenticated { success: true, session_id, participant_id: None, nickname: None, current_state })
}

async fn handle_join_session(join_code: crate::types::JoinCode, nickname: String, ctx: &mut ConnContext, state: &Arc<AppState>) -> Option<ServerMessage> {
    match state.join_session(&join_code, nickname.clone(), ctx.ip.clone()).await {
        Ok((session, participant)) => {
            ctx.role = Some(Role::Participant);
            ctx.session_id = Some(session.id.clone());
            ctx.participant_id = Some(participant.id.clone());
            let current_state = state.current_state_summary(&session.id).await.unwrap_or(crate::protocol::CurrentStateSummary {
                state: session.state,
                current_question_index: session.current_question_index,
                participant_count: session.participant_count,
                remaining_time: None,
            });
            Some(ServerMessage::Authenticated {
                success: true,
                session_id: session.id,
                participant_id: Some(participant.id),
                nickname: Some(nickname),
                current_state,
            })
        }
        Err(err) => Some(ServerMessage::AuthError { error: err.code() }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::state::tests::sample_quiz;

    async fn setup() -> (Arc<AppState>, crate::types::Session) {
        let state = Arc::new(AppState::new(AppConfig::default()));
        state.put_quiz(sample_quiz()).await;
        let session = state.create_session("quiz-1".into(), "host-1".into()).await;
        (state, session)
    }

    #[tokio::test]
    async fn join_session_authenticates_in_one_frame() {
        let (state, session) = setup().await;
        let mut ctx = ConnContext::default();
        let response = handle_message(ClientMessage::JoinSession { join_code: session.join_code.clone(), nickname: "alice".into() }, &mut ctx, &state).await;
        assert!(matches!(response, Some(ServerMessage::Authenticated { success: true, .. })));
        assert_eq!(ctx.role, Some(Role::Participant));
        assert!(ctx.participant_id.is_some());
    }

    #[tokio::test]
    async fn controller_authenticate_rejects_wrong_credential() {
        let (state, session) = setup().await;
        let mut ctx = ConnContext::default();
        let response = handle_message(
            ClientMessage::Authenticate(AuthenticatePayload::Controller { session_id: session.id.clone(), host_credential: "wrong".into() }),
            &mut ctx,
            &state,
        )
        .await;
        assert!(matches!(response, Some(ServerMessage::AuthError { .. })));
        assert_eq!(ctx.role, None);
    }

    #[tokio::test]
    async fn start_quiz_requires_controller_role() {
        let (state, session) = setup().await;
        let mut ctx = ConnContext { role: Some(Role::Participant), session_id: Some(session.id.clone()), participant_id: Some("p1".into()), ..ConnContext::default() };
        let response = handle_message(ClientMessage::StartQuiz, &mut ctx, &state).await;
        assert!(matches!(response, Some(ServerMessage::Error { error: crate::error::ErrorCode::InvalidRequest, .. })));
    }

    #[tokio::test]
    async fn controller_start_quiz_succeeds_after_authenticate() {
        let (state, session) = setup().await;
        let mut ctx = ConnContext::default();
        handle_message(
            ClientMessage::Authenticate(AuthenticatePayload::Controller { session_id: session.id.clone(), host_credential: "host-1".into() }),
            &mut ctx,
            &state,
        )
        .await;
        let response = handle_message(ClientMessage::StartQuiz, &mut ctx, &state).await;
        assert!(matches!(response, Some(ServerMessage::Ack { .. })));
        let updated = state.get_session(&session.id).await.unwrap();
        assert_eq!(updated.state, crate::types::SessionState::ActiveQuestion);
    }

    #[tokio::test]
    async fn submit_answer_without_authentication_errors() {
        let (state, _session) = setup().await;
        let mut ctx = ConnContext::default();
        let response = handle_message(
            ClientMessage::SubmitAnswer { question_id: "q1".into(), selected_options: vec!["o2".into()], answer_text: None, answer_number: None, client_timestamp: 0 },
            &mut ctx,
            &state,
        )
        .await;
        assert!(matches!(response, Some(ServerMessage::Error { .. })));
    }
}
