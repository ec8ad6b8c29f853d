//! Controller-role handshake and the ack/error wrapper shared by every
//! host-only command.

use std::sync::Arc;

use crate::error::{CoreError, CoreResult};
use crate::protocol::ServerMessage;
use crate::state::AppState;
use crate::types::{Role, SessionId};

use super::handlers::ConnContext;

/// `Authenticate(Controller{sessionId, hostCredential})` (§6 "Controller:
/// presents {sessionId, hostCredential}"). The credential IS the session's
/// `hostId`, assigned out-of-band when the session was created.
pub async fn handle_authenticate(session_id: SessionId, host_credential: String, ctx: &mut ConnContext, state: &Arc<AppState>) -> Option<ServerMessage> {
    let Some(session) = state.get_session(&session_id).await else {
        return Some(ServerMessage::AuthError { error: CoreError::SessionNotFound.code() });
    };
    if session.host_id != host_credential {
        return Some(ServerMessage::AuthError { error: CoreError::InvalidRequest(String::new()).code() });
    }

    ctx.role = Some(Role::Controller);
    ctx.session_id = Some(session_id.clone());
    ctx.host_id = Some(host_credential);

    let current_state = state.current_state_summary(&session_id).await?;
    Some(ServerMessage::Authenticated { success: true, session_id, participant_id: None, nickname: None, current_state })
}

/// Collapse any host-op result into its wire-level ack/error pair.
pub fn ack_or_error(op: &str, result: CoreResult<()>) -> Option<ServerMessage> {
    match result {
        Ok(()) => Some(ServerMessage::Ack { op: op.to_string() }),
        Err(err) => Some(ServerMessage::Error { event: op.to_string(), error: err.code() }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::state::tests::sample_quiz;

    #[tokio::test]
    async fn authenticate_sets_role_and_host_id_on_match() {
        let state = Arc::new(AppState::new(AppConfig::default()));
        state.put_quiz(sample_quiz()).await;
        let session = state.create_session("quiz-1".into(), "host-1".into()).await;

        let mut ctx = ConnContext::default();
        let response = handle_authenticate(session.id.clone(), "host-1".into(), &mut ctx, &state).await;
        assert!(matches!(response, Some(ServerMessage::Authenticated { success: true, .. })));
        assert_eq!(ctx.role, Some(Role::Controller));
        assert_eq!(ctx.host_id.as_deref(), Some("host-1"));
    }

    #[tokio::test]
    async fn authenticate_rejects_unknown_session() {
        let state = Arc::new(AppState::new(AppConfig::default()));
        let mut ctx = ConnContext::default();
        let response = handle_authenticate("nonexistent".into(), "host-1".into(), &mut ctx, &state).await;
        assert!(matches!(response, Some(ServerMessage::AuthError { .. })));
    }

    #[test]
    fn ack_or_error_maps_ok_to_ack() {
        let response = ack_or_error("start_quiz", Ok(()));
        assert!(matches!(response, Some(ServerMessage::Ack { op }) if op == "start_quiz"));
    }

    #[test]
    fn ack_or_error_maps_err_to_error_event() {
        let response = ack_or_error("start_quiz", Err(CoreError::InvalidState));
        assert!(matches!(response, Some(ServerMessage::Error { error: crate::error::ErrorCode::InvalidState, .. })));
    }
}
