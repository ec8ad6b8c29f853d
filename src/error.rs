//! The error taxonomy (§7). One [`CoreError`] variant per wire error kind;
//! the connection-handler layer is the only place that renders a variant into
//! a client-visible `answer_rejected` / `recovery_failed` / `error` message —
//! library code here never formats a user string itself.

use serde::{Deserialize, Serialize};

pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum CoreError {
    #[error("malformed request payload: {0}")]
    InvalidSchema(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("session not found")]
    SessionNotFound,
    #[error("session has ended")]
    SessionEnded,
    #[error("operation not valid in the session's current state")]
    InvalidState,
    #[error("no question is currently active")]
    QuestionNotActive,
    #[error("submission does not match the current question")]
    InvalidQuestion,
    #[error("the question's timer has already expired")]
    TimeExpired,
    #[error("an answer for this participant and question was already recorded")]
    AlreadySubmitted,
    #[error("participant not found")]
    ParticipantNotFound,
    #[error("participant is not active in this session")]
    ParticipantNotActive,
    #[error("participant has been eliminated")]
    ParticipantEliminated,
    #[error("participant is banned from this session")]
    ParticipantBanned,
    #[error("internal error: {0}")]
    Internal(String),
}

/// The wire-visible string values from §7 — the only values that ever appear
/// in a client-facing `reason` field.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidSchema,
    InvalidRequest,
    SessionNotFound,
    SessionEnded,
    InvalidState,
    QuestionNotActive,
    InvalidQuestion,
    TimeExpired,
    AlreadySubmitted,
    ParticipantNotFound,
    ParticipantNotActive,
    ParticipantEliminated,
    ParticipantBanned,
    InternalError,
}

impl From<&CoreError> for ErrorCode {
    fn from(err: &CoreError) -> Self {
        match err {
            CoreError::InvalidSchema(_) => ErrorCode::InvalidSchema,
            CoreError::InvalidRequest(_) => ErrorCode::InvalidRequest,
            CoreError::SessionNotFound => ErrorCode::SessionNotFound,
            CoreError::SessionEnded => ErrorCode::SessionEnded,
            CoreError::InvalidState => ErrorCode::InvalidState,
            CoreError::QuestionNotActive => ErrorCode::QuestionNotActive,
            CoreError::InvalidQuestion => ErrorCode::InvalidQuestion,
            CoreError::TimeExpired => ErrorCode::TimeExpired,
            CoreError::AlreadySubmitted => ErrorCode::AlreadySubmitted,
            CoreError::ParticipantNotFound => ErrorCode::ParticipantNotFound,
            CoreError::ParticipantNotActive => ErrorCode::ParticipantNotActive,
            CoreError::ParticipantEliminated => ErrorCode::ParticipantEliminated,
            CoreError::ParticipantBanned => ErrorCode::ParticipantBanned,
            CoreError::Internal(_) => ErrorCode::InternalError,
        }
    }
}

impl CoreError {
    pub fn code(&self) -> ErrorCode {
        ErrorCode::from(self)
    }

    /// Store errors encountered mid-validation collapse to `SessionNotFound`
    /// per §7's fail-closed policy.
    pub fn store_failure(context: &str) -> Self {
        tracing::warn!(context, "store operation failed during validation; failing closed");
        CoreError::SessionNotFound
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_variant_maps_to_its_documented_wire_code() {
        let cases: &[(CoreError, ErrorCode)] = &[
            (CoreError::InvalidSchema("x".into()), ErrorCode::InvalidSchema),
            (CoreError::InvalidRequest("x".into()), ErrorCode::InvalidRequest),
            (CoreError::SessionNotFound, ErrorCode::SessionNotFound),
            (CoreError::SessionEnded, ErrorCode::SessionEnded),
            (CoreError::InvalidState, ErrorCode::InvalidState),
            (CoreError::QuestionNotActive, ErrorCode::QuestionNotActive),
            (CoreError::InvalidQuestion, ErrorCode::InvalidQuestion),
            (CoreError::TimeExpired, ErrorCode::TimeExpired),
            (CoreError::AlreadySubmitted, ErrorCode::AlreadySubmitted),
            (CoreError::ParticipantNotFound, ErrorCode::ParticipantNotFound),
            (CoreError::ParticipantNotActive, ErrorCode::ParticipantNotActive),
            (CoreError::ParticipantEliminated, ErrorCode::ParticipantEliminated),
            (CoreError::ParticipantBanned, ErrorCode::ParticipantBanned),
            (CoreError::Internal("x".into()), ErrorCode::InternalError),
        ];
        for (err, expected) in cases {
            assert_eq!(err.code(), *expected);
        }
    }

    #[test]
    fn store_failure_collapses_to_session_not_found() {
        assert_eq!(CoreError::store_failure("test").code(), ErrorCode::SessionNotFound);
    }
}
