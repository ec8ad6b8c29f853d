//! Append-only audit log (§3 `AuditLog`, §9 "dynamic duck-typed payload bag").
//!
//! Audit-log writes never raise; loss is acceptable (§7). The log is kept
//! in-process here and mirrored to the persistent store's snapshot on the
//! same cadence as everything else (§9 "mixed fast/persistent consistency").

use crate::types::{AuditLogEntry, ParticipantId, QuizId, SessionId};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditEvent {
    SessionStarted,
    QuestionStarted,
    QuestionVoided,
    QuestionSkipped,
    AnswerAccepted,
    AnswerRejected,
    ParticipantJoined,
    ParticipantEliminated,
    ParticipantKicked,
    ParticipantBanned,
    FocusLost,
    FocusRegained,
    RecoverySuccess,
    RecoveryFailed,
    SessionEnded,
}

impl AuditEvent {
    fn as_str(&self) -> &'static str {
        match self {
            AuditEvent::SessionStarted => "SESSION_STARTED",
            AuditEvent::QuestionStarted => "QUESTION_STARTED",
            AuditEvent::QuestionVoided => "QUESTION_VOIDED",
            AuditEvent::QuestionSkipped => "QUESTION_SKIPPED",
            AuditEvent::AnswerAccepted => "ANSWER_ACCEPTED",
            AuditEvent::AnswerRejected => "ANSWER_REJECTED",
            AuditEvent::ParticipantJoined => "PARTICIPANT_JOINED",
            AuditEvent::ParticipantEliminated => "PARTICIPANT_ELIMINATED",
            AuditEvent::ParticipantKicked => "PARTICIPANT_KICKED",
            AuditEvent::ParticipantBanned => "PARTICIPANT_BANNED",
            AuditEvent::FocusLost => "FOCUS_LOST",
            AuditEvent::FocusRegained => "FOCUS_REGAINED",
            AuditEvent::RecoverySuccess => "RECOVERY_SUCCESS",
            AuditEvent::RecoveryFailed => "RECOVERY_FAILED",
            AuditEvent::SessionEnded => "SESSION_ENDED",
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct AuditLog {
    entries: Arc<RwLock<Vec<AuditLogEntry>>>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(
        &self,
        event: AuditEvent,
        session_id: Option<SessionId>,
        participant_id: Option<ParticipantId>,
        quiz_id: Option<QuizId>,
        details: serde_json::Value,
    ) {
        let entry = AuditLogEntry {
            timestamp: crate::now_ms(),
            event_type: event.as_str().to_string(),
            session_id,
            participant_id,
            quiz_id,
            user_id: None,
            details,
            error: None,
        };
        self.entries.write().await.push(entry);
    }

    pub async fn record_error(
        &self,
        event: AuditEvent,
        session_id: Option<SessionId>,
        participant_id: Option<ParticipantId>,
        error: impl Into<String>,
    ) {
        let entry = AuditLogEntry {
            timestamp: crate::now_ms(),
            event_type: event.as_str().to_string(),
            session_id,
            participant_id,
            quiz_id: None,
            user_id: None,
            details: json!({}),
            error: Some(error.into()),
        };
        self.entries.write().await.push(entry);
    }

    pub async fn snapshot(&self) -> Vec<AuditLogEntry> {
        self.entries.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_accumulate_in_order() {
        let log = AuditLog::new();
        log.record(
            AuditEvent::SessionStarted,
            Some("s1".into()),
            None,
            None,
            json!({"totalQuestions": 3}),
        )
        .await;
        log.record_error(AuditEvent::RecoveryFailed, Some("s1".into()), None, "not found")
            .await;

        let entries = log.snapshot().await;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].event_type, "SESSION_STARTED");
        assert_eq!(entries[1].event_type, "RECOVERY_FAILED");
        assert_eq!(entries[1].error.as_deref(), Some("not found"));
    }
}
