//! Persistent-store snapshot export/import: the fast store is authoritative
//! during gameplay, the persistent store is the durable replica. A
//! schema-versioned export struct carries a `validate()` cross-reference
//! pass over the session/participant/answer/quiz set.

use super::AppState;
use crate::types::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Version 1: initial snapshot format (sessions, participants, answers, quizzes).
pub const EXPORT_SCHEMA_VERSION: u32 = 1;

/// A serializable snapshot of one session's persisted state, used by the
/// `/api/sessions/:id/export` and `/api/sessions/:id/import` endpoints (§6
/// [AMBIENT] HTTP surface). Excludes runtime-only components: broadcast
/// channels, timer tasks, and the scoring-consumer mailbox, all of which are
/// recreated by `create_session`/`start_timer` rather than restored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionExport {
    pub schema_version: u32,
    pub exported_at: String,
    pub session: Session,
    pub quiz: Quiz,
    pub participants: HashMap<ParticipantId, Participant>,
    pub answers: HashMap<AnswerId, Answer>,
}

impl SessionExport {
    pub fn new(session: Session, quiz: Quiz, participants: HashMap<ParticipantId, Participant>, answers: HashMap<AnswerId, Answer>) -> Self {
        Self {
            schema_version: EXPORT_SCHEMA_VERSION,
            exported_at: chrono::Utc::now().to_rfc3339(),
            session,
            quiz,
            participants,
            answers,
        }
    }

    /// Validate an import before it is applied (§7 fail-closed on malformed
    /// cross-references).
    pub fn validate(&self) -> Result<(), String> {
        if self.schema_version > EXPORT_SCHEMA_VERSION {
            return Err(format!(
                "export schema version {} is newer than supported version {}; refusing import",
                self.schema_version, EXPORT_SCHEMA_VERSION
            ));
        }
        if self.session.quiz_id != self.quiz.id {
            return Err(format!("session references quiz '{}' but export carries quiz '{}'", self.session.quiz_id, self.quiz.id));
        }
        for (id, participant) in &self.participants {
            if participant.session_id != self.session.id {
                return Err(format!("participant '{id}' references a different session than the export"));
            }
        }
        for (id, answer) in &self.answers {
            if answer.session_id != self.session.id {
                return Err(format!("answer '{id}' references a different session than the export"));
            }
            if !self.participants.contains_key(&answer.participant_id) {
                return Err(format!("answer '{id}' references participant '{}' which is missing from the export", answer.participant_id));
            }
        }
        Ok(())
    }
}

impl AppState {
    /// Assemble a snapshot of a session and everything it references.
    pub async fn export_session(&self, session_id: &str) -> Option<SessionExport> {
        let session = self.get_session(session_id).await?;
        let quiz = self.get_quiz(&session.quiz_id).await?;
        let participants: HashMap<ParticipantId, Participant> =
            self.participants.read().await.values().filter(|p| p.session_id == session_id).map(|p| (p.id.clone(), p.clone())).collect();
        let answers: HashMap<AnswerId, Answer> =
            self.answers.read().await.values().filter(|a| a.session_id == session_id).map(|a| (a.id.clone(), a.clone())).collect();
        Some(SessionExport::new(session, quiz, participants, answers))
    }

    /// Restore a previously exported session into the fast store. Does not
    /// recreate the session's fan-out channels, timer, or scoring consumer —
    /// callers that import a still-live session id are expected to have one
    /// running already; importing a brand new id leaves those dormant until
    /// the session is driven again (there is no "resume play" operation).
    pub async fn import_session(&self, export: SessionExport) -> Result<(), String> {
        export.validate()?;
        self.put_quiz(export.quiz).await;
        self.sessions.write().await.insert(export.session.id.clone(), export.session.clone());
        self.join_codes.write().await.insert(export.session.join_code.clone(), export.session.id.clone());
        self.participants.write().await.extend(export.participants);
        self.answers.write().await.extend(export.answers);
        Ok(())
    }

    /// Write a session's snapshot to `{snapshot_dir}/{session_id}.json`,
    /// best-effort: failures are logged, not propagated.
    pub async fn write_snapshot_to_disk(&self, session_id: &str) -> std::io::Result<()> {
        let Some(export) = self.export_session(session_id).await else {
            return Ok(());
        };
        let dir = Path::new(&self.config.snapshot_dir);
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(format!("{session_id}.json"));
        let json = serde_json::to_string_pretty(&export).map_err(std::io::Error::other)?;
        tokio::fs::write(path, json).await
    }
}
