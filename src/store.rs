//! Store boundary traits (§2 "Persistent store"/"Fast store", §9 [AMBIENT]
//! "In-process store implementations"). `AppState` is the only
//! implementation this crate ships — everything in `state/` talks to it
//! directly rather than through these traits — but the seam is defined here
//! so a Redis-backed `FastStore` or a Mongo-backed `PersistentStore` could be
//! swapped in later without touching the session state machine, timer,
//! submission pipeline, scoring, or recovery service.

use crate::error::CoreResult;
use crate::state::AppState;
use crate::types::{Answer, Participant, Quiz, QuizId, Session};
use async_trait::async_trait;

/// Hot session state, per-participant hot state, and answer lookups (§2.B).
/// Single-key reads are atomic; multi-key invariants (duplicate-submission
/// test-and-set, answer-buffer append) are the fast store's job in a real
/// backend and are implemented directly on `AppState` in this crate.
#[async_trait]
pub trait FastStore: Send + Sync {
    async fn get_session(&self, session_id: &str) -> Option<Session>;
    async fn get_participant(&self, participant_id: &str) -> Option<Participant>;
    async fn get_answer(&self, answer_id: &str) -> Option<Answer>;
}

/// Durable record of quizzes, sessions, participants, answers, and the audit
/// log (§2.A, §3 "Lifecycle/ownership"). This crate's implementation is a
/// schema-versioned JSON snapshot per session (`state::export`) rather than
/// an external database.
#[async_trait]
pub trait PersistentStore: Send + Sync {
    /// Mirror a session's current fast-store state to durable storage.
    async fn persist_session(&self, session_id: &str) -> CoreResult<()>;
    async fn load_quiz(&self, quiz_id: &QuizId) -> Option<Quiz>;
}

#[async_trait]
impl FastStore for AppState {
    async fn get_session(&self, session_id: &str) -> Option<Session> {
        AppState::get_session(self, session_id).await
    }

    async fn get_participant(&self, participant_id: &str) -> Option<Participant> {
        AppState::get_participant(self, participant_id).await
    }

    async fn get_answer(&self, answer_id: &str) -> Option<Answer> {
        AppState::get_answer(self, answer_id).await
    }
}

#[async_trait]
impl PersistentStore for AppState {
    async fn persist_session(&self, session_id: &str) -> CoreResult<()> {
        self.write_snapshot_to_disk(session_id)
            .await
            .map_err(|err| crate::error::CoreError::Internal(format!("snapshot write failed: {err}")))
    }

    async fn load_quiz(&self, quiz_id: &QuizId) -> Option<Quiz> {
        AppState::get_quiz(self, quiz_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::state::tests::sample_quiz;
    use std::sync::Arc;

    #[tokio::test]
    async fn app_state_satisfies_both_store_traits() {
        let state = Arc::new(AppState::new(AppConfig::default()));
        state.put_quiz(sample_quiz()).await;
        let session = state.create_session("quiz-1".into(), "host-1".into()).await;

        let fast: &dyn FastStore = state.as_ref();
        assert!(fast.get_session(&session.id).await.is_some());

        let persistent: &dyn PersistentStore = state.as_ref();
        assert!(persistent.load_quiz("quiz-1").await.is_some());

        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.snapshot_dir = dir.path().to_string_lossy().to_string();
        let state2 = Arc::new(AppState::new(config));
        state2.put_quiz(sample_quiz()).await;
        let session2 = state2.create_session("quiz-1".into(), "host-1".into()).await;
        let persistent2: &dyn PersistentStore = state2.as_ref();
        persistent2.persist_session(&session2.id).await.unwrap();
        assert!(dir.path().join(format!("{}.json", session2.id)).exists());
    }
}
