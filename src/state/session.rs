//! The session state machine: LOBBY → ACTIVE_QUESTION → REVEAL → … → ENDED,
//! and the host control operations that drive it. A static adjacency
//! function (`valid_transitions`) is the single source of truth for which
//! transitions each operation may perform; operations that merely require
//! the session to currently sit in one particular state (not transition out
//! of it) check that state directly instead.

use super::AppState;
use crate::audit::AuditEvent;
use crate::error::{CoreError, CoreResult};
use crate::protocol::{PublicOption, PublicQuestion, RevealStatistics, ServerMessage};
use crate::types::*;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Deterministic per-participant shuffle seed (§4.D begin-question routine,
/// §9 resolved Open Question): the same (participant, question) pair always
/// produces the same order, so a reconnecting participant sees their
/// question exactly as they left it.
fn shuffle_seed(participant_id: &str, question_id: &str) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    participant_id.hash(&mut hasher);
    question_id.hash(&mut hasher);
    hasher.finish()
}

pub(crate) fn shuffled_options(question: &Question, participant_id: &str) -> Vec<PublicOption> {
    let mut rng = rand::rngs::StdRng::seed_from_u64(shuffle_seed(participant_id, &question.id));
    let mut options: Vec<PublicOption> = question.options.iter().map(PublicOption::from).collect();
    options.shuffle(&mut rng);
    options
}

impl AppState {
    fn valid_transitions(from: SessionState) -> &'static [SessionState] {
        use SessionState::*;
        match from {
            Lobby => &[ActiveQuestion, Ended],
            ActiveQuestion => &[Reveal, ActiveQuestion, Ended],
            Reveal => &[ActiveQuestion, Ended],
            Ended => &[],
        }
    }

    async fn require_host(&self, session: &Session, host_id: &str) -> CoreResult<()> {
        if session.host_id != host_id {
            return Err(CoreError::InvalidRequest("caller is not this session's controller".into()));
        }
        Ok(())
    }

    /// `start_quiz` (§4.D table).
    pub async fn start_quiz(self: &Arc<Self>, session_id: &str, host_id: &str) -> CoreResult<Session> {
        let session = self.get_session(session_id).await.ok_or(CoreError::SessionNotFound)?;
        self.require_host(&session, host_id).await?;
        // Lobby is the unique entry point; ACTIVE_QUESTION -> ACTIVE_QUESTION
        // is a valid transition too but only for `next_question`'s
        // exam-mode skip-reveal case, not for (re)starting a quiz.
        if session.state != SessionState::Lobby {
            return Err(CoreError::InvalidState);
        }
        let quiz = self.get_quiz(&session.quiz_id).await.ok_or(CoreError::SessionNotFound)?;
        if quiz.questions.is_empty() {
            return Err(CoreError::InvalidRequest("quiz has no questions".into()));
        }

        let now = crate::now_ms();
        let updated = self
            .mutate_session(session_id, |s| {
                s.state = SessionState::ActiveQuestion;
                s.current_question_index = 0;
                s.updated_at = now;
            })
            .await
            .ok_or(CoreError::SessionNotFound)?;

        if let Some(channels) = self.channels_for(session_id).await {
            channels.broadcast_to_session(ServerMessage::QuizStarted {
                session_id: session_id.to_string(),
                total_questions: quiz.questions.len() as u32,
                timestamp: now,
            });
        }

        self.begin_question(&updated, &quiz, 0).await?;
        self.audit
            .record(AuditEvent::SessionStarted, Some(session_id.to_string()), None, Some(quiz.id), serde_json::json!({}))
            .await;

        self.get_session(session_id).await.ok_or(CoreError::SessionNotFound)
    }

    /// Begin-question routine (§4.D). Clears per-question caches, writes the
    /// fast-store session update, assembles the public question payload
    /// (never leaking `isCorrect`), and starts the timer.
    async fn begin_question(&self, session: &Session, quiz: &Quiz, index: usize) -> CoreResult<()> {
        let question = quiz.question_at(index).ok_or(CoreError::Internal("question index out of range".into()))?;
        let now = crate::now_ms();
        let end_time = now + (question.time_limit_secs as i64) * 1000;

        self.answer_counts.write().await.remove(&(session.id.clone(), question.id.clone()));

        self.mutate_session(&session.id, |s| {
            s.current_question_id = Some(question.id.clone());
            s.current_question_index = index;
            s.current_question_start_time = Some(now);
            s.timer_end_time = Some(end_time);
            s.updated_at = now;
        })
        .await;

        // Clear spectator status for participants who were late joiners during
        // the previous question (§4.D "Late joiner spectator rule").
        self.clear_spectator_status_for_session(&session.id).await;

        let public = PublicQuestion {
            question_id: question.id.clone(),
            question_text: question.text.clone(),
            question_type: question.kind,
            question_image_url: None,
            options: question.options.iter().map(PublicOption::from).collect(),
            time_limit: question.time_limit_secs,
            shuffle_options: question.shuffle_options,
        };

        if let Some(channels) = self.channels_for(&session.id).await {
            let message = ServerMessage::QuestionStarted { question_index: index, question: public.clone(), start_time: now, end_time };
            if question.shuffle_options {
                // Canonical order to controller/bigscreen; a per-participant
                // shuffled order unicast to each active, non-eliminated player.
                channels.publish_to_controller(message.clone());
                channels.publish_to_bigscreen(message);
                for participant_id in &session.active_participants {
                    let shuffled = ServerMessage::QuestionStarted {
                        question_index: index,
                        question: PublicQuestion { options: shuffled_options(question, participant_id), ..public.clone() },
                        start_time: now,
                        end_time,
                    };
                    channels.publish_to_participant(participant_id, shuffled).await;
                }
            } else {
                channels.broadcast_to_session(message);
            }
        }

        self.start_timer(session.id.clone(), question.id.clone(), end_time).await;
        Ok(())
    }

    /// Fired by the timer subsystem when a question's countdown reaches 0.
    pub async fn handle_timer_expiry(self: &Arc<Self>, session_id: &str) {
        if let Err(err) = self.advance_to_reveal(session_id).await {
            tracing::warn!(session_id, error = %err, "timer expiry advance failed");
        }
    }

    /// Advance ACTIVE_QUESTION → REVEAL. A no-op if the session has already
    /// left ACTIVE_QUESTION (timer expiry, a skip, and "every active
    /// participant has answered" can all race to call this).
    pub(crate) async fn advance_to_reveal(self: &Arc<Self>, session_id: &str) -> CoreResult<()> {
        let session = self.get_session(session_id).await.ok_or(CoreError::SessionNotFound)?;
        if session.state != SessionState::ActiveQuestion {
            return Ok(());
        }
        self.cancel_timer(session_id).await;

        let now = crate::now_ms();
        self.mutate_session(session_id, |s| {
            s.state = SessionState::Reveal;
            s.updated_at = now;
        })
        .await;

        self.emit_reveal(&session).await?;
        self.run_elimination_if_due(session_id).await;
        Ok(())
    }

    async fn emit_reveal(&self, session: &Session) -> CoreResult<()> {
        let quiz = self.get_quiz(&session.quiz_id).await.ok_or(CoreError::SessionNotFound)?;
        let question_id = session.current_question_id.clone().ok_or(CoreError::Internal("reveal with no current question".into()))?;
        let question = quiz
            .questions
            .iter()
            .find(|q| q.id == question_id)
            .ok_or(CoreError::Internal("current question missing from quiz".into()))?;

        let answers = self.answers_for_question(&session.id, &question_id).await;
        let correct_options: Vec<OptionId> = question.options.iter().filter(|o| o.is_correct).map(|o| o.id.clone()).collect();
        let total = answers.len() as u32;
        let correct = answers.iter().filter(|a| a.is_correct).count() as u32;
        let avg = if answers.is_empty() {
            0
        } else {
            answers.iter().map(|a| a.response_time_ms).sum::<i64>() / answers.len() as i64
        };

        if let Some(channels) = self.channels_for(&session.id).await {
            channels.broadcast_to_session(ServerMessage::RevealAnswers {
                question_id,
                correct_options,
                explanation_text: question.explanation.clone(),
                statistics: RevealStatistics { total_answers: total, correct_answers: correct, average_response_time: avg },
            });
        }
        Ok(())
    }

    /// `next_question` (§4.D table).
    pub async fn next_question(self: &Arc<Self>, session_id: &str, host_id: &str) -> CoreResult<()> {
        let session = self.get_session(session_id).await.ok_or(CoreError::SessionNotFound)?;
        self.require_host(&session, host_id).await?;

        let quiz = self.get_quiz(&session.quiz_id).await.ok_or(CoreError::SessionNotFound)?;
        let exam_skip = quiz.exam_settings.as_ref().map(|e| e.skip_reveal_phase || e.auto_advance).unwrap_or(false);

        // ACTIVE_QUESTION -> ACTIVE_QUESTION is in the adjacency table but
        // only actually permitted when exam mode allows skipping reveal.
        let allowed = Self::valid_transitions(session.state).contains(&SessionState::ActiveQuestion)
            && (session.state != SessionState::ActiveQuestion || exam_skip);
        if !allowed {
            return Err(CoreError::InvalidState);
        }

        self.cancel_timer(session_id).await;
        let next_index = session.current_question_index + 1;

        if next_index >= quiz.questions.len() {
            self.finish_quiz(session_id).await?;
            return Ok(());
        }

        let updated = self.get_session(session_id).await.ok_or(CoreError::SessionNotFound)?;
        self.begin_question(&updated, &quiz, next_index).await
    }

    /// `skip_question` (§4.D table).
    pub async fn skip_question(self: &Arc<Self>, session_id: &str, host_id: &str, reason: String) -> CoreResult<()> {
        let session = self.get_session(session_id).await.ok_or(CoreError::SessionNotFound)?;
        self.require_host(&session, host_id).await?;
        if !Self::valid_transitions(session.state).contains(&SessionState::Reveal) {
            return Err(CoreError::InvalidState);
        }
        let question_id = session.current_question_id.clone().ok_or(CoreError::Internal("no current question".into()))?;
        self.cancel_timer(session_id).await;

        let quiz = self.get_quiz(&session.quiz_id).await.ok_or(CoreError::SessionNotFound)?;
        let exam_skip = quiz.exam_settings.as_ref().map(|e| e.skip_reveal_phase).unwrap_or(false);

        if let Some(channels) = self.channels_for(session_id).await {
            channels.broadcast_to_session(ServerMessage::QuestionSkipped {
                question_id,
                question_index: session.current_question_index,
                reason,
                timestamp: crate::now_ms(),
                exam_mode_skip_reveal: exam_skip,
            });
        }

        if exam_skip {
            let next_index = session.current_question_index + 1;
            if next_index >= quiz.questions.len() {
                self.finish_quiz(session_id).await?;
            } else {
                self.begin_question(&session, &quiz, next_index).await?;
            }
        } else {
            self.advance_to_reveal(session_id).await?;
        }
        self.audit.record(AuditEvent::QuestionSkipped, Some(session_id.to_string()), None, None, serde_json::json!({})).await;
        Ok(())
    }

    /// `void_question` (§4.D table).
    pub async fn void_question(&self, session_id: &str, host_id: &str, question_id: &str, reason: String) -> CoreResult<()> {
        let session = self.get_session(session_id).await.ok_or(CoreError::SessionNotFound)?;
        self.require_host(&session, host_id).await?;
        if session.voided_questions.contains(question_id) {
            return Err(CoreError::InvalidRequest("question already voided".into()));
        }

        self.mutate_session(session_id, |s| {
            s.voided_questions.insert(question_id.to_string());
        })
        .await;

        let answers = self.answers_for_question(session_id, question_id).await;
        for answer in &answers {
            self.reverse_answer_points(&answer.participant_id, answer.points_awarded).await;
        }
        self.republish_leaderboard(session_id).await;

        if let Some(channels) = self.channels_for(session_id).await {
            channels.broadcast_to_session(ServerMessage::QuestionVoided {
                question_id: question_id.to_string(),
                reason,
                timestamp: crate::now_ms(),
            });
        }

        let session = self.get_session(session_id).await.ok_or(CoreError::SessionNotFound)?;
        if session.current_question_id.as_deref() == Some(question_id) && session.state == SessionState::ActiveQuestion {
            self.advance_to_reveal(session_id).await?;
        }
        self.audit.record(AuditEvent::QuestionVoided, Some(session_id.to_string()), None, None, serde_json::json!({"questionId": question_id})).await;
        Ok(())
    }

    /// `pause_timer` (§4.D table).
    pub async fn pause_timer(&self, session_id: &str, host_id: &str) -> CoreResult<()> {
        let session = self.get_session(session_id).await.ok_or(CoreError::SessionNotFound)?;
        self.require_host(&session, host_id).await?;
        if session.state != SessionState::ActiveQuestion {
            return Err(CoreError::InvalidState);
        }
        let remaining = self.timer_remaining_secs(session_id).await.ok_or(CoreError::InvalidState)?;
        self.cancel_timer(session_id).await;

        let question_id = session.current_question_id.clone().unwrap_or_default();
        if let Some(channels) = self.channels_for(session_id).await {
            channels.broadcast_to_session(ServerMessage::TimerPaused { question_id, remaining_seconds: remaining });
        }
        Ok(())
    }

    /// `resume_timer` (§4.D table). Paused state is modeled as "timer absent
    /// while ACTIVE_QUESTION with timerEndTime still set from before pause" —
    /// callers must have the remaining seconds from the paired `pause_timer`
    /// broadcast since the core does not separately track "paused vs stopped".
    pub async fn resume_timer(self: &Arc<Self>, session_id: &str, host_id: &str, remaining_secs: u32) -> CoreResult<()> {
        let session = self.get_session(session_id).await.ok_or(CoreError::SessionNotFound)?;
        self.require_host(&session, host_id).await?;
        if session.state != SessionState::ActiveQuestion {
            return Err(CoreError::InvalidState);
        }
        let question_id = session.current_question_id.clone().ok_or(CoreError::InvalidState)?;
        let end_time = crate::now_ms() + (remaining_secs as i64) * 1000;
        self.mutate_session(session_id, |s| s.timer_end_time = Some(end_time)).await;
        self.start_timer(session_id.to_string(), question_id.clone(), end_time).await;

        if let Some(channels) = self.channels_for(session_id).await {
            channels.broadcast_to_session(ServerMessage::TimerResumed { question_id, remaining_seconds: remaining_secs });
        }
        Ok(())
    }

    /// `reset_timer` (§4.D table).
    pub async fn reset_timer(self: &Arc<Self>, session_id: &str, host_id: &str, new_time_limit: u32) -> CoreResult<()> {
        if !(5..=120).contains(&new_time_limit) {
            return Err(CoreError::InvalidRequest("time limit must be between 5 and 120 seconds".into()));
        }
        let session = self.get_session(session_id).await.ok_or(CoreError::SessionNotFound)?;
        self.require_host(&session, host_id).await?;
        if session.state != SessionState::ActiveQuestion {
            return Err(CoreError::InvalidState);
        }
        let question_id = session.current_question_id.clone().ok_or(CoreError::InvalidState)?;
        let end_time = crate::now_ms() + (new_time_limit as i64) * 1000;
        self.mutate_session(session_id, |s| s.timer_end_time = Some(end_time)).await;
        self.start_timer(session_id.to_string(), question_id.clone(), end_time).await;

        if let Some(channels) = self.channels_for(session_id).await {
            channels.broadcast_to_session(ServerMessage::TimerReset { question_id, remaining_seconds: new_time_limit });
        }
        Ok(())
    }

    /// `end_quiz` (§4.D table).
    pub async fn end_quiz(self: &Arc<Self>, session_id: &str, host_id: &str) -> CoreResult<()> {
        let session = self.get_session(session_id).await.ok_or(CoreError::SessionNotFound)?;
        self.require_host(&session, host_id).await?;
        if !Self::valid_transitions(session.state).contains(&SessionState::Ended) {
            return Err(CoreError::InvalidState);
        }
        self.finish_quiz(session_id).await
    }

    async fn finish_quiz(self: &Arc<Self>, session_id: &str) -> CoreResult<()> {
        self.cancel_timer(session_id).await;
        let now = crate::now_ms();
        self.mutate_session(session_id, |s| {
            s.state = SessionState::Ended;
            s.updated_at = now;
        })
        .await;

        let leaderboard = self.leaderboard_snapshot(session_id, usize::MAX).await;
        if let Some(channels) = self.channels_for(session_id).await {
            channels.broadcast_to_session(ServerMessage::QuizEnded {
                session_id: session_id.to_string(),
                final_leaderboard: leaderboard,
                timestamp: now,
            });
        }

        self.stop_scoring_consumer(session_id).await;
        self.stop_metrics_broadcaster(session_id).await;
        self.audit.record(AuditEvent::SessionEnded, Some(session_id.to_string()), None, None, serde_json::json!({})).await;
        Ok(())
    }

    /// `toggle_late_joiners` (§4.D table).
    pub async fn toggle_late_joiners(&self, session_id: &str, host_id: &str, allow: bool) -> CoreResult<()> {
        let session = self.get_session(session_id).await.ok_or(CoreError::SessionNotFound)?;
        self.require_host(&session, host_id).await?;
        self.mutate_session(session_id, |s| s.allow_late_joiners = allow).await;

        if let Some(channels) = self.channels_for(session_id).await {
            channels.publish_to_bigscreen(ServerMessage::LateJoinersUpdated { allow_late_joiners: allow });
        }
        Ok(())
    }

    /// Apply a mutation to a session in-place and return the updated copy, or
    /// `None` if the session no longer exists.
    pub(crate) async fn mutate_session(&self, session_id: &str, f: impl FnOnce(&mut Session)) -> Option<Session> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(session_id)?;
        f(session);
        Some(session.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::state::tests::sample_quiz;

    async fn setup() -> (Arc<AppState>, Session) {
        let state = Arc::new(AppState::new(AppConfig::default()));
        state.put_quiz(sample_quiz()).await;
        let session = state.create_session("quiz-1".into(), "host-1".into()).await;
        (state, session)
    }

    #[tokio::test]
    async fn start_quiz_moves_lobby_to_active_question() {
        let (state, session) = setup().await;
        let updated = state.start_quiz(&session.id, "host-1").await.unwrap();
        assert_eq!(updated.state, SessionState::ActiveQuestion);
        assert_eq!(updated.current_question_id.as_deref(), Some("q1"));
    }

    #[tokio::test]
    async fn start_quiz_rejects_wrong_host() {
        let (state, session) = setup().await;
        let err = state.start_quiz(&session.id, "someone-else").await.unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::InvalidRequest);
    }

    #[tokio::test]
    async fn start_quiz_twice_is_invalid_state() {
        let (state, session) = setup().await;
        state.start_quiz(&session.id, "host-1").await.unwrap();
        let err = state.start_quiz(&session.id, "host-1").await.unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::InvalidState);
    }

    #[tokio::test]
    async fn skip_question_moves_active_question_to_reveal() {
        let (state, session) = setup().await;
        state.start_quiz(&session.id, "host-1").await.unwrap();
        state.skip_question(&session.id, "host-1", "moving on".into()).await.unwrap();
        let updated = state.get_session(&session.id).await.unwrap();
        assert_eq!(updated.state, SessionState::Reveal);
    }

    #[tokio::test]
    async fn next_question_past_last_question_ends_the_quiz() {
        let (state, session) = setup().await;
        state.start_quiz(&session.id, "host-1").await.unwrap();
        state.skip_question(&session.id, "host-1", "r".into()).await.unwrap();
        state.next_question(&session.id, "host-1").await.unwrap();
        let updated = state.get_session(&session.id).await.unwrap();
        assert_eq!(updated.state, SessionState::Ended);
    }

    #[tokio::test]
    async fn end_quiz_from_lobby_is_allowed() {
        let (state, session) = setup().await;
        state.end_quiz(&session.id, "host-1").await.unwrap();
        let updated = state.get_session(&session.id).await.unwrap();
        assert_eq!(updated.state, SessionState::Ended);
    }

    #[tokio::test]
    async fn end_quiz_stops_the_metrics_broadcaster() {
        let (state, session) = setup().await;
        assert!(state.metrics_tasks.read().await.contains_key(&session.id));
        state.end_quiz(&session.id, "host-1").await.unwrap();
        assert!(!state.metrics_tasks.read().await.contains_key(&session.id));
    }

    #[tokio::test]
    async fn shuffle_seed_is_deterministic_per_participant_and_question() {
        let a1 = super::shuffled_options(&sample_quiz().questions[0], "alice");
        let a2 = super::shuffled_options(&sample_quiz().questions[0], "alice");
        assert_eq!(a1.iter().map(|o| o.option_id.clone()).collect::<Vec<_>>(), a2.iter().map(|o| o.option_id.clone()).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn shuffled_question_still_unicasts_to_each_active_participant() {
        let (state, _unused_session) = setup().await;
        state.put_quiz({
            let mut quiz = sample_quiz();
            quiz.questions[0].shuffle_options = true;
            quiz
        })
        .await;
        let session = state.create_session("quiz-1".into(), "host-1".into()).await;
        let (_, participant) = state.join_session(&session.join_code, "alice".into(), "1.2.3.4".into()).await.unwrap();
        let channels = state.channels_for(&session.id).await.unwrap();
        let mut rx = channels.register_participant(participant.id.clone()).await;

        state.start_quiz(&session.id, "host-1").await.unwrap();

        let msg = rx.recv().await.unwrap();
        assert!(matches!(msg, ServerMessage::QuestionStarted { .. }));
    }

    #[tokio::test]
    async fn end_quiz_twice_fails() {
        let (state, session) = setup().await;
        state.end_quiz(&session.id, "host-1").await.unwrap();
        let err = state.end_quiz(&session.id, "host-1").await.unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::InvalidState);
    }
}
