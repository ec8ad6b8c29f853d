//! The answer-submission pipeline: an ordered validation followed by an
//! atomic duplicate/rate-limit test-and-set. Validation runs first; the
//! rate-limit marker is then checked and inserted under the same write
//! guard, which is what makes the check-then-insert atomic under
//! concurrent submissions.

use super::{AppState, ScoringWorkItem};
use crate::audit::AuditEvent;
use crate::error::{CoreError, CoreResult};
use crate::protocol::ServerMessage;
use crate::types::*;
use std::sync::Arc;

pub struct SubmitAnswerRequest {
    pub question_id: QuestionId,
    pub selected_option_ids: Vec<OptionId>,
    pub answer_text: Option<String>,
    pub answer_number: Option<f64>,
}

impl AppState {
    /// `submit_answer` (§4.F). Runs the ordered validation, and on pass
    /// records a preliminary `Answer`, unicasts `answer_accepted`, enqueues
    /// scoring, broadcasts the updated answer count to the controller, and
    /// advances early to REVEAL once every eligible participant has answered.
    pub async fn submit_answer(self: &Arc<Self>, session_id: &str, participant_id: &str, req: SubmitAnswerRequest) -> CoreResult<AnswerId> {
        // Step 1: schema.
        if req.question_id.is_empty() {
            return Err(CoreError::InvalidSchema("questionId is required".into()));
        }
        let has_payload = !req.selected_option_ids.is_empty() || req.answer_text.is_some() || req.answer_number.is_some();
        if !has_payload {
            return Err(CoreError::InvalidSchema("at least one of selectedOptions/answerText/answerNumber is required".into()));
        }

        // Step 2: session present.
        let session = self.get_session(session_id).await.ok_or(CoreError::SessionNotFound)?;

        // Step 3: state.
        if session.state != SessionState::ActiveQuestion {
            return Err(CoreError::QuestionNotActive);
        }

        // Step 4: current question match.
        if session.current_question_id.as_deref() != Some(req.question_id.as_str()) {
            return Err(CoreError::InvalidQuestion);
        }

        // Step 5: timer.
        let now = crate::now_ms();
        match session.timer_end_time {
            None => return Err(CoreError::QuestionNotActive),
            Some(end) if now > end => return Err(CoreError::TimeExpired),
            _ => {}
        }

        // Step 6: atomic duplicate/rate-limit test-and-set. Holding the
        // markers write lock across the check-and-insert is what makes this
        // linearised per (participant, question) under concurrent callers.
        let marker_key = (participant_id.to_string(), req.question_id.clone());
        {
            let mut markers = self.rate_limit_markers.write().await;
            let expiry = markers.get(&marker_key).copied();
            if expiry.is_some_and(|exp| now < exp) {
                return Err(CoreError::AlreadySubmitted);
            }
            let ttl_ms = session.timer_end_time.map(|end| end - now).unwrap_or(0).max(1000);
            markers.insert(marker_key, now + ttl_ms);
        }

        // Step 7: participant liveness. A spectator (late joiner mid-question,
        // §4.D late-joiner rule) is rejected here even though `is_active` is
        // true: spectators observe broadcasts but may not answer.
        let participant = self.get_participant(participant_id).await.ok_or(CoreError::ParticipantNotFound)?;
        if participant.is_eliminated {
            return Err(CoreError::ParticipantEliminated);
        }
        if !participant.is_active || participant.is_banned || participant.is_spectator {
            return Err(CoreError::ParticipantNotActive);
        }

        let response_time_ms = now - session.current_question_start_time.unwrap_or(now);
        let answer_id = ulid::Ulid::new().to_string();
        let answer = Answer {
            id: answer_id.clone(),
            session_id: session_id.to_string(),
            participant_id: participant_id.to_string(),
            question_id: req.question_id.clone(),
            selected_option_ids: req.selected_option_ids,
            answer_text: req.answer_text,
            answer_number: req.answer_number,
            submitted_at: now,
            response_time_ms,
            is_correct: false,
            points_awarded: 0,
            speed_bonus_applied: 0,
            streak_bonus_applied: 0,
            partial_credit_applied: 0.0,
            negative_deduction_applied: 0,
        };
        self.answers.write().await.insert(answer_id.clone(), answer);

        if let Some(channels) = self.channels_for(session_id).await {
            channels
                .publish_to_participant(
                    &participant_id.to_string(),
                    ServerMessage::AnswerAccepted {
                        question_id: req.question_id.clone(),
                        answer_id: answer_id.clone(),
                        response_time_ms,
                        server_timestamp: now,
                    },
                )
                .await;
        }

        self.enqueue_scoring(session_id, ScoringWorkItem::Score { answer_id: answer_id.clone() }).await;
        let answered_count = self.bump_and_broadcast_answer_count(&session, &req.question_id).await;

        // Third REVEAL trigger alongside timer expiry and skip: once every
        // eligible participant has answered, no point waiting out the clock.
        let eligible = self.eligible_participant_count(session_id).await;
        if eligible > 0 && answered_count >= eligible {
            if let Err(err) = self.advance_to_reveal(session_id).await {
                tracing::warn!(session_id, error = %err, "all-answered advance failed");
            }
        }

        self.audit
            .record(
                AuditEvent::AnswerAccepted,
                Some(session_id.to_string()),
                Some(participant_id.to_string()),
                None,
                serde_json::json!({"questionId": req.question_id, "answerId": answer_id}),
            )
            .await;

        Ok(answer_id)
    }

    async fn bump_and_broadcast_answer_count(&self, session: &Session, question_id: &str) -> u32 {
        let key = (session.id.clone(), question_id.to_string());
        let count = {
            let mut counts = self.answer_counts.write().await;
            let entry = counts.entry(key).or_insert(0);
            *entry += 1;
            *entry
        };
        let total = session.participant_count.max(1);
        let percentage = (count as f64 / total as f64) * 100.0;

        if let Some(channels) = self.channels_for(&session.id).await {
            channels.publish_to_controller(ServerMessage::AnswerCountUpdated {
                question_id: question_id.to_string(),
                answered_count: count,
                total_participants: session.participant_count,
                percentage,
            });
        }
        count
    }

    /// Participants who are still in play and thus expected to answer
    /// (active, not a late-joiner spectator, not eliminated).
    async fn eligible_participant_count(&self, session_id: &str) -> u32 {
        self.participants
            .read()
            .await
            .values()
            .filter(|p| p.session_id == session_id && p.is_active && !p.is_spectator && !p.is_eliminated)
            .count() as u32
    }
}
