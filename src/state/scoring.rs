//! Scoring & leaderboard maintenance: per-answer correctness scoring feeds
//! a per-round aggregate that accumulates into each participant's running
//! total.

use super::AppState;
use crate::error::{CoreError, CoreResult};
use crate::protocol::ServerMessage;
use crate::types::*;
use std::collections::HashSet;

/// Fraction of `basePoints` earned for the streak the answer currently being
/// scored extends, capped at 5 consecutive correct answers (+50%).
const STREAK_STEP: f64 = 0.10;
const STREAK_CAP: u32 = 5;

impl AppState {
    /// The scoring consumer's unit of work (§4.G, §5 "one scoring consumer
    /// per live session").
    pub async fn score_answer(&self, session_id: &str, answer_id: &str) -> CoreResult<()> {
        let answer = self.get_answer(answer_id).await.ok_or(CoreError::Internal("answer not found".into()))?;
        let quiz_id = self.get_session(session_id).await.ok_or(CoreError::SessionNotFound)?.quiz_id;
        let quiz = self.get_quiz(&quiz_id).await.ok_or(CoreError::SessionNotFound)?;
        let question = quiz
            .questions
            .iter()
            .find(|q| q.id == answer.question_id)
            .ok_or(CoreError::Internal("question not found in quiz".into()))?;

        let mut participant = self.get_participant(&answer.participant_id).await.ok_or(CoreError::ParticipantNotFound)?;

        let correctness = correctness_fraction(question, &answer);
        let is_correct = correctness > 0.0;

        let base = question.scoring.base_points as f64 * correctness;

        let speed_bonus = if is_correct {
            let limit_ms = (question.time_limit_secs as f64) * 1000.0;
            let raw = question.scoring.base_points as f64 * question.scoring.speed_bonus_multiplier
                * (1.0 - answer.response_time_ms as f64 / limit_ms);
            raw.max(0.0)
        } else {
            0.0
        };

        let prospective_streak = if is_correct { participant.streak_count + 1 } else { 0 };
        let streak_bonus = if is_correct {
            question.scoring.base_points as f64 * prospective_streak.min(STREAK_CAP) as f64 * STREAK_STEP
        } else {
            0.0
        };

        let negative_pct = quiz
            .exam_settings
            .as_ref()
            .filter(|e| e.negative_marking_enabled)
            .map(|e| question.scoring.negative_marking_override.unwrap_or(e.negative_marking_pct));
        let negative_deduction = if !is_correct {
            negative_pct.map(|pct| question.scoring.base_points as f64 * pct as f64 / 100.0).unwrap_or(0.0)
        } else {
            0.0
        };

        let points_awarded = (base + speed_bonus + streak_bonus - negative_deduction).round() as i64;

        {
            let mut answers = self.answers.write().await;
            if let Some(stored) = answers.get_mut(answer_id) {
                stored.is_correct = is_correct;
                stored.points_awarded = points_awarded;
                stored.speed_bonus_applied = speed_bonus.round() as i64;
                stored.streak_bonus_applied = streak_bonus.round() as i64;
                stored.partial_credit_applied = correctness;
                stored.negative_deduction_applied = negative_deduction.round() as i64;
            }
        }

        participant.total_score = (participant.total_score + points_awarded).max(0);
        participant.total_time_ms += answer.response_time_ms;
        participant.streak_count = if is_correct { participant.streak_count + 1 } else { 0 };
        self.participants.write().await.insert(participant.id.clone(), participant.clone());

        self.audit
            .record(
                crate::audit::AuditEvent::AnswerAccepted,
                Some(session_id.to_string()),
                Some(participant.id.clone()),
                None,
                serde_json::json!({"answerId": answer_id, "pointsAwarded": points_awarded}),
            )
            .await;

        self.republish_leaderboard(session_id).await;
        Ok(())
    }

    pub(crate) async fn reverse_answer_points(&self, participant_id: &str, points: i64) {
        let mut participants = self.participants.write().await;
        if let Some(p) = participants.get_mut(participant_id) {
            p.total_score = (p.total_score - points).max(0);
        }
    }

    /// Rank-ordered leaderboard: `totalScore − totalTimeMs/1e9` breaks ties by
    /// time ascending while the dominant order is totalScore descending.
    pub async fn leaderboard_snapshot(&self, session_id: &str, top_n: usize) -> Vec<LeaderboardEntry> {
        let session = match self.get_session(session_id).await {
            Some(s) => s,
            None => return Vec::new(),
        };

        let last_question_scores: std::collections::HashMap<ParticipantId, i64> = match &session.current_question_id {
            Some(question_id) => self
                .answers_for_question(session_id, question_id)
                .await
                .into_iter()
                .map(|a| (a.participant_id, a.points_awarded))
                .collect(),
            None => std::collections::HashMap::new(),
        };

        let participants = self.participants.read().await;

        let mut ranked: Vec<&Participant> = participants
            .values()
            .filter(|p| p.session_id == session_id && !session.eliminated_participants.contains(&p.id))
            .collect();
        ranked.sort_by(|a, b| composite_score(b).partial_cmp(&composite_score(a)).unwrap());

        ranked
            .into_iter()
            .take(top_n)
            .enumerate()
            .map(|(i, p)| LeaderboardEntry {
                rank: (i + 1) as u32,
                participant_id: p.id.clone(),
                nickname: p.nickname.clone(),
                total_score: p.total_score,
                last_question_score: last_question_scores.get(&p.id).copied().unwrap_or(0),
                streak_count: p.streak_count,
                total_time_ms: p.total_time_ms,
            })
            .collect()
    }

    pub(crate) async fn republish_leaderboard(&self, session_id: &str) {
        let top10 = self.leaderboard_snapshot(session_id, 10).await;
        let full = self.leaderboard_snapshot(session_id, usize::MAX).await;
        if let Some(channels) = self.channels_for(session_id).await {
            channels.publish_to_bigscreen(ServerMessage::LeaderboardUpdated { top_n: 10, leaderboard: top10.clone() });
            channels.publish_to_participants(ServerMessage::LeaderboardUpdated { top_n: 10, leaderboard: top10 });
            channels.publish_to_controller(ServerMessage::LeaderboardUpdated { top_n: full.len() as u32, leaderboard: full });
        }
    }

    pub(crate) async fn answers_for_question(&self, session_id: &str, question_id: &str) -> Vec<Answer> {
        self.answers
            .read()
            .await
            .values()
            .filter(|a| a.session_id == session_id && a.question_id == question_id)
            .cloned()
            .collect()
    }

    /// Elimination pass (§4.G, ELIMINATION quizzes): run after every REVEAL,
    /// or every N per `eliminationSettings.frequency`.
    pub(crate) async fn run_elimination_if_due(&self, session_id: &str) {
        let session = match self.get_session(session_id).await {
            Some(s) => s,
            None => return,
        };
        let quiz = match self.get_quiz(&session.quiz_id).await {
            Some(q) => q,
            None => return,
        };
        let Some(settings) = quiz.elimination_settings.as_ref() else { return };
        if quiz.quiz_type != QuizType::Elimination {
            return;
        }

        let due = match settings.frequency {
            EliminationFrequency::EveryQuestion => true,
            EliminationFrequency::EveryN => {
                settings.n_per_elim > 0 && (session.current_question_index + 1) % settings.n_per_elim as usize == 0
            }
        };
        if !due {
            return;
        }

        let ranked = self.leaderboard_snapshot(session_id, usize::MAX).await;
        let active_count = ranked.len();
        let to_eliminate = (active_count * settings.percentage as usize) / 100;
        if to_eliminate == 0 {
            return;
        }

        let victims: Vec<LeaderboardEntry> = ranked.into_iter().rev().take(to_eliminate).collect();
        let mut eliminated_ids = HashSet::new();

        for (i, victim) in victims.iter().enumerate() {
            eliminated_ids.insert(victim.participant_id.clone());
            let mut participants = self.participants.write().await;
            if let Some(p) = participants.get_mut(&victim.participant_id) {
                p.is_eliminated = true;
                p.is_spectator = true;
                p.is_active = false;
            }
            drop(participants);

            if let Some(channels) = self.channels_for(session_id).await {
                channels
                    .publish_to_participant(
                        &victim.participant_id,
                        ServerMessage::Eliminated {
                            participant_id: victim.participant_id.clone(),
                            final_rank: (active_count - i) as u32,
                            final_score: victim.total_score,
                            message: "You have been eliminated".to_string(),
                        },
                    )
                    .await;
            }
            self.audit
                .record(
                    crate::audit::AuditEvent::ParticipantEliminated,
                    Some(session_id.to_string()),
                    Some(victim.participant_id.clone()),
                    None,
                    serde_json::json!({}),
                )
                .await;
        }

        let eliminated_count = eliminated_ids.len() as u32;
        self.mutate_session(session_id, |s| {
            for id in &eliminated_ids {
                s.eliminated_participants.insert(id.clone());
                s.active_participants.remove(id);
            }
            s.participant_count = s.participant_count.saturating_sub(eliminated_count);
        })
        .await;

        if let Some(channels) = self.channels_for(session_id).await {
            let session = self.get_session(session_id).await.unwrap_or(session);
            channels.publish_to_participants(ServerMessage::ParticipantCountUpdated {
                participant_count: session.participant_count,
                eliminated_count: session.eliminated_participants.len() as u32,
            });
        }
    }
}

fn composite_score(p: &Participant) -> f64 {
    p.total_score as f64 - (p.total_time_ms as f64 / 1e9)
}

/// Correctness fraction per question type (§4.G).
fn correctness_fraction(question: &Question, answer: &Answer) -> f64 {
    let correct_ids: HashSet<&OptionId> = question.options.iter().filter(|o| o.is_correct).map(|o| &o.id).collect();
    let selected: HashSet<&OptionId> = answer.selected_option_ids.iter().collect();

    match question.kind {
        QuestionType::MultipleChoice | QuestionType::TrueFalse => {
            if selected.len() == 1 && correct_ids.contains(selected.iter().next().unwrap()) {
                1.0
            } else {
                0.0
            }
        }
        QuestionType::MultiSelect => {
            if selected == correct_ids {
                1.0
            } else if question.scoring.partial_credit_enabled && !correct_ids.is_empty() {
                let intersect = selected.intersection(&correct_ids).count() as f64;
                let wrong = selected.difference(&correct_ids).count() as f64;
                ((intersect - wrong) / correct_ids.len() as f64).max(0.0)
            } else {
                0.0
            }
        }
        QuestionType::NumberInput | QuestionType::Scale1To10 => {
            let correct_value = question.options.iter().find(|o| o.is_correct).and_then(|o| o.text.parse::<f64>().ok());
            match (answer.answer_number, correct_value) {
                (Some(given), Some(correct)) if (given - correct).abs() < f64::EPSILON => 1.0,
                _ => 0.0,
            }
        }
        QuestionType::OpenEnded => 0.0,
    }
}
