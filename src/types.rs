//! Core domain types shared by every subsystem.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Opaque ID types for type safety. All are ULID-shaped except `JoinCode`.
pub type QuizId = String;
pub type SessionId = String;
pub type QuestionId = String;
pub type OptionId = String;
pub type ParticipantId = String;
pub type AnswerId = String;
pub type JoinCode = String;

/// The only legal session states and the only legal paths between them (§4.D).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Lobby,
    ActiveQuestion,
    Reveal,
    Ended,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuizType {
    Regular,
    Elimination,
    Ffi,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EliminationFrequency {
    EveryQuestion,
    EveryN,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EliminationSettings {
    /// Percentage of active participants removed per elimination point.
    pub percentage: u32,
    pub frequency: EliminationFrequency,
    /// Only meaningful when `frequency == EveryN`.
    #[serde(default)]
    pub n_per_elim: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FfiSettings {
    pub winners_per_question: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ExamSettings {
    #[serde(default)]
    pub negative_marking_enabled: bool,
    #[serde(default)]
    pub negative_marking_pct: u32,
    #[serde(default)]
    pub focus_monitoring_enabled: bool,
    #[serde(default)]
    pub skip_reveal_phase: bool,
    #[serde(default)]
    pub auto_advance: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuestionType {
    MultipleChoice,
    MultiSelect,
    TrueFalse,
    Scale1To10,
    NumberInput,
    OpenEnded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionOption {
    pub id: OptionId,
    pub text: String,
    pub is_correct: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    pub base_points: u32,
    /// Fraction of `base_points` available as a speed bonus, in [0, 1].
    pub speed_bonus_multiplier: f64,
    #[serde(default)]
    pub partial_credit_enabled: bool,
    #[serde(default)]
    pub negative_marking_override: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: QuestionId,
    pub text: String,
    #[serde(rename = "type")]
    pub kind: QuestionType,
    /// Seconds, 5..=120.
    pub time_limit_secs: u32,
    pub options: Vec<QuestionOption>,
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub shuffle_options: bool,
    #[serde(default)]
    pub explanation: Option<String>,
}

/// Immutable once a session references it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quiz {
    pub id: QuizId,
    pub title: String,
    pub description: String,
    pub quiz_type: QuizType,
    #[serde(default)]
    pub elimination_settings: Option<EliminationSettings>,
    #[serde(default)]
    pub ffi_settings: Option<FfiSettings>,
    #[serde(default)]
    pub exam_settings: Option<ExamSettings>,
    pub questions: Vec<Question>,
}

impl Quiz {
    pub fn question_at(&self, index: usize) -> Option<&Question> {
        self.questions.get(index)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub quiz_id: QuizId,
    pub join_code: JoinCode,
    pub state: SessionState,
    pub current_question_index: usize,
    pub current_question_id: Option<QuestionId>,
    /// ms since epoch.
    pub current_question_start_time: Option<i64>,
    /// ms since epoch; set iff a timer is running or paused.
    pub timer_end_time: Option<i64>,
    pub participant_count: u32,
    pub active_participants: HashSet<ParticipantId>,
    pub eliminated_participants: HashSet<ParticipantId>,
    pub voided_questions: HashSet<QuestionId>,
    pub allow_late_joiners: bool,
    pub banned_ips: HashSet<String>,
    pub host_id: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Session {
    pub fn new(id: SessionId, quiz_id: QuizId, join_code: JoinCode, host_id: String, now: i64) -> Self {
        Self {
            id,
            quiz_id,
            join_code,
            state: SessionState::Lobby,
            current_question_index: 0,
            current_question_id: None,
            current_question_start_time: None,
            timer_end_time: None,
            participant_count: 0,
            active_participants: HashSet::new(),
            eliminated_participants: HashSet::new(),
            voided_questions: HashSet::new(),
            allow_late_joiners: true,
            banned_ips: HashSet::new(),
            host_id,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    pub session_id: SessionId,
    pub nickname: String,
    pub ip: String,
    pub is_active: bool,
    pub is_eliminated: bool,
    pub is_spectator: bool,
    pub is_banned: bool,
    pub total_score: i64,
    pub total_time_ms: i64,
    pub streak_count: u32,
    /// Empty when offline.
    pub socket_id: Option<String>,
    pub last_connected_at: i64,
    pub joined_at: i64,
}

impl Participant {
    pub fn new(id: ParticipantId, session_id: SessionId, nickname: String, ip: String, now: i64) -> Self {
        Self {
            id,
            session_id,
            nickname,
            ip,
            is_active: true,
            is_eliminated: false,
            is_spectator: false,
            is_banned: false,
            total_score: 0,
            total_time_ms: 0,
            streak_count: 0,
            socket_id: None,
            last_connected_at: now,
            joined_at: now,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub id: AnswerId,
    pub session_id: SessionId,
    pub participant_id: ParticipantId,
    pub question_id: QuestionId,
    pub selected_option_ids: Vec<OptionId>,
    #[serde(default)]
    pub answer_text: Option<String>,
    #[serde(default)]
    pub answer_number: Option<f64>,
    pub submitted_at: i64,
    pub response_time_ms: i64,
    pub is_correct: bool,
    pub points_awarded: i64,
    pub speed_bonus_applied: i64,
    pub streak_bonus_applied: i64,
    pub partial_credit_applied: f64,
    pub negative_deduction_applied: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub rank: u32,
    pub participant_id: ParticipantId,
    pub nickname: String,
    pub total_score: i64,
    pub last_question_score: i64,
    pub streak_count: u32,
    pub total_time_ms: i64,
}

/// An audit log entry. `details` preserves unknown keys opaquely (§9 "duck-typed
/// payload bag" design note) via `serde_json::Value`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub timestamp: i64,
    pub event_type: String,
    pub session_id: Option<SessionId>,
    pub participant_id: Option<ParticipantId>,
    pub quiz_id: Option<QuizId>,
    pub user_id: Option<String>,
    pub details: serde_json::Value,
    pub error: Option<String>,
}

/// The three connection roles (GLOSSARY: "Role").
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Participant,
    Controller,
    BigScreen,
}

#[derive(Debug, Clone, Default)]
pub struct ConnectionCounts {
    pub participants: u32,
    pub controllers: u32,
    pub big_screens: u32,
}
