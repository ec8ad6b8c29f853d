//! The wire protocol (§6). `ClientMessage` is what a connection of any role
//! may send; `ServerMessage` is what the core may emit. Both are tagged JSON
//! (`{"t": "...", ...fields}`) so a single WebSocket frame type can carry any
//! event.

use crate::error::ErrorCode;
use crate::types::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Sent once per connection, carrying the role-specific credential.
    Authenticate(AuthenticatePayload),
    /// Mints a participant and its token in one round trip (§4.D "Participant:
    /// created on join"; this core has no separate admin-flow join step, so
    /// a fresh connection joins and authenticates in the same frame).
    JoinSession {
        join_code: JoinCode,
        nickname: String,
    },

    SubmitAnswer {
        question_id: QuestionId,
        #[serde(default)]
        selected_options: Vec<OptionId>,
        #[serde(default)]
        answer_text: Option<String>,
        #[serde(default)]
        answer_number: Option<f64>,
        client_timestamp: i64,
    },
    ReconnectSession {
        session_id: SessionId,
        participant_id: ParticipantId,
        #[serde(default)]
        last_known_question_id: Option<QuestionId>,
    },
    FocusLost {
        timestamp: i64,
    },
    FocusRegained {
        timestamp: i64,
        duration_ms: i64,
    },

    // Controller-only operations (§4.D).
    StartQuiz,
    NextQuestion,
    EndQuiz,
    SkipQuestion,
    VoidQuestion {
        question_id: QuestionId,
        reason: String,
    },
    PauseTimer,
    /// Carries back the `remainingSeconds` the controller received in the
    /// paired `timer_paused` broadcast — the core does not track "paused vs
    /// stopped" separately, so the caller is the one holding that number.
    ResumeTimer {
        remaining_seconds: u32,
    },
    ResetTimer {
        new_time_limit: u32,
    },
    KickParticipant {
        participant_id: ParticipantId,
        reason: String,
    },
    BanParticipant {
        participant_id: ParticipantId,
        reason: String,
    },
    ToggleLateJoiners {
        allow_late_joiners: bool,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AuthenticatePayload {
    Participant {
        token: String,
    },
    Controller {
        session_id: SessionId,
        host_credential: String,
    },
    BigScreen {
        session_id: SessionId,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicQuestion {
    pub question_id: QuestionId,
    pub question_text: String,
    pub question_type: QuestionType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question_image_url: Option<String>,
    /// Never carries `isCorrect` — security-critical, must never leak to clients.
    pub options: Vec<PublicOption>,
    pub time_limit: u32,
    pub shuffle_options: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicOption {
    pub option_id: OptionId,
    pub option_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub option_image_url: Option<String>,
}

impl From<&QuestionOption> for PublicOption {
    fn from(opt: &QuestionOption) -> Self {
        Self {
            option_id: opt.id.clone(),
            option_text: opt.text.clone(),
            option_image_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentStateSummary {
    pub state: SessionState,
    pub current_question_index: usize,
    pub participant_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_time: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevealStatistics {
    pub total_answers: u32,
    pub correct_answers: u32,
    pub average_response_time: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantStatus {
    Connected,
    Disconnected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum ServerMessage {
    Authenticated {
        success: bool,
        session_id: SessionId,
        #[serde(skip_serializing_if = "Option::is_none")]
        participant_id: Option<ParticipantId>,
        #[serde(skip_serializing_if = "Option::is_none")]
        nickname: Option<String>,
        current_state: CurrentStateSummary,
    },
    AuthError {
        error: ErrorCode,
    },
    LobbyState {
        session_id: SessionId,
        join_code: JoinCode,
        participant_count: u32,
        participants: Vec<LobbyParticipant>,
        allow_late_joiners: bool,
    },
    ParticipantJoined {
        participant_id: ParticipantId,
        nickname: String,
        participant_count: u32,
        timestamp: i64,
    },
    QuizStarted {
        session_id: SessionId,
        total_questions: u32,
        timestamp: i64,
    },
    QuestionStarted {
        question_index: usize,
        question: PublicQuestion,
        start_time: i64,
        end_time: i64,
    },
    TimerTick {
        question_id: QuestionId,
        remaining_seconds: u32,
        server_time: i64,
    },
    TimerPaused {
        question_id: QuestionId,
        remaining_seconds: u32,
    },
    TimerResumed {
        question_id: QuestionId,
        remaining_seconds: u32,
    },
    TimerReset {
        question_id: QuestionId,
        remaining_seconds: u32,
    },
    QuestionSkipped {
        question_id: QuestionId,
        question_index: usize,
        reason: String,
        timestamp: i64,
        exam_mode_skip_reveal: bool,
    },
    QuestionVoided {
        question_id: QuestionId,
        reason: String,
        timestamp: i64,
    },
    RevealAnswers {
        question_id: QuestionId,
        correct_options: Vec<OptionId>,
        #[serde(skip_serializing_if = "Option::is_none")]
        explanation_text: Option<String>,
        statistics: RevealStatistics,
    },
    LeaderboardUpdated {
        top_n: u32,
        leaderboard: Vec<LeaderboardEntry>,
    },
    AnswerAccepted {
        question_id: QuestionId,
        answer_id: AnswerId,
        response_time_ms: i64,
        server_timestamp: i64,
    },
    AnswerRejected {
        question_id: Option<QuestionId>,
        reason: ErrorCode,
        message: String,
    },
    AnswerCountUpdated {
        question_id: QuestionId,
        answered_count: u32,
        total_participants: u32,
        percentage: f64,
    },
    Eliminated {
        participant_id: ParticipantId,
        final_rank: u32,
        final_score: i64,
        message: String,
    },
    ParticipantCountUpdated {
        participant_count: u32,
        eliminated_count: u32,
    },
    ParticipantStatusChanged {
        participant_id: ParticipantId,
        nickname: String,
        status: ParticipantStatus,
        timestamp: i64,
    },
    ParticipantLeft {
        participant_id: ParticipantId,
        reason: String,
    },
    Kicked {
        reason: String,
        message: String,
        timestamp: i64,
    },
    Banned {
        reason: String,
        message: String,
        timestamp: i64,
    },
    SessionRecovered {
        current_state: SessionState,
        #[serde(skip_serializing_if = "Option::is_none")]
        current_question: Option<PublicQuestion>,
        #[serde(skip_serializing_if = "Option::is_none")]
        remaining_time: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        reveal: Option<RevealAnswersSummary>,
        total_score: i64,
        rank: u32,
        streak_count: u32,
        is_eliminated: bool,
        is_spectator: bool,
        leaderboard: Vec<LeaderboardEntry>,
    },
    RecoveryFailed {
        reason: ErrorCode,
    },
    QuizEnded {
        session_id: SessionId,
        final_leaderboard: Vec<LeaderboardEntry>,
        timestamp: i64,
    },
    SystemMetrics {
        active_connections: u32,
        average_latency: f64,
        cpu_usage: f64,
        memory_usage: f64,
    },
    LateJoinersUpdated {
        allow_late_joiners: bool,
    },
    /// Success acknowledgement for a host control op (paired `<op>_ack` per §6).
    Ack {
        op: String,
    },
    Error {
        event: String,
        error: ErrorCode,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LobbyParticipant {
    pub participant_id: ParticipantId,
    pub nickname: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevealAnswersSummary {
    pub correct_options: Vec<OptionId>,
    pub statistics: RevealStatistics,
}
