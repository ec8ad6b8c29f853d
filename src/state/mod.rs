//! The fast store and the in-process shared state handle every subsystem
//! operates on: a bag of `tokio::sync::RwLock`-guarded maps behind a single
//! `Arc`, cloned once at bootstrap and shared with every connection task.

pub mod export;
pub mod participant;
pub mod recovery;
pub mod scoring;
pub mod session;
pub mod submission;
pub mod timer;

use crate::audit::AuditLog;
use crate::config::AppConfig;
use crate::fanout::SessionChannels;
use crate::types::*;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, RwLock};

/// Safe character set for join codes (excludes 0/O, 1/I/L to avoid confusion).
const CODE_CHARS: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";
const JOIN_CODE_LENGTH: usize = 6;

/// A unit of work for a session's scoring consumer (§4.G). `Stop` tears the
/// consumer task down at end-of-session (§5 "scoring consumer unsubscribed").
#[derive(Debug, Clone)]
pub enum ScoringWorkItem {
    Score { answer_id: AnswerId },
    Stop,
}

pub struct AppState {
    pub config: AppConfig,
    pub audit: AuditLog,

    pub(crate) quizzes: RwLock<HashMap<QuizId, Quiz>>,
    pub(crate) sessions: RwLock<HashMap<SessionId, Session>>,
    pub(crate) participants: RwLock<HashMap<ParticipantId, Participant>>,
    pub(crate) answers: RwLock<HashMap<AnswerId, Answer>>,
    pub(crate) join_codes: RwLock<HashMap<JoinCode, SessionId>>,

    pub(crate) channels: RwLock<HashMap<SessionId, Arc<SessionChannels>>>,
    pub(crate) timers: RwLock<HashMap<SessionId, timer::TimerHandle>>,
    pub(crate) scoring_tx: RwLock<HashMap<SessionId, mpsc::UnboundedSender<ScoringWorkItem>>>,
    pub(crate) metrics_tasks: RwLock<HashMap<SessionId, oneshot::Sender<()>>>,

    /// `ratelimit:answer:{pid}:{qid}` (§6 persisted layout) — value is the
    /// marker's expiry (ms since epoch); entries past expiry are treated as
    /// absent by `submission::check_and_set_rate_limit`.
    pub(crate) rate_limit_markers: RwLock<HashMap<(ParticipantId, QuestionId), i64>>,
    pub(crate) answer_counts: RwLock<HashMap<(SessionId, QuestionId), u32>>,
    pub(crate) connection_counts: RwLock<HashMap<SessionId, ConnectionCounts>>,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            audit: AuditLog::new(),
            quizzes: RwLock::new(HashMap::new()),
            sessions: RwLock::new(HashMap::new()),
            participants: RwLock::new(HashMap::new()),
            answers: RwLock::new(HashMap::new()),
            join_codes: RwLock::new(HashMap::new()),
            channels: RwLock::new(HashMap::new()),
            timers: RwLock::new(HashMap::new()),
            scoring_tx: RwLock::new(HashMap::new()),
            metrics_tasks: RwLock::new(HashMap::new()),
            rate_limit_markers: RwLock::new(HashMap::new()),
            answer_counts: RwLock::new(HashMap::new()),
            connection_counts: RwLock::new(HashMap::new()),
        }
    }

    // ---- Quiz (read-only to the core; loaded by the admin flow out of scope) ----

    pub async fn put_quiz(&self, quiz: Quiz) {
        self.quizzes.write().await.insert(quiz.id.clone(), quiz);
    }

    pub async fn get_quiz(&self, quiz_id: &str) -> Option<Quiz> {
        self.quizzes.read().await.get(quiz_id).cloned()
    }

    // ---- Session creation (admin-flow boundary; core owns it from here) ----

    async fn generate_join_code(&self) -> JoinCode {
        let mut rng = rand::rng();
        loop {
            let code: String = (0..JOIN_CODE_LENGTH)
                .map(|_| CODE_CHARS[rng.random_range(0..CODE_CHARS.len())] as char)
                .collect();
            if !self.join_codes.read().await.contains_key(&code) {
                return code;
            }
        }
    }

    /// Create a session in LOBBY for `quiz_id`, wiring up its fan-out
    /// channels and scoring consumer (§5: "one scoring consumer per live
    /// session").
    pub async fn create_session(self: &Arc<Self>, quiz_id: QuizId, host_id: String) -> Session {
        let now = crate::now_ms();
        let id = ulid::Ulid::new().to_string();
        let join_code = self.generate_join_code().await;
        let session = Session::new(id.clone(), quiz_id.clone(), join_code.clone(), host_id, now);

        self.sessions.write().await.insert(id.clone(), session.clone());
        self.join_codes.write().await.insert(join_code, id.clone());
        self.channels
            .write()
            .await
            .insert(id.clone(), Arc::new(SessionChannels::new()));

        self.spawn_scoring_consumer(id.clone()).await;
        self.start_metrics_broadcaster(id.clone()).await;

        self.audit
            .record(
                crate::audit::AuditEvent::SessionStarted,
                Some(id.clone()),
                None,
                Some(quiz_id),
                serde_json::json!({"joinCode": session.join_code}),
            )
            .await;

        session
    }

    async fn spawn_scoring_consumer(self: &Arc<Self>, session_id: SessionId) {
        let (tx, mut rx) = mpsc::unbounded_channel::<ScoringWorkItem>();
        self.scoring_tx.write().await.insert(session_id.clone(), tx);

        let state = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(item) = rx.recv().await {
                match item {
                    ScoringWorkItem::Score { answer_id } => {
                        if let Err(err) = state.score_answer(&session_id, &answer_id).await {
                            tracing::warn!(session_id = %session_id, %answer_id, error = %err, "scoring failed");
                        }
                    }
                    ScoringWorkItem::Stop => break,
                }
            }
        });
    }

    pub async fn enqueue_scoring(&self, session_id: &str, item: ScoringWorkItem) {
        let tx = self.scoring_tx.read().await.get(session_id).cloned();
        if let Some(tx) = tx {
            if tx.send(item).is_err() {
                tracing::warn!(session_id, "scoring consumer gone; item dropped");
            }
        }
    }

    pub async fn stop_scoring_consumer(&self, session_id: &str) {
        self.enqueue_scoring(session_id, ScoringWorkItem::Stop).await;
        self.scoring_tx.write().await.remove(session_id);
    }

    // ---- Accessors shared across submodules ----

    pub async fn get_session(&self, session_id: &str) -> Option<Session> {
        self.sessions.read().await.get(session_id).cloned()
    }

    pub async fn session_id_for_join_code(&self, code: &str) -> Option<SessionId> {
        self.join_codes.read().await.get(code).cloned()
    }

    pub async fn channels_for(&self, session_id: &str) -> Option<Arc<SessionChannels>> {
        self.channels.read().await.get(session_id).cloned()
    }

    pub async fn get_participant(&self, participant_id: &str) -> Option<Participant> {
        self.participants.read().await.get(participant_id).cloned()
    }

    pub async fn get_answer(&self, answer_id: &str) -> Option<Answer> {
        self.answers.read().await.get(answer_id).cloned()
    }

    pub async fn get_connection_counts(&self, session_id: &str) -> ConnectionCounts {
        self.connection_counts
            .read()
            .await
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn bump_connection_count(&self, session_id: &str, role: Role, delta: i32) {
        let mut counts = self.connection_counts.write().await;
        let entry = counts.entry(session_id.to_string()).or_default();
        let field = match role {
            Role::Participant => &mut entry.participants,
            Role::Controller => &mut entry.controllers,
            Role::BigScreen => &mut entry.big_screens,
        };
        *field = field.saturating_add_signed(delta);
    }
}
