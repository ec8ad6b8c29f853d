use quiz_core::config::AppConfig;
use quiz_core::error::ErrorCode;
use quiz_core::protocol::{AuthenticatePayload, ClientMessage, ServerMessage};
use quiz_core::state::AppState;
use quiz_core::types::{Question, QuestionOption, QuestionType, Quiz, QuizType, Role, ScoringConfig, SessionState};
use quiz_core::ws::handlers::{handle_message, ConnContext};
use std::sync::Arc;
use std::time::Duration;

/// Scoring runs on a background consumer task fed by an unbounded channel;
/// give it a chance to drain before asserting on its side effects.
async fn let_scoring_settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

fn two_question_quiz() -> Quiz {
    Quiz {
        id: "quiz-1".into(),
        title: "Trivia Night".into(),
        description: "two rounds".into(),
        quiz_type: QuizType::Regular,
        elimination_settings: None,
        ffi_settings: None,
        exam_settings: None,
        questions: vec![
            Question {
                id: "q1".into(),
                text: "2+2?".into(),
                kind: QuestionType::MultipleChoice,
                time_limit_secs: 10,
                options: vec![
                    QuestionOption { id: "o1".into(), text: "3".into(), is_correct: false },
                    QuestionOption { id: "o2".into(), text: "4".into(), is_correct: true },
                ],
                scoring: ScoringConfig { base_points: 100, speed_bonus_multiplier: 0.5, partial_credit_enabled: false, negative_marking_override: None },
                shuffle_options: false,
                explanation: Some("2+2 is 4".into()),
            },
            Question {
                id: "q2".into(),
                text: "Capital of France?".into(),
                kind: QuestionType::MultipleChoice,
                time_limit_secs: 10,
                options: vec![
                    QuestionOption { id: "o1".into(), text: "Paris".into(), is_correct: true },
                    QuestionOption { id: "o2".into(), text: "Berlin".into(), is_correct: false },
                ],
                scoring: ScoringConfig { base_points: 100, speed_bonus_multiplier: 0.5, partial_credit_enabled: false, negative_marking_override: None },
                shuffle_options: false,
                explanation: None,
            },
        ],
    }
}

async fn bootstrap() -> (Arc<AppState>, quiz_core::types::Session) {
    let state = Arc::new(AppState::new(AppConfig::default()));
    state.put_quiz(two_question_quiz()).await;
    let session = state.create_session("quiz-1".into(), "host-secret".into()).await;
    (state, session)
}

async fn authenticate_controller(state: &Arc<AppState>, session_id: &str) -> ConnContext {
    let mut ctx = ConnContext::default();
    let response = handle_message(
        ClientMessage::Authenticate(AuthenticatePayload::Controller { session_id: session_id.to_string(), host_credential: "host-secret".into() }),
        &mut ctx,
        state,
    )
    .await;
    assert!(matches!(response, Some(ServerMessage::Authenticated { success: true, .. })));
    ctx
}

async fn join(state: &Arc<AppState>, join_code: &str, nickname: &str) -> ConnContext {
    let mut ctx = ConnContext::default();
    let response = handle_message(ClientMessage::JoinSession { join_code: join_code.to_string(), nickname: nickname.to_string() }, &mut ctx, state).await;
    assert!(matches!(response, Some(ServerMessage::Authenticated { success: true, .. })));
    ctx
}

/// Two participants answer the first question, one correctly and with a
/// faster response; the leaderboard after reveal should rank them accordingly.
#[tokio::test]
async fn two_player_scoring_and_leaderboard_ranking() {
    let (state, session) = bootstrap().await;
    let controller = authenticate_controller(&state, &session.id).await;
    let alice = join(&state, &session.join_code, "alice").await;
    let bob = join(&state, &session.join_code, "bob").await;
    // Carol joins but never answers, so the question stays open for the
    // explicit SkipQuestion below instead of auto-revealing once alice and
    // bob have both submitted.
    let _carol = join(&state, &session.join_code, "carol").await;

    let start = handle_message(ClientMessage::StartQuiz, &mut controller.clone(), &state).await;
    assert!(matches!(start, Some(ServerMessage::Ack { op }) if op == "start_quiz"));
    assert_eq!(state.get_session(&session.id).await.unwrap().state, SessionState::ActiveQuestion);

    let alice_id = alice.participant_id.clone().unwrap();
    let bob_id = bob.participant_id.clone().unwrap();

    let mut alice_ctx = alice.clone();
    let submit_alice = handle_message(
        ClientMessage::SubmitAnswer { question_id: "q1".into(), selected_options: vec!["o2".into()], answer_text: None, answer_number: None, client_timestamp: 0 },
        &mut alice_ctx,
        &state,
    )
    .await;
    assert!(submit_alice.is_none(), "accepted submissions are unicast, not returned from dispatch");

    let mut bob_ctx = bob.clone();
    let submit_bob = handle_message(
        ClientMessage::SubmitAnswer { question_id: "q1".into(), selected_options: vec!["o1".into()], answer_text: None, answer_number: None, client_timestamp: 0 },
        &mut bob_ctx,
        &state,
    )
    .await;
    assert!(submit_bob.is_none());

    let_scoring_settle().await;

    let mut controller_ctx = controller.clone();
    let end_question = handle_message(ClientMessage::SkipQuestion, &mut controller_ctx, &state).await;
    assert!(matches!(end_question, Some(ServerMessage::Ack { .. })));

    let alice_score = state.get_participant(&alice_id).await.unwrap().total_score;
    let bob_score = state.get_participant(&bob_id).await.unwrap().total_score;
    assert!(alice_score > bob_score, "alice answered correctly and should outscore bob (alice={alice_score}, bob={bob_score})");
}

/// A second submission for the same question by the same participant is
/// rejected rather than silently overwriting the first answer.
#[tokio::test]
async fn duplicate_submission_is_rejected() {
    let (state, session) = bootstrap().await;
    let controller = authenticate_controller(&state, &session.id).await;
    let alice = join(&state, &session.join_code, "alice").await;
    // Bob joins too so alice answering alone doesn't trigger the
    // all-answered early reveal and leave no ACTIVE_QUESTION to re-submit to.
    let _bob = join(&state, &session.join_code, "bob").await;

    handle_message(ClientMessage::StartQuiz, &mut controller.clone(), &state).await;

    let mut alice_ctx = alice.clone();
    let first = handle_message(
        ClientMessage::SubmitAnswer { question_id: "q1".into(), selected_options: vec!["o2".into()], answer_text: None, answer_number: None, client_timestamp: 0 },
        &mut alice_ctx,
        &state,
    )
    .await;
    assert!(first.is_none());

    let second = handle_message(
        ClientMessage::SubmitAnswer { question_id: "q1".into(), selected_options: vec!["o1".into()], answer_text: None, answer_number: None, client_timestamp: 1 },
        &mut alice_ctx,
        &state,
    )
    .await;
    assert!(matches!(second, Some(ServerMessage::AnswerRejected { reason: ErrorCode::AlreadySubmitted, .. })));
}

/// A controller voiding the current question mid-session excludes it from
/// scoring without needing to advance past it first.
#[tokio::test]
async fn void_current_question_mid_session() {
    let (state, session) = bootstrap().await;
    let controller = authenticate_controller(&state, &session.id).await;
    let alice = join(&state, &session.join_code, "alice").await;

    handle_message(ClientMessage::StartQuiz, &mut controller.clone(), &state).await;

    let mut alice_ctx = alice.clone();
    handle_message(
        ClientMessage::SubmitAnswer { question_id: "q1".into(), selected_options: vec!["o2".into()], answer_text: None, answer_number: None, client_timestamp: 0 },
        &mut alice_ctx,
        &state,
    )
    .await;
    let_scoring_settle().await;
    let scored = state.get_participant(&alice.participant_id.clone().unwrap()).await.unwrap();
    assert!(scored.total_score > 0, "the correct answer should have been scored before the void");

    let mut controller_ctx = controller.clone();
    let void = handle_message(ClientMessage::VoidQuestion { question_id: "q1".into(), reason: "ambiguous wording".into() }, &mut controller_ctx, &state).await;
    assert!(matches!(void, Some(ServerMessage::Ack { .. })));

    let participant = state.get_participant(&alice.participant_id.unwrap()).await.unwrap();
    assert_eq!(participant.total_score, 0, "voiding a question must retract the points it had already earned");
}

/// A reconnecting participant mid-question gets back the remaining time and
/// their place in the leaderboard rather than being treated as a fresh join.
#[tokio::test]
async fn reconnect_mid_question_restores_state() {
    let (state, session) = bootstrap().await;
    let controller = authenticate_controller(&state, &session.id).await;
    let alice = join(&state, &session.join_code, "alice").await;
    let alice_id = alice.participant_id.clone().unwrap();

    handle_message(ClientMessage::StartQuiz, &mut controller.clone(), &state).await;

    let mut fresh_ctx = ConnContext { connection_id: "new-socket".into(), ..ConnContext::default() };
    let response = handle_message(ClientMessage::ReconnectSession { session_id: session.id.clone(), participant_id: alice_id.clone(), last_known_question_id: None }, &mut fresh_ctx, &state).await;

    match response {
        Some(ServerMessage::SessionRecovered { current_state, current_question, is_eliminated, .. }) => {
            assert_eq!(current_state, SessionState::ActiveQuestion);
            assert!(current_question.is_some());
            assert!(!is_eliminated);
        }
        other => panic!("expected SessionRecovered, got {other:?}"),
    }
    assert_eq!(fresh_ctx.participant_id, Some(alice_id));
}

/// Reconnecting with an unknown participant id fails closed instead of
/// minting a new identity.
#[tokio::test]
async fn reconnect_with_unknown_participant_fails() {
    let (state, session) = bootstrap().await;
    let mut ctx = ConnContext::default();
    let response = handle_message(ClientMessage::ReconnectSession { session_id: session.id.clone(), participant_id: "ghost".into(), last_known_question_id: None }, &mut ctx, &state).await;
    assert!(matches!(response, Some(ServerMessage::RecoveryFailed { .. })));
}

/// A banned participant cannot rejoin even with a previously-valid token.
#[tokio::test]
async fn banned_participant_cannot_reauthenticate() {
    let (state, session) = bootstrap().await;
    let controller = authenticate_controller(&state, &session.id).await;
    let alice = join(&state, &session.join_code, "alice").await;
    let alice_id = alice.participant_id.clone().unwrap();

    let mut controller_ctx = controller.clone();
    let ban = handle_message(ClientMessage::BanParticipant { participant_id: alice_id.clone(), reason: "abusive nickname".into() }, &mut controller_ctx, &state).await;
    assert!(matches!(ban, Some(ServerMessage::Ack { .. })));

    let mut retry_ctx = ConnContext::default();
    let reauth = handle_message(ClientMessage::Authenticate(AuthenticatePayload::Participant { token: alice_id }), &mut retry_ctx, &state).await;
    assert!(matches!(reauth, Some(ServerMessage::AuthError { error: ErrorCode::ParticipantBanned })));
}

/// The full lobby -> active -> reveal -> ended lifecycle across both
/// questions, checked at each state transition.
#[tokio::test]
async fn full_session_lifecycle_across_two_questions() {
    let (state, session) = bootstrap().await;
    let controller = authenticate_controller(&state, &session.id).await;
    let alice = join(&state, &session.join_code, "alice").await;

    assert_eq!(state.get_session(&session.id).await.unwrap().state, SessionState::Lobby);

    handle_message(ClientMessage::StartQuiz, &mut controller.clone(), &state).await;
    assert_eq!(state.get_session(&session.id).await.unwrap().state, SessionState::ActiveQuestion);

    let mut alice_ctx = alice.clone();
    handle_message(
        ClientMessage::SubmitAnswer { question_id: "q1".into(), selected_options: vec!["o2".into()], answer_text: None, answer_number: None, client_timestamp: 0 },
        &mut alice_ctx,
        &state,
    )
    .await;

    handle_message(ClientMessage::SkipQuestion, &mut controller.clone(), &state).await;
    assert_eq!(state.get_session(&session.id).await.unwrap().state, SessionState::Reveal);

    handle_message(ClientMessage::NextQuestion, &mut controller.clone(), &state).await;
    let mid = state.get_session(&session.id).await.unwrap();
    assert_eq!(mid.state, SessionState::ActiveQuestion);
    assert_eq!(mid.current_question_index, 1);

    handle_message(
        ClientMessage::SubmitAnswer { question_id: "q2".into(), selected_options: vec!["o1".into()], answer_text: None, answer_number: None, client_timestamp: 0 },
        &mut alice_ctx,
        &state,
    )
    .await;

    let end = handle_message(ClientMessage::EndQuiz, &mut controller.clone(), &state).await;
    assert!(matches!(end, Some(ServerMessage::Ack { .. })));
    assert_eq!(state.get_session(&session.id).await.unwrap().state, SessionState::Ended);
}

/// A non-controller connection cannot invoke host-only operations, and an
/// unauthenticated connection cannot submit answers.
#[tokio::test]
async fn authorization_boundaries_are_enforced() {
    let (state, session) = bootstrap().await;
    let alice = join(&state, &session.join_code, "alice").await;

    let mut alice_ctx = alice.clone();
    let denied = handle_message(ClientMessage::StartQuiz, &mut alice_ctx, &state).await;
    assert!(matches!(denied, Some(ServerMessage::Error { error: ErrorCode::InvalidRequest, .. })));

    let mut anon_ctx = ConnContext::default();
    let unauthenticated_submit = handle_message(
        ClientMessage::SubmitAnswer { question_id: "q1".into(), selected_options: vec![], answer_text: None, answer_number: None, client_timestamp: 0 },
        &mut anon_ctx,
        &state,
    )
    .await;
    assert!(matches!(unauthenticated_submit, Some(ServerMessage::Error { .. })));
}

/// A big-screen connection authenticates read-only against a session without
/// needing a participant token or host credential.
#[tokio::test]
async fn bigscreen_authenticates_against_session_id() {
    let (state, session) = bootstrap().await;
    let mut ctx = ConnContext::default();
    let response = handle_message(ClientMessage::Authenticate(AuthenticatePayload::BigScreen { session_id: session.id.clone() }), &mut ctx, &state).await;
    assert!(matches!(response, Some(ServerMessage::Authenticated { success: true, .. })));
    assert_eq!(ctx.role, Some(Role::BigScreen));
}
