//! Property-based tests for the state machine
//!
//! These tests verify key invariants hold across all possible inputs.

use super::*;
use crate::api::ChatRecord;
use crate::stream::StreamEvent;
use crate::sync::SyncOutcome;
use proptest::prelude::*;

// ============================================================================
// Test Helpers
// ============================================================================

fn test_context(history_len: usize) -> SessionContext {
    SessionContext::new().with_turn(1).with_history(history_len)
}

fn empty_record(id: String) -> ChatRecord {
    ChatRecord {
        id,
        system: String::new(),
        messages: vec![],
        retrieval: None,
        tools: vec![],
        updated_at: None,
    }
}

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_error_kind() -> impl Strategy<Value = ErrorKind> {
    prop_oneof![
        Just(ErrorKind::MalformedStreamFrame),
        Just(ErrorKind::StreamTransport),
        Just(ErrorKind::Persistence),
        Just(ErrorKind::Precondition),
    ]
}

fn arb_ready_state() -> impl Strategy<Value = SessionState> {
    prop_oneof![
        Just(SessionState::Idle),
        Just(SessionState::Done),
        ("[a-zA-Z ]{1,30}", arb_error_kind())
            .prop_map(|(message, kind)| SessionState::Errored { message, kind }),
    ]
}

fn arb_busy_state() -> impl Strategy<Value = SessionState> {
    prop_oneof![
        Just(SessionState::Submitting),
        Just(SessionState::Streaming),
        Just(SessionState::Finalizing),
    ]
}

fn arb_state() -> impl Strategy<Value = SessionState> {
    prop_oneof![arb_ready_state(), arb_busy_state()]
}

fn arb_stream_event() -> impl Strategy<Value = StreamEvent> {
    prop_oneof![
        "[a-zA-Z0-9 ]{0,20}".prop_map(StreamEvent::Stream),
        "[a-zA-Z0-9 ]{0,20}".prop_map(StreamEvent::End),
        "[a-z]{1,10}".prop_map(|name| StreamEvent::Doc(serde_json::json!({ "name": name }))),
        "[a-z ]{1,20}".prop_map(|detail| StreamEvent::Error(serde_json::json!({ "detail": detail }))),
    ]
}

fn arb_event() -> impl Strategy<Value = Event> {
    let turn = 1u64..4;
    prop_oneof![
        "[a-zA-Z ]{0,30}".prop_map(Event::user),
        (0usize..6).prop_map(|index| Event::Regenerate { index }),
        Just(Event::Reset),
        "[a-z0-9]{1,6}".prop_map(|id| Event::ChatLoaded { record: empty_record(id) }),
        "[a-z0-9]{1,6}".prop_map(|id| Event::ChatDeleted { id }),
        (turn.clone(), arb_stream_event()).prop_map(|(turn, event)| Event::Stream { turn, event }),
        (turn.clone(), "[^{}]{0,10}").prop_map(|(turn, raw)| Event::StreamMalformed { turn, raw }),
        (turn.clone(), "[a-z ]{1,20}").prop_map(|(turn, message)| Event::TransportError { turn, message }),
        turn.clone().prop_map(|turn| Event::StreamClosed { turn }),
        (turn.clone(), "[a-z0-9]{1,6}").prop_map(|(turn, session_id)| Event::SyncComplete {
            turn,
            outcome: SyncOutcome::Created { session_id },
        }),
        turn.clone().prop_map(|turn| Event::SyncComplete {
            turn,
            outcome: SyncOutcome::Updated,
        }),
        (turn, "[a-z ]{1,20}").prop_map(|(turn, message)| Event::SyncFailed { turn, message }),
    ]
}

// ============================================================================
// Effect Checkers
// ============================================================================

fn effects_are_valid(effects: &[Effect], old_state: &SessionState, new_state: &SessionState) -> bool {
    let has = |pred: fn(&Effect) -> bool| effects.iter().any(pred);

    // A stream is only opened when a turn starts
    if has(|e| matches!(e, Effect::RequestStream { .. })) && *new_state != SessionState::Submitting {
        return false;
    }
    // Sync only follows a finalized reply
    if has(|e| matches!(e, Effect::SyncConversation)) && *new_state != SessionState::Finalizing {
        return false;
    }
    // A failed turn never keeps its placeholder
    if old_state.is_streaming()
        && matches!(new_state, SessionState::Errored { .. })
        && !has(|e| matches!(e, Effect::DiscardReply))
    {
        return false;
    }
    // The announced state is the state we moved to
    effects.iter().all(|e| match e {
        Effect::NotifyState { state } => state == new_state,
        _ => true,
    })
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    // Any event sequence yields consistent effects
    #[test]
    fn prop_effects_match_new_state(events in proptest::collection::vec(arb_event(), 0..25)) {
        let mut state = SessionState::Idle;
        let ctx = test_context(4);

        for event in events {
            if let Ok(result) = transition(&state, &ctx, event) {
                prop_assert!(
                    effects_are_valid(&result.effects, &state, &result.new_state),
                    "Invalid effects for state {:?}: {:?}",
                    result.new_state,
                    result.effects
                );
                state = result.new_state;
            }
        }
    }

    // Single-flight: no new turn while a stream is open
    #[test]
    fn prop_busy_rejects_new_turns(state in arb_busy_state(), text in "[a-zA-Z ]{1,30}", index in 1usize..4) {
        let ctx = test_context(4);
        if state.is_streaming() {
            prop_assert_eq!(
                transition(&state, &ctx, Event::user(text)).unwrap_err(),
                TransitionError::TurnInFlight
            );
        }
        prop_assert_eq!(
            transition(&state, &ctx, Event::Regenerate { index }).unwrap_err(),
            TransitionError::TurnInFlight
        );
    }

    // A pending sync never blocks the next turn
    #[test]
    fn prop_finalizing_accepts_input(text in "[a-zA-Z]{1,30}") {
        let result = transition(&SessionState::Finalizing, &test_context(2), Event::user(text)).unwrap();
        prop_assert_eq!(result.new_state, SessionState::Submitting);
    }

    // Errors are never sticky
    #[test]
    fn prop_ready_states_accept_input(state in arb_ready_state(), text in "[a-zA-Z]{1,30}") {
        let result = transition(&state, &test_context(0), Event::user(text.clone()));
        prop_assert!(result.is_ok(), "Submit rejected: {:?}", result);
        let result = result.unwrap();
        prop_assert_eq!(result.new_state, SessionState::Submitting);
        let requested = matches!(
            &result.effects[0],
            Effect::RequestStream { user } if user.content == text
        );
        prop_assert!(requested);
    }

    // Reset from anywhere reaches Idle and clears the conversation
    #[test]
    fn prop_reset_always_idles(state in arb_state()) {
        let result = transition(&state, &test_context(3), Event::Reset).unwrap();
        prop_assert_eq!(&result.new_state, &SessionState::Idle);
        prop_assert!(result.effects.iter().any(|e| matches!(e, Effect::ResetConversation)));
        prop_assert_eq!(
            result.effects.iter().any(|e| matches!(e, Effect::CloseStream)),
            state.is_streaming()
        );
    }

    // The same input always gives the same output
    #[test]
    fn prop_transition_is_deterministic(state in arb_state(), event in arb_event()) {
        let ctx = test_context(2);
        let first = transition(&state, &ctx, event.clone());
        let second = transition(&state, &ctx, event);
        match (first, second) {
            (Ok(a), Ok(b)) => {
                prop_assert_eq!(a.new_state, b.new_state);
                prop_assert_eq!(format!("{:?}", a.effects), format!("{:?}", b.effects));
            }
            (Err(a), Err(b)) => prop_assert_eq!(a, b),
            (a, b) => prop_assert!(false, "Diverged: {:?} vs {:?}", a, b),
        }
    }

    // Regenerating from the first message never mutates anything
    #[test]
    fn prop_regenerate_first_message_rejected(state in arb_ready_state(), history_len in 0usize..10) {
        let result = transition(&state, &test_context(history_len), Event::Regenerate { index: 0 });
        prop_assert!(matches!(result, Err(TransitionError::Precondition(_))));
    }

    #[test]
    fn prop_regenerate_within_bounds(state in arb_ready_state(), history_len in 1usize..10, pick in 0usize..10) {
        let index = pick % history_len + 1;
        let result = transition(&state, &test_context(history_len), Event::Regenerate { index }).unwrap();
        prop_assert_eq!(result.new_state, SessionState::Idle);
        let truncated = matches!(
            result.effects[0],
            Effect::TruncateForRegenerate { index: i } if i == index
        );
        prop_assert!(truncated);
    }

    // `end` always finalizes and syncs exactly once
    #[test]
    fn prop_end_finalizes(
        state in prop_oneof![Just(SessionState::Submitting), Just(SessionState::Streaming)],
        tail in "[a-z ]{0,20}",
    ) {
        let result = transition(
            &state,
            &test_context(2),
            Event::Stream { turn: 1, event: StreamEvent::End(tail) },
        )
        .unwrap();
        prop_assert_eq!(result.new_state, SessionState::Finalizing);
        let syncs = result
            .effects
            .iter()
            .filter(|e| matches!(e, Effect::SyncConversation))
            .count();
        prop_assert_eq!(syncs, 1);
    }

    // Stream failures never reach Done
    #[test]
    fn prop_stream_failures_error(
        state in prop_oneof![Just(SessionState::Submitting), Just(SessionState::Streaming)],
        message in "[a-z ]{1,20}",
    ) {
        let ctx = test_context(2);
        for event in [
            Event::TransportError { turn: 1, message: message.clone() },
            Event::StreamMalformed { turn: 1, raw: message.clone() },
            Event::StreamClosed { turn: 1 },
        ] {
            let result = transition(&state, &ctx, event).unwrap();
            let is_errored = matches!(result.new_state, SessionState::Errored { .. });
            prop_assert!(is_errored);
        }
    }

    // Persistence outcome never blocks the next turn
    #[test]
    fn prop_sync_result_leaves_session_ready(event in prop_oneof![
        "[a-z]{1,6}".prop_map(|id| Event::SyncComplete { turn: 1, outcome: SyncOutcome::Created { session_id: id } }),
        Just(Event::SyncComplete { turn: 1, outcome: SyncOutcome::Updated }),
        "[a-z ]{1,20}".prop_map(|message| Event::SyncFailed { turn: 1, message }),
    ]) {
        let result = transition(&SessionState::Finalizing, &test_context(2), event).unwrap();
        prop_assert_eq!(&result.new_state, &SessionState::Done);
        prop_assert!(!result.new_state.is_busy());
    }

    // A result for an earlier turn never moves the session
    #[test]
    fn prop_earlier_sync_result_keeps_state(state in arb_state(), event in prop_oneof![
        "[a-z]{1,6}".prop_map(|id| Event::SyncComplete { turn: 1, outcome: SyncOutcome::Created { session_id: id } }),
        "[a-z ]{1,20}".prop_map(|message| Event::SyncFailed { turn: 1, message }),
    ]) {
        let ctx = test_context(2).with_turn(2);
        let result = transition(&state, &ctx, event).unwrap();
        prop_assert_eq!(&result.new_state, &state);
        let notified = result.effects.iter().any(|e| matches!(e, Effect::NotifyState { .. }));
        prop_assert!(!notified);
    }
}
