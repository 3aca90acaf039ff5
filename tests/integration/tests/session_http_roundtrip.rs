use std::{
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use boba_session::{
    ChatSession, SessionConfig, SessionEvent, SessionPhase, TurnInput, TurnOutcome,
};
use boba_stream::{
    Endpoint, ExpectedShape, HttpStreamTransport, HttpTransportConfig, QuestionAnswer,
    StreamError, TurnExtras,
};
use httpmock::prelude::*;
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Deserialize, PartialEq)]
struct Scenario {
    title: String,
    #[serde(default)]
    probability: Option<String>,
}

fn http_session(
    server: &MockServer,
    config: SessionConfig,
) -> (
    ChatSession<HttpStreamTransport>,
    Arc<Mutex<Vec<SessionEvent>>>,
) {
    let transport = HttpStreamTransport::new(HttpTransportConfig {
        api_base: server.base_url(),
        ..HttpTransportConfig::default()
    })
    .expect("transport should be created");
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let mut session = ChatSession::new(transport, config);
    session.subscribe(move |event| sink.lock().expect("events lock").push(event.clone()));
    (session, events)
}

fn sse(deltas: &[&str]) -> String {
    deltas
        .iter()
        .map(|delta| format!("data: {}\n\n", json!({ "data": delta })))
        .collect()
}

fn threat_model_turn(text: &str) -> TurnInput {
    TurnInput::new(text).with_extras(TurnExtras {
        prompt_id: Some("guided-threat-modelling".to_string()),
        context: Some("base".to_string()),
        document: Some("base".to_string()),
        ..TurnExtras::default()
    })
}

#[tokio::test]
async fn integration_session_streams_records_and_continues_with_header_session_id() {
    let server = MockServer::start();
    let first = server.mock(|when, then| {
        when.method(POST)
            .path("/api/prompt")
            .json_body(json!({
                "userinput": "Describe risk X",
                "promptid": "guided-threat-modelling"
            }));
        then.status(200)
            .header("content-type", "text/event-stream")
            .header("X-Chat-ID", "abc123")
            .body(sse(&[
                "[{\"title\":\"R1\",\"probability\":\"High\"",
                "}]",
            ]));
    });
    let continuation = server.mock(|when, then| {
        when.method(POST)
            .path("/api/prompt")
            .json_body(json!({ "userinput": "more", "chatSessionId": "abc123" }));
        then.status(200)
            .header("content-type", "text/event-stream")
            .body(sse(&["[{\"title\":\"R2\"}]"]));
    });

    let (session, events) = http_session(&server, SessionConfig::prompt());

    let outcome = session
        .submit(threat_model_turn("Describe risk X"))
        .await
        .expect("valid input");
    let TurnOutcome::Completed(summary) = outcome else {
        panic!("first turn should complete, got {outcome:?}");
    };
    assert_eq!(
        summary.result.records::<Scenario>(),
        vec![Scenario {
            title: "R1".to_string(),
            probability: Some("High".to_string()),
        }]
    );
    assert_eq!(session.session_id().as_deref(), Some("abc123"));

    let decoded: Vec<_> = events
        .lock()
        .expect("events lock")
        .iter()
        .filter_map(|event| match event {
            SessionEvent::Decoded { result, .. } => Some((result.record_count(), result.complete)),
            _ => None,
        })
        .collect();
    assert_eq!(decoded, vec![(0, false), (1, true)]);

    let outcome = session
        .submit(threat_model_turn("more"))
        .await
        .expect("valid input");
    assert!(matches!(outcome, TurnOutcome::Completed(_)));

    first.assert_calls(1);
    continuation.assert_calls(1);
    let snapshot = session.snapshot();
    assert_eq!(snapshot.turn_count, 2);
    assert_eq!(snapshot.phase, SessionPhase::Done);
    assert_eq!(snapshot.session_id.as_deref(), Some("abc123"));
}

#[tokio::test]
async fn integration_story_validation_sends_selected_answers_to_scenarios() {
    let server = MockServer::start();
    let questions = server.mock(|when, then| {
        when.method(POST)
            .path("/api/story-validation/questions")
            .json_body(json!({ "input": "As a user I log in" }));
        then.status(200)
            .header("content-type", "text/event-stream")
            .header("X-Chat-ID", "story-1")
            .body(sse(&[
                "[{\"question\":\"Who can log in?\",\"answer\":\"Registered users\"},",
                "{\"question\":\"Is MFA needed?\",\"answer\":\"No\"}]",
            ]));
    });
    let scenarios = server.mock(|when, then| {
        when.method(POST)
            .path("/api/story-validation/scenarios")
            .json_body(json!({
                "input": "As a user I log in",
                "chat_session_id": "story-1",
                "answers": [{ "question": "Is MFA needed?", "answer": "No" }]
            }));
        then.status(200)
            .header("content-type", "text/event-stream")
            .body("data: Scenario: login\n\ndata:  without MFA\n\n");
    });

    let config = SessionConfig::for_endpoint(Endpoint::story_questions());
    let (session, _events) = http_session(&server, config);

    let outcome = session.submit("As a user I log in").await.expect("valid input");
    let TurnOutcome::Completed(summary) = outcome else {
        panic!("questions turn should complete, got {outcome:?}");
    };
    let answered: Vec<QuestionAnswer> = summary.result.records();
    assert_eq!(answered.len(), 2);

    let selected = TurnInput::new("As a user I log in")
        .with_extras(TurnExtras {
            answers: vec![answered[1].clone()],
            ..TurnExtras::default()
        })
        .with_target(Endpoint::story_scenarios(), ExpectedShape::Text);
    let outcome = session.submit(selected).await.expect("valid input");
    let TurnOutcome::Completed(summary) = outcome else {
        panic!("scenarios turn should complete, got {outcome:?}");
    };
    assert_eq!(summary.result.value, json!("Scenario: login without MFA"));

    questions.assert_calls(1);
    scenarios.assert_calls(1);
    assert_eq!(session.session_id().as_deref(), Some("story-1"));
}

#[tokio::test]
async fn integration_validation_error_fails_turn_with_server_detail() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/api/prompt");
        then.status(422)
            .json_body(json!({ "detail": "invalid context" }));
    });
    let (session, events) = http_session(&server, SessionConfig::prompt());

    let outcome = session.submit("hi").await.expect("valid input");

    let expected = StreamError::Request {
        status: 422,
        detail: "invalid context".to_string(),
    };
    assert_eq!(outcome, TurnOutcome::Failed(expected.clone()));
    assert_eq!(session.snapshot().phase, SessionPhase::Failed);
    assert_eq!(session.session_id(), None);

    let failures: Vec<_> = events
        .lock()
        .expect("events lock")
        .iter()
        .filter(|event| matches!(event, SessionEvent::Failed { .. }))
        .cloned()
        .collect();
    assert_eq!(
        failures,
        vec![SessionEvent::Failed {
            attempt: 1,
            error: expected
        }]
    );
}

#[tokio::test]
async fn integration_newer_submission_supersedes_slow_request() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/api/prompt").body_includes("slow");
        then.status(200)
            .header("content-type", "text/event-stream")
            .header("X-Chat-ID", "stale")
            .delay(Duration::from_secs(5))
            .body(sse(&["[{\"title\":\"stale\"}]"]));
    });
    server.mock(|when, then| {
        when.method(POST).path("/api/prompt").body_includes("fast");
        then.status(200)
            .header("content-type", "text/event-stream")
            .header("X-Chat-ID", "fresh")
            .body(sse(&["[{\"title\":\"fresh\"}]"]));
    });
    let (session, events) = http_session(&server, SessionConfig::prompt());

    let started = Instant::now();
    let slow = session.submit("slow");
    let fast = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        session.submit("fast").await
    };
    let (slow, fast) = tokio::join!(slow, fast);

    assert_eq!(slow.expect("valid input"), TurnOutcome::Aborted);
    assert!(matches!(fast, Ok(TurnOutcome::Completed(_))));
    assert!(started.elapsed() < Duration::from_secs(4));
    assert_eq!(session.session_id().as_deref(), Some("fresh"));
    assert_eq!(session.snapshot().turn_count, 1);

    let events = events.lock().expect("events lock").clone();
    assert!(!events
        .iter()
        .any(|event| matches!(event, SessionEvent::Finished { attempt: 1, .. })));
    assert_eq!(
        events
            .iter()
            .filter(|event| matches!(event, SessionEvent::Aborted { attempt: 1 }))
            .count(),
        1
    );
}

#[tokio::test]
async fn integration_turn_deadline_aborts_unresponsive_server() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/api/prompt");
        then.status(200)
            .header("content-type", "text/event-stream")
            .delay(Duration::from_secs(5))
            .body(sse(&["[]"]));
    });
    let mut config = SessionConfig::prompt();
    config.turn_deadline_ms = Some(150);
    let (session, _events) = http_session(&server, config);

    let started = Instant::now();
    let outcome = session.submit("hi").await.expect("valid input");

    assert_eq!(outcome, TurnOutcome::Aborted);
    assert!(started.elapsed() < Duration::from_secs(4));
    assert_eq!(session.snapshot().phase, SessionPhase::Aborted);
}
