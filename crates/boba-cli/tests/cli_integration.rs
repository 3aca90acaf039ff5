use std::fs;

use assert_cmd::Command;
use httpmock::prelude::*;
use predicates::prelude::*;
use serde_json::json;
use tempfile::tempdir;

fn binary_command() -> Command {
    let mut command = Command::new(assert_cmd::cargo::cargo_bin!("boba"));
    for name in [
        "BOBA_API_BASE",
        "BOBA_ENDPOINT",
        "BOBA_EXPLORE_KIND",
        "BOBA_PROMPT_ID",
        "BOBA_CONTEXT",
        "BOBA_DOCUMENT",
        "BOBA_SHAPE",
        "BOBA_PAYLOAD",
        "BOBA_INPUT",
    ] {
        command.env_remove(name);
    }
    command
}

fn sse(deltas: &[&str]) -> String {
    deltas
        .iter()
        .map(|delta| format!("data: {}\n\n", json!({ "data": delta })))
        .collect()
}

#[test]
fn integration_one_shot_prompt_prints_records_as_they_complete() {
    let server = MockServer::start();
    let prompt = server.mock(|when, then| {
        when.method(POST)
            .path("/api/prompt")
            .json_body(json!({
                "userinput": "Describe risk X",
                "promptid": "guided-threat-modelling"
            }));
        then.status(200)
            .header("content-type", "text/event-stream")
            .header("X-Chat-ID", "abc123")
            .body(sse(&["[{\"title\":\"R1\"", "},{\"title\":", "\"R2\"}]"]));
    });

    let mut cmd = binary_command();
    cmd.args([
        "--api-base",
        &server.base_url(),
        "--prompt-id",
        "guided-threat-modelling",
        "--context",
        "base",
        "--input",
        "Describe risk X",
    ]);

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("1. R1"))
        .stdout(predicate::str::contains("2. R2"));
    prompt.assert_calls(1);
}

#[test]
fn integration_interactive_turns_reuse_session_id_until_new_conversation() {
    let server = MockServer::start();
    let continuation = server.mock(|when, then| {
        when.method(POST)
            .path("/api/prompt")
            .body_includes("\"chatSessionId\":\"abc123\"");
        then.status(200)
            .header("content-type", "text/event-stream")
            .body(sse(&["[{\"title\":\"R2\"}]"]));
    });
    let first_turn = server.mock(|when, then| {
        when.method(POST)
            .path("/api/prompt")
            .body_includes("\"promptid\":\"guided-threat-modelling\"");
        then.status(200)
            .header("content-type", "text/event-stream")
            .header("X-Chat-ID", "abc123")
            .body(sse(&["[{\"title\":\"R1\"}]"]));
    });

    let mut cmd = binary_command();
    cmd.args([
        "--api-base",
        &server.base_url(),
        "--prompt-id",
        "guided-threat-modelling",
    ])
    .write_stdin("Describe risk X\nmore\n/status\n/new\n/status\nagain\n/quit\n");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("1. R1"))
        .stdout(predicate::str::contains("session: id=abc123 turns=2 phase=done"))
        .stdout(predicate::str::contains("started a new conversation"))
        .stdout(predicate::str::contains("session: id=none turns=0 phase=not_started"));
    first_turn.assert_calls(2);
    continuation.assert_calls(1);
}

#[test]
fn integration_request_error_detail_is_reported() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/api/prompt");
        then.status(422)
            .json_body(json!({ "detail": "invalid context" }));
    });

    let mut cmd = binary_command();
    cmd.args(["--api-base", &server.base_url(), "--input", "hi"]);

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("invalid context"));
}

#[test]
fn functional_explore_text_mode_streams_plain_text() {
    let server = MockServer::start();
    let explore = server.mock(|when, then| {
        when.method(POST)
            .path("/api/requirements/explore")
            .json_body(json!({
                "input": "elaborate\n\nA login form",
                "context": "story-42"
            }));
        then.status(200)
            .header("content-type", "text/plain")
            .header("X-Chat-ID", "s-1")
            .body("Given a user\nWhen they log in");
    });

    let temp = tempdir().expect("tempdir");
    let image = temp.path().join("image.txt");
    fs::write(&image, "A login form\n").expect("write image description");

    let mut cmd = binary_command();
    cmd.args([
        "--api-base",
        &server.base_url(),
        "--endpoint",
        "explore",
        "--explore-kind",
        "requirements",
        "--context",
        "story-42",
        "--shape",
        "text",
        "--image-description-file",
        image.to_str().expect("utf-8 path"),
        "--input",
        "elaborate",
    ]);

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Given a user\nWhen they log in"));
    explore.assert_calls(1);
}

#[test]
fn integration_story_validation_builds_scenarios_from_selected_questions() {
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
            .body("data: Scenario: login without MFA\n\n");
    });

    let mut cmd = binary_command();
    cmd.args([
        "--api-base",
        &server.base_url(),
        "--endpoint",
        "story-validation",
    ])
    .write_stdin("As a user I log in\n/scenarios 2\n/quit\n");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("1. Who can log in?"))
        .stdout(predicate::str::contains("2. Is MFA needed?"))
        .stdout(predicate::str::contains("Scenario: login without MFA"));
    questions.assert_calls(1);
    scenarios.assert_calls(1);
}

#[test]
fn regression_explore_endpoint_requires_kind() {
    let mut cmd = binary_command();
    cmd.args(["--endpoint", "explore", "--input", "hi"]);

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("--explore-kind is required"));
}
