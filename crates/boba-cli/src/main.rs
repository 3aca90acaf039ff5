mod cli_args;
mod commands;
mod render;

use std::{future::Future, io::Write, sync::Mutex};

use anyhow::{bail, Context, Result};
use boba_session::{ChatSession, SessionEvent, TurnInput, TurnOutcome, TurnSummary};
use boba_stream::{
    Endpoint, EndpointKind, ExpectedShape, HttpStreamTransport, QuestionAnswer, StreamTransport,
    TurnExtras,
};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::cli_args::Cli;
use crate::commands::{
    parse_slash_command, render_status, select_answers, SlashCommand, HELP_TEXT,
};
use crate::render::{render_shared, write_rendered, TurnRenderer};

struct TurnTemplate {
    extras: TurnExtras,
    image_description: Option<String>,
}

impl TurnTemplate {
    fn turn(&self, text: &str, first_turn: bool) -> TurnInput {
        let input = TurnInput::new(text).with_extras(self.extras.clone());
        match (&self.image_description, first_turn) {
            (Some(description), true) => input.with_image_description(description.clone()),
            _ => input,
        }
    }

    fn scenarios_turn(&self, story: &StoryDraft, answers: Vec<QuestionAnswer>) -> TurnInput {
        TurnInput::new(story.input.clone())
            .with_extras(TurnExtras {
                answers,
                ..self.extras.clone()
            })
            .with_target(Endpoint::story_scenarios(), ExpectedShape::Text)
    }
}

/// The user story and clarifying questions from the latest questions turn.
#[derive(Debug, Default)]
struct StoryDraft {
    input: String,
    questions: Vec<QuestionAnswer>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let config = cli.session_config()?;
    let transport = HttpStreamTransport::new(cli.transport_config())
        .context("failed to create streaming transport")?;
    let template = TurnTemplate {
        extras: cli.turn_extras(),
        image_description: cli.image_description()?,
    };

    let mut session = ChatSession::new(transport, config);
    let renderer = Mutex::new(TurnRenderer::default());
    session.subscribe(move |event| {
        if let SessionEvent::SessionEstablished { session_id, .. } = event {
            tracing::info!(session_id = %session_id, "session established");
        }
        write_rendered(&render_shared(&renderer, event));
    });

    if let Some(input) = cli.input.as_deref() {
        let outcome = run_turn_with_cancellation(
            &session,
            template.turn(input, true),
            tokio::signal::ctrl_c(),
        )
        .await?;
        return match outcome {
            TurnOutcome::Completed(_) => Ok(()),
            TurnOutcome::Aborted => {
                println!("\nrequest cancelled\n");
                Ok(())
            }
            TurnOutcome::Failed(error) => bail!("request failed: {error}"),
        };
    }

    run_interactive(&session, &template, cli.allow_empty_input).await
}

async fn run_interactive<T: StreamTransport>(
    session: &ChatSession<T>,
    template: &TurnTemplate,
    allow_empty_input: bool,
) -> Result<()> {
    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    let story_mode = session.config().endpoint.kind == EndpointKind::StoryValidation;
    let mut story = StoryDraft::default();

    loop {
        print!("boba> ");
        std::io::stdout()
            .flush()
            .context("failed to flush stdout")?;

        let Some(line) = lines.next_line().await? else {
            break;
        };

        let trimmed = line.trim();
        if trimmed.is_empty() && !allow_empty_input {
            continue;
        }

        if trimmed.starts_with('/') {
            match parse_slash_command(trimmed) {
                Ok(SlashCommand::Quit) => break,
                Ok(SlashCommand::New) => {
                    session.reset();
                    story = StoryDraft::default();
                    println!("started a new conversation");
                }
                Ok(SlashCommand::Scenarios(_)) if !story_mode => {
                    println!("/scenarios needs --endpoint story-validation");
                }
                Ok(SlashCommand::Scenarios(numbers)) => {
                    match select_answers(&story.questions, &numbers) {
                        Ok(answers) => {
                            let turn = template.scenarios_turn(&story, answers);
                            report_turn(
                                run_turn_with_cancellation(session, turn, tokio::signal::ctrl_c())
                                    .await,
                            );
                        }
                        Err(message) => println!("{message}"),
                    }
                }
                Ok(SlashCommand::Status) => println!("{}", render_status(&session.snapshot())),
                Ok(SlashCommand::Help) => println!("{HELP_TEXT}"),
                Err(message) => println!("{message}"),
            }
            continue;
        }

        let first_turn = session.session_id().is_none();
        let outcome = run_turn_with_cancellation(
            session,
            template.turn(trimmed, first_turn),
            tokio::signal::ctrl_c(),
        )
        .await;
        if let Some(summary) = report_turn(outcome) {
            if story_mode {
                story = StoryDraft {
                    input: trimmed.to_string(),
                    questions: summary.result.records(),
                };
            }
        }
    }

    Ok(())
}

fn report_turn(outcome: Result<TurnOutcome>) -> Option<TurnSummary> {
    match outcome {
        Ok(TurnOutcome::Completed(summary)) => Some(summary),
        Ok(TurnOutcome::Aborted) => {
            println!("\nrequest cancelled\n");
            None
        }
        Ok(TurnOutcome::Failed(error)) => {
            eprintln!("request failed: {error}");
            None
        }
        Err(error) => {
            eprintln!("error: {error}");
            None
        }
    }
}

/// Drives one turn, cancelling it when `cancellation_signal` resolves first.
/// The turn is still awaited after cancellation so it settles as aborted.
async fn run_turn_with_cancellation<T, F>(
    session: &ChatSession<T>,
    input: TurnInput,
    cancellation_signal: F,
) -> Result<TurnOutcome>
where
    T: StreamTransport,
    F: Future,
{
    let turn = session.submit(input);
    tokio::pin!(turn);
    tokio::pin!(cancellation_signal);

    let outcome = tokio::select! {
        biased;
        outcome = &mut turn => outcome,
        _ = &mut cancellation_signal => {
            session.cancel();
            turn.await
        }
    };
    Ok(outcome?)
}

fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}
