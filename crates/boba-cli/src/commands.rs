use boba_session::SessionSnapshot;
use boba_stream::QuestionAnswer;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SlashCommand {
    New,
    Status,
    Help,
    Quit,
    /// Story validation: 1-based question numbers to answer, empty for all.
    Scenarios(Vec<usize>),
}

pub(crate) const HELP_TEXT: &str = concat!(
    "commands:\n",
    "  /new              start a new conversation\n",
    "  /status           show the session id, turn count and phase\n",
    "  /scenarios [n..]  story validation: scenarios from the numbered questions (default all)\n",
    "  /help             show this help\n",
    "  /quit             exit",
);

pub(crate) fn parse_slash_command(line: &str) -> Result<SlashCommand, String> {
    let mut words = line.split_whitespace();
    let name = words.next().unwrap_or_default();
    match name {
        "/scenarios" => words
            .flat_map(|word| word.split(','))
            .filter(|word| !word.is_empty())
            .map(|word| match word.parse::<usize>() {
                Ok(number) if number > 0 => Ok(number),
                _ => Err(format!("invalid question number: {word}")),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(SlashCommand::Scenarios),
        "/new" => Ok(SlashCommand::New),
        "/status" => Ok(SlashCommand::Status),
        "/help" => Ok(SlashCommand::Help),
        "/quit" | "/exit" => Ok(SlashCommand::Quit),
        other => Err(format!("unknown command: {other} (try /help)")),
    }
}

/// Picks the answered questions to send, by 1-based number.
pub(crate) fn select_answers(
    questions: &[QuestionAnswer],
    numbers: &[usize],
) -> Result<Vec<QuestionAnswer>, String> {
    if questions.is_empty() {
        return Err("no clarifying questions yet; describe a user story first".to_string());
    }
    if numbers.is_empty() {
        return Ok(questions.to_vec());
    }
    numbers
        .iter()
        .map(|number| {
            number
                .checked_sub(1)
                .and_then(|index| questions.get(index))
                .cloned()
                .ok_or_else(|| format!("no question numbered {number}"))
        })
        .collect()
}

pub(crate) fn render_status(snapshot: &SessionSnapshot) -> String {
    format!(
        "session: id={} turns={} phase={}",
        snapshot.session_id.as_deref().unwrap_or("none"),
        snapshot.turn_count,
        snapshot.phase.as_str()
    )
}
