//! r2copilot terminal chat
//!
//! Keeps the conversation transcript locally and posts each question,
//! together with the transcript, to a running r2copilot server.

use chrono::{Local, NaiveDate};
use r2copilot::api::{ErrorResponse, ExchangeResponse};
use r2copilot::ConversationTurn;
use serde_json::json;
use std::io::{self, BufRead, Write};
use std::time::Duration;

const DEFAULT_SERVER_URL: &str = "http://localhost:8501";

/// Longer than the server's exchange bound plus teardown
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

fn greeting(today: NaiveDate) -> String {
    format!(
        "Hello! Today is {}. Ask me anything about the binary loaded in radare2.",
        today.format("%A, %B %d, %Y")
    )
}

fn elapsed_caption(seconds: f64) -> String {
    format!("Elapsed time: {seconds:.2} seconds.")
}

/// Post one exchange. `Err` carries text to show instead of an answer.
fn ask(
    agent: &ureq::Agent,
    url: &str,
    question: &str,
    history: &[ConversationTurn],
) -> Result<ExchangeResponse, String> {
    let body = json!({"question": question, "history": history});
    match agent.post(url).send_json(body) {
        Ok(resp) => resp
            .into_json::<ExchangeResponse>()
            .map_err(|e| format!("Unreadable server reply: {e}")),
        Err(ureq::Error::Status(code, resp)) => Err(resp
            .into_json::<ErrorResponse>()
            .map_or_else(|_| format!("Server error (HTTP {code})"), |e| e.error.message)),
        Err(ureq::Error::Transport(e)) => Err(format!("Cannot reach r2copilot server: {e}")),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(io::stderr)
        .init();

    let base = std::env::var("R2COPILOT_URL").unwrap_or_else(|_| DEFAULT_SERVER_URL.to_string());
    let url = format!("{}/api/exchange", base.trim_end_matches('/'));
    let agent = ureq::AgentBuilder::new().timeout(REQUEST_TIMEOUT).build();
    tracing::debug!(url = %url, "Using r2copilot server");

    let mut history = vec![ConversationTurn::ai(greeting(Local::now().date_naive()))];
    let mut stdout = io::stdout();
    writeln!(stdout, "AI: {}", history[0].content())?;

    let stdin = io::stdin();
    loop {
        write!(stdout, "> ")?;
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let question = line.trim();
        if question.is_empty() {
            continue;
        }

        history.push(ConversationTurn::human(question));
        writeln!(stdout, "Thinking...")?;

        match ask(&agent, &url, question, &history) {
            Ok(reply) => {
                writeln!(stdout, "AI: {}", reply.text)?;
                writeln!(stdout, "{}", elapsed_caption(reply.elapsed_seconds))?;
                history.push(ConversationTurn::ai(reply.text));
            }
            Err(message) => writeln!(stdout, "Error: {message}")?,
        }
    }

    Ok(())
}
