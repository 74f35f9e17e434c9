use anyhow::Result;
use colored::Colorize;
use medassist_client::{ConversationEvent, ResumeOutcome, TurnOutcome};
use medassist_config::AssistantConfig;
use medassist_core::{ChatError, SessionId};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing::debug;

use crate::render::TranscriptPrinter;

/// Line commands understood by the interactive loop
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ChatInput<'a> {
    Message(&'a str),
    Clear,
    NewSession,
    Forget,
    Quit,
    Unknown(&'a str),
}

pub(crate) fn parse_input(line: &str) -> ChatInput<'_> {
    let trimmed = line.trim();
    match trimmed {
        "/clear" => ChatInput::Clear,
        "/new" => ChatInput::NewSession,
        "/forget" => ChatInput::Forget,
        "/quit" | "/exit" => ChatInput::Quit,
        cmd if cmd.starts_with('/') => ChatInput::Unknown(cmd),
        message => ChatInput::Message(message),
    }
}

pub async fn execute(config: AssistantConfig, session: Option<String>, patient: Option<i64>) -> Result<()> {
    let controller = super::build_controller(&config, patient);
    let mut printer = TranscriptPrinter::stdout();

    if let Some(raw) = session {
        let id: SessionId = raw.parse()?;
        match controller.resume(id.clone()).await? {
            ResumeOutcome::Resumed { count } => {
                for message in controller.snapshot().messages {
                    printer.message(&message)?;
                }
                eprintln!("{}", format!("Resumed session {} ({} messages)", id, count).dimmed());
            }
            _ => eprintln!(
                "{}",
                format!("Session {} could not be loaded; starting a new one", id).yellow()
            ),
        }
    }

    eprintln!("{}", "Type a message, or /clear, /new, /forget, /quit".dimmed());
    let mut events = controller.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        eprint!("{} ", "you>".blue().bold());
        let Some(line) = lines.next_line().await? else {
            break;
        };

        match parse_input(&line) {
            ChatInput::Message(text) => {
                let outcome = super::drive_turn(&controller, &mut events, &mut printer, text).await;
                match outcome {
                    Ok(TurnOutcome::Failed(error)) => debug!(error = %error, "Turn failed"),
                    Ok(_) => {}
                    Err(error) => match error.downcast_ref::<ChatError>() {
                        Some(ChatError::EmptyInput) => {}
                        _ => eprintln!("{}", error.to_string().red()),
                    },
                }
            }
            ChatInput::Clear => {
                controller.clear();
                drain(&mut events);
                eprintln!("{}", "Cleared".dimmed());
            }
            ChatInput::NewSession => {
                controller.new_session();
                drain(&mut events);
                eprintln!("{}", "Started a new session".dimmed());
            }
            ChatInput::Forget => {
                match controller.clear_server_history().await {
                    Ok(()) => eprintln!("{}", "Deleted server history".dimmed()),
                    Err(error) => eprintln!("{}", error.user_notice().red()),
                }
                drain(&mut events);
            }
            ChatInput::Quit => break,
            ChatInput::Unknown(cmd) => eprintln!("{}", format!("Unknown command {}", cmd).yellow()),
        }
    }

    if let Some(id) = controller.session().session_id {
        eprintln!("{}", format!("session: {}", id).dimmed());
    }
    Ok(())
}

/// Skip events from local resets; there is nothing to print for them
fn drain(events: &mut broadcast::Receiver<ConversationEvent>) {
    let mut skipped = 0usize;
    while events.try_recv().is_ok() {
        skipped += 1;
    }
    debug!(skipped, "Discarded reset events");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slash_commands() {
        assert_eq!(parse_input("/clear"), ChatInput::Clear);
        assert_eq!(parse_input("  /new \n"), ChatInput::NewSession);
        assert_eq!(parse_input("/exit"), ChatInput::Quit);
        assert_eq!(parse_input("/nope"), ChatInput::Unknown("/nope"));
    }

    #[test]
    fn everything_else_is_a_message() {
        assert_eq!(parse_input(" hello /clear "), ChatInput::Message("hello /clear"));
        assert_eq!(parse_input(""), ChatInput::Message(""));
    }
}
