//! Terminal rendering of conversation events and stored messages

use std::collections::HashSet;
use std::io::{self, Write};

use colored::Colorize;
use medassist_client::ConversationEvent;
use medassist_core::{Message, MessageStatus, Role, ToolCall};

pub struct TranscriptPrinter<W: Write> {
    out: W,
    at_line_start: bool,
    /// Tool calls already announced in the current message
    announced: HashSet<String>,
}

impl TranscriptPrinter<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> TranscriptPrinter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            at_line_start: true,
            announced: HashSet::new(),
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    /// Print the visible part of one live change
    pub fn event(&mut self, event: &ConversationEvent) -> io::Result<()> {
        match event {
            ConversationEvent::MessageAppended { message, .. } => match message.status {
                MessageStatus::Failed => {
                    self.line_break()?;
                    writeln!(self.out, "{}", message.content.red())?;
                }
                MessageStatus::Streaming => {
                    self.line_break()?;
                    self.announced.clear();
                    write!(self.out, "{} ", "assistant>".green().bold())?;
                    self.at_line_start = false;
                }
                _ => {}
            },
            ConversationEvent::ContentDelta { delta, .. } => self.write_text(delta)?,
            ConversationEvent::ReasoningDelta { delta, .. } => {
                write!(self.out, "{}", delta.dimmed().italic())?;
                self.at_line_start = delta.ends_with('\n');
            }
            ConversationEvent::ToolCallUpdated { call, .. } => {
                let first = self.announced.insert(call.id.clone());
                if first || !call.is_pending() {
                    self.line_break()?;
                    writeln!(self.out, "{}", tool_line(call).cyan())?;
                }
            }
            ConversationEvent::ActivityChanged(activity) => {
                if let Some(phase) = activity.phase {
                    self.line_break()?;
                    let line = if activity.detail.is_empty() {
                        format!("· {}", phase)
                    } else {
                        format!("· {}: {}", phase, activity.detail)
                    };
                    writeln!(self.out, "{}", line.dimmed())?;
                }
            }
            ConversationEvent::MessageClosed { status, .. } => {
                if *status == MessageStatus::Interrupted {
                    write!(self.out, " {}", "[interrupted]".yellow())?;
                    self.at_line_start = false;
                }
                self.line_break()?;
            }
            _ => {}
        }
        self.out.flush()
    }

    /// Print a stored message in full
    pub fn message(&mut self, message: &Message) -> io::Result<()> {
        self.line_break()?;
        let label = match message.role {
            Role::User => "you>".blue().bold(),
            Role::Assistant => "assistant>".green().bold(),
        };
        if let Some(reasoning) = &message.reasoning {
            writeln!(self.out, "{}", reasoning.dimmed().italic())?;
        }
        for call in &message.tool_calls {
            writeln!(self.out, "{}", tool_line(call).cyan())?;
        }
        match message.status {
            MessageStatus::Failed => writeln!(self.out, "{} {}", label, message.content.red())?,
            MessageStatus::Interrupted => writeln!(
                self.out,
                "{} {} {}",
                label,
                message.content,
                "[interrupted]".yellow()
            )?,
            _ => writeln!(self.out, "{} {}", label, message.content)?,
        }
        if let Some(usage) = message.usage {
            let line = format!(
                "tokens: {} prompt + {} completion = {}",
                usage.prompt_tokens, usage.completion_tokens, usage.total_tokens
            );
            writeln!(self.out, "{}", line.dimmed())?;
        }
        self.out.flush()
    }

    fn write_text(&mut self, text: &str) -> io::Result<()> {
        if text.is_empty() {
            return Ok(());
        }
        write!(self.out, "{}", text)?;
        self.at_line_start = text.ends_with('\n');
        Ok(())
    }

    fn line_break(&mut self) -> io::Result<()> {
        if !self.at_line_start {
            writeln!(self.out)?;
            self.at_line_start = true;
        }
        Ok(())
    }
}

fn tool_line(call: &ToolCall) -> String {
    match &call.result {
        None => format!("→ {} {}", call.name, serde_json::Value::Object(call.arguments.clone())),
        Some(result) => {
            let mut rendered = result.to_string();
            if rendered.chars().count() > 80 {
                rendered = rendered.chars().take(77).collect::<String>() + "...";
            }
            format!("✓ {} {}", call.name, rendered)
        }
    }
}
