use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "medassist")]
#[command(about = "medassist - talk to the clinical assistant from the terminal")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file path (defaults to ~/.config/medassist/config.toml)
    #[arg(short = 'C', long, global = true)]
    pub config: Option<PathBuf>,

    /// Backend origin, e.g. http://localhost:8000 (overrides config and environment)
    #[arg(long, global = true)]
    pub backend: Option<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Send one message and print the reply
    Ask {
        /// Message text
        #[arg(required = true, trailing_var_arg = true)]
        text: Vec<String>,

        /// Continue an existing session
        #[arg(short, long)]
        session: Option<String>,

        /// Scope the question to a patient
        #[arg(short, long)]
        patient: Option<i64>,

        /// Wait for the whole reply instead of streaming it
        #[arg(long)]
        no_stream: bool,
    },

    /// Interactive conversation (/clear, /new, /forget, /quit)
    Chat {
        /// Resume an existing session
        #[arg(short, long)]
        session: Option<String>,

        #[arg(short, long)]
        patient: Option<i64>,
    },

    /// Print the transcript of a session
    History {
        /// Session id
        session: String,
    },

    /// Tool registry
    #[command(subcommand)]
    Tools(ToolsCommand),

    /// Sub-agent registry
    #[command(subcommand)]
    Agents(AgentsCommand),
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum ToolsCommand {
    /// List registered tools
    List,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum AgentsCommand {
    /// List sub-agents
    List,

    /// Enable or disable a sub-agent
    Toggle { id: i64 },

    /// Duplicate a sub-agent
    Clone { id: i64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ask_joins_trailing_words() {
        let cli = Cli::try_parse_from([
            "medassist", "ask", "--patient", "7", "how", "is", "she?",
        ])
        .unwrap();
        match cli.command {
            Commands::Ask { text, patient, no_stream, .. } => {
                assert_eq!(text.join(" "), "how is she?");
                assert_eq!(patient, Some(7));
                assert!(!no_stream);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "medassist", "history", "42", "--backend", "http://localhost:8000", "-v",
        ])
        .unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.backend.as_deref(), Some("http://localhost:8000"));
    }

    #[test]
    fn agents_subcommands() {
        let cli = Cli::try_parse_from(["medassist", "agents", "clone", "3"]).unwrap();
        assert!(matches!(cli.command, Commands::Agents(AgentsCommand::Clone { id: 3 })));
        assert!(Cli::try_parse_from(["medassist", "agents", "toggle"]).is_err());
    }
}
