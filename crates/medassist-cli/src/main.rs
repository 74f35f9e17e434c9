use anyhow::{Context, Result};
use clap::Parser;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use medassist_cli::cli::{Cli, Commands};
use medassist_cli::commands;
use medassist_config::ConfigLoader;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = ConfigLoader::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(origin) = cli.backend {
        config.backend.origin = Some(origin);
        ConfigLoader::validate(&config).context("Invalid --backend")?;
    }

    // Replies go to stdout, logs to stderr
    let level = if cli.verbose { "debug" } else { config.logging.level.as_str() };
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    debug!(origin = ?config.backend.origin(), stream = config.backend.stream, "Configuration loaded");

    match cli.command {
        Commands::Ask {
            text,
            session,
            patient,
            no_stream,
        } => commands::ask::execute(config, text.join(" "), session, patient, no_stream).await?,

        Commands::Chat { session, patient } => commands::chat::execute(config, session, patient).await?,

        Commands::History { session } => commands::history::execute(config, session).await?,

        Commands::Tools(cmd) => commands::registry::tools(config, cmd).await?,

        Commands::Agents(cmd) => commands::registry::agents(config, cmd).await?,
    }

    Ok(())
}
