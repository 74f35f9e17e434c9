use anyhow::{bail, Result};
use colored::Colorize;
use medassist_client::{ResumeOutcome, TurnOutcome};
use medassist_config::AssistantConfig;
use medassist_core::SessionId;
use tracing::info;

use crate::render::TranscriptPrinter;

pub async fn execute(
    mut config: AssistantConfig,
    text: String,
    session: Option<String>,
    patient: Option<i64>,
    no_stream: bool,
) -> Result<()> {
    if no_stream {
        config.backend.stream = false;
    }
    let controller = super::build_controller(&config, patient);

    if let Some(raw) = session {
        let id: SessionId = raw.parse()?;
        if controller.resume(id.clone()).await? == ResumeOutcome::Fresh {
            eprintln!(
                "{}",
                format!("Session {} could not be loaded; starting a new one", id).yellow()
            );
        }
    }

    let mut events = controller.subscribe();
    let mut printer = TranscriptPrinter::stdout();
    let outcome = super::drive_turn(&controller, &mut events, &mut printer, &text).await?;

    if let Some(id) = controller.session().session_id {
        eprintln!("{}", format!("session: {}", id).dimmed());
    }

    match outcome {
        TurnOutcome::Completed => Ok(()),
        TurnOutcome::Cancelled | TurnOutcome::Superseded => {
            info!("Turn cancelled");
            Ok(())
        }
        TurnOutcome::Failed(error) => bail!("Turn failed: {}", error),
    }
}
