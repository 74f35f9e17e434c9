use anyhow::{bail, Result};
use medassist_client::ResumeOutcome;
use medassist_config::AssistantConfig;
use medassist_core::SessionId;

use crate::render::TranscriptPrinter;

pub async fn execute(config: AssistantConfig, session: String) -> Result<()> {
    let id: SessionId = session.parse()?;
    let controller = super::build_controller(&config, None);

    match controller.resume(id.clone()).await? {
        ResumeOutcome::Resumed { .. } => {}
        _ => {
            let snapshot = controller.snapshot();
            match snapshot.last_error {
                Some(error) => bail!("Could not load session {}: {}", id, error),
                None => bail!("Session {} not found", id),
            }
        }
    }

    let mut printer = TranscriptPrinter::stdout();
    for message in controller.snapshot().messages {
        printer.message(&message)?;
    }
    Ok(())
}
