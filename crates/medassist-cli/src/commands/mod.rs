pub mod ask;
pub mod chat;
pub mod history;
pub mod registry;

use std::io::Write;
use std::sync::Arc;

use anyhow::Result;
use medassist_client::{
    ControllerOptions, ConversationController, ConversationEvent, HttpBackend, TurnOutcome,
};
use medassist_config::AssistantConfig;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

use crate::render::TranscriptPrinter;

pub(crate) fn build_controller(config: &AssistantConfig, patient: Option<i64>) -> ConversationController {
    let options = ControllerOptions {
        patient_id: patient,
        ..ControllerOptions::from_config(config)
    };
    let backend = Arc::new(HttpBackend::new(config.backend.clone()));
    ConversationController::new(backend, options)
}

/// Submit one turn, printing events as they arrive
///
/// Ctrl-C cancels the turn and keeps what has been printed.
pub(crate) async fn drive_turn<W: Write>(
    controller: &ConversationController,
    events: &mut broadcast::Receiver<ConversationEvent>,
    printer: &mut TranscriptPrinter<W>,
    text: &str,
) -> Result<TurnOutcome> {
    let submit = controller.submit(text);
    tokio::pin!(submit);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;

    let outcome = loop {
        tokio::select! {
            outcome = &mut submit => break outcome?,
            event = events.recv() => match event {
                Ok(event) => printer.event(&event)?,
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Terminal fell behind the stream"),
                Err(RecvError::Closed) => {}
            },
            _ = &mut ctrl_c, if !interrupted => {
                interrupted = true;
                debug!("Interrupt received, cancelling turn");
                controller.cancel();
            }
        }
    };

    // Events emitted while the turn settled
    while let Ok(event) = events.try_recv() {
        printer.event(&event)?;
    }
    Ok(outcome)
}
