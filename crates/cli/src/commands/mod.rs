//! Subcommand implementations and the wiring they share.

pub mod ask;
pub mod chat;
pub mod config_cmd;
pub mod doctor;
pub mod normalize;

use std::sync::Arc;

use banter_agent::{ChatSession, ResponseGenerator};
use banter_config::AppConfig;
use banter_core::error::Error;
use tracing::error;

/// Speaker id recorded for the assistant's own turns.
pub const BOT_SPEAKER_ID: i64 = 1;

/// Shown to the user for any failure; the details go to the log.
pub const APOLOGY: &str = "Sorry, I couldn't come up with a reply just now. Please try again in a moment.";

/// Wire backend, generator, and history store from configuration.
pub async fn build_session(config: &AppConfig) -> Result<ChatSession, Error> {
    let backend = banter_providers::build_from_config(config);
    let generator = Arc::new(ResponseGenerator::from_config(config, backend)?);
    let store = banter_history::open(&config.history).await?;
    Ok(ChatSession::from_config(
        config,
        generator,
        store,
        BOT_SPEAKER_ID,
    ))
}

/// Log a failed generation with its kind and print the apology.
pub fn report_failure(err: &Error) {
    error!(kind = %err.kind(), error = %err, "Could not produce a reply");
    eprintln!("{APOLOGY}");
}
