//! Terminal rendering and the console's audio output

use colored::Colorize;
use switchboard_client_core::media::{AudioOutput, MediaStream, PlaybackError};
use switchboard_client_core::supervisor::{derive_extension, SupervisoryAction};
use switchboard_client_core::{CallDirection, LiveCall};
use tabled::settings::Style;
use tabled::{Table, Tabled};
use tracing::info;

#[derive(Tabled)]
struct CallRow {
    #[tabled(rename = "Call")]
    key: String,
    #[tabled(rename = "Channel")]
    channel: String,
    #[tabled(rename = "Direction")]
    direction: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Agent")]
    agent: String,
    #[tabled(rename = "Ext")]
    extension: String,
    #[tabled(rename = "Duration")]
    duration: String,
    #[tabled(rename = "DID")]
    did: String,
}

impl From<&LiveCall> for CallRow {
    fn from(call: &LiveCall) -> Self {
        let direction = match call.direction() {
            CallDirection::Outgoing => "↗ outgoing".to_string(),
            CallDirection::Inbound => "↙ inbound".to_string(),
        };
        Self {
            key: call.key().to_string(),
            channel: call.channel.clone(),
            direction,
            status: call.status.clone().unwrap_or_default(),
            agent: call.agent.as_ref().map(|a| a.label()).unwrap_or_default(),
            extension: derive_extension(call).unwrap_or_else(|| "-".into()),
            duration: call.duration.clone().unwrap_or_default(),
            did: call.did.clone().unwrap_or_default(),
        }
    }
}

/// Render live calls as a table
pub fn calls_table(calls: &[LiveCall]) -> String {
    if calls.is_empty() {
        return "No live calls".dimmed().to_string();
    }
    Table::new(calls.iter().map(CallRow::from))
        .with(Style::rounded())
        .to_string()
}

/// Coloured label for an action
pub fn action_label(action: SupervisoryAction) -> String {
    match action {
        SupervisoryAction::Monitor => "MONITOR".cyan().bold().to_string(),
        SupervisoryAction::Whisper => "WHISPER".yellow().bold().to_string(),
        SupervisoryAction::Barge => "BARGE".red().bold().to_string(),
    }
}

/// Audio output that reports bindings on the terminal
///
/// The console has no playback device of its own; it shows which remote
/// stream a session is bound to so the operator can tell media arrived.
pub struct TerminalOutput {
    action: SupervisoryAction,
}

impl TerminalOutput {
    pub fn new(action: SupervisoryAction) -> Self {
        Self { action }
    }
}

impl AudioOutput for TerminalOutput {
    fn set_source(&self, stream: Option<MediaStream>) {
        match stream {
            Some(stream) => {
                info!("{} audio bound to stream {}", self.action, stream.id);
                eprintln!(
                    "{} {} remote audio: {} ({} track(s))",
                    action_label(self.action),
                    "🔊".green(),
                    stream.id,
                    stream.tracks.len()
                );
            }
            None => {
                info!("{} audio released", self.action);
                eprintln!("{} {} audio released", action_label(self.action), "🔇".dimmed());
            }
        }
    }

    fn play(&self) -> Result<(), PlaybackError> {
        Ok(())
    }
}
