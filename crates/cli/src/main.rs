//! `switchboard` - supervisor console for the operator exchange

mod commands;
mod config;
mod logging;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use colored::Colorize;
use switchboard_client_core::SupervisoryAction;

use crate::config::ConsoleConfig;
use crate::logging::{parse_log_level, setup_logging, LoggingConfig};

/// Supervisor console: list live calls and monitor, whisper or barge into them
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (defaults to the platform config dir)
    #[arg(short, long, env = "SWITCHBOARD_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "SWITCHBOARD_LOG", default_value = "warn", global = true)]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Include source file and line in log lines
    #[arg(long, global = true)]
    log_source: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the current live calls once
    Calls {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Keep polling and reprint the live calls on every change
    Watch {
        /// Override the poll interval in milliseconds
        #[arg(long)]
        interval_ms: Option<u64>,
    },

    /// Register the extension and report registration changes until interrupted
    Register,

    /// Listen to a live call without being heard
    Monitor {
        /// Channel (or call key) as listed by `calls`
        #[arg(long)]
        channel: String,
    },

    /// Speak to the agent of a live call; the caller does not hear you
    Whisper {
        /// Channel (or call key) as listed by `calls`
        #[arg(long)]
        channel: String,
    },

    /// Join a live call; both parties hear you
    Barge {
        /// Channel (or call key) as listed by `calls`
        #[arg(long)]
        channel: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match parse_log_level(&cli.log_level) {
        Ok(level) => level,
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = setup_logging(
        LoggingConfig::new(level)
            .with_json(cli.json_logs)
            .with_file_info(cli.log_source),
    ) {
        eprintln!("{} {}", "error:".red().bold(), e);
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = ConsoleConfig::load(cli.config.as_deref())?;
    match cli.command {
        Command::Calls { json } => commands::calls(&config, json).await,
        Command::Watch { interval_ms } => commands::watch(&config, interval_ms).await,
        Command::Register => commands::register(&config).await,
        Command::Monitor { channel } => commands::supervise(&config, SupervisoryAction::Monitor, &channel).await,
        Command::Whisper { channel } => commands::supervise(&config, SupervisoryAction::Whisper, &channel).await,
        Command::Barge { channel } => commands::supervise(&config, SupervisoryAction::Barge, &channel).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_log_flags_are_global() {
        let cli = Cli::try_parse_from(["switchboard", "calls", "--log-source", "--json-logs"]).unwrap();
        assert!(cli.log_source);
        assert!(cli.json_logs);
        assert_eq!(cli.log_level, "warn");
    }

    #[test]
    fn test_barge_requires_channel() {
        assert!(Cli::try_parse_from(["switchboard", "barge"]).is_err());
        let cli = Cli::try_parse_from(["switchboard", "barge", "--channel", "PJSIP/205-0000001a"]).unwrap();
        assert!(matches!(cli.command, Command::Barge { ref channel } if channel == "PJSIP/205-0000001a"));
    }
}
