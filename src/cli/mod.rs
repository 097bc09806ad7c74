//! Command-line surface.

pub mod doctor;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::bootstrap::{self, Runtime};
use crate::channels::{self, ReplChannel};
use crate::config::Config;

#[derive(Debug, Parser)]
#[command(name = "chainpilot", version, about = "Confirmation-gated on-chain operations")]
pub struct Cli {
    /// TOML settings file (defaults to ~/.chainpilot/config.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true, env = "CHAINPILOT_LOG_JSON")]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Interactive session (default).
    Repl {
        /// Session identifier; pending requests are tracked per session.
        #[arg(long, default_value = "default")]
        session: String,

        /// Send one message and exit.
        #[arg(short, long)]
        message: Option<String>,
    },
    /// Print the signing account address.
    Address,
    /// Check configuration, endpoints and contracts.
    Doctor {
        /// Exit non-zero when any check fails.
        #[arg(long)]
        strict: bool,
    },
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        bootstrap::init_tracing(self.log_json);
        let config_path = self.config.as_deref();

        match self.command.unwrap_or(Command::Repl {
            session: "default".to_string(),
            message: None,
        }) {
            Command::Doctor { strict } => {
                doctor::run_doctor_command(Config::from_env(config_path), strict).await
            }
            Command::Address => {
                let config = Config::from_env(config_path)?;
                let runtime = Runtime::assemble(&config).await?;
                println!("{}", runtime.client.address());
                Ok(())
            }
            Command::Repl { session, message } => {
                let config = Config::from_env(config_path)?;
                let runtime = Runtime::assemble(&config).await?;
                let channel = match message {
                    Some(message) => ReplChannel::with_message(session.clone(), message),
                    None => ReplChannel::new(session.clone()),
                };
                channels::serve(&channel, &runtime, &session).await?;
                Ok(())
            }
        }
    }
}
