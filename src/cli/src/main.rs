//! Quorum CLI - run and join live Q&A events from the terminal.

mod client;
mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use uuid::Uuid;

use client::ParticipantKeys;
use commands::{config, event, health, identity};
use output::OutputFormat;

/// Quorum - live audience Q&A
#[derive(Parser)]
#[command(
    name = "quorum",
    version,
    about = "Quorum - live audience Q&A",
    long_about = "CLI tool for creating Q&A events, asking questions and voting on them.",
    propagate_version = true
)]
pub struct Cli {
    /// Output format
    #[arg(short, long, global = true, default_value = "table")]
    output: OutputFormat,

    /// API server URL
    #[arg(long, global = true, env = "QUORUM_API_URL")]
    api_url: Option<String>,

    /// Session key; a fresh one is used per invocation when omitted
    #[arg(long, global = true, env = "QUORUM_SESSION_KEY")]
    session: Option<String>,

    /// Account id, as the authentication layer would forward it
    #[arg(long, global = true, env = "QUORUM_ACCOUNT_ID")]
    account: Option<String>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Event, question and vote operations
    #[command(subcommand)]
    Event(event::EventCommands),

    /// Show the canonical identity for this device
    Whoami,

    /// Check server health
    Health(health::HealthArgs),

    /// Configuration management
    #[command(subcommand)]
    Config(config::ConfigCommands),
}

/// Connection settings shared by every server-facing command.
struct Connection {
    api_url: Option<String>,
    session: Option<String>,
    account: Option<String>,
}

impl Connection {
    fn connect(self) -> Result<client::ApiClient> {
        let api_url = self
            .api_url
            .or_else(|| config::load_value(config::API_URL_KEY))
            .unwrap_or_else(|| "http://localhost:8080".to_string());

        let keys = ParticipantKeys {
            device: config::device_key()?,
            session: self.session.unwrap_or_else(|| Uuid::new_v4().to_string()),
            account: self.account.or_else(|| config::load_value(config::ACCOUNT_KEY)),
        };
        client::ApiClient::new(&api_url, keys)
    }
}

async fn run(cli: Cli) -> Result<()> {
    let format = cli.output;
    let connection = Connection {
        api_url: cli.api_url,
        session: cli.session,
        account: cli.account,
    };

    match cli.command {
        Commands::Event(cmd) => event::execute(cmd, &connection.connect()?, format).await,
        Commands::Whoami => identity::whoami(&connection.connect()?, format).await,
        Commands::Health(args) => health::execute(args, &connection.connect()?, format).await,
        Commands::Config(cmd) => config::execute(cmd, format).await,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    if let Err(e) = run(cli).await {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }

    Ok(())
}
