use std::process::ExitCode;

use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use tracing::error;
use tracing_subscriber::EnvFilter;

use pennysync::commands::{check, manual, secrets, sync};
use pennysync::commands::manual::SettleKind;
use pennysync::config::Settings;

#[derive(Parser, Debug)]
#[command(name = "pennysync", version, about = "Push today's invoice payments to the downstream systems")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// One reconciliation pass
    Run,
    /// Run now, then every day at SCHEDULE_AT
    Schedule,
    /// Probe every configured system
    Check,
    /// Record a settlement in Tempo for one invoice
    Settle {
        invoice: u64,
        #[arg(value_enum)]
        kind: SettleKind,
        #[arg(long)]
        amount: Option<Decimal>,
        /// YYYYMMDD
        #[arg(long)]
        date: Option<String>,
    },
    /// Mark one Armado bill as paid
    BillSync {
        reference: String,
        mode: String,
        /// ISO-8601, defaults to now
        #[arg(long)]
        date: Option<String>,
    },
    /// List known payment modes
    Modes,
    /// Seal a credential for the environment file
    SealSecret { name: String, value: String },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,pennysync=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn execute(command: Command) -> anyhow::Result<ExitCode> {
    match command {
        Command::Run => {
            sync::run_once(&Settings::from_env()?).await?;
        }
        Command::Schedule => sync::schedule(&Settings::from_env()?).await?,
        Command::Check => {
            if !check::check(&Settings::from_env()?).await? {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::Settle {
            invoice,
            kind,
            amount,
            date,
        } => {
            let settings = Settings::from_env()?;
            manual::settle(&settings, invoice, kind, amount, date.as_deref()).await?
        }
        Command::BillSync {
            reference,
            mode,
            date,
        } => {
            let settings = Settings::from_env()?;
            manual::bill_sync(&settings, &reference, &mode, date.as_deref()).await?
        }
        Command::Modes => {
            let extra = manual::configured_modes(Settings::from_env());
            manual::modes(&extra)?
        }
        Command::SealSecret { name, value } => secrets::seal_secret(&name, &value)?,
    }
    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    match execute(cli.command).await {
        Ok(code) => code,
        Err(err) => {
            error!(error = %err, "pennysync failed");
            eprintln!("error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}
