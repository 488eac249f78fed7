//! Direct, raising calls into a single target, for operators fixing one invoice by hand.

use anyhow::{anyhow, Context, Result};
use chrono::{Local, NaiveDate, NaiveDateTime};
use clap::ValueEnum;
use tracing::warn;
use rust_decimal::Decimal;

use crate::config::{ConfigError, Settings};
use crate::services::armado::ArmadoClient;
use crate::services::payment_modes::PaymentModeMap;
use crate::services::tempo::{Settlement, TempoClient};
use crate::services::transport::HttpTransport;
use crate::utils::parse_yyyymmdd;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SettleKind {
    Full,
    Partial,
    FixPartials,
    Close,
}

pub fn build_settlement(
    kind: SettleKind,
    amount: Option<Decimal>,
    date: Option<NaiveDate>,
    today: NaiveDate,
) -> Result<Settlement> {
    let required = || amount.ok_or_else(|| anyhow!("--amount is required for this settlement"));
    Ok(match kind {
        SettleKind::Full => Settlement::Full {
            date: date.unwrap_or(today),
        },
        SettleKind::Partial => Settlement::Partial {
            amount: required()?,
            date,
        },
        SettleKind::FixPartials => Settlement::FixPartialTotal {
            amount: required()?,
            date,
        },
        SettleKind::Close => Settlement::PartialAndClose {
            amount: required()?,
            date: date.unwrap_or(today),
        },
    })
}

pub async fn settle(
    settings: &Settings,
    invoice: u64,
    kind: SettleKind,
    amount: Option<Decimal>,
    date: Option<&str>,
) -> Result<()> {
    let tempo = settings
        .tempo
        .clone()
        .ok_or_else(|| anyhow!("Tempo is not configured"))?;
    let date = match date {
        Some(raw) => Some(
            parse_yyyymmdd(raw).ok_or_else(|| anyhow!("invalid date '{}', expected YYYYMMDD", raw))?,
        ),
        None => None,
    };
    let settlement = build_settlement(kind, amount, date, Local::now().date_naive())?;

    let client = TempoClient::new(tempo, HttpTransport::new("tempo", settings.http_timeout));
    client
        .record_settlement(invoice, &settlement)
        .await
        .with_context(|| format!("{} of invoice {}", settlement.describe(), invoice))?;
    println!("{} recorded for invoice {}", settlement.describe(), invoice);

    match client.get_invoice(invoice).await? {
        Some(detail) => println!("{}", serde_json::to_string_pretty(&detail)?),
        None => println!("invoice {} not found on read-back", invoice),
    }
    Ok(())
}

fn parse_payment_date(raw: &str) -> Result<NaiveDateTime> {
    let raw = raw.trim();
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d").map(|d| d.and_time(chrono::NaiveTime::MIN))
        })
        .map_err(|_| anyhow!("invalid date '{}', expected ISO-8601", raw))
}

pub async fn bill_sync(
    settings: &Settings,
    reference: &str,
    mode: &str,
    date: Option<&str>,
) -> Result<()> {
    let armado = settings
        .armado
        .clone()
        .ok_or_else(|| anyhow!("Armado is not configured"))?;
    let payment_date = match date {
        Some(raw) => parse_payment_date(raw)?,
        None => Local::now().naive_local(),
    };

    let modes = PaymentModeMap::with_extra(&armado.extra_modes);
    let timeout = armado.timeout;
    let client = ArmadoClient::new(armado, HttpTransport::new("armado", timeout), modes);
    let bill_id = client
        .sync_payment(reference, mode, payment_date)
        .await
        .with_context(|| format!("payment sync of reference {}", reference))?;
    println!("bill {} (reference {}) marked paid by {}", bill_id, reference, mode);
    Ok(())
}

/// Extra payment modes from the configuration. Unreadable configuration falls back to the defaults.
pub fn configured_modes(settings: Result<Settings, ConfigError>) -> Vec<(String, i32)> {
    match settings {
        Ok(settings) => settings
            .armado
            .map(|armado| armado.extra_modes)
            .unwrap_or_default(),
        Err(err) => {
            warn!(error = %err, "configuration unreadable, listing default modes only");
            Vec::new()
        }
    }
}

pub fn modes(extra: &[(String, i32)]) -> Result<()> {
    let modes = PaymentModeMap::with_extra(extra);
    for mode in modes.known_modes() {
        println!("{:<16} {}", mode, modes.resolve(&mode)?);
    }
    Ok(())
}
