use anyhow::Result;
use tracing::warn;

use crate::config::Settings;
use crate::services::armado::ArmadoClient;
use crate::services::ledger::LedgerClient;
use crate::services::payment_modes::PaymentModeMap;
use crate::services::pennylane::PennylaneClient;
use crate::services::tempo::TempoClient;
use crate::services::transport::{HttpTransport, RetryPolicy};

const TEMPO_PROBE_ID: u64 = 1;

fn report(name: &str, result: std::result::Result<String, String>) -> bool {
    match result {
        Ok(detail) => {
            println!("  [ok] {:<10} {}", name, detail);
            true
        }
        Err(detail) => {
            println!("  [KO] {:<10} {}", name, detail);
            warn!(system = name, error = %detail, "connectivity check failed");
            false
        }
    }
}

/// Probe every configured system once. Returns whether all of them answered.
pub async fn check(settings: &Settings) -> Result<bool> {
    let transport = |label: &'static str| {
        HttpTransport::new(label, settings.http_timeout).with_policy(RetryPolicy::immediate())
    };
    let mut healthy = true;
    println!("Connectivity");

    let pennylane = PennylaneClient::new(settings.pennylane.clone(), transport("pennylane"));
    healthy &= report(
        "pennylane",
        pennylane
            .fetch_page(None)
            .await
            .map(|page| format!("{} invoices on the first page", page.items.len()))
            .map_err(|e| e.to_string()),
    );

    if let Some(tempo) = &settings.tempo {
        let client = TempoClient::new(tempo.clone(), transport("tempo"));
        healthy &= report(
            "tempo",
            client
                .get_invoice(TEMPO_PROBE_ID)
                .await
                .map(|found| match found {
                    Some(_) => format!("dossier {} reachable", tempo.dossier),
                    None => format!("dossier {} reachable (probe invoice absent)", tempo.dossier),
                })
                .map_err(|e| e.to_string()),
        );
    }

    if let Some(armado) = &settings.armado {
        let client = ArmadoClient::new(
            armado.clone(),
            HttpTransport::new("armado", armado.timeout).with_policy(RetryPolicy::immediate()),
            PaymentModeMap::default(),
        );
        healthy &= report(
            "armado",
            client
                .test_connection()
                .await
                .map(|_| "api key accepted".to_string())
                .map_err(|e| e.to_string()),
        );
    }

    if let Some(sheets) = &settings.sheets {
        let client = LedgerClient::new(sheets.clone(), transport("sheets"));
        healthy &= report(
            "sheets",
            client
                .column_len("A")
                .await
                .map(|rows| format!("{} rows in '{}'", rows, sheets.sheet_name))
                .map_err(|e| e.to_string()),
        );
    }

    Ok(healthy)
}
