#![allow(dead_code)]

use std::time::Duration;

use pennysync::config::{ArmadoSettings, PennylaneSettings, SheetsSettings, TempoSettings};
use pennysync::services::armado::ArmadoClient;
use pennysync::services::ledger::{LedgerClient, RateLimitRecovery};
use pennysync::services::payment_modes::PaymentModeMap;
use pennysync::services::pennylane::PennylaneClient;
use pennysync::services::tempo::TempoClient;
use pennysync::services::transport::{HttpTransport, RetryPolicy};

pub const TEMPO_BASIC_AUTH: &str = "Basic c3luYzpzZWNyZXQ=";

pub fn transport(label: &'static str) -> HttpTransport {
    HttpTransport::new(label, Duration::from_secs(5)).with_policy(RetryPolicy::immediate())
}

pub fn pennylane(base_url: &str) -> PennylaneClient {
    PennylaneClient::new(
        PennylaneSettings {
            api_key: "pl-key".to_string(),
            base_url: base_url.to_string(),
            page_size: 2,
        },
        transport("pennylane"),
    )
}

pub fn tempo(base_url: &str) -> TempoClient {
    TempoClient::new(
        TempoSettings {
            base_url: base_url.to_string(),
            dossier: "D01".to_string(),
            username: "sync".to_string(),
            password: "secret".to_string(),
        },
        transport("tempo"),
    )
}

pub fn armado(base_url: &str) -> ArmadoClient {
    ArmadoClient::new(
        ArmadoSettings {
            api_key: "ar-key".to_string(),
            base_url: base_url.to_string(),
            timeout: Duration::from_secs(5),
            payment_mode: "virement".to_string(),
            extra_modes: Vec::new(),
        },
        transport("armado"),
        PaymentModeMap::default(),
    )
}

pub fn ledger(base_url: &str) -> LedgerClient {
    LedgerClient::new(
        SheetsSettings {
            base_url: base_url.to_string(),
            spreadsheet_id: "sheet-1".to_string(),
            sheet_name: "Suivi".to_string(),
            access_token: "sheets-token".to_string(),
            write_delay: Duration::ZERO,
            client_column: "J".to_string(),
            reference_column: "L".to_string(),
        },
        transport("sheets"),
    )
    .with_recovery(RateLimitRecovery {
        wait: Duration::ZERO,
        retries: 1,
    })
}
