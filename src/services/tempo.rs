use chrono::NaiveDate;
use reqwest::{Method, StatusCode};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::config::TempoSettings;
use crate::error::SyncError;
use crate::models::{PaymentClass, PaymentEvent};
use crate::services::transport::HttpTransport;
use crate::utils::format_yyyymmdd;

const TARGET: &str = "tempo";

/// The four ways Tempo records money received against an invoice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    /// Marks the invoice fully settled.
    Full { date: NaiveDate },
    /// Records one partial payment.
    Partial {
        amount: Decimal,
        date: Option<NaiveDate>,
    },
    /// Overwrites the running total of partial payments.
    FixPartialTotal {
        amount: Decimal,
        date: Option<NaiveDate>,
    },
    /// Records a partial amount and closes the invoice in one write.
    PartialAndClose { amount: Decimal, date: NaiveDate },
}

impl Settlement {
    /// Operation matching an observed payment; the paid amount is cumulative, so partials fix the total.
    pub fn for_event(event: &PaymentEvent) -> Option<Self> {
        match event.class {
            PaymentClass::Full => Some(Settlement::Full {
                date: event.event_date,
            }),
            PaymentClass::Partial => Some(Settlement::FixPartialTotal {
                amount: event.paid_amount,
                date: Some(event.event_date),
            }),
            PaymentClass::Unpaid => None,
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            Settlement::Full { .. } => "full settlement",
            Settlement::Partial { .. } => "partial settlement",
            Settlement::FixPartialTotal { .. } => "partial total fix",
            Settlement::PartialAndClose { .. } => "partial settlement and close",
        }
    }

    pub fn payload(&self, invoice_id: u64) -> SettlementPayload {
        let mut payload = SettlementPayload {
            invoice_id,
            fully_settled: None,
            settlement_date: None,
            partial_amount: None,
            partial_total: None,
        };
        match self {
            Settlement::Full { date } => {
                payload.fully_settled = Some("OUI");
                payload.settlement_date = Some(format_yyyymmdd(*date));
            }
            Settlement::Partial { amount, date } => {
                payload.partial_amount = Some(*amount);
                payload.settlement_date = date.map(format_yyyymmdd);
            }
            Settlement::FixPartialTotal { amount, date } => {
                payload.partial_total = Some(*amount);
                payload.settlement_date = date.map(format_yyyymmdd);
            }
            Settlement::PartialAndClose { amount, date } => {
                payload.partial_total = Some(*amount);
                payload.fully_settled = Some("OUI");
                payload.settlement_date = Some(format_yyyymmdd(*date));
            }
        }
        payload
    }
}

/// Body of `POST /FACTUREREGLEMENT`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SettlementPayload {
    #[serde(rename = "IdFacture")]
    pub invoice_id: u64,
    #[serde(rename = "RegleeTotale", skip_serializing_if = "Option::is_none")]
    pub fully_settled: Option<&'static str>,
    #[serde(rename = "DateReglementTotal", skip_serializing_if = "Option::is_none")]
    pub settlement_date: Option<String>,
    #[serde(
        rename = "MontantReglementPartiel",
        with = "rust_decimal::serde::float_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub partial_amount: Option<Decimal>,
    #[serde(
        rename = "MontantReglementPartielTotal",
        with = "rust_decimal::serde::float_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub partial_total: Option<Decimal>,
}

/// Legacy invoicing system, keyed by the reference number printed on the invoice.
pub struct TempoClient {
    transport: HttpTransport,
    settings: TempoSettings,
}

impl TempoClient {
    pub fn new(settings: TempoSettings, transport: HttpTransport) -> Self {
        Self {
            transport,
            settings,
        }
    }

    /// Invoice detail, or `None` when Tempo answers 404.
    pub async fn get_invoice(&self, invoice_id: u64) -> Result<Option<Value>, SyncError> {
        let url = format!("{}/FACTURE", self.settings.base_url);
        let request = self
            .transport
            .request(Method::GET, &url)
            .basic_auth(&self.settings.username, Some(&self.settings.password))
            .query(&[
                ("Dossier", self.settings.dossier.clone()),
                ("ID", invoice_id.to_string()),
            ]);
        let response = self.transport.execute(request).await?;

        match response.status() {
            StatusCode::OK => response
                .json::<Value>()
                .await
                .map(Some)
                .map_err(|source| SyncError::Decode {
                    target: TARGET,
                    source,
                }),
            StatusCode::NOT_FOUND => Ok(None),
            StatusCode::UNAUTHORIZED => Err(SyncError::Unauthorized { target: TARGET }),
            status => Err(SyncError::Status {
                target: TARGET,
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            }),
        }
    }

    pub async fn record_settlement(
        &self,
        invoice_id: u64,
        settlement: &Settlement,
    ) -> Result<(), SyncError> {
        let url = format!("{}/FACTUREREGLEMENT", self.settings.base_url);
        let payload = settlement.payload(invoice_id);
        info!(invoice = invoice_id, operation = settlement.describe(), "sending settlement");

        let request = self
            .transport
            .request(Method::POST, &url)
            .basic_auth(&self.settings.username, Some(&self.settings.password))
            .query(&[("Dossier", self.settings.dossier.as_str())])
            .json(&payload);
        let response = self.transport.execute(request).await?;

        let status = response.status();
        if status == StatusCode::OK {
            info!(invoice = invoice_id, operation = settlement.describe(), "settlement recorded");
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        match status {
            StatusCode::UNAUTHORIZED => Err(SyncError::Unauthorized { target: TARGET }),
            StatusCode::NOT_FOUND => Err(SyncError::NotFound {
                target: TARGET,
                what: format!("invoice {}", invoice_id),
            }),
            _ => Err(SyncError::Status {
                target: TARGET,
                status: status.as_u16(),
                body,
            }),
        }
    }

    /// Raising variant for direct use.
    pub async fn try_dispatch(&self, event: &PaymentEvent) -> Result<Settlement, SyncError> {
        let reference = event.reference.ok_or_else(|| SyncError::MissingReference {
            invoice_id: event.invoice_id.clone(),
        })?;
        let settlement = Settlement::for_event(event).ok_or_else(|| SyncError::Validation {
            target: TARGET,
            message: format!("invoice {} has no payment to settle", event.invoice_id),
        })?;
        self.record_settlement(reference, &settlement).await?;
        Ok(settlement)
    }

    /// Batch variant: failures are logged and reported as `false`.
    pub async fn dispatch(&self, event: &PaymentEvent) -> bool {
        match self.try_dispatch(event).await {
            Ok(_) => true,
            Err(err) => {
                warn!(invoice_id = %event.invoice_id, error = %err, "tempo dispatch failed");
                false
            }
        }
    }
}
