//! Spreadsheet audit log: one row appended per observed payment.

use std::time::Duration;

use chrono::NaiveDateTime;
use reqwest::{Method, RequestBuilder, Response, StatusCode, Url};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::SheetsSettings;
use crate::error::SyncError;
use crate::models::PaymentEvent;
use crate::services::transport::HttpTransport;
use crate::utils::{display_date, format_decimal};

const TARGET: &str = "sheets";
const ROW_STATUS: &str = "A faire";
const TASK_LABEL: &str = "Règlement de facture";
const ACTOR_LABEL: &str = "Pennylane";

/// The one place dispatch code waits and retries on its own: after a 429 the sheet
/// is left alone for `wait`, then the same write is sent `retries` more times.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitRecovery {
    pub wait: Duration,
    pub retries: u32,
}

impl Default for RateLimitRecovery {
    fn default() -> Self {
        Self {
            wait: Duration::from_secs(60),
            retries: 1,
        }
    }
}

/// Row details that do not live on the payment event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerFields {
    pub client_name: String,
    pub invoice_date: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

#[derive(Debug, Serialize)]
struct ValueUpdate<'a> {
    range: &'a str,
    #[serde(rename = "majorDimension")]
    major_dimension: &'static str,
    values: Vec<Vec<String>>,
}

pub struct LedgerClient {
    transport: HttpTransport,
    settings: SheetsSettings,
    recovery: RateLimitRecovery,
}

impl LedgerClient {
    pub fn new(settings: SheetsSettings, transport: HttpTransport) -> Self {
        Self {
            transport,
            settings,
            recovery: RateLimitRecovery::default(),
        }
    }

    #[must_use]
    pub fn with_recovery(mut self, recovery: RateLimitRecovery) -> Self {
        self.recovery = recovery;
        self
    }

    /// `values/{range}` endpoint. The sheet name inside the range is percent-encoded.
    fn values_url(&self, range: &str) -> Result<Url, SyncError> {
        let invalid = || SyncError::Validation {
            target: TARGET,
            message: format!("invalid sheets base url '{}'", self.settings.base_url),
        };
        let mut url = Url::parse(&self.settings.base_url).map_err(|_| invalid())?;
        url.path_segments_mut()
            .map_err(|_| invalid())?
            .pop_if_empty()
            .extend(["v4", "spreadsheets", self.settings.spreadsheet_id.as_str(), "values", range]);
        Ok(url)
    }

    async fn send<F>(&self, build: F) -> Result<Response, SyncError>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut retries_left = self.recovery.retries;
        loop {
            let response = self.transport.execute(build()).await?;
            if response.status() != StatusCode::TOO_MANY_REQUESTS {
                return Ok(response);
            }
            if retries_left == 0 {
                return Err(SyncError::RateLimited { target: TARGET });
            }
            retries_left -= 1;
            warn!(
                wait_secs = self.recovery.wait.as_secs(),
                "sheet rate limit reached, pausing before retry"
            );
            tokio::time::sleep(self.recovery.wait).await;
        }
    }

    /// Number of filled cells in `column`, read from the top of the sheet.
    pub async fn column_len(&self, column: &str) -> Result<usize, SyncError> {
        let url = self.values_url(&format!("{}!{}:{}", self.settings.sheet_name, column, column))?;
        let response = self
            .send(|| {
                self.transport
                    .request(Method::GET, url.as_str())
                    .bearer_auth(&self.settings.access_token)
            })
            .await?;
        let response = check_status(response).await?;
        let range: ValueRange = response.json().await.map_err(|source| SyncError::Decode {
            target: TARGET,
            source,
        })?;
        Ok(range.values.len())
    }

    pub async fn next_empty_row(&self) -> Result<usize, SyncError> {
        Ok(self.column_len("A").await? + 1)
    }

    async fn write_range(&self, range: &str, values: Vec<String>) -> Result<(), SyncError> {
        let url = self.values_url(range)?;
        let body = ValueUpdate {
            range,
            major_dimension: "ROWS",
            values: vec![values],
        };
        let response = self
            .send(|| {
                self.transport
                    .request(Method::PUT, url.as_str())
                    .bearer_auth(&self.settings.access_token)
                    .query(&[("valueInputOption", "RAW")])
                    .json(&body)
            })
            .await?;
        check_status(response).await?;
        Ok(())
    }

    /// The eight-cell record written into columns A to H.
    pub fn build_row(
        &self,
        event: &PaymentEvent,
        fields: &LedgerFields,
        now: NaiveDateTime,
    ) -> Vec<String> {
        let reference = event
            .reference
            .map(|r| r.to_string())
            .unwrap_or_default();
        vec![
            Uuid::new_v4().to_string(),
            ROW_STATUS.to_string(),
            now.format("%d/%m/%Y %H:%M:%S").to_string(),
            TASK_LABEL.to_string(),
            format!(
                "Numéro de facture : {} / Montant : {} €",
                reference,
                format_decimal(event.paid_amount)
            ),
            String::new(),
            ACTOR_LABEL.to_string(),
            format!(
                "Date de la facture {} / {}",
                display_date(fields.invoice_date.as_deref()),
                fields.client_name
            ),
        ]
    }

    /// Write the A to H record on the next empty row and return its number.
    pub async fn append_row(
        &self,
        event: &PaymentEvent,
        fields: &LedgerFields,
        now: NaiveDateTime,
    ) -> Result<usize, SyncError> {
        let sheet = &self.settings.sheet_name;
        let row = self.next_empty_row().await?;
        let record = self.build_row(event, fields, now);
        self.write_range(&format!("{}!A{}:H{}", sheet, row, row), record)
            .await?;
        info!(invoice_id = %event.invoice_id, row, sheet = %sheet, "ledger row appended");
        Ok(row)
    }

    /// Client and reference cells of an already appended row. Safe to repeat.
    pub async fn fill_columns(
        &self,
        row: usize,
        event: &PaymentEvent,
        fields: &LedgerFields,
    ) -> Result<(), SyncError> {
        let sheet = &self.settings.sheet_name;
        tokio::time::sleep(self.settings.write_delay).await;
        self.write_range(
            &format!("{}!{}{}", sheet, self.settings.client_column, row),
            vec![fields.client_name.clone()],
        )
        .await?;

        tokio::time::sleep(self.settings.write_delay).await;
        let reference = event
            .reference
            .map(|r| r.to_string())
            .unwrap_or_default();
        self.write_range(
            &format!("{}!{}{}", sheet, self.settings.reference_column, row),
            vec![reference],
        )
        .await?;

        info!(invoice_id = %event.invoice_id, row, sheet = %sheet, "ledger row written");
        Ok(())
    }

    /// Raising variant. Returns the row number written.
    pub async fn try_dispatch(
        &self,
        event: &PaymentEvent,
        fields: &LedgerFields,
        now: NaiveDateTime,
    ) -> Result<usize, SyncError> {
        let row = self.append_row(event, fields, now).await?;
        self.fill_columns(row, event, fields).await?;
        Ok(row)
    }

    pub async fn dispatch(
        &self,
        event: &PaymentEvent,
        fields: &LedgerFields,
        now: NaiveDateTime,
    ) -> bool {
        match self.try_dispatch(event, fields, now).await {
            Ok(_) => true,
            Err(err) => {
                warn!(invoice_id = %event.invoice_id, error = %err, "ledger dispatch failed");
                false
            }
        }
    }
}

async fn check_status(response: Response) -> Result<Response, SyncError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SyncError::Unauthorized { target: TARGET },
        StatusCode::NOT_FOUND => SyncError::NotFound {
            target: TARGET,
            what: "spreadsheet or sheet".to_string(),
        },
        _ => SyncError::Status {
            target: TARGET,
            status: status.as_u16(),
            body,
        },
    })
}
