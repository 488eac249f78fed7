use chrono::NaiveDateTime;
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::config::ArmadoSettings;
use crate::error::SyncError;
use crate::models::PaymentEvent;
use crate::services::payment_modes::PaymentModeMap;
use crate::services::transport::HttpTransport;
use crate::utils::format_iso_micros;

const TARGET: &str = "armado";
const PROBE_REFERENCE: &str = "TEST_CONNECTION_12345";

#[derive(Debug, Clone, Deserialize)]
struct BillSummary {
    #[serde(default)]
    id: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BillPaymentUpdate {
    pub payment_type: i32,
    pub payment_date: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
}

/// Billing system. Bills are found by their human reference, then updated by internal id.
pub struct ArmadoClient {
    transport: HttpTransport,
    settings: ArmadoSettings,
    modes: PaymentModeMap,
}

impl ArmadoClient {
    pub fn new(settings: ArmadoSettings, transport: HttpTransport, modes: PaymentModeMap) -> Self {
        Self {
            transport,
            settings,
            modes,
        }
    }

    pub fn modes(&self) -> &PaymentModeMap {
        &self.modes
    }

    fn request(&self, method: Method, url: &str) -> reqwest::RequestBuilder {
        self.transport
            .request(method, url)
            .header("ApiKey", &self.settings.api_key)
    }

    /// Internal bill id for a reference. An empty result list is `Ok(None)`; a 404 means the
    /// key or endpoint is wrong and is reported as an error.
    pub async fn find_bill_id_by_reference(&self, reference: &str) -> Result<Option<u64>, SyncError> {
        if reference.trim().is_empty() {
            return Err(SyncError::Validation {
                target: TARGET,
                message: "reference must not be empty".to_string(),
            });
        }
        let url = format!("{}/v1/bill", self.settings.base_url);
        let request = self.request(Method::GET, &url).query(&[("reference", reference)]);
        let response = self.transport.execute(request).await?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(status_error(status, response).await);
        }
        let bills: Vec<BillSummary> = response.json().await.map_err(|source| SyncError::Decode {
            target: TARGET,
            source,
        })?;

        match bills.first() {
            Some(BillSummary { id: Some(id) }) => {
                info!(reference, bill_id = id, "bill found");
                Ok(Some(*id))
            }
            Some(BillSummary { id: None }) => {
                warn!(reference, "bill returned without an id");
                Ok(None)
            }
            None => {
                info!(reference, "no bill with this reference");
                Ok(None)
            }
        }
    }

    pub async fn update_bill_payment(
        &self,
        bill_id: u64,
        payment_type: i32,
        payment_date: NaiveDateTime,
    ) -> Result<Value, SyncError> {
        let url = format!("{}/v1/bill/{}", self.settings.base_url, bill_id);
        let body = BillPaymentUpdate {
            payment_type,
            payment_date: format_iso_micros(payment_date),
        };
        info!(bill_id, payment_type, payment_date = %body.payment_date, "updating bill payment");

        let request = self.request(Method::PUT, &url).json(&body);
        let response = self.transport.execute(request).await?;

        let status = response.status();
        if !status.is_success() {
            return Err(match status_error(status, response).await {
                SyncError::Status { status: 404, .. } => SyncError::NotFound {
                    target: TARGET,
                    what: format!("bill {}", bill_id),
                },
                other => other,
            });
        }
        let updated = response.json::<Value>().await.map_err(|source| SyncError::Decode {
            target: TARGET,
            source,
        })?;
        info!(bill_id, "bill payment updated");
        Ok(updated)
    }

    /// Resolve the mode, find the bill, update it. Returns the bill id.
    pub async fn sync_payment(
        &self,
        reference: &str,
        mode: &str,
        payment_date: NaiveDateTime,
    ) -> Result<u64, SyncError> {
        let payment_type = self.modes.resolve(mode)?;
        let bill_id = self
            .find_bill_id_by_reference(reference)
            .await?
            .ok_or_else(|| SyncError::NotFound {
                target: TARGET,
                what: format!("bill with reference {}", reference),
            })?;
        self.update_bill_payment(bill_id, payment_type, payment_date)
            .await?;
        Ok(bill_id)
    }

    /// Raising variant for direct use. The mode comes from configuration.
    pub async fn try_dispatch(
        &self,
        event: &PaymentEvent,
        payment_date: NaiveDateTime,
    ) -> Result<u64, SyncError> {
        let reference = event.reference.ok_or_else(|| SyncError::MissingReference {
            invoice_id: event.invoice_id.clone(),
        })?;
        self.sync_payment(&reference.to_string(), &self.settings.payment_mode, payment_date)
            .await
    }

    pub async fn dispatch(&self, event: &PaymentEvent, payment_date: NaiveDateTime) -> bool {
        match self.try_dispatch(event, payment_date).await {
            Ok(_) => true,
            Err(err) => {
                warn!(invoice_id = %event.invoice_id, error = %err, "armado dispatch failed");
                false
            }
        }
    }

    /// 200 and 404 on the probe reference both mean the API is reachable; 401 is a bad key.
    pub async fn test_connection(&self) -> Result<(), SyncError> {
        let url = format!("{}/v1/bill", self.settings.base_url);
        let request = self
            .request(Method::GET, &url)
            .query(&[("reference", PROBE_REFERENCE)]);
        let response = self.transport.execute(request).await?;
        match response.status() {
            StatusCode::OK | StatusCode::NOT_FOUND => Ok(()),
            status => Err(status_error(status, response).await),
        }
    }
}

async fn status_error(status: StatusCode, response: reqwest::Response) -> SyncError {
    let body = response.text().await.unwrap_or_default();
    match status {
        StatusCode::UNAUTHORIZED => SyncError::Unauthorized { target: TARGET },
        StatusCode::UNPROCESSABLE_ENTITY => SyncError::Validation {
            target: TARGET,
            message: serde_json::from_str::<ErrorBody>(&body)
                .ok()
                .and_then(|b| b.message)
                .unwrap_or_else(|| "validation error".to_string()),
        },
        _ => SyncError::Status {
            target: TARGET,
            status: status.as_u16(),
            body,
        },
    }
}
