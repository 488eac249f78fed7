use reqwest::Method;
use tracing::{info, warn};

use crate::config::PennylaneSettings;
use crate::error::SyncError;
use crate::models::{InvoicePage, InvoiceRecord};
use crate::services::transport::HttpTransport;

const TARGET: &str = "pennylane";

/// Reader for the accounting platform's customer invoices, the source of truth.
pub struct PennylaneClient {
    transport: HttpTransport,
    settings: PennylaneSettings,
}

impl PennylaneClient {
    pub fn new(settings: PennylaneSettings, transport: HttpTransport) -> Self {
        Self {
            transport,
            settings,
        }
    }

    /// Walk every page of the collection. A failing page ends the walk early and the
    /// invoices gathered so far are returned; they are safe to fetch again next run.
    pub async fn fetch_all_invoices(&self) -> Vec<InvoiceRecord> {
        let mut all_invoices = Vec::new();
        let mut cursor: Option<String> = None;
        let mut page = 1u32;

        loop {
            let result = self.fetch_page(cursor.as_deref()).await;
            let body = match result {
                Ok(body) => body,
                Err(err) => {
                    warn!(page, error = %err, fetched = all_invoices.len(), "invoice page failed, stopping pagination");
                    break;
                }
            };

            let count = body.items.len();
            all_invoices.extend(body.items);
            info!(page, count, total = all_invoices.len(), "invoice page fetched");

            match body.next_cursor {
                Some(next) if body.has_more && !next.is_empty() => {
                    cursor = Some(next);
                    page += 1;
                }
                _ => break,
            }
        }

        info!(total = all_invoices.len(), "invoice snapshot complete");
        all_invoices
    }

    pub async fn fetch_page(&self, cursor: Option<&str>) -> Result<InvoicePage, SyncError> {
        let url = format!("{}/customer_invoices", self.settings.base_url);
        let mut query = vec![("limit", self.settings.page_size.to_string())];
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor.to_string()));
        }

        let request = self
            .transport
            .request(Method::GET, &url)
            .bearer_auth(&self.settings.api_key)
            .query(&query);
        let response = self.transport.execute(request).await?;

        let status = response.status();
        if status.as_u16() == 401 {
            return Err(SyncError::Unauthorized { target: TARGET });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::Status {
                target: TARGET,
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<InvoicePage>()
            .await
            .map_err(|source| SyncError::Decode {
                target: TARGET,
                source,
            })
    }
}
