use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::warn;

/// Status tag of an accounting-platform invoice. Anything unrecognised is a normal invoice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    CreditNote,
    PartiallyCancelled,
    #[default]
    #[serde(other)]
    Normal,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerRef {
    #[serde(default, deserialize_with = "opt_lenient_id")]
    pub id: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

/// One invoice as returned by the accounting platform. Read-only once fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceRecord {
    #[serde(deserialize_with = "lenient_id")]
    pub id: String,
    #[serde(default, deserialize_with = "opt_lenient_decimal")]
    pub amount: Option<Decimal>,
    #[serde(default, deserialize_with = "opt_lenient_decimal")]
    pub remaining_amount_with_tax: Option<Decimal>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub status: InvoiceStatus,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub paid: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub label: String,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub invoice_number: Option<String>,
    #[serde(default)]
    pub customer: Option<CustomerRef>,
}

/// One page of the cursor-paginated invoice collection.
#[derive(Debug, Clone, Deserialize)]
pub struct InvoicePage {
    #[serde(default, deserialize_with = "readable_items")]
    pub items: Vec<InvoiceRecord>,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentClass {
    Unpaid,
    Partial,
    Full,
}

impl PaymentClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentClass::Unpaid => "unpaid",
            PaymentClass::Partial => "partial",
            PaymentClass::Full => "full",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "unpaid" => Some(PaymentClass::Unpaid),
            "partial" => Some(PaymentClass::Partial),
            "full" => Some(PaymentClass::Full),
            _ => None,
        }
    }
}

/// A payment observed on an invoice, derived fresh on every run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentEvent {
    pub invoice_id: String,
    pub reference: Option<u64>,
    pub client_name: String,
    pub total_amount: Decimal,
    pub paid_amount: Decimal,
    pub fraction: Decimal,
    pub class: PaymentClass,
    pub event_date: NaiveDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    Tempo,
    Armado,
    Sheets,
}

impl Target {
    pub fn as_str(&self) -> &'static str {
        match self {
            Target::Tempo => "tempo",
            Target::Armado => "armado",
            Target::Sheets => "sheets",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "tempo" => Some(Target::Tempo),
            "armado" => Some(Target::Armado),
            "sheets" => Some(Target::Sheets),
            _ => None,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Audit payload kept next to every idempotency key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchRecord {
    pub target: Target,
    pub invoice_id: String,
    pub reference: Option<u64>,
    pub amount: Decimal,
    pub class: PaymentClass,
    pub dispatched_at: DateTime<Utc>,
    /// Sheet row already holding this invoice's record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ledger_row: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchOutcome {
    pub invoice_id: String,
    pub reference: Option<u64>,
    pub target: Target,
    pub class: PaymentClass,
    pub amount: Decimal,
    pub success: bool,
    pub message: String,
}

/// End-of-run accounting, the main failure surface for operators.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub run_date: Option<NaiveDate>,
    pub fetched: usize,
    pub credit_notes: usize,
    pub changed_today: usize,
    pub full: usize,
    pub partial: usize,
    pub duplicates: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub outcomes: Vec<DispatchOutcome>,
}

impl RunSummary {
    pub fn record(&mut self, outcome: DispatchOutcome) {
        if outcome.success {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
        self.outcomes.push(outcome);
    }

    /// Distinct invoices that reached at least one target this run.
    pub fn dispatched_invoices(&self) -> usize {
        let mut ids: Vec<&str> = self
            .outcomes
            .iter()
            .filter(|o| o.success)
            .map(|o| o.invoice_id.as_str())
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids.len()
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.run_date {
            Some(date) => writeln!(f, "Payment sync for {}", date.format("%Y-%m-%d"))?,
            None => writeln!(f, "Payment sync")?,
        }
        writeln!(
            f,
            "  invoices fetched: {} (credit notes ignored: {})",
            self.fetched, self.credit_notes
        )?;
        writeln!(
            f,
            "  changed today: {} (full: {}, partial: {}, already handled: {})",
            self.changed_today, self.full, self.partial, self.duplicates
        )?;
        writeln!(
            f,
            "  dispatches: {} succeeded, {} failed",
            self.succeeded, self.failed
        )?;
        for outcome in &self.outcomes {
            let reference = outcome
                .reference
                .map(|r| r.to_string())
                .unwrap_or_else(|| "-".to_string());
            writeln!(
                f,
                "  [{}] {:<6} invoice {} ref {} {} {}: {}",
                if outcome.success { "ok" } else { "KO" },
                outcome.target,
                outcome.invoice_id,
                reference,
                outcome.class.as_str(),
                outcome.amount,
                outcome.message
            )?;
        }
        Ok(())
    }
}

fn lenient_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "invoice id must be a string or integer, got {}",
            other
        ))),
    }
}

fn opt_lenient_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Amounts arrive as strings, numbers or null. Anything unreadable becomes `None`.
fn opt_lenient_decimal<'de, D>(deserializer: D) -> Result<Option<Decimal>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => Decimal::from_str(s.trim()).ok(),
        Value::Number(n) => Decimal::from_str(&n.to_string())
            .ok()
            .or_else(|| n.as_f64().and_then(|f| Decimal::try_from(f).ok())),
        _ => None,
    })
}

/// `true`/`false` as booleans or strings; anything else is `false`.
fn lenient_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Bool(b) => b,
        Value::String(s) => s.trim().eq_ignore_ascii_case("true"),
        _ => false,
    })
}

/// Items that do not decode are dropped one by one instead of failing the page.
fn readable_items<'de, D>(deserializer: D) -> Result<Vec<InvoiceRecord>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Vec<Value>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(raw
        .into_iter()
        .filter_map(|item| match InvoiceRecord::deserialize(&item) {
            Ok(record) => Some(record),
            Err(err) => {
                warn!(error = %err, item = %item, "skipping unreadable invoice");
                None
            }
        })
        .collect())
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn invoice_record_tolerates_loose_fields() {
        let record: InvoiceRecord = serde_json::from_value(json!({
            "id": 1234,
            "amount": "1000.00",
            "remaining_amount_with_tax": null,
            "status": "upcoming",
            "paid": null,
            "label": "Facture ACME - 12 (label généré)",
            "updated_at": "2026-10-19T08:00:00Z",
            "customer": {"id": 77, "url": "https://example.test/customers/77"}
        }))
        .unwrap();

        assert_eq!(record.id, "1234");
        assert_eq!(record.amount, Some(Decimal::new(100000, 2)));
        assert_eq!(record.remaining_amount_with_tax, None);
        assert_eq!(record.status, InvoiceStatus::Normal);
        assert!(!record.paid);
        assert_eq!(record.customer.unwrap().id.as_deref(), Some("77"));
    }

    #[test]
    fn credit_note_status_is_recognised() {
        let record: InvoiceRecord = serde_json::from_value(json!({
            "id": "abc",
            "amount": 10.5,
            "status": "credit_note"
        }))
        .unwrap();
        assert_eq!(record.status, InvoiceStatus::CreditNote);
        assert_eq!(record.amount, Some(Decimal::new(105, 1)));
        assert_eq!(record.label, "");
    }

    #[test]
    fn unreadable_amount_becomes_none() {
        let record: InvoiceRecord = serde_json::from_value(json!({
            "id": "x",
            "amount": "n/a",
            "remaining_amount_with_tax": {"value": 3}
        }))
        .unwrap();
        assert_eq!(record.amount, None);
        assert_eq!(record.remaining_amount_with_tax, None);
    }

    #[test]
    fn malformed_items_are_skipped_not_the_page() {
        let page: InvoicePage = serde_json::from_value(json!({
            "items": [
                {"id": null, "amount": "10.00"},
                {"id": 2, "paid": "true", "updated_at": 20261019},
                {"id": 3, "amount": "30.00", "paid": true}
            ],
            "has_more": true,
            "next_cursor": "c2"
        }))
        .unwrap();

        let ids: Vec<&str> = page.items.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["3"]);
        assert!(page.items[0].paid);
        assert_eq!(page.next_cursor.as_deref(), Some("c2"));
    }

    #[test]
    fn paid_flag_accepts_strings() {
        let record: InvoiceRecord =
            serde_json::from_value(json!({"id": 1, "paid": "TRUE"})).unwrap();
        assert!(record.paid);
    }

    #[test]
    fn summary_counts_distinct_dispatched_invoices() {
        let mut summary = RunSummary::default();
        for (id, target, success) in [
            ("1", Target::Tempo, true),
            ("1", Target::Sheets, true),
            ("2", Target::Tempo, false),
        ] {
            summary.record(DispatchOutcome {
                invoice_id: id.to_string(),
                reference: Some(10),
                target,
                class: PaymentClass::Full,
                amount: Decimal::ONE_HUNDRED,
                success,
                message: String::new(),
            });
        }
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.dispatched_invoices(), 1);
        assert!(summary.to_string().contains("[KO] tempo"));
    }
}
