//! One reconciliation pass: snapshot, filter, classify, dedup, dispatch, record, persist.

use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use tracing::{debug, error, info, warn};

use crate::config::Settings;
use crate::db::IdempotencyStore;
use crate::error::{StoreError, SyncError};
use crate::models::{
    DispatchOutcome, DispatchRecord, InvoiceRecord, InvoiceStatus, PaymentClass, PaymentEvent,
    RunSummary, Target,
};
use crate::services::armado::ArmadoClient;
use crate::services::classifier::{classify, is_changed_on};
use crate::services::ledger::{LedgerClient, LedgerFields};
use crate::services::payment_modes::PaymentModeMap;
use crate::services::pennylane::PennylaneClient;
use crate::services::tempo::TempoClient;
use crate::services::transport::HttpTransport;
use crate::utils::{format_decimal, format_yyyymmdd};

/// Deterministic key of "this payment state was sent to this target".
/// Tempo and Armado key on the payment state; the ledger keys on the invoice alone.
pub fn idempotency_key(target: Target, event: &PaymentEvent) -> String {
    match target {
        Target::Sheets => format!("{}:{}", target.as_str(), event.invoice_id),
        Target::Tempo | Target::Armado => format!(
            "{}:{}_{}_{}",
            target.as_str(),
            event.invoice_id,
            format_yyyymmdd(event.event_date),
            format_decimal(event.paid_amount)
        ),
    }
}

/// Key under which the ledger row number is kept once the A to H record is written.
pub fn ledger_row_key(event: &PaymentEvent) -> String {
    format!("{}-row:{}", Target::Sheets.as_str(), event.invoice_id)
}

fn dispatch_record(
    target: Target,
    event: &PaymentEvent,
    ledger_row: Option<usize>,
) -> DispatchRecord {
    DispatchRecord {
        target,
        invoice_id: event.invoice_id.clone(),
        reference: event.reference,
        amount: event.paid_amount,
        class: event.class,
        dispatched_at: Utc::now(),
        ledger_row,
    }
}

pub struct Reconciler {
    source: PennylaneClient,
    tempo: Option<TempoClient>,
    armado: Option<ArmadoClient>,
    ledger: Option<LedgerClient>,
    store: IdempotencyStore,
    invoice_delay: Duration,
}

impl Reconciler {
    pub fn new(source: PennylaneClient, store: IdempotencyStore) -> Self {
        Self {
            source,
            tempo: None,
            armado: None,
            ledger: None,
            store,
            invoice_delay: Duration::ZERO,
        }
    }

    /// Wire every configured target and open the state file.
    pub fn from_settings(settings: &Settings) -> Self {
        let transport = |label: &'static str, timeout: Duration| HttpTransport::new(label, timeout);

        let source = PennylaneClient::new(
            settings.pennylane.clone(),
            transport("pennylane", settings.http_timeout),
        );
        let store = IdempotencyStore::open(&settings.state_path);
        let mut reconciler = Self::new(source, store).with_invoice_delay(settings.invoice_delay);

        if let Some(tempo) = &settings.tempo {
            reconciler = reconciler.with_tempo(TempoClient::new(
                tempo.clone(),
                transport("tempo", settings.http_timeout),
            ));
        }
        if let Some(armado) = &settings.armado {
            let modes = PaymentModeMap::with_extra(&armado.extra_modes);
            reconciler = reconciler.with_armado(ArmadoClient::new(
                armado.clone(),
                transport("armado", armado.timeout),
                modes,
            ));
        }
        if let Some(sheets) = &settings.sheets {
            reconciler = reconciler.with_ledger(LedgerClient::new(
                sheets.clone(),
                transport("sheets", settings.http_timeout),
            ));
        }
        reconciler
    }

    #[must_use]
    pub fn with_tempo(mut self, client: TempoClient) -> Self {
        self.tempo = Some(client);
        self
    }

    #[must_use]
    pub fn with_armado(mut self, client: ArmadoClient) -> Self {
        self.armado = Some(client);
        self
    }

    #[must_use]
    pub fn with_ledger(mut self, client: LedgerClient) -> Self {
        self.ledger = Some(client);
        self
    }

    #[must_use]
    pub fn with_invoice_delay(mut self, delay: Duration) -> Self {
        self.invoice_delay = delay;
        self
    }

    pub fn store(&self) -> &IdempotencyStore {
        &self.store
    }

    pub fn targets(&self) -> Vec<Target> {
        let mut targets = Vec::new();
        if self.tempo.is_some() {
            targets.push(Target::Tempo);
        }
        if self.armado.is_some() {
            targets.push(Target::Armado);
        }
        if self.ledger.is_some() {
            targets.push(Target::Sheets);
        }
        targets
    }

    /// Targets an event goes to, Tempo first. Armado only tracks completed payments.
    fn targets_for(&self, event: &PaymentEvent) -> Vec<Target> {
        self.targets()
            .into_iter()
            .filter(|target| *target != Target::Armado || event.class == PaymentClass::Full)
            .collect()
    }

    /// A bill is only marked paid once Tempo holds the matching settlement.
    fn waits_for_tempo(&self, target: Target, event: &PaymentEvent) -> bool {
        target == Target::Armado
            && self.tempo.is_some()
            && !self.store.contains(&idempotency_key(Target::Tempo, event))
    }

    pub async fn run(&mut self) -> Result<RunSummary, StoreError> {
        self.run_at(Local::now()).await
    }

    /// Only a failing store write escapes; every dispatch failure ends up in the summary.
    pub async fn run_at(&mut self, now: DateTime<Local>) -> Result<RunSummary, StoreError> {
        let today = now.date_naive();
        let mut summary = RunSummary {
            run_date: Some(today),
            ..RunSummary::default()
        };

        info!(date = %today, targets = ?self.targets(), "Fetching");
        let invoices = self.source.fetch_all_invoices().await;
        summary.fetched = invoices.len();

        info!(count = invoices.len(), "Filtering");
        let mut full = Vec::new();
        let mut partial = Vec::new();
        for record in &invoices {
            if record.status == InvoiceStatus::CreditNote {
                summary.credit_notes += 1;
                continue;
            }
            if !is_changed_on(record, today) {
                continue;
            }
            summary.changed_today += 1;
            match classify(record, today) {
                Some(event) if event.class == PaymentClass::Full => full.push((record, event)),
                Some(event) => partial.push((record, event)),
                None => debug!(invoice_id = %record.id, "changed today but nothing paid"),
            }
        }
        summary.full = full.len();
        summary.partial = partial.len();

        info!(full = summary.full, partial = summary.partial, "Dispatching");
        for (index, (record, event)) in full.into_iter().chain(partial).enumerate() {
            if index > 0 && !self.invoice_delay.is_zero() {
                tokio::time::sleep(self.invoice_delay).await;
            }
            self.process_invoice(record, &event, now, &mut summary).await;
            if self.store.is_dirty() {
                self.store.flush()?;
            }
        }

        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            duplicates = summary.duplicates,
            "Persisting"
        );
        self.store.flush()?;
        Ok(summary)
    }

    async fn process_invoice(
        &mut self,
        record: &InvoiceRecord,
        event: &PaymentEvent,
        now: DateTime<Local>,
        summary: &mut RunSummary,
    ) {
        for target in self.targets_for(event) {
            let key = idempotency_key(target, event);
            if self.store.contains(&key) {
                debug!(invoice_id = %event.invoice_id, key = %key, "already dispatched, skipping");
                summary.duplicates += 1;
                continue;
            }

            let result = if self.waits_for_tempo(target, event) {
                Err(SyncError::Validation {
                    target: target.as_str(),
                    message: "tempo settlement not recorded yet".to_string(),
                })
            } else {
                self.send(target, record, event, now).await
            };
            let (success, message) = match result {
                Ok(message) => {
                    self.store.mark(&key, dispatch_record(target, event, None));
                    info!(invoice_id = %event.invoice_id, target = %target, "dispatched");
                    (true, message)
                }
                Err(err) => {
                    if err.is_business() {
                        warn!(invoice_id = %event.invoice_id, target = %target, error = %err, "dispatch rejected");
                    } else {
                        error!(invoice_id = %event.invoice_id, target = %target, error = %err, "dispatch failed");
                    }
                    (false, err.to_string())
                }
            };

            summary.record(DispatchOutcome {
                invoice_id: event.invoice_id.clone(),
                reference: event.reference,
                target,
                class: event.class,
                amount: event.paid_amount,
                success,
                message,
            });
        }
    }

    async fn send(
        &mut self,
        target: Target,
        record: &InvoiceRecord,
        event: &PaymentEvent,
        now: DateTime<Local>,
    ) -> Result<String, SyncError> {
        let not_configured = || SyncError::Validation {
            target: target.as_str(),
            message: "target not configured".to_string(),
        };
        match target {
            Target::Tempo => {
                let client = self.tempo.as_ref().ok_or_else(not_configured)?;
                let settlement = client.try_dispatch(event).await?;
                Ok(settlement.describe().to_string())
            }
            Target::Armado => {
                let client = self.armado.as_ref().ok_or_else(not_configured)?;
                let bill_id = client.try_dispatch(event, now.naive_local()).await?;
                Ok(format!("bill {} updated", bill_id))
            }
            Target::Sheets => {
                let client = self.ledger.as_ref().ok_or_else(not_configured)?;
                let fields = LedgerFields {
                    client_name: event.client_name.clone(),
                    invoice_date: record.date.clone(),
                };
                let row_key = ledger_row_key(event);
                let row = match self.store.get(&row_key).and_then(|r| r.ledger_row) {
                    Some(row) => {
                        info!(invoice_id = %event.invoice_id, row, "completing existing ledger row");
                        row
                    }
                    None => {
                        let row = client.append_row(event, &fields, now.naive_local()).await?;
                        self.store
                            .mark(&row_key, dispatch_record(Target::Sheets, event, Some(row)));
                        row
                    }
                };
                client.fill_columns(row, event, &fields).await?;
                Ok(format!("row {}", row))
            }
        }
    }
}
