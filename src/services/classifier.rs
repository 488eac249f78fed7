use chrono::NaiveDate;
use rust_decimal::Decimal;
use tracing::debug;

use crate::models::{InvoiceRecord, InvoiceStatus, PaymentClass, PaymentEvent};
use crate::utils::timestamp_date;

const LABEL_PREFIXES: [&str; 2] = ["Facture ", "Avoir "];
const LABEL_SEPARATOR: &str = " - ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelParts {
    pub client_name: String,
    pub reference: Option<u64>,
}

/// Split a label shaped like `Facture <client> - <reference> (<suffix>)`.
///
/// The reference is the first run of digits after the first separator. Without a
/// separator the whole label (minus prefix) is the client name and there is no reference.
pub fn parse_label(label: &str) -> LabelParts {
    let trimmed = label.trim();
    let body = LABEL_PREFIXES
        .iter()
        .find_map(|prefix| trimmed.strip_prefix(prefix))
        .unwrap_or(trimmed);

    match body.split_once(LABEL_SEPARATOR) {
        Some((client, rest)) => LabelParts {
            client_name: client.trim().to_string(),
            reference: first_integer(rest),
        },
        None => LabelParts {
            client_name: body.trim().to_string(),
            reference: None,
        },
    }
}

fn first_integer(text: &str) -> Option<u64> {
    let start = text.find(|c: char| c.is_ascii_digit())?;
    let digits: String = text[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

/// `total - remaining`, floored at zero. Missing amounts count as zero.
pub fn paid_amount(record: &InvoiceRecord) -> Decimal {
    let total = record.amount.unwrap_or(Decimal::ZERO);
    let remaining = record.remaining_amount_with_tax.unwrap_or(Decimal::ZERO);
    settled_part(total, remaining)
}

fn settled_part(total: Decimal, remaining: Decimal) -> Decimal {
    total
        .checked_sub(remaining)
        .unwrap_or(Decimal::ZERO)
        .max(Decimal::ZERO)
}

pub fn payment_class(total: Decimal, remaining: Decimal) -> PaymentClass {
    if total <= Decimal::ZERO {
        return PaymentClass::Unpaid;
    }
    let paid = settled_part(total, remaining);
    if paid >= total || remaining <= Decimal::ZERO {
        PaymentClass::Full
    } else if paid > Decimal::ZERO {
        PaymentClass::Partial
    } else {
        PaymentClass::Unpaid
    }
}

/// Whether the invoice's last update falls on `today`. Unreadable timestamps never match.
pub fn is_changed_on(record: &InvoiceRecord, today: NaiveDate) -> bool {
    let raw = match record.updated_at.as_deref() {
        Some(raw) => raw,
        None => return false,
    };
    match timestamp_date(raw) {
        Some(date) => date == today,
        None => {
            debug!(invoice_id = %record.id, updated_at = raw, "unreadable update timestamp, treated as not today");
            false
        }
    }
}

/// Derive the payment event of an invoice, if it has one worth dispatching.
/// Credit notes, unpaid invoices and zero totals yield `None`.
pub fn classify(record: &InvoiceRecord, event_date: NaiveDate) -> Option<PaymentEvent> {
    if record.status == InvoiceStatus::CreditNote {
        return None;
    }
    if record.amount.is_none() || record.remaining_amount_with_tax.is_none() {
        debug!(invoice_id = %record.id, "missing amount fields, counted as zero");
    }

    let total = record.amount.unwrap_or(Decimal::ZERO);
    let remaining = record.remaining_amount_with_tax.unwrap_or(Decimal::ZERO);
    let class = payment_class(total, remaining);
    if class == PaymentClass::Unpaid {
        return None;
    }

    let paid = paid_amount(record);
    let fraction = paid
        .checked_div(total)
        .map_or(Decimal::ONE, |f| f.min(Decimal::ONE).round_dp(4));
    let label = parse_label(&record.label);

    Some(PaymentEvent {
        invoice_id: record.id.clone(),
        reference: label.reference,
        client_name: label.client_name,
        total_amount: total,
        paid_amount: paid,
        fraction,
        class,
        event_date,
    })
}
