//! Row types for the four invoice relations.

use chrono::{DateTime, NaiveDate, Utc};
use common::{InvoiceId, LineItemId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::StoreError;

/// Lifecycle status of an invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    /// Still being written, not sent to the client.
    Draft,

    /// Sent and awaiting payment.
    #[default]
    Pending,

    /// Settled.
    Paid,
}

impl InvoiceStatus {
    /// Returns the value stored in the `invoice_status` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Pending => "pending",
            InvoiceStatus::Paid => "paid",
        }
    }
}

impl std::fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for InvoiceStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(InvoiceStatus::Draft),
            "pending" => Ok(InvoiceStatus::Pending),
            "paid" => Ok(InvoiceStatus::Paid),
            other => Err(StoreError::InvalidValue(format!(
                "unknown invoice status '{other}'"
            ))),
        }
    }
}

/// Columns of the `invoice` relation, minus its key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoiceHeader {
    pub invoice_date: NaiveDate,
    pub payment_terms: String,
    pub project_description: String,
    pub status: InvoiceStatus,
}

/// Issuer address (`bill_from` relation).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillingOrigin {
    pub street_address: String,
    pub city: String,
    pub post_code: String,
    pub country: String,
}

/// Billed party (`clients` relation).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Client {
    pub name: String,
    pub email: String,
    pub street_address: String,
    pub city: String,
    pub post_code: String,
    pub country: String,
}

/// The mutable columns of an `items` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineItem {
    pub name: String,
    pub quantity: i32,
    pub price: Decimal,
}

impl LineItem {
    pub fn new(name: impl Into<String>, quantity: i32, price: Decimal) -> Self {
        Self {
            name: name.into(),
            quantity,
            price,
        }
    }

    /// Quantity times unit price, saturating at the bounds of `Decimal`.
    pub fn total(&self) -> Decimal {
        let quantity = Decimal::from(self.quantity);
        self.price
            .checked_mul(quantity)
            .unwrap_or_else(|| {
                saturated(self.price.is_sign_negative() != quantity.is_sign_negative())
            })
    }
}

/// A persisted line item with its identity and position in the invoice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredLineItem {
    pub item_id: LineItemId,
    pub invoice_id: InvoiceId,
    pub position: i32,
    pub item: LineItem,
}

/// An invoice joined with its billing origin, client and line items.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoiceAggregate {
    pub invoice_id: InvoiceId,
    pub created_at: DateTime<Utc>,
    pub header: InvoiceHeader,
    pub billing_origin: BillingOrigin,
    pub client: Client,
    /// Ordered by position.
    pub items: Vec<StoredLineItem>,
}

impl InvoiceAggregate {
    /// Sum of all line item totals, saturating at the bounds of `Decimal`.
    pub fn total(&self) -> Decimal {
        self.items
            .iter()
            .map(|stored| stored.item.total())
            .fold(Decimal::ZERO, |sum, total| {
                sum.checked_add(total)
                    .unwrap_or_else(|| saturated(total.is_sign_negative()))
            })
    }
}

fn saturated(negative: bool) -> Decimal {
    if negative { Decimal::MIN } else { Decimal::MAX }
}
