//! Domain error types.

use common::InvoiceId;
use invoice_store::StoreError;
use thiserror::Error;

/// Errors that can occur during invoice operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// An error occurred in the store.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// No invoice row exists for the key.
    #[error("Invoice not found: {0}")]
    InvoiceNotFound(InvoiceId),

    /// The invoice row exists but one of its 1:1 rows does not.
    #[error("Invoice {invoice_id} has no {relation} row")]
    IncompleteAggregate {
        relation: &'static str,
        invoice_id: InvoiceId,
    },

    /// The payload cannot be applied.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
}
