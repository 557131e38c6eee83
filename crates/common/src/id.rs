//! Identifier provider.

use crate::{InvoiceId, LineItemId};

/// Source of fresh identifiers for new aggregate rows.
///
/// Implementations must produce values that are unique with overwhelming
/// probability; callers never check them against the store.
pub trait IdGenerator: Send + Sync {
    /// Issues the key shared by a new invoice and its dependent rows.
    fn next_invoice_id(&self) -> InvoiceId;

    /// Issues the identity of a new line item.
    fn next_line_item_id(&self) -> LineItemId;
}

/// Random (v4) UUID generator.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn next_invoice_id(&self) -> InvoiceId {
        InvoiceId::new()
    }

    fn next_line_item_id(&self) -> LineItemId {
        LineItemId::new()
    }
}
