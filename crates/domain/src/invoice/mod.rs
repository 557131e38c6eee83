//! Invoice aggregate payloads, merge rules and repository.

mod merge;
mod payload;
mod repository;

pub use merge::{Truthy, merge_field};
pub use payload::{InvoicePatch, LineItemPatch, NewInvoice, NewLineItem};
pub use repository::InvoiceRepository;
