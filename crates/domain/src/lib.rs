//! Domain layer for the invoice service.
//!
//! This crate provides:
//! - Create and update payloads for the invoice aggregate
//! - Truthy-override merge of partial updates
//! - `InvoiceRepository`, which applies every multi-relation change in one
//!   store transaction

pub mod error;
pub mod invoice;

pub use error::DomainError;
pub use invoice::{
    InvoicePatch, InvoiceRepository, LineItemPatch, NewInvoice, NewLineItem, Truthy, merge_field,
};
