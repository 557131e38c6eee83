//! Shared identifier types for the invoice service.

pub mod id;
pub mod types;

pub use id::{IdGenerator, UuidGenerator};
pub use types::{InvoiceId, LineItemId};
