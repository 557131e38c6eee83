//! HTTP route handlers.

pub mod health;
pub mod invoices;
pub mod metrics;
