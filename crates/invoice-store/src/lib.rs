//! Relational store adapter for invoice aggregates.
//!
//! Four relations (`invoice`, `bill_from`, `clients`, `items`) joined by one
//! shared invoice key. All writes go through a [`StoreTransaction`] obtained
//! from [`InvoiceStore::begin`]; every value reaches the database as a bound
//! parameter.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod record;
pub mod store;

pub use common::{InvoiceId, LineItemId};
pub use error::{Result, StoreError};
pub use memory::InMemoryInvoiceStore;
pub use postgres::PostgresInvoiceStore;
pub use record::{
    BillingOrigin, Client, InvoiceAggregate, InvoiceHeader, InvoiceStatus, LineItem,
    StoredLineItem,
};
pub use store::{InvoiceStore, Statement, StoreTransaction};
