use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};

use crate::{
    BillingOrigin, Client, InvoiceAggregate, InvoiceHeader, InvoiceId, LineItem, LineItemId,
    Result, Statement, StoreError, StoredLineItem,
    store::{InvoiceStore, StoreTransaction},
};

/// Scale of `items.price`.
const PRICE_SCALE: u32 = 2;
/// Exclusive bound on `items.price` magnitude after rounding, from `NUMERIC(12,2)`.
const PRICE_LIMIT: i64 = 10_000_000_000;

#[derive(Debug, Clone)]
struct InvoiceRow {
    header: InvoiceHeader,
    created_seq: u64,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
struct Tables {
    invoices: HashMap<InvoiceId, InvoiceRow>,
    billing_origins: HashMap<InvoiceId, BillingOrigin>,
    clients: HashMap<InvoiceId, Client>,
    line_items: Vec<StoredLineItem>,
    next_seq: u64,
}

impl Tables {
    fn aggregate(&self, invoice_id: InvoiceId) -> Option<InvoiceAggregate> {
        let row = self.invoices.get(&invoice_id)?;
        let billing_origin = self.billing_origins.get(&invoice_id)?;
        let client = self.clients.get(&invoice_id)?;

        Some(InvoiceAggregate {
            invoice_id,
            created_at: row.created_at,
            header: row.header.clone(),
            billing_origin: billing_origin.clone(),
            client: client.clone(),
            items: self.items_for(invoice_id),
        })
    }

    fn items_for(&self, invoice_id: InvoiceId) -> Vec<StoredLineItem> {
        let mut items: Vec<_> = self
            .line_items
            .iter()
            .filter(|stored| stored.invoice_id == invoice_id)
            .cloned()
            .collect();
        items.sort_by_key(|stored| stored.position);
        items
    }

    fn has_children(&self, invoice_id: InvoiceId) -> bool {
        self.billing_origins.contains_key(&invoice_id)
            || self.clients.contains_key(&invoice_id)
            || self
                .line_items
                .iter()
                .any(|stored| stored.invoice_id == invoice_id)
    }
}

/// In-memory invoice store for tests and database-less runs.
///
/// Mirrors the schema's key, foreign-key and check constraints, and stores
/// prices the way a `NUMERIC(12,2)` column would. A
/// transaction holds the table write lock for its whole lifetime and works
/// on a private copy, so readers only ever see committed state.
#[derive(Clone, Default)]
pub struct InMemoryInvoiceStore {
    tables: Arc<RwLock<Tables>>,
    fault: Arc<Mutex<Option<Statement>>>,
}

impl InMemoryInvoiceStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next execution of `statement` fail with
    /// [`StoreError::Injected`]. The fault fires once.
    pub fn fail_on(&self, statement: Statement) {
        *self.fault.lock().unwrap_or_else(PoisonError::into_inner) = Some(statement);
    }

    /// Returns the number of invoice rows.
    pub async fn invoice_count(&self) -> usize {
        self.tables.read().await.invoices.len()
    }

    /// Returns the number of billing-origin rows.
    pub async fn billing_origin_count(&self) -> usize {
        self.tables.read().await.billing_origins.len()
    }

    /// Returns the number of client rows.
    pub async fn client_count(&self) -> usize {
        self.tables.read().await.clients.len()
    }

    /// Returns the number of line item rows.
    pub async fn line_item_count(&self) -> usize {
        self.tables.read().await.line_items.len()
    }

    /// Clears all tables.
    pub async fn clear(&self) {
        *self.tables.write().await = Tables::default();
    }
}

#[async_trait]
impl InvoiceStore for InMemoryInvoiceStore {
    type Transaction = InMemoryTransaction;

    async fn begin(&self) -> Result<InMemoryTransaction> {
        let guard = self.tables.clone().write_owned().await;
        let working = (*guard).clone();
        Ok(InMemoryTransaction {
            guard,
            working,
            fault: self.fault.clone(),
        })
    }

    async fn list_aggregates(&self) -> Result<Vec<InvoiceAggregate>> {
        let tables = self.tables.read().await;
        let mut rows: Vec<_> = tables.invoices.iter().collect();
        rows.sort_by_key(|(_, row)| row.created_seq);

        Ok(rows
            .into_iter()
            .filter_map(|(invoice_id, _)| tables.aggregate(*invoice_id))
            .collect())
    }

    async fn get_aggregate(&self, invoice_id: InvoiceId) -> Result<Option<InvoiceAggregate>> {
        Ok(self.tables.read().await.aggregate(invoice_id))
    }

    async fn list_line_items(&self) -> Result<Vec<StoredLineItem>> {
        let tables = self.tables.read().await;
        let mut items = tables.line_items.clone();
        items.sort_by_key(|stored| (stored.invoice_id, stored.position));
        Ok(items)
    }
}

/// Transaction over the in-memory tables.
///
/// Dropping it without [`commit`](StoreTransaction::commit) discards the
/// working copy.
pub struct InMemoryTransaction {
    guard: OwnedRwLockWriteGuard<Tables>,
    working: Tables,
    fault: Arc<Mutex<Option<Statement>>>,
}

impl InMemoryTransaction {
    fn execute(&self, statement: Statement) -> Result<()> {
        let mut fault = self.fault.lock().unwrap_or_else(PoisonError::into_inner);
        if *fault == Some(statement) {
            *fault = None;
            return Err(StoreError::Injected(statement));
        }
        tracing::trace!(statement = %statement, "executing");
        Ok(())
    }

    fn require_invoice(&self, invoice_id: InvoiceId, table: &'static str) -> Result<()> {
        if self.working.invoices.contains_key(&invoice_id) {
            Ok(())
        } else {
            Err(StoreError::ConstraintViolation {
                table,
                constraint: format!("{table}_invoice_id_fkey"),
            })
        }
    }

    /// Applies the `items` column precision and check constraints, returning
    /// the row as it would be stored.
    fn check_line_item(item: &LineItem) -> Result<LineItem> {
        let mut price = item
            .price
            .round_dp_with_strategy(PRICE_SCALE, RoundingStrategy::MidpointAwayFromZero);
        if price.abs() >= Decimal::from(PRICE_LIMIT) {
            return Err(StoreError::ConstraintViolation {
                table: "items",
                constraint: "numeric_value_out_of_range".to_string(),
            });
        }
        if item.quantity <= 0 {
            return Err(StoreError::ConstraintViolation {
                table: "items",
                constraint: "items_quantity_positive".to_string(),
            });
        }
        if price < Decimal::ZERO {
            return Err(StoreError::ConstraintViolation {
                table: "items",
                constraint: "items_price_non_negative".to_string(),
            });
        }

        price.rescale(PRICE_SCALE);
        Ok(LineItem {
            price,
            ..item.clone()
        })
    }

    fn duplicate_key(table: &'static str) -> StoreError {
        StoreError::ConstraintViolation {
            table,
            constraint: format!("{table}_pkey"),
        }
    }
}

#[async_trait]
impl StoreTransaction for InMemoryTransaction {
    async fn insert_invoice(
        &mut self,
        invoice_id: InvoiceId,
        header: &InvoiceHeader,
    ) -> Result<()> {
        self.execute(Statement::InsertInvoice)?;
        if self.working.invoices.contains_key(&invoice_id) {
            return Err(Self::duplicate_key("invoice"));
        }

        self.working.next_seq += 1;
        let row = InvoiceRow {
            header: header.clone(),
            created_seq: self.working.next_seq,
            created_at: Utc::now(),
        };
        self.working.invoices.insert(invoice_id, row);
        Ok(())
    }

    async fn insert_billing_origin(
        &mut self,
        invoice_id: InvoiceId,
        origin: &BillingOrigin,
    ) -> Result<()> {
        self.execute(Statement::InsertBillingOrigin)?;
        self.require_invoice(invoice_id, "bill_from")?;
        if self.working.billing_origins.contains_key(&invoice_id) {
            return Err(Self::duplicate_key("bill_from"));
        }
        self.working
            .billing_origins
            .insert(invoice_id, origin.clone());
        Ok(())
    }

    async fn insert_client(&mut self, invoice_id: InvoiceId, client: &Client) -> Result<()> {
        self.execute(Statement::InsertClient)?;
        self.require_invoice(invoice_id, "clients")?;
        if self.working.clients.contains_key(&invoice_id) {
            return Err(Self::duplicate_key("clients"));
        }
        self.working.clients.insert(invoice_id, client.clone());
        Ok(())
    }

    async fn insert_line_item(&mut self, item: &StoredLineItem) -> Result<()> {
        self.execute(Statement::InsertLineItem)?;
        self.require_invoice(item.invoice_id, "items")?;
        let row = StoredLineItem {
            item: Self::check_line_item(&item.item)?,
            ..item.clone()
        };

        let items = &self.working.line_items;
        if items.iter().any(|stored| stored.item_id == item.item_id) {
            return Err(Self::duplicate_key("items"));
        }
        if items
            .iter()
            .any(|stored| stored.invoice_id == item.invoice_id && stored.position == item.position)
        {
            return Err(StoreError::ConstraintViolation {
                table: "items",
                constraint: "items_invoice_position_unique".to_string(),
            });
        }

        self.working.line_items.push(row);
        Ok(())
    }

    async fn fetch_invoice(&mut self, invoice_id: InvoiceId) -> Result<Option<InvoiceHeader>> {
        self.execute(Statement::SelectInvoice)?;
        Ok(self
            .working
            .invoices
            .get(&invoice_id)
            .map(|row| row.header.clone()))
    }

    async fn fetch_billing_origin(
        &mut self,
        invoice_id: InvoiceId,
    ) -> Result<Option<BillingOrigin>> {
        self.execute(Statement::SelectBillingOrigin)?;
        Ok(self.working.billing_origins.get(&invoice_id).cloned())
    }

    async fn fetch_client(&mut self, invoice_id: InvoiceId) -> Result<Option<Client>> {
        self.execute(Statement::SelectClient)?;
        Ok(self.working.clients.get(&invoice_id).cloned())
    }

    async fn fetch_line_items(&mut self, invoice_id: InvoiceId) -> Result<Vec<StoredLineItem>> {
        self.execute(Statement::SelectLineItems)?;
        Ok(self.working.items_for(invoice_id))
    }

    async fn update_invoice(
        &mut self,
        invoice_id: InvoiceId,
        header: &InvoiceHeader,
    ) -> Result<u64> {
        self.execute(Statement::UpdateInvoice)?;
        match self.working.invoices.get_mut(&invoice_id) {
            Some(row) => {
                row.header = header.clone();
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn update_billing_origin(
        &mut self,
        invoice_id: InvoiceId,
        origin: &BillingOrigin,
    ) -> Result<u64> {
        self.execute(Statement::UpdateBillingOrigin)?;
        match self.working.billing_origins.get_mut(&invoice_id) {
            Some(row) => {
                *row = origin.clone();
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn update_client(&mut self, invoice_id: InvoiceId, client: &Client) -> Result<u64> {
        self.execute(Statement::UpdateClient)?;
        match self.working.clients.get_mut(&invoice_id) {
            Some(row) => {
                *row = client.clone();
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn update_line_item(&mut self, item_id: LineItemId, item: &LineItem) -> Result<u64> {
        self.execute(Statement::UpdateLineItem)?;
        let item = Self::check_line_item(item)?;
        match self
            .working
            .line_items
            .iter_mut()
            .find(|stored| stored.item_id == item_id)
        {
            Some(stored) => {
                stored.item = item;
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn delete_line_items(&mut self, invoice_id: InvoiceId) -> Result<u64> {
        self.execute(Statement::DeleteLineItems)?;
        let before = self.working.line_items.len();
        self.working
            .line_items
            .retain(|stored| stored.invoice_id != invoice_id);
        Ok((before - self.working.line_items.len()) as u64)
    }

    async fn delete_client(&mut self, invoice_id: InvoiceId) -> Result<u64> {
        self.execute(Statement::DeleteClient)?;
        Ok(self.working.clients.remove(&invoice_id).map_or(0, |_| 1))
    }

    async fn delete_billing_origin(&mut self, invoice_id: InvoiceId) -> Result<u64> {
        self.execute(Statement::DeleteBillingOrigin)?;
        Ok(self
            .working
            .billing_origins
            .remove(&invoice_id)
            .map_or(0, |_| 1))
    }

    async fn delete_invoice(&mut self, invoice_id: InvoiceId) -> Result<u64> {
        self.execute(Statement::DeleteInvoice)?;
        if self.working.has_children(invoice_id) {
            return Err(StoreError::ConstraintViolation {
                table: "invoice",
                constraint: "invoice_referenced_by_children".to_string(),
            });
        }
        Ok(self.working.invoices.remove(&invoice_id).map_or(0, |_| 1))
    }

    async fn commit(mut self) -> Result<()> {
        self.execute(Statement::Commit)?;
        *self.guard = std::mem::take(&mut self.working);
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        Ok(())
    }
}
