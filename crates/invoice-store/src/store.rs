use async_trait::async_trait;

use crate::{
    BillingOrigin, Client, InvoiceAggregate, InvoiceHeader, InvoiceId, LineItem, LineItemId,
    Result, StoredLineItem,
};

/// Every statement a transaction can issue.
///
/// Used to label traces and as the target of the in-memory store's fault
/// hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Statement {
    InsertInvoice,
    InsertBillingOrigin,
    InsertClient,
    InsertLineItem,
    SelectInvoice,
    SelectBillingOrigin,
    SelectClient,
    SelectLineItems,
    UpdateInvoice,
    UpdateBillingOrigin,
    UpdateClient,
    UpdateLineItem,
    DeleteLineItems,
    DeleteClient,
    DeleteBillingOrigin,
    DeleteInvoice,
    Commit,
}

impl Statement {
    /// Returns the statement name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Statement::InsertInvoice => "insert_invoice",
            Statement::InsertBillingOrigin => "insert_billing_origin",
            Statement::InsertClient => "insert_client",
            Statement::InsertLineItem => "insert_line_item",
            Statement::SelectInvoice => "select_invoice",
            Statement::SelectBillingOrigin => "select_billing_origin",
            Statement::SelectClient => "select_client",
            Statement::SelectLineItems => "select_line_items",
            Statement::UpdateInvoice => "update_invoice",
            Statement::UpdateBillingOrigin => "update_billing_origin",
            Statement::UpdateClient => "update_client",
            Statement::UpdateLineItem => "update_line_item",
            Statement::DeleteLineItems => "delete_line_items",
            Statement::DeleteClient => "delete_client",
            Statement::DeleteBillingOrigin => "delete_billing_origin",
            Statement::DeleteInvoice => "delete_invoice",
            Statement::Commit => "commit",
        }
    }

    /// The relation the statement touches, or `None` for commit.
    pub fn table(&self) -> Option<&'static str> {
        match self {
            Statement::InsertInvoice
            | Statement::SelectInvoice
            | Statement::UpdateInvoice
            | Statement::DeleteInvoice => Some("invoice"),
            Statement::InsertBillingOrigin
            | Statement::SelectBillingOrigin
            | Statement::UpdateBillingOrigin
            | Statement::DeleteBillingOrigin => Some("bill_from"),
            Statement::InsertClient
            | Statement::SelectClient
            | Statement::UpdateClient
            | Statement::DeleteClient => Some("clients"),
            Statement::InsertLineItem
            | Statement::SelectLineItems
            | Statement::UpdateLineItem
            | Statement::DeleteLineItems => Some("items"),
            Statement::Commit => None,
        }
    }
}

impl std::fmt::Display for Statement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Core trait for invoice store implementations.
///
/// The store is a long-lived, shared capability. Reads that span several
/// relations see one committed snapshot; writes happen only inside a
/// [`StoreTransaction`].
#[async_trait]
pub trait InvoiceStore: Send + Sync {
    /// The transaction type handed out by [`begin`](Self::begin).
    type Transaction: StoreTransaction;

    /// Opens a transaction.
    async fn begin(&self) -> Result<Self::Transaction>;

    /// Reads every complete aggregate, oldest invoice first.
    ///
    /// Invoices missing their billing origin or client row are not returned.
    async fn list_aggregates(&self) -> Result<Vec<InvoiceAggregate>>;

    /// Reads one aggregate by key.
    async fn get_aggregate(&self, invoice_id: InvoiceId) -> Result<Option<InvoiceAggregate>>;

    /// Reads every line item, grouped by invoice and ordered by position.
    async fn list_line_items(&self) -> Result<Vec<StoredLineItem>>;
}

/// A unit of work against the four invoice relations.
///
/// Nothing written through a transaction is visible to other callers until
/// [`commit`](Self::commit) succeeds. Dropping a transaction without
/// committing rolls it back, so every exit path closes it.
///
/// Update and delete statements return the number of affected rows; zero is
/// not an error.
#[async_trait]
pub trait StoreTransaction: Send {
    async fn insert_invoice(&mut self, invoice_id: InvoiceId, header: &InvoiceHeader)
    -> Result<()>;

    async fn insert_billing_origin(
        &mut self,
        invoice_id: InvoiceId,
        origin: &BillingOrigin,
    ) -> Result<()>;

    async fn insert_client(&mut self, invoice_id: InvoiceId, client: &Client) -> Result<()>;

    async fn insert_line_item(&mut self, item: &StoredLineItem) -> Result<()>;

    async fn fetch_invoice(&mut self, invoice_id: InvoiceId) -> Result<Option<InvoiceHeader>>;

    async fn fetch_billing_origin(&mut self, invoice_id: InvoiceId)
    -> Result<Option<BillingOrigin>>;

    async fn fetch_client(&mut self, invoice_id: InvoiceId) -> Result<Option<Client>>;

    /// Reads the invoice's line items ordered by position.
    async fn fetch_line_items(&mut self, invoice_id: InvoiceId) -> Result<Vec<StoredLineItem>>;

    async fn update_invoice(&mut self, invoice_id: InvoiceId, header: &InvoiceHeader)
    -> Result<u64>;

    async fn update_billing_origin(
        &mut self,
        invoice_id: InvoiceId,
        origin: &BillingOrigin,
    ) -> Result<u64>;

    async fn update_client(&mut self, invoice_id: InvoiceId, client: &Client) -> Result<u64>;

    async fn update_line_item(&mut self, item_id: LineItemId, item: &LineItem) -> Result<u64>;

    async fn delete_line_items(&mut self, invoice_id: InvoiceId) -> Result<u64>;

    async fn delete_client(&mut self, invoice_id: InvoiceId) -> Result<u64>;

    async fn delete_billing_origin(&mut self, invoice_id: InvoiceId) -> Result<u64>;

    async fn delete_invoice(&mut self, invoice_id: InvoiceId) -> Result<u64>;

    /// Makes every statement of the transaction visible at once.
    async fn commit(self) -> Result<()>;

    /// Discards every statement of the transaction.
    async fn rollback(self) -> Result<()>;
}
