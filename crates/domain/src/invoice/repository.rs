//! Repository over the invoice aggregate.
//!
//! Every operation that writes more than one relation runs inside a single
//! store transaction: it commits when every statement succeeds and rolls
//! back on the first failure.

use std::time::Instant;

use common::{IdGenerator, InvoiceId, UuidGenerator};
use invoice_store::{InvoiceAggregate, InvoiceStore, LineItem, StoreTransaction, StoredLineItem};

use crate::error::DomainError;

use super::payload::{InvoicePatch, LineItemPatch, NewInvoice};

const OP_CREATE: &str = "create";
const OP_UPDATE: &str = "update";
const OP_DELETE: &str = "delete";
const OP_LIST: &str = "list";
const OP_GET: &str = "get";
const OP_LIST_ITEMS: &str = "list_items";

/// Reads and writes complete invoice aggregates.
pub struct InvoiceRepository<S: InvoiceStore, G: IdGenerator = UuidGenerator> {
    store: S,
    ids: G,
}

impl<S: InvoiceStore> InvoiceRepository<S> {
    /// Creates a repository that keys new rows with random UUIDs.
    pub fn new(store: S) -> Self {
        Self::with_id_generator(store, UuidGenerator)
    }
}

impl<S: InvoiceStore, G: IdGenerator> InvoiceRepository<S, G> {
    pub fn with_id_generator(store: S, ids: G) -> Self {
        Self { store, ids }
    }

    /// Returns a reference to the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Lists every complete aggregate, oldest first.
    #[tracing::instrument(skip(self))]
    pub async fn list_all(&self) -> Result<Vec<InvoiceAggregate>, DomainError> {
        let started = Instant::now();
        let result = self.store.list_aggregates().await;
        record_outcome(OP_LIST, started, result.is_ok());
        Ok(result?)
    }

    /// Loads one aggregate, or `None` if it does not exist.
    #[tracing::instrument(skip(self))]
    pub async fn get(
        &self,
        invoice_id: InvoiceId,
    ) -> Result<Option<InvoiceAggregate>, DomainError> {
        let started = Instant::now();
        let result = self.store.get_aggregate(invoice_id).await;
        record_outcome(OP_GET, started, result.is_ok());
        Ok(result?)
    }

    /// Lists every stored line item across all invoices.
    #[tracing::instrument(skip(self))]
    pub async fn list_line_items(&self) -> Result<Vec<StoredLineItem>, DomainError> {
        let started = Instant::now();
        let result = self.store.list_line_items().await;
        record_outcome(OP_LIST_ITEMS, started, result.is_ok());
        Ok(result?)
    }

    /// Creates an invoice with its billing origin, client and line items.
    ///
    /// Either all rows are written or none are.
    #[tracing::instrument(skip(self, payload))]
    pub async fn create(&self, payload: NewInvoice) -> Result<InvoiceId, DomainError> {
        let started = Instant::now();
        let result = self.try_create(&payload).await;
        record_outcome(OP_CREATE, started, result.is_ok());

        if let Ok(invoice_id) = &result {
            tracing::info!(%invoice_id, "invoice created");
        }
        result
    }

    /// Merges a partial update into an existing aggregate.
    ///
    /// Fields that are absent or falsy in the patch keep their stored value.
    /// Item patches are applied by position; patches past the last stored
    /// item are inserted as new items and must carry every field.
    #[tracing::instrument(skip(self, patch))]
    pub async fn update(
        &self,
        invoice_id: InvoiceId,
        patch: &InvoicePatch,
    ) -> Result<(), DomainError> {
        let started = Instant::now();
        let result = self.try_update(invoice_id, patch).await;
        record_outcome(OP_UPDATE, started, result.is_ok());

        if result.is_ok() {
            tracing::info!(%invoice_id, "invoice updated");
        }
        result
    }

    /// Deletes an aggregate, children first.
    ///
    /// Returns whether an invoice row was removed. Deleting a missing
    /// invoice is not an error.
    #[tracing::instrument(skip(self))]
    pub async fn delete(&self, invoice_id: InvoiceId) -> Result<bool, DomainError> {
        let started = Instant::now();
        let result = self.try_delete(invoice_id).await;
        record_outcome(OP_DELETE, started, result.is_ok());

        if let Ok(removed) = result {
            tracing::info!(%invoice_id, removed, "invoice deleted");
        }
        result
    }

    async fn try_create(&self, payload: &NewInvoice) -> Result<InvoiceId, DomainError> {
        let items = payload.line_items()?;
        let invoice_id = self.ids.next_invoice_id();

        let mut tx = self.store.begin().await?;
        let outcome = self
            .insert_aggregate(&mut tx, invoice_id, payload, items)
            .await;
        finish(tx, outcome, OP_CREATE).await?;

        Ok(invoice_id)
    }

    async fn insert_aggregate(
        &self,
        tx: &mut S::Transaction,
        invoice_id: InvoiceId,
        payload: &NewInvoice,
        items: Vec<LineItem>,
    ) -> Result<(), DomainError> {
        tx.insert_invoice(invoice_id, &payload.header()).await?;
        tx.insert_billing_origin(invoice_id, &payload.billing_origin())
            .await?;
        tx.insert_client(invoice_id, &payload.client()).await?;

        for (position, item) in (0..).zip(items) {
            let stored = StoredLineItem {
                item_id: self.ids.next_line_item_id(),
                invoice_id,
                position,
                item,
            };
            tx.insert_line_item(&stored).await?;
        }
        Ok(())
    }

    async fn try_update(
        &self,
        invoice_id: InvoiceId,
        patch: &InvoicePatch,
    ) -> Result<(), DomainError> {
        let item_patches = patch.item_patches()?;

        let mut tx = self.store.begin().await?;
        let outcome = self
            .apply_patch(&mut tx, invoice_id, patch, &item_patches)
            .await;
        finish(tx, outcome, OP_UPDATE).await
    }

    async fn apply_patch(
        &self,
        tx: &mut S::Transaction,
        invoice_id: InvoiceId,
        patch: &InvoicePatch,
        item_patches: &[LineItemPatch],
    ) -> Result<(), DomainError> {
        let header = tx
            .fetch_invoice(invoice_id)
            .await?
            .ok_or(DomainError::InvoiceNotFound(invoice_id))?;
        let origin = tx
            .fetch_billing_origin(invoice_id)
            .await?
            .ok_or(DomainError::IncompleteAggregate {
                relation: "bill_from",
                invoice_id,
            })?;
        let client = tx
            .fetch_client(invoice_id)
            .await?
            .ok_or(DomainError::IncompleteAggregate {
                relation: "clients",
                invoice_id,
            })?;
        let stored_items = tx.fetch_line_items(invoice_id).await?;

        tx.update_invoice(invoice_id, &patch.merge_header(header))
            .await?;
        tx.update_billing_origin(invoice_id, &patch.merge_billing_origin(origin))
            .await?;
        tx.update_client(invoice_id, &patch.merge_client(client))
            .await?;

        let mut next_position = stored_items
            .last()
            .map_or(0, |stored| stored.position + 1);

        for (index, item_patch) in item_patches.iter().enumerate() {
            match stored_items.get(index) {
                Some(stored) => {
                    let merged = item_patch.merge(stored.item.clone());
                    tx.update_line_item(stored.item_id, &merged).await?;
                }
                None => {
                    let item = item_patch.to_new_item().ok_or_else(|| {
                        DomainError::InvalidPayload(format!(
                            "item {index} is new and needs a non-empty itemName, quantity and price"
                        ))
                    })?;
                    let stored = StoredLineItem {
                        item_id: self.ids.next_line_item_id(),
                        invoice_id,
                        position: next_position,
                        item,
                    };
                    tx.insert_line_item(&stored).await?;
                    next_position += 1;
                }
            }
        }
        Ok(())
    }

    async fn try_delete(&self, invoice_id: InvoiceId) -> Result<bool, DomainError> {
        let mut tx = self.store.begin().await?;
        let outcome = remove_aggregate(&mut tx, invoice_id).await;
        let removed = finish(tx, outcome, OP_DELETE).await?;
        Ok(removed > 0)
    }
}

async fn remove_aggregate<T: StoreTransaction>(
    tx: &mut T,
    invoice_id: InvoiceId,
) -> Result<u64, DomainError> {
    tx.delete_line_items(invoice_id).await?;
    tx.delete_client(invoice_id).await?;
    tx.delete_billing_origin(invoice_id).await?;
    Ok(tx.delete_invoice(invoice_id).await?)
}

/// Commits on success, rolls back on failure.
///
/// A failed rollback is logged; the statement error is still returned.
async fn finish<T: StoreTransaction, V>(
    tx: T,
    outcome: Result<V, DomainError>,
    operation: &'static str,
) -> Result<V, DomainError> {
    match outcome {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(e) => {
            tracing::warn!(operation, error = %e, "rolling back transaction");
            metrics::counter!("invoice_transactions_rolled_back_total", "operation" => operation)
                .increment(1);
            if let Err(rollback_error) = tx.rollback().await {
                tracing::error!(operation, error = %rollback_error, "rollback failed");
            }
            Err(e)
        }
    }
}

fn record_outcome(operation: &'static str, started: Instant, ok: bool) {
    let outcome = if ok { "ok" } else { "error" };
    metrics::counter!("invoice_operations_total", "operation" => operation, "outcome" => outcome)
        .increment(1);
    metrics::histogram!("invoice_operation_duration_seconds", "operation" => operation)
        .record(started.elapsed().as_secs_f64());
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use chrono::NaiveDate;
    use common::LineItemId;
    use invoice_store::{InMemoryInvoiceStore, InvoiceStatus, Statement};
    use rust_decimal_macros::dec;

    use super::*;
    use crate::NewLineItem;

    fn payload(items: Vec<NewLineItem>) -> NewInvoice {
        NewInvoice {
            invoice_date: NaiveDate::from_ymd_opt(2024, 8, 18).unwrap(),
            payment_terms: "Net 30".to_string(),
            project_description: "Graphic Design".to_string(),
            invoice_status: InvoiceStatus::Pending,
            street_address: "19 Union Terrace".to_string(),
            city: "London".to_string(),
            post_code: "E1 3EZ".to_string(),
            country: "United Kingdom".to_string(),
            clients_name: "Alex Grim".to_string(),
            clients_email: "alexgrim@mail.com".to_string(),
            clients_street_address: "84 Church Way".to_string(),
            clients_city: "Bradford".to_string(),
            clients_post_code: "BD1 9PB".to_string(),
            clients_country: "United Kingdom".to_string(),
            items,
            item_name: None,
            quantity: None,
            price: None,
        }
    }

    fn item(name: &str, quantity: i32, price: rust_decimal::Decimal) -> NewLineItem {
        NewLineItem {
            item_name: name.to_string(),
            quantity,
            price,
        }
    }

    #[tokio::test]
    async fn create_writes_all_relations() {
        let store = InMemoryInvoiceStore::new();
        let repo = InvoiceRepository::new(store.clone());

        let invoice_id = repo
            .create(payload(vec![item("Design", 2, dec!(50))]))
            .await
            .unwrap();

        let aggregate = repo.get(invoice_id).await.unwrap().unwrap();
        assert_eq!(aggregate.client.email, "alexgrim@mail.com");
        assert_eq!(aggregate.items.len(), 1);
        assert_eq!(aggregate.items[0].position, 0);
        assert_eq!(aggregate.total(), dec!(100));
        assert_eq!(store.billing_origin_count().await, 1);
    }

    #[derive(Default)]
    struct SequentialIds {
        next: AtomicU64,
    }

    impl SequentialIds {
        fn take(&self) -> uuid::Uuid {
            uuid::Uuid::from_u128(u128::from(self.next.fetch_add(1, Ordering::SeqCst) + 1))
        }
    }

    impl IdGenerator for SequentialIds {
        fn next_invoice_id(&self) -> InvoiceId {
            InvoiceId::from_uuid(self.take())
        }

        fn next_line_item_id(&self) -> LineItemId {
            LineItemId::from_uuid(self.take())
        }
    }

    #[tokio::test]
    async fn create_uses_injected_identifiers() {
        let repo =
            InvoiceRepository::with_id_generator(InMemoryInvoiceStore::new(), SequentialIds::default());

        let invoice_id = repo
            .create(payload(vec![item("Design", 2, dec!(50)), item("Hosting", 1, dec!(20))]))
            .await
            .unwrap();

        assert_eq!(invoice_id.as_uuid(), uuid::Uuid::from_u128(1));
        let aggregate = repo.get(invoice_id).await.unwrap().unwrap();
        assert_eq!(aggregate.items[0].item_id.as_uuid(), uuid::Uuid::from_u128(2));
        assert_eq!(aggregate.items[1].item_id.as_uuid(), uuid::Uuid::from_u128(3));
    }

    #[tokio::test]
    async fn create_rolls_back_when_a_statement_fails() {
        let store = InMemoryInvoiceStore::new();
        let repo = InvoiceRepository::new(store.clone());
        store.fail_on(Statement::InsertClient);

        let result = repo.create(payload(vec![item("Design", 2, dec!(50))])).await;

        assert!(matches!(result, Err(DomainError::Store(_))));
        assert_eq!(store.invoice_count().await, 0);
        assert_eq!(store.billing_origin_count().await, 0);
        assert_eq!(store.line_item_count().await, 0);
    }

    #[tokio::test]
    async fn create_rejects_invalid_item_without_writing() {
        let store = InMemoryInvoiceStore::new();
        let repo = InvoiceRepository::new(store.clone());

        let result = repo
            .create(payload(vec![
                item("Design", 2, dec!(50)),
                item("Refund", 1, dec!(-10)),
            ]))
            .await;

        assert!(result.is_err());
        assert_eq!(store.invoice_count().await, 0);
        assert_eq!(store.line_item_count().await, 0);
    }

    #[tokio::test]
    async fn update_of_missing_invoice_is_not_found() {
        let repo = InvoiceRepository::new(InMemoryInvoiceStore::new());

        let result = repo
            .update(InvoiceId::new(), &InvoicePatch::default())
            .await;

        assert!(matches!(result, Err(DomainError::InvoiceNotFound(_))));
    }

    #[tokio::test]
    async fn update_appends_complete_excess_items() {
        let repo = InvoiceRepository::new(InMemoryInvoiceStore::new());
        let invoice_id = repo
            .create(payload(vec![item("Design", 2, dec!(50))]))
            .await
            .unwrap();

        let patch = InvoicePatch {
            items: Some(vec![
                LineItemPatch::default(),
                LineItemPatch {
                    item_name: Some("Hosting".to_string()),
                    quantity: Some(1),
                    price: Some(dec!(20)),
                },
            ]),
            ..Default::default()
        };
        repo.update(invoice_id, &patch).await.unwrap();

        let aggregate = repo.get(invoice_id).await.unwrap().unwrap();
        assert_eq!(aggregate.items.len(), 2);
        assert_eq!(aggregate.items[0].item, LineItem::new("Design", 2, dec!(50)));
        assert_eq!(aggregate.items[1].position, 1);
        assert_eq!(aggregate.items[1].item.name, "Hosting");
    }

    #[tokio::test]
    async fn update_rejects_incomplete_excess_item_and_keeps_state() {
        let repo = InvoiceRepository::new(InMemoryInvoiceStore::new());
        let invoice_id = repo
            .create(payload(vec![item("Design", 2, dec!(50))]))
            .await
            .unwrap();
        let before = repo.get(invoice_id).await.unwrap().unwrap();

        let patch = InvoicePatch {
            payment_terms: Some("Net 15".to_string()),
            items: Some(vec![
                LineItemPatch::default(),
                LineItemPatch {
                    quantity: Some(3),
                    ..Default::default()
                },
            ]),
            ..Default::default()
        };
        let result = repo.update(invoice_id, &patch).await;

        assert!(matches!(result, Err(DomainError::InvalidPayload(_))));
        assert_eq!(repo.get(invoice_id).await.unwrap().unwrap(), before);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = InMemoryInvoiceStore::new();
        let repo = InvoiceRepository::new(store.clone());
        let invoice_id = repo
            .create(payload(vec![item("Design", 2, dec!(50))]))
            .await
            .unwrap();

        assert!(repo.delete(invoice_id).await.unwrap());
        assert!(!repo.delete(invoice_id).await.unwrap());
        assert_eq!(store.invoice_count().await, 0);
        assert_eq!(store.line_item_count().await, 0);
    }
}
