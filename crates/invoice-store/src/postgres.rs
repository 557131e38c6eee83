use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    BillingOrigin, Client, InvoiceAggregate, InvoiceHeader, InvoiceId, InvoiceStatus, LineItem,
    LineItemId, Result, Statement, StoreError, StoredLineItem,
    store::{InvoiceStore, StoreTransaction},
};

const SELECT_AGGREGATES: &str = r#"
    SELECT inv.invoice_id, inv.created_at, inv.invoice_date, inv.payment_terms,
           inv.project_description, inv.invoice_status,
           bf.street_address, bf.city, bf.post_code, bf.country,
           c.clients_name, c.clients_email, c.clients_street_address,
           c.clients_city, c.clients_post_code, c.clients_country
    FROM invoice inv
    INNER JOIN bill_from bf ON bf.bill_from_id = inv.invoice_id
    INNER JOIN clients c ON c.clients_id = inv.invoice_id
"#;

const SELECT_ITEMS: &str =
    "SELECT item_id, invoice_id, position, item_name, quantity, price FROM items";

/// PostgreSQL-backed invoice store.
#[derive(Clone)]
pub struct PostgresInvoiceStore {
    pool: PgPool,
}

impl PostgresInvoiceStore {
    /// Creates a new PostgreSQL invoice store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Opens a read-only transaction whose statements share one snapshot.
    async fn snapshot(&self) -> Result<sqlx::Transaction<'static, Postgres>> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await?;
        Ok(tx)
    }

    fn row_to_header(row: &PgRow) -> Result<InvoiceHeader> {
        let status: String = row.try_get("invoice_status")?;
        Ok(InvoiceHeader {
            invoice_date: row.try_get("invoice_date")?,
            payment_terms: row.try_get("payment_terms")?,
            project_description: row.try_get("project_description")?,
            status: status.parse::<InvoiceStatus>()?,
        })
    }

    fn row_to_billing_origin(row: &PgRow) -> Result<BillingOrigin> {
        Ok(BillingOrigin {
            street_address: row.try_get("street_address")?,
            city: row.try_get("city")?,
            post_code: row.try_get("post_code")?,
            country: row.try_get("country")?,
        })
    }

    fn row_to_client(row: &PgRow) -> Result<Client> {
        Ok(Client {
            name: row.try_get("clients_name")?,
            email: row.try_get("clients_email")?,
            street_address: row.try_get("clients_street_address")?,
            city: row.try_get("clients_city")?,
            post_code: row.try_get("clients_post_code")?,
            country: row.try_get("clients_country")?,
        })
    }

    fn row_to_line_item(row: &PgRow) -> Result<StoredLineItem> {
        Ok(StoredLineItem {
            item_id: LineItemId::from_uuid(row.try_get::<Uuid, _>("item_id")?),
            invoice_id: InvoiceId::from_uuid(row.try_get::<Uuid, _>("invoice_id")?),
            position: row.try_get("position")?,
            item: LineItem {
                name: row.try_get("item_name")?,
                quantity: row.try_get("quantity")?,
                price: row.try_get("price")?,
            },
        })
    }

    fn row_to_aggregate(row: &PgRow, items: Vec<StoredLineItem>) -> Result<InvoiceAggregate> {
        Ok(InvoiceAggregate {
            invoice_id: InvoiceId::from_uuid(row.try_get::<Uuid, _>("invoice_id")?),
            created_at: row.try_get("created_at")?,
            header: Self::row_to_header(row)?,
            billing_origin: Self::row_to_billing_origin(row)?,
            client: Self::row_to_client(row)?,
            items,
        })
    }
}

#[async_trait]
impl InvoiceStore for PostgresInvoiceStore {
    type Transaction = PostgresTransaction;

    async fn begin(&self) -> Result<PostgresTransaction> {
        let tx = self.pool.begin().await?;
        Ok(PostgresTransaction { tx })
    }

    async fn list_aggregates(&self) -> Result<Vec<InvoiceAggregate>> {
        let mut tx = self.snapshot().await?;

        let rows = sqlx::query(&format!(
            "{SELECT_AGGREGATES} ORDER BY inv.created_seq ASC, inv.invoice_id ASC"
        ))
        .fetch_all(&mut *tx)
        .await?;
        let item_rows = sqlx::query(&format!(
            "{SELECT_ITEMS} ORDER BY invoice_id ASC, position ASC"
        ))
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;

        let mut items_by_invoice: HashMap<InvoiceId, Vec<StoredLineItem>> = HashMap::new();
        for row in &item_rows {
            let stored = Self::row_to_line_item(row)?;
            items_by_invoice
                .entry(stored.invoice_id)
                .or_default()
                .push(stored);
        }

        rows.iter()
            .map(|row| {
                let invoice_id = InvoiceId::from_uuid(row.try_get::<Uuid, _>("invoice_id")?);
                let items = items_by_invoice.remove(&invoice_id).unwrap_or_default();
                Self::row_to_aggregate(row, items)
            })
            .collect()
    }

    async fn get_aggregate(&self, invoice_id: InvoiceId) -> Result<Option<InvoiceAggregate>> {
        let mut tx = self.snapshot().await?;

        let row = sqlx::query(&format!("{SELECT_AGGREGATES} WHERE inv.invoice_id = $1"))
            .bind(invoice_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = row else {
            tx.commit().await?;
            return Ok(None);
        };

        let item_rows = sqlx::query(&format!(
            "{SELECT_ITEMS} WHERE invoice_id = $1 ORDER BY position ASC"
        ))
        .bind(invoice_id.as_uuid())
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;

        let items = item_rows
            .iter()
            .map(Self::row_to_line_item)
            .collect::<Result<Vec<_>>>()?;
        Self::row_to_aggregate(&row, items).map(Some)
    }

    async fn list_line_items(&self) -> Result<Vec<StoredLineItem>> {
        let rows = sqlx::query(&format!(
            "{SELECT_ITEMS} ORDER BY invoice_id ASC, position ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_line_item).collect()
    }
}

/// SQLSTATE for a value that does not fit its numeric column.
const NUMERIC_VALUE_OUT_OF_RANGE: &str = "22003";

/// Maps driver errors, singling out constraint violations and numeric
/// column overflow.
fn classify(statement: Statement) -> impl FnOnce(sqlx::Error) -> StoreError {
    move |e| {
        if let sqlx::Error::Database(ref db_err) = e {
            let table = statement.table().unwrap_or("unknown");
            if let Some(constraint) = db_err.constraint() {
                return StoreError::ConstraintViolation {
                    table,
                    constraint: constraint.to_string(),
                };
            }
            if db_err.code().as_deref() == Some(NUMERIC_VALUE_OUT_OF_RANGE) {
                return StoreError::ConstraintViolation {
                    table,
                    constraint: "numeric_value_out_of_range".to_string(),
                };
            }
        }
        StoreError::Database(e)
    }
}

/// A PostgreSQL transaction.
///
/// Dropping it without committing rolls the transaction back.
pub struct PostgresTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTransaction for PostgresTransaction {
    async fn insert_invoice(
        &mut self,
        invoice_id: InvoiceId,
        header: &InvoiceHeader,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO invoice (invoice_id, invoice_date, payment_terms, project_description, invoice_status)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(invoice_id.as_uuid())
        .bind(header.invoice_date)
        .bind(&header.payment_terms)
        .bind(&header.project_description)
        .bind(header.status.as_str())
        .execute(&mut *self.tx)
        .await
        .map_err(classify(Statement::InsertInvoice))?;
        Ok(())
    }

    async fn insert_billing_origin(
        &mut self,
        invoice_id: InvoiceId,
        origin: &BillingOrigin,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO bill_from (bill_from_id, street_address, city, post_code, country)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(invoice_id.as_uuid())
        .bind(&origin.street_address)
        .bind(&origin.city)
        .bind(&origin.post_code)
        .bind(&origin.country)
        .execute(&mut *self.tx)
        .await
        .map_err(classify(Statement::InsertBillingOrigin))?;
        Ok(())
    }

    async fn insert_client(&mut self, invoice_id: InvoiceId, client: &Client) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO clients (clients_id, clients_name, clients_email, clients_street_address,
                                 clients_city, clients_post_code, clients_country)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(invoice_id.as_uuid())
        .bind(&client.name)
        .bind(&client.email)
        .bind(&client.street_address)
        .bind(&client.city)
        .bind(&client.post_code)
        .bind(&client.country)
        .execute(&mut *self.tx)
        .await
        .map_err(classify(Statement::InsertClient))?;
        Ok(())
    }

    async fn insert_line_item(&mut self, item: &StoredLineItem) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO items (item_id, invoice_id, position, item_name, quantity, price)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(item.item_id.as_uuid())
        .bind(item.invoice_id.as_uuid())
        .bind(item.position)
        .bind(&item.item.name)
        .bind(item.item.quantity)
        .bind(item.item.price)
        .execute(&mut *self.tx)
        .await
        .map_err(classify(Statement::InsertLineItem))?;
        Ok(())
    }

    async fn fetch_invoice(&mut self, invoice_id: InvoiceId) -> Result<Option<InvoiceHeader>> {
        let row = sqlx::query(
            r#"
            SELECT invoice_date, payment_terms, project_description, invoice_status
            FROM invoice WHERE invoice_id = $1
            "#,
        )
        .bind(invoice_id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await?;

        row.as_ref()
            .map(PostgresInvoiceStore::row_to_header)
            .transpose()
    }

    async fn fetch_billing_origin(
        &mut self,
        invoice_id: InvoiceId,
    ) -> Result<Option<BillingOrigin>> {
        let row = sqlx::query(
            r#"
            SELECT street_address, city, post_code, country
            FROM bill_from WHERE bill_from_id = $1
            "#,
        )
        .bind(invoice_id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await?;

        row.as_ref()
            .map(PostgresInvoiceStore::row_to_billing_origin)
            .transpose()
    }

    async fn fetch_client(&mut self, invoice_id: InvoiceId) -> Result<Option<Client>> {
        let row = sqlx::query(
            r#"
            SELECT clients_name, clients_email, clients_street_address,
                   clients_city, clients_post_code, clients_country
            FROM clients WHERE clients_id = $1
            "#,
        )
        .bind(invoice_id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await?;

        row.as_ref()
            .map(PostgresInvoiceStore::row_to_client)
            .transpose()
    }

    async fn fetch_line_items(&mut self, invoice_id: InvoiceId) -> Result<Vec<StoredLineItem>> {
        let rows = sqlx::query(&format!(
            "{SELECT_ITEMS} WHERE invoice_id = $1 ORDER BY position ASC"
        ))
        .bind(invoice_id.as_uuid())
        .fetch_all(&mut *self.tx)
        .await?;

        rows.iter()
            .map(PostgresInvoiceStore::row_to_line_item)
            .collect()
    }

    async fn update_invoice(
        &mut self,
        invoice_id: InvoiceId,
        header: &InvoiceHeader,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE invoice
            SET invoice_date = $1, payment_terms = $2, project_description = $3, invoice_status = $4
            WHERE invoice_id = $5
            "#,
        )
        .bind(header.invoice_date)
        .bind(&header.payment_terms)
        .bind(&header.project_description)
        .bind(header.status.as_str())
        .bind(invoice_id.as_uuid())
        .execute(&mut *self.tx)
        .await
        .map_err(classify(Statement::UpdateInvoice))?;
        Ok(result.rows_affected())
    }

    async fn update_billing_origin(
        &mut self,
        invoice_id: InvoiceId,
        origin: &BillingOrigin,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE bill_from
            SET street_address = $1, city = $2, post_code = $3, country = $4
            WHERE bill_from_id = $5
            "#,
        )
        .bind(&origin.street_address)
        .bind(&origin.city)
        .bind(&origin.post_code)
        .bind(&origin.country)
        .bind(invoice_id.as_uuid())
        .execute(&mut *self.tx)
        .await
        .map_err(classify(Statement::UpdateBillingOrigin))?;
        Ok(result.rows_affected())
    }

    async fn update_client(&mut self, invoice_id: InvoiceId, client: &Client) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE clients
            SET clients_name = $1, clients_email = $2, clients_street_address = $3,
                clients_city = $4, clients_post_code = $5, clients_country = $6
            WHERE clients_id = $7
            "#,
        )
        .bind(&client.name)
        .bind(&client.email)
        .bind(&client.street_address)
        .bind(&client.city)
        .bind(&client.post_code)
        .bind(&client.country)
        .bind(invoice_id.as_uuid())
        .execute(&mut *self.tx)
        .await
        .map_err(classify(Statement::UpdateClient))?;
        Ok(result.rows_affected())
    }

    async fn update_line_item(&mut self, item_id: LineItemId, item: &LineItem) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE items
            SET item_name = $1, quantity = $2, price = $3
            WHERE item_id = $4
            "#,
        )
        .bind(&item.name)
        .bind(item.quantity)
        .bind(item.price)
        .bind(item_id.as_uuid())
        .execute(&mut *self.tx)
        .await
        .map_err(classify(Statement::UpdateLineItem))?;
        Ok(result.rows_affected())
    }

    async fn delete_line_items(&mut self, invoice_id: InvoiceId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM items WHERE invoice_id = $1")
            .bind(invoice_id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(classify(Statement::DeleteLineItems))?;
        Ok(result.rows_affected())
    }

    async fn delete_client(&mut self, invoice_id: InvoiceId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM clients WHERE clients_id = $1")
            .bind(invoice_id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(classify(Statement::DeleteClient))?;
        Ok(result.rows_affected())
    }

    async fn delete_billing_origin(&mut self, invoice_id: InvoiceId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM bill_from WHERE bill_from_id = $1")
            .bind(invoice_id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(classify(Statement::DeleteBillingOrigin))?;
        Ok(result.rows_affected())
    }

    async fn delete_invoice(&mut self, invoice_id: InvoiceId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM invoice WHERE invoice_id = $1")
            .bind(invoice_id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(classify(Statement::DeleteInvoice))?;
        Ok(result.rows_affected())
    }

    async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
