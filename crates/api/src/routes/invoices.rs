//! Invoice aggregate endpoints under `/inv`.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::{DateTime, NaiveDate, Utc};
use common::{InvoiceId, LineItemId};
use domain::{DomainError, InvoicePatch, InvoiceRepository, NewInvoice};
use invoice_store::{InvoiceAggregate, InvoiceStatus, InvoiceStore, StoredLineItem};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::error::{ApiError, Outcome};

/// Shared application state accessible from all handlers.
pub struct AppState<S: InvoiceStore> {
    pub repository: InvoiceRepository<S>,
}

impl<S: InvoiceStore> AppState<S> {
    pub fn new(store: S) -> Self {
        Self {
            repository: InvoiceRepository::new(store),
        }
    }
}

// -- Response types --

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceView {
    pub invoice_id: InvoiceId,
    pub invoice_date: NaiveDate,
    pub payment_terms: String,
    pub project_description: String,
    pub invoice_status: InvoiceStatus,
    pub created_at: DateTime<Utc>,
    pub street_address: String,
    pub city: String,
    pub post_code: String,
    pub country: String,
    pub clients_name: String,
    pub clients_email: String,
    pub clients_street_address: String,
    pub clients_city: String,
    pub clients_post_code: String,
    pub clients_country: String,
    pub items: Vec<LineItemView>,
    pub total: Decimal,
}

impl From<InvoiceAggregate> for InvoiceView {
    fn from(aggregate: InvoiceAggregate) -> Self {
        let total = aggregate.total();
        let InvoiceAggregate {
            invoice_id,
            created_at,
            header,
            billing_origin,
            client,
            items,
        } = aggregate;

        Self {
            invoice_id,
            invoice_date: header.invoice_date,
            payment_terms: header.payment_terms,
            project_description: header.project_description,
            invoice_status: header.status,
            created_at,
            street_address: billing_origin.street_address,
            city: billing_origin.city,
            post_code: billing_origin.post_code,
            country: billing_origin.country,
            clients_name: client.name,
            clients_email: client.email,
            clients_street_address: client.street_address,
            clients_city: client.city,
            clients_post_code: client.post_code,
            clients_country: client.country,
            items: items.into_iter().map(LineItemView::from).collect(),
            total,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItemView {
    pub item_id: LineItemId,
    pub position: i32,
    pub item_name: String,
    pub quantity: i32,
    pub price: Decimal,
    pub total: Decimal,
}

impl From<StoredLineItem> for LineItemView {
    fn from(stored: StoredLineItem) -> Self {
        let total = stored.item.total();
        Self {
            item_id: stored.item_id,
            position: stored.position,
            item_name: stored.item.name,
            quantity: stored.item.quantity,
            price: stored.item.price,
            total,
        }
    }
}

/// A line item listed outside its aggregate.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListedLineItemView {
    pub invoice_id: InvoiceId,
    #[serde(flatten)]
    pub item: LineItemView,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceCreatedResponse {
    pub success: bool,
    pub invoice_id: InvoiceId,
    pub message: &'static str,
}

const LIST_FAILED: &str = "Error retrieving list";
const ITEMS_FAILED: &str = "Error retrieving items list";
const GET_FAILED: &str = "Error retrieving invoice";
const CREATE_FAILED: &str = "Error adding invoice and related data";
const UPDATE_FAILED: &str = "Error updating invoice and related data";
const DELETE_FAILED: &str = "Error deleting invoice and related data";

// -- Handlers --

/// GET /inv: every complete aggregate, oldest first.
#[tracing::instrument(skip(state))]
pub async fn list<S: InvoiceStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Json<Vec<InvoiceView>>, ApiError> {
    let aggregates = state
        .repository
        .list_all()
        .await
        .map_err(|e| ApiError::read(LIST_FAILED, e))?;

    Ok(Json(aggregates.into_iter().map(InvoiceView::from).collect()))
}

/// GET /inv/items: every stored line item.
#[tracing::instrument(skip(state))]
pub async fn list_items<S: InvoiceStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Json<Vec<ListedLineItemView>>, ApiError> {
    let items = state
        .repository
        .list_line_items()
        .await
        .map_err(|e| ApiError::read(ITEMS_FAILED, e))?;

    let views = items
        .into_iter()
        .map(|stored| ListedLineItemView {
            invoice_id: stored.invoice_id,
            item: LineItemView::from(stored),
        })
        .collect();
    Ok(Json(views))
}

/// GET /inv/{id}: one aggregate.
#[tracing::instrument(skip(state))]
pub async fn get<S: InvoiceStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<InvoiceView>, ApiError> {
    let not_found = || ApiError::NotFound(format!("Invoice {id} not found"));

    let invoice_id = InvoiceId::parse(&id).ok_or_else(not_found)?;
    let aggregate = state
        .repository
        .get(invoice_id)
        .await
        .map_err(|e| ApiError::read(GET_FAILED, e))?
        .ok_or_else(not_found)?;

    Ok(Json(InvoiceView::from(aggregate)))
}

/// POST /inv: create an aggregate in one transaction.
#[tracing::instrument(skip(state, payload))]
pub async fn create<S: InvoiceStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    payload: Result<Json<NewInvoice>, JsonRejection>,
) -> Result<(StatusCode, Json<InvoiceCreatedResponse>), ApiError> {
    let Json(payload) = payload.map_err(reject)?;

    let invoice_id = state
        .repository
        .create(payload)
        .await
        .map_err(|e| write_error(CREATE_FAILED, e))?;

    let response = InvoiceCreatedResponse {
        success: true,
        invoice_id,
        message: "Invoice, bill from, clients, and items created successfully",
    };
    Ok((StatusCode::CREATED, Json(response)))
}

/// PUT /inv/{id}: merge a partial update into an aggregate.
#[tracing::instrument(skip(state, patch))]
pub async fn update<S: InvoiceStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    patch: Result<Json<InvoicePatch>, JsonRejection>,
) -> Result<Json<Outcome>, ApiError> {
    let Json(patch) = patch.map_err(reject)?;
    let invoice_id = InvoiceId::parse(&id)
        .ok_or_else(|| ApiError::write(UPDATE_FAILED, format!("malformed invoice id '{id}'")))?;

    state
        .repository
        .update(invoice_id, &patch)
        .await
        .map_err(|e| write_error(UPDATE_FAILED, e))?;

    Ok(Json(Outcome {
        success: true,
        message: "Invoice and related data updated successfully".to_string(),
    }))
}

/// DELETE /inv/{id}: remove an aggregate. Missing invoices succeed.
#[tracing::instrument(skip(state))]
pub async fn delete<S: InvoiceStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<Outcome>, ApiError> {
    let removed = match InvoiceId::parse(&id) {
        Some(invoice_id) => state
            .repository
            .delete(invoice_id)
            .await
            .map_err(|e| write_error(DELETE_FAILED, e))?,
        None => false,
    };

    let message = if removed {
        "Invoice and related data deleted successfully"
    } else {
        "Invoice not found, nothing to delete"
    };
    Ok(Json(Outcome {
        success: true,
        message: message.to_string(),
    }))
}

fn reject(rejection: JsonRejection) -> ApiError {
    ApiError::BadRequest(rejection.body_text())
}

fn write_error(message: &'static str, err: DomainError) -> ApiError {
    match err {
        DomainError::InvalidPayload(reason) => ApiError::BadRequest(reason),
        other => ApiError::write(message, other),
    }
}
