//! Request payloads for creating and updating an invoice aggregate.

use std::fmt::Display;
use std::str::FromStr;

use chrono::NaiveDate;
use invoice_store::{BillingOrigin, Client, InvoiceHeader, InvoiceStatus, LineItem};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};

use crate::error::DomainError;

/// A line item supplied on create.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewLineItem {
    pub item_name: String,
    pub quantity: i32,
    pub price: Decimal,
}

impl From<&NewLineItem> for LineItem {
    fn from(item: &NewLineItem) -> Self {
        LineItem::new(item.item_name.clone(), item.quantity, item.price)
    }
}

/// Everything needed to create a complete aggregate.
///
/// Older clients send a single item as top-level `itemName`, `quantity` and
/// `price`; that form is accepted when `items` is empty.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewInvoice {
    pub invoice_date: NaiveDate,
    pub payment_terms: String,
    pub project_description: String,
    #[serde(default)]
    pub invoice_status: InvoiceStatus,

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

    #[serde(default)]
    pub items: Vec<NewLineItem>,

    pub item_name: Option<String>,
    pub quantity: Option<i32>,
    pub price: Option<Decimal>,
}

impl NewInvoice {
    pub fn header(&self) -> InvoiceHeader {
        InvoiceHeader {
            invoice_date: self.invoice_date,
            payment_terms: self.payment_terms.clone(),
            project_description: self.project_description.clone(),
            status: self.invoice_status,
        }
    }

    pub fn billing_origin(&self) -> BillingOrigin {
        BillingOrigin {
            street_address: self.street_address.clone(),
            city: self.city.clone(),
            post_code: self.post_code.clone(),
            country: self.country.clone(),
        }
    }

    pub fn client(&self) -> Client {
        Client {
            name: self.clients_name.clone(),
            email: self.clients_email.clone(),
            street_address: self.clients_street_address.clone(),
            city: self.clients_city.clone(),
            post_code: self.clients_post_code.clone(),
            country: self.clients_country.clone(),
        }
    }

    /// Resolves the line items to insert, in position order.
    pub fn line_items(&self) -> Result<Vec<LineItem>, DomainError> {
        let has_single_item =
            self.item_name.is_some() || self.quantity.is_some() || self.price.is_some();

        if !has_single_item {
            return Ok(self.items.iter().map(LineItem::from).collect());
        }
        if !self.items.is_empty() {
            return Err(DomainError::InvalidPayload(
                "send either `items` or top-level `itemName`/`quantity`/`price`, not both"
                    .to_string(),
            ));
        }

        match (&self.item_name, self.quantity, self.price) {
            (Some(name), Some(quantity), Some(price)) => {
                Ok(vec![LineItem::new(name.clone(), quantity, price)])
            }
            _ => Err(DomainError::InvalidPayload(
                "a top-level item needs `itemName`, `quantity` and `price`".to_string(),
            )),
        }
    }
}

/// Partial update of one stored line item, addressed by position.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItemPatch {
    pub item_name: Option<String>,
    pub quantity: Option<i32>,
    pub price: Option<Decimal>,
}

/// Partial update of an aggregate. Any subset of fields may be present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoicePatch {
    #[serde(default, deserialize_with = "blank_as_none")]
    pub invoice_date: Option<NaiveDate>,
    pub payment_terms: Option<String>,
    pub project_description: Option<String>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub invoice_status: Option<InvoiceStatus>,

    pub street_address: Option<String>,
    pub city: Option<String>,
    pub post_code: Option<String>,
    pub country: Option<String>,

    pub clients_name: Option<String>,
    pub clients_email: Option<String>,
    pub clients_street_address: Option<String>,
    pub clients_city: Option<String>,
    pub clients_post_code: Option<String>,
    pub clients_country: Option<String>,

    pub items: Option<Vec<LineItemPatch>>,

    pub item_name: Option<String>,
    pub quantity: Option<i32>,
    pub price: Option<Decimal>,
}

impl InvoicePatch {
    /// Resolves the positional item patches.
    ///
    /// Top-level `itemName`/`quantity`/`price` patch the first item when
    /// `items` is absent.
    pub fn item_patches(&self) -> Result<Vec<LineItemPatch>, DomainError> {
        let has_single_item =
            self.item_name.is_some() || self.quantity.is_some() || self.price.is_some();

        match (&self.items, has_single_item) {
            (Some(_), true) => Err(DomainError::InvalidPayload(
                "send either `items` or top-level `itemName`/`quantity`/`price`, not both"
                    .to_string(),
            )),
            (Some(items), false) => Ok(items.clone()),
            (None, true) => Ok(vec![LineItemPatch {
                item_name: self.item_name.clone(),
                quantity: self.quantity,
                price: self.price,
            }]),
            (None, false) => Ok(Vec::new()),
        }
    }
}

/// Treats an empty string like an absent field, otherwise parses the value.
fn blank_as_none<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: Display,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref() {
        None | Some("") => Ok(None),
        Some(value) => value.parse().map(Some).map_err(serde::de::Error::custom),
    }
}
