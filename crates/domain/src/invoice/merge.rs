//! Truthy-override merge of partial updates onto stored rows.
//!
//! A patch field replaces the stored value only when it is present and
//! truthy. Empty strings, zero quantities and zero prices leave the stored
//! value alone, which means a field can never be cleared through an update.

use chrono::NaiveDate;
use invoice_store::{BillingOrigin, Client, InvoiceHeader, InvoiceStatus, LineItem};
use rust_decimal::Decimal;

use super::payload::{InvoicePatch, LineItemPatch};

/// Values that count as "set" when they appear in a patch.
pub trait Truthy {
    fn is_truthy(&self) -> bool;
}

impl Truthy for String {
    fn is_truthy(&self) -> bool {
        !self.is_empty()
    }
}

impl Truthy for i32 {
    fn is_truthy(&self) -> bool {
        *self != 0
    }
}

impl Truthy for Decimal {
    fn is_truthy(&self) -> bool {
        !self.is_zero()
    }
}

impl Truthy for NaiveDate {
    fn is_truthy(&self) -> bool {
        true
    }
}

impl Truthy for InvoiceStatus {
    fn is_truthy(&self) -> bool {
        true
    }
}

/// Returns the patch value if it is present and truthy, else `current`.
pub fn merge_field<T: Truthy + Clone>(current: T, patch: &Option<T>) -> T {
    match patch {
        Some(value) if value.is_truthy() => value.clone(),
        _ => current,
    }
}

impl InvoicePatch {
    pub fn merge_header(&self, current: InvoiceHeader) -> InvoiceHeader {
        InvoiceHeader {
            invoice_date: merge_field(current.invoice_date, &self.invoice_date),
            payment_terms: merge_field(current.payment_terms, &self.payment_terms),
            project_description: merge_field(
                current.project_description,
                &self.project_description,
            ),
            status: merge_field(current.status, &self.invoice_status),
        }
    }

    pub fn merge_billing_origin(&self, current: BillingOrigin) -> BillingOrigin {
        BillingOrigin {
            street_address: merge_field(current.street_address, &self.street_address),
            city: merge_field(current.city, &self.city),
            post_code: merge_field(current.post_code, &self.post_code),
            country: merge_field(current.country, &self.country),
        }
    }

    pub fn merge_client(&self, current: Client) -> Client {
        Client {
            name: merge_field(current.name, &self.clients_name),
            email: merge_field(current.email, &self.clients_email),
            street_address: merge_field(current.street_address, &self.clients_street_address),
            city: merge_field(current.city, &self.clients_city),
            post_code: merge_field(current.post_code, &self.clients_post_code),
            country: merge_field(current.country, &self.clients_country),
        }
    }
}

impl LineItemPatch {
    pub fn merge(&self, current: LineItem) -> LineItem {
        LineItem {
            name: merge_field(current.name, &self.item_name),
            quantity: merge_field(current.quantity, &self.quantity),
            price: merge_field(current.price, &self.price),
        }
    }

    /// Builds a new item from the patch if every field is truthy.
    pub fn to_new_item(&self) -> Option<LineItem> {
        match (&self.item_name, self.quantity, self.price) {
            (Some(name), Some(quantity), Some(price))
                if name.is_truthy() && quantity.is_truthy() && price.is_truthy() =>
            {
                Some(LineItem::new(name.clone(), quantity, price))
            }
            _ => None,
        }
    }
}
