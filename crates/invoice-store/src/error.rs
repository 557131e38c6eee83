use thiserror::Error;

use crate::Statement;

/// Errors that can occur when talking to the invoice store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A statement violated a key, uniqueness or check constraint.
    #[error("Constraint violation on {table}: {constraint}")]
    ConstraintViolation {
        table: &'static str,
        constraint: String,
    },

    /// A stored column held a value the row types cannot represent.
    #[error("Invalid column value: {0}")]
    InvalidValue(String),

    /// A failure forced through the in-memory store's fault hook.
    #[error("Injected failure at {0}")]
    Injected(Statement),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
