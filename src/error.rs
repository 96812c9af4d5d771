use chrono::NaiveDate;
use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, LedgerError>;

/// Failures raised by a storage backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("corrupt {field} in {table} row: {value}")]
    Corrupt {
        table: &'static str,
        field: &'static str,
        value: String,
    },
    #[error("store lock poisoned")]
    Poisoned,
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("unknown currency code: '{0}'")]
    UnknownCurrency(String),
    #[error("invalid amount {amount}: {reason}")]
    InvalidAmount {
        amount: Decimal,
        reason: &'static str,
    },
    #[error("an adjustment requires a non-empty reason")]
    MissingReason,
    #[error("no such transaction: {0}")]
    TransactionNotFound(Uuid),
    #[error("no such adjustment: {0}")]
    AdjustmentNotFound(Uuid),
    #[error("invalid date range: {from} is after {to}")]
    InvalidRange { from: NaiveDate, to: NaiveDate },
}
