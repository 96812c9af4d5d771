//! Daily multi-currency inventory ledger for a currency-exchange counter.
//!
//! Every (date, currency) pair has one [`LedgerDayEntry`] whose opening balance
//! is the previous day's closing balance. Recording a transaction or an
//! adjustment recomputes its day and cascades the change forward through every
//! later day of the same currency; the reconciler re-derives a day from the
//! transaction record and heals drift in the recorded flows.

pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod ledger;
pub mod lock;
pub mod reconcile;
pub mod running;
pub mod store;

pub use domain::{
    AdjustmentRecord, Currency, Direction, LedgerDayEntry, NewAdjustment, NewTransaction,
    OpeningSource, TransactionRecord,
};
pub use error::{LedgerError, StoreError};
pub use ledger::{Ledger, OpeningLookup, UpdateReport};
pub use reconcile::{ReconcileAllReport, ReconciliationResult};
pub use store::{LedgerStore, MemoryStore};
