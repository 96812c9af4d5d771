use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

use crate::domain::{AdjustmentRecord, Currency, Direction, FlowTotals, LedgerDayEntry, TransactionRecord};
use crate::error::StoreError;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Read/write access to the transaction record.
pub trait TransactionStore {
    fn insert_transaction(&self, tx: &TransactionRecord) -> StoreResult<()>;
    fn get_transaction(&self, id: Uuid) -> StoreResult<Option<TransactionRecord>>;
    /// All transactions in insertion order.
    fn list_transactions(&self) -> StoreResult<Vec<TransactionRecord>>;
    /// Sum of Buy and Sell amounts for exactly this date and currency.
    fn transaction_totals(&self, date: NaiveDate, currency: Currency) -> StoreResult<FlowTotals>;
}

pub trait AdjustmentStore {
    fn insert_adjustment(&self, adj: &AdjustmentRecord) -> StoreResult<()>;
    fn get_adjustment(&self, id: Uuid) -> StoreResult<Option<AdjustmentRecord>>;
    /// Signed sum of adjustments for exactly this date and currency.
    fn adjustment_total(&self, date: NaiveDate, currency: Currency) -> StoreResult<Decimal>;
}

/// Persisted day entries, unique per (date, currency).
pub trait LedgerRepository {
    fn get_entry(&self, date: NaiveDate, currency: Currency) -> StoreResult<Option<LedgerDayEntry>>;
    /// Every entry for `currency`, ascending by date.
    fn list_entries(&self, currency: Currency) -> StoreResult<Vec<LedgerDayEntry>>;
    fn upsert_entry(&self, entry: &LedgerDayEntry) -> StoreResult<()>;
}

/// Everything the ledger engine needs from storage.
pub trait LedgerStore: TransactionStore + AdjustmentStore + LedgerRepository {}

impl<T: TransactionStore + AdjustmentStore + LedgerRepository> LedgerStore for T {}

#[derive(Debug, Default)]
struct Tables {
    transactions: Vec<TransactionRecord>,
    adjustments: Vec<AdjustmentRecord>,
    entries: BTreeMap<(Currency, NaiveDate), LedgerDayEntry>,
}

/// In-memory store indexed by (currency, date). Safe to share across threads.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, Tables>> {
        self.tables.read().map_err(|_| StoreError::Poisoned)
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, Tables>> {
        self.tables.write().map_err(|_| StoreError::Poisoned)
    }
}

impl TransactionStore for MemoryStore {
    fn insert_transaction(&self, tx: &TransactionRecord) -> StoreResult<()> {
        self.write()?.transactions.push(tx.clone());
        Ok(())
    }

    fn get_transaction(&self, id: Uuid) -> StoreResult<Option<TransactionRecord>> {
        Ok(self.read()?.transactions.iter().find(|t| t.id == id).cloned())
    }

    fn list_transactions(&self) -> StoreResult<Vec<TransactionRecord>> {
        Ok(self.read()?.transactions.clone())
    }

    fn transaction_totals(&self, date: NaiveDate, currency: Currency) -> StoreResult<FlowTotals> {
        let tables = self.read()?;
        let mut totals = FlowTotals::default();
        for t in tables
            .transactions
            .iter()
            .filter(|t| t.date == date && t.currency == currency)
        {
            match t.direction {
                Direction::Buy => totals.purchases += t.amount,
                Direction::Sell => totals.sales += t.amount,
            }
        }
        Ok(totals)
    }
}

impl AdjustmentStore for MemoryStore {
    fn insert_adjustment(&self, adj: &AdjustmentRecord) -> StoreResult<()> {
        self.write()?.adjustments.push(adj.clone());
        Ok(())
    }

    fn get_adjustment(&self, id: Uuid) -> StoreResult<Option<AdjustmentRecord>> {
        Ok(self.read()?.adjustments.iter().find(|a| a.id == id).cloned())
    }

    fn adjustment_total(&self, date: NaiveDate, currency: Currency) -> StoreResult<Decimal> {
        Ok(self
            .read()?
            .adjustments
            .iter()
            .filter(|a| a.date == date && a.currency == currency)
            .map(|a| a.amount)
            .sum())
    }
}

impl LedgerRepository for MemoryStore {
    fn get_entry(&self, date: NaiveDate, currency: Currency) -> StoreResult<Option<LedgerDayEntry>> {
        Ok(self.read()?.entries.get(&(currency, date)).cloned())
    }

    fn list_entries(&self, currency: Currency) -> StoreResult<Vec<LedgerDayEntry>> {
        let tables = self.read()?;
        Ok(tables
            .entries
            .range((currency, NaiveDate::MIN)..=(currency, NaiveDate::MAX))
            .map(|(_, e)| e.clone())
            .collect())
    }

    fn upsert_entry(&self, entry: &LedgerDayEntry) -> StoreResult<()> {
        self.write()?
            .entries
            .insert((entry.currency, entry.date), entry.clone());
        Ok(())
    }
}
