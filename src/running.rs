use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::domain::{Currency, Direction, TransactionRecord};

/// A stock movement that contributes to a per-currency running balance.
pub trait Flow {
    /// Legacy rows may lack a date; those sort before everything else.
    fn date(&self) -> Option<NaiveDate>;
    fn currency(&self) -> Currency;
    fn direction(&self) -> Direction;
    fn amount(&self) -> Decimal;
}

impl Flow for TransactionRecord {
    fn date(&self) -> Option<NaiveDate> {
        Some(self.date)
    }

    fn currency(&self) -> Currency {
        self.currency
    }

    fn direction(&self) -> Direction {
        self.direction
    }

    fn amount(&self) -> Decimal {
        self.amount
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunningBalance<T> {
    pub record: T,
    /// Balance of the record's currency right after the record.
    pub balance: Decimal,
}

/// Orders records by date (stable, undated first) and annotates each with its
/// currency's cumulative balance: Buy adds, Sell subtracts.
pub fn rebuild_running_balances<T: Flow>(
    records: impl IntoIterator<Item = T>,
) -> Vec<RunningBalance<T>> {
    let mut records: Vec<T> = records.into_iter().collect();
    records.sort_by_key(|r| r.date());

    let mut totals: BTreeMap<Currency, Decimal> = BTreeMap::new();
    records
        .into_iter()
        .map(|record| {
            let total = totals.entry(record.currency()).or_insert(Decimal::ZERO);
            match record.direction() {
                Direction::Buy => *total += record.amount(),
                Direction::Sell => *total -= record.amount(),
            }
            let balance = *total;
            RunningBalance { record, balance }
        })
        .collect()
}
