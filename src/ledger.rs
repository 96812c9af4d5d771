use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::{
    AdjustmentRecord, Currency, LedgerDayEntry, NewAdjustment, NewTransaction, OpeningSource,
    TransactionRecord,
};
use crate::error::{LedgerError, Result};
use crate::lock::{CurrencyGuard, CurrencyLocks};
use crate::store::LedgerStore;

/// Absolute tolerance used when comparing stored against recomputed figures.
pub const TOLERANCE: Decimal = dec!(0.01);

pub fn approx_eq(a: Decimal, b: Decimal) -> bool {
    (a - b).abs() < TOLERANCE
}

pub fn compute_closing(
    opening: Decimal,
    purchases: Decimal,
    sales: Decimal,
    adjustments: Decimal,
) -> Decimal {
    opening + purchases - sales + adjustments
}

/// How a day's opening balance is found when the previous calendar day has no entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpeningLookup {
    /// Only the entry for `date - 1` counts; a gap starts again from zero.
    PreviousDay,
    /// Fall back to the closing of the most recent earlier entry.
    #[default]
    NearestPrior,
}

impl OpeningLookup {
    pub fn as_str(self) -> &'static str {
        match self {
            OpeningLookup::PreviousDay => "previous_day",
            OpeningLookup::NearestPrior => "nearest_prior",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "previous_day" => Some(OpeningLookup::PreviousDay),
            "nearest_prior" => Some(OpeningLookup::NearestPrior),
            _ => None,
        }
    }
}

/// Opening balance for `date` given the closest earlier entry of the same currency.
pub fn seed_opening(
    lookup: OpeningLookup,
    date: NaiveDate,
    prior: Option<&LedgerDayEntry>,
) -> (Decimal, OpeningSource) {
    match prior {
        Some(p) if date.pred_opt() == Some(p.date) => (p.closing_balance, OpeningSource::PreviousDay),
        Some(p) if lookup == OpeningLookup::NearestPrior && p.date < date => {
            (p.closing_balance, OpeningSource::MostRecentPrior)
        }
        _ => (Decimal::ZERO, OpeningSource::Initial),
    }
}

/// A later entry rewritten by the forward cascade.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CascadeStep {
    pub date: NaiveDate,
    pub old_opening: Decimal,
    pub new_opening: Decimal,
    pub old_closing: Decimal,
    pub new_closing: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdateReport {
    pub entry: LedgerDayEntry,
    /// Only entries whose values actually changed.
    pub cascaded: Vec<CascadeStep>,
}

/// Result of recording a transaction or adjustment. The record is persisted
/// even when the follow-up inventory update fails.
#[derive(Debug)]
pub struct RecordOutcome<T> {
    pub record: T,
    pub inventory: Result<UpdateReport>,
}

#[derive(Debug)]
pub struct DailyUpdateReport {
    pub date: NaiveDate,
    pub updated: Vec<UpdateReport>,
    pub failures: Vec<(Currency, LedgerError)>,
}

pub struct Ledger<S> {
    pub(crate) store: S,
    currencies: Vec<Currency>,
    lookup: OpeningLookup,
    locks: CurrencyLocks,
}

impl<S: LedgerStore> Ledger<S> {
    pub fn new(store: S, currencies: Vec<Currency>, lookup: OpeningLookup) -> Self {
        Self {
            store,
            currencies,
            lookup,
            locks: CurrencyLocks::new(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn currencies(&self) -> &[Currency] {
        &self.currencies
    }

    pub fn lookup(&self) -> OpeningLookup {
        self.lookup
    }

    pub(crate) fn lock(&self, currency: Currency) -> CurrencyGuard<'_> {
        self.locks.acquire(currency)
    }

    /// Finds the entry for (date, currency), creating and persisting it with a
    /// seeded opening balance if it does not exist yet. A newly created entry
    /// re-chains any later entries of the currency.
    pub fn resolve_entry(&self, date: NaiveDate, currency: Currency) -> Result<LedgerDayEntry> {
        let guard = self.lock(currency);
        self.resolve_locked(&guard, date)
    }

    pub(crate) fn resolve_locked(
        &self,
        guard: &CurrencyGuard<'_>,
        date: NaiveDate,
    ) -> Result<LedgerDayEntry> {
        let currency = guard.currency();
        if let Some(existing) = self.store.get_entry(date, currency)? {
            return Ok(existing);
        }

        let prior = self.prior_entry(date, currency)?;
        let (opening, source) = seed_opening(self.lookup, date, prior.as_ref());
        let entry = LedgerDayEntry::new(date, currency, opening, source);
        self.store.upsert_entry(&entry)?;
        debug!(%date, %currency, %opening, source = source.as_str(), "created ledger entry");

        // Filling a gap can give later entries a new predecessor.
        let cascaded = self.propagate(&entry)?;
        if !cascaded.is_empty() {
            info!(%date, %currency, cascaded = cascaded.len(), "re-chained later entries");
        }
        Ok(entry)
    }

    /// The entry the chain rule seeds `date` from, if any.
    fn prior_entry(&self, date: NaiveDate, currency: Currency) -> Result<Option<LedgerDayEntry>> {
        if let Some(prev_date) = date.pred_opt() {
            if let Some(prev) = self.store.get_entry(prev_date, currency)? {
                return Ok(Some(prev));
            }
        }
        if self.lookup == OpeningLookup::PreviousDay {
            return Ok(None);
        }
        Ok(self
            .store
            .list_entries(currency)?
            .into_iter()
            .rev()
            .find(|e| e.date < date))
    }

    /// Recomputes (date, currency) from the transaction and adjustment stores,
    /// then walks every later entry of the currency forward so each opening
    /// balance matches its predecessor's closing balance again.
    pub fn update_inventory(&self, date: NaiveDate, currency: Currency) -> Result<UpdateReport> {
        let guard = self.lock(currency);
        self.update_locked(&guard, date)
    }

    pub(crate) fn update_locked(
        &self,
        guard: &CurrencyGuard<'_>,
        date: NaiveDate,
    ) -> Result<UpdateReport> {
        let currency = guard.currency();
        let mut entry = match self.store.get_entry(date, currency)? {
            Some(existing) => existing,
            None => LedgerDayEntry::new(date, currency, Decimal::ZERO, OpeningSource::Initial),
        };

        let totals = self.store.transaction_totals(date, currency)?;
        let adjustments = self.store.adjustment_total(date, currency)?;

        // Must match the cascade's seeding for this date.
        let prior = self.prior_entry(date, currency)?;
        let (opening, source) = seed_opening(self.lookup, date, prior.as_ref());
        entry.opening_balance = opening;
        entry.opening_source = source;

        entry.purchases = totals.purchases;
        entry.sales = totals.sales;
        entry.adjustments = adjustments;
        entry.closing_balance = compute_closing(
            entry.opening_balance,
            entry.purchases,
            entry.sales,
            entry.adjustments,
        );
        entry.updated_at = Utc::now();
        self.store.upsert_entry(&entry)?;

        let cascaded = self.propagate(&entry)?;
        info!(
            %date,
            %currency,
            closing = %entry.closing_balance,
            cascaded = cascaded.len(),
            "inventory updated"
        );
        Ok(UpdateReport { entry, cascaded })
    }

    fn propagate(&self, from: &LedgerDayEntry) -> Result<Vec<CascadeStep>> {
        let later = self
            .store
            .list_entries(from.currency)?
            .into_iter()
            .filter(|e| e.date > from.date);

        let mut steps = Vec::new();
        let mut prev = from.clone();
        for mut entry in later {
            let (opening, source) = seed_opening(self.lookup, entry.date, Some(&prev));
            let closing = compute_closing(opening, entry.purchases, entry.sales, entry.adjustments);

            if opening != entry.opening_balance
                || closing != entry.closing_balance
                || source != entry.opening_source
            {
                let step = CascadeStep {
                    date: entry.date,
                    old_opening: entry.opening_balance,
                    new_opening: opening,
                    old_closing: entry.closing_balance,
                    new_closing: closing,
                };
                entry.opening_balance = opening;
                entry.opening_source = source;
                entry.closing_balance = closing;
                entry.updated_at = Utc::now();
                self.store.upsert_entry(&entry)?;
                debug!(
                    date = %step.date,
                    currency = %entry.currency,
                    old_closing = %step.old_closing,
                    new_closing = %step.new_closing,
                    "cascaded"
                );
                steps.push(step);
            }
            prev = entry;
        }
        Ok(steps)
    }

    /// Persists a new Buy/Sell and updates the inventory for its day.
    pub fn record_transaction(
        &self,
        new: NewTransaction,
    ) -> Result<RecordOutcome<TransactionRecord>> {
        if new.amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount {
                amount: new.amount,
                reason: "transaction amount must be > 0",
            });
        }
        if new.counter_value.is_sign_negative() && !new.counter_value.is_zero() {
            return Err(LedgerError::InvalidAmount {
                amount: new.counter_value,
                reason: "counter value must not be negative",
            });
        }

        let record = TransactionRecord {
            id: Uuid::new_v4(),
            date: new.date,
            direction: new.direction,
            currency: new.currency,
            amount: new.amount,
            counter_value: new.counter_value,
            customer: new.customer,
            staff: new.staff,
            source: new.source,
            created_at: Utc::now(),
        };

        let guard = self.lock(record.currency);
        self.store.insert_transaction(&record)?;
        let inventory = self.update_locked(&guard, record.date);
        if let Err(err) = &inventory {
            warn!(id = %record.id, error = %err, "transaction stored but inventory update failed");
        }
        Ok(RecordOutcome { record, inventory })
    }

    /// Persists a manual stock adjustment and updates the inventory for its day.
    pub fn record_adjustment(&self, new: NewAdjustment) -> Result<RecordOutcome<AdjustmentRecord>> {
        if new.amount.is_zero() {
            return Err(LedgerError::InvalidAmount {
                amount: new.amount,
                reason: "adjustment amount must be non-zero",
            });
        }
        let reason = new.reason.trim().to_string();
        if reason.is_empty() {
            return Err(LedgerError::MissingReason);
        }

        let record = AdjustmentRecord {
            id: Uuid::new_v4(),
            date: new.date,
            currency: new.currency,
            amount: new.amount,
            reason,
            author: new.author,
            created_at: Utc::now(),
        };

        let guard = self.lock(record.currency);
        self.store.insert_adjustment(&record)?;
        let inventory = self.update_locked(&guard, record.date);
        if let Err(err) = &inventory {
            warn!(id = %record.id, error = %err, "adjustment stored but inventory update failed");
        }
        Ok(RecordOutcome { record, inventory })
    }

    pub fn transaction(&self, id: Uuid) -> Result<TransactionRecord> {
        self.store
            .get_transaction(id)?
            .ok_or(LedgerError::TransactionNotFound(id))
    }

    pub fn adjustment(&self, id: Uuid) -> Result<AdjustmentRecord> {
        self.store
            .get_adjustment(id)?
            .ok_or(LedgerError::AdjustmentNotFound(id))
    }

    pub fn entries(&self, currency: Currency) -> Result<Vec<LedgerDayEntry>> {
        Ok(self.store.list_entries(currency)?)
    }

    /// Runs `update_inventory` for `date` across every configured currency.
    /// A failing currency does not stop the others.
    pub fn update_daily(&self, date: NaiveDate) -> DailyUpdateReport {
        let mut report = DailyUpdateReport {
            date,
            updated: Vec::new(),
            failures: Vec::new(),
        };
        for &currency in &self.currencies {
            match self.update_inventory(date, currency) {
                Ok(r) => report.updated.push(r),
                Err(err) => {
                    warn!(%date, %currency, error = %err, "daily inventory update failed");
                    report.failures.push((currency, err));
                }
            }
        }
        report
    }

    pub fn update_range(
        &self,
        currency: Currency,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<UpdateReport>> {
        self.update_range_with(currency, from, to, |_| {})
    }

    /// Recomputes every date in `from..=to` as a sequence of single-date
    /// cascades under one hold of the currency lock. Stops at the first
    /// failure; dates already processed stay consistent.
    pub fn update_range_with<F>(
        &self,
        currency: Currency,
        from: NaiveDate,
        to: NaiveDate,
        mut on_day: F,
    ) -> Result<Vec<UpdateReport>>
    where
        F: FnMut(&UpdateReport),
    {
        if from > to {
            return Err(LedgerError::InvalidRange { from, to });
        }
        let guard = self.lock(currency);
        let mut out = Vec::new();
        for date in from.iter_days().take_while(|d| *d <= to) {
            let report = self.update_locked(&guard, date)?;
            on_day(&report);
            out.push(report);
        }
        Ok(out)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::domain::{Direction, FlowTotals};
    use crate::error::StoreError;
    use crate::store::{AdjustmentStore, LedgerRepository, MemoryStore, StoreResult, TransactionStore};
    use std::sync::{Arc, Mutex};
    use std::thread;

    pub(crate) fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
    }

    pub(crate) fn ledger(lookup: OpeningLookup) -> Ledger<MemoryStore> {
        Ledger::new(MemoryStore::new(), Currency::ALL.to_vec(), lookup)
    }

    pub(crate) fn trade<S: LedgerStore>(
        ledger: &Ledger<S>,
        d: u32,
        direction: Direction,
        currency: Currency,
        amount: Decimal,
    ) -> RecordOutcome<TransactionRecord> {
        ledger
            .record_transaction(NewTransaction {
                date: day(d),
                direction,
                currency,
                amount,
                counter_value: Decimal::ZERO,
                customer: None,
                staff: Some("ana".into()),
                source: None,
            })
            .unwrap()
    }

    fn adjust<S: LedgerStore>(ledger: &Ledger<S>, d: u32, currency: Currency, amount: Decimal) {
        ledger
            .record_adjustment(NewAdjustment {
                date: day(d),
                currency,
                amount,
                reason: "count correction".into(),
                author: None,
            })
            .unwrap()
            .inventory
            .unwrap();
    }

    pub(crate) fn assert_chain(entries: &[LedgerDayEntry]) {
        for pair in entries.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            if b.date.pred_opt() == Some(a.date) {
                assert!(
                    approx_eq(b.opening_balance, a.closing_balance),
                    "{}: opening {} != previous closing {}",
                    b.date,
                    b.opening_balance,
                    a.closing_balance
                );
            }
        }
        for e in entries {
            let expected = compute_closing(e.opening_balance, e.purchases, e.sales, e.adjustments);
            assert!(approx_eq(expected, e.closing_balance), "{}: closing drift", e.date);
        }
    }

    #[test]
    fn closing_is_opening_plus_flows() {
        assert_eq!(compute_closing(dec!(10), dec!(5), dec!(3), dec!(-1.5)), dec!(10.5));
        assert!(approx_eq(dec!(1.000), dec!(1.009)));
        assert!(!approx_eq(dec!(1.00), dec!(1.01)));
    }

    #[test]
    fn lookup_mode_parses_both_spellings() {
        assert_eq!(OpeningLookup::parse("previous-day"), Some(OpeningLookup::PreviousDay));
        assert_eq!(OpeningLookup::parse("nearest_prior"), Some(OpeningLookup::NearestPrior));
        assert_eq!(OpeningLookup::parse("whatever"), None);
    }

    #[test]
    fn first_entry_for_currency_starts_at_zero() {
        let ledger = ledger(OpeningLookup::NearestPrior);
        let entry = ledger.resolve_entry(day(1), Currency::Usd).unwrap();
        assert_eq!(entry.opening_balance, Decimal::ZERO);
        assert_eq!(entry.opening_source, OpeningSource::Initial);
        assert!(ledger.store().get_entry(day(1), Currency::Usd).unwrap().is_some());
    }

    #[test]
    fn two_day_usd_scenario() {
        let ledger = ledger(OpeningLookup::NearestPrior);
        trade(&ledger, 1, Direction::Buy, Currency::Usd, dec!(1000));
        trade(&ledger, 1, Direction::Sell, Currency::Usd, dec!(200));

        let d1 = ledger.update_inventory(day(1), Currency::Usd).unwrap().entry;
        assert_eq!(d1.opening_balance, dec!(0));
        assert_eq!(d1.purchases, dec!(1000));
        assert_eq!(d1.sales, dec!(200));
        assert_eq!(d1.adjustments, dec!(0));
        assert_eq!(d1.closing_balance, dec!(800));

        trade(&ledger, 2, Direction::Buy, Currency::Usd, dec!(100));
        let d2 = ledger.update_inventory(day(2), Currency::Usd).unwrap().entry;
        assert_eq!(d2.opening_balance, dec!(800));
        assert_eq!(d2.opening_source, OpeningSource::PreviousDay);
        assert_eq!(d2.closing_balance, dec!(900));
    }

    #[test]
    fn update_is_idempotent() {
        let ledger = ledger(OpeningLookup::NearestPrior);
        for d in 1..=3 {
            trade(&ledger, d, Direction::Buy, Currency::Eur, dec!(50));
        }
        let first = ledger.update_inventory(day(1), Currency::Eur).unwrap();
        let second = ledger.update_inventory(day(1), Currency::Eur).unwrap();

        assert!(second.cascaded.is_empty());
        assert_eq!(first.entry.opening_balance, second.entry.opening_balance);
        assert_eq!(first.entry.closing_balance, second.entry.closing_balance);
        assert_eq!(first.entry.purchases, second.entry.purchases);
    }

    #[test]
    fn adjustment_shifts_every_later_day_by_delta() {
        let ledger = ledger(OpeningLookup::NearestPrior);
        for d in 1..=5 {
            trade(&ledger, d, Direction::Buy, Currency::Gbp, dec!(100));
        }
        let before = ledger.entries(Currency::Gbp).unwrap();

        adjust(&ledger, 2, Currency::Gbp, dec!(-37.25));

        let after = ledger.entries(Currency::Gbp).unwrap();
        assert_eq!(after[0], before[0]);
        assert_eq!(after[1].closing_balance, before[1].closing_balance - dec!(37.25));
        for i in 2..5 {
            assert_eq!(after[i].opening_balance, before[i].opening_balance - dec!(37.25));
            assert_eq!(after[i].closing_balance, before[i].closing_balance - dec!(37.25));
        }
        assert_chain(&after);
    }

    #[test]
    fn cascade_reports_each_changed_day() {
        let ledger = ledger(OpeningLookup::NearestPrior);
        for d in 1..=4 {
            trade(&ledger, d, Direction::Buy, Currency::Usd, dec!(10));
        }
        let outcome = trade(&ledger, 1, Direction::Sell, Currency::Usd, dec!(4));
        let report = outcome.inventory.unwrap();
        let dates: Vec<_> = report.cascaded.iter().map(|s| s.date).collect();
        assert_eq!(dates, vec![day(2), day(3), day(4)]);
        assert_eq!(report.cascaded[2].new_closing, dec!(36));
        assert_eq!(report.cascaded[2].old_closing, dec!(40));
    }

    #[test]
    fn backfilled_middle_day_is_picked_up_by_later_days() {
        let ledger = ledger(OpeningLookup::NearestPrior);
        trade(&ledger, 1, Direction::Buy, Currency::Usd, dec!(100));
        trade(&ledger, 3, Direction::Buy, Currency::Usd, dec!(100));
        trade(&ledger, 4, Direction::Sell, Currency::Usd, dec!(30));

        trade(&ledger, 2, Direction::Buy, Currency::Usd, dec!(25));

        let entries = ledger.entries(Currency::Usd).unwrap();
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[2].opening_source, OpeningSource::PreviousDay);
        assert_eq!(entries[3].closing_balance, dec!(195));
        assert_chain(&entries);
    }

    #[test]
    fn nearest_prior_bridges_date_gaps() {
        let ledger = ledger(OpeningLookup::NearestPrior);
        trade(&ledger, 1, Direction::Buy, Currency::Usd, dec!(500));
        let d5 = trade(&ledger, 5, Direction::Buy, Currency::Usd, dec!(20))
            .inventory
            .unwrap()
            .entry;
        assert_eq!(d5.opening_balance, dec!(500));
        assert_eq!(d5.opening_source, OpeningSource::MostRecentPrior);
        assert_eq!(d5.closing_balance, dec!(520));
    }

    #[test]
    fn previous_day_lookup_restarts_after_a_gap() {
        let ledger = ledger(OpeningLookup::PreviousDay);
        trade(&ledger, 1, Direction::Buy, Currency::Usd, dec!(500));
        let d3 = trade(&ledger, 3, Direction::Buy, Currency::Usd, dec!(20))
            .inventory
            .unwrap()
            .entry;
        assert_eq!(d3.opening_balance, dec!(0));
        assert_eq!(d3.opening_source, OpeningSource::Initial);

        // Filling the gap reconnects the chain.
        let report = ledger.update_inventory(day(2), Currency::Usd).unwrap();
        assert_eq!(report.entry.opening_balance, dec!(500));
        let d3 = ledger.store().get_entry(day(3), Currency::Usd).unwrap().unwrap();
        assert_eq!(d3.opening_balance, dec!(500));
        assert_eq!(d3.opening_source, OpeningSource::PreviousDay);
        assert_eq!(d3.closing_balance, dec!(520));
    }

    #[test]
    fn resolving_a_gap_day_rechains_later_entries() {
        for lookup in [OpeningLookup::PreviousDay, OpeningLookup::NearestPrior] {
            let ledger = ledger(lookup);
            trade(&ledger, 1, Direction::Buy, Currency::Usd, dec!(100));
            trade(&ledger, 3, Direction::Buy, Currency::Usd, dec!(10));

            let d2 = ledger.resolve_entry(day(2), Currency::Usd).unwrap();
            assert_eq!(d2.opening_balance, dec!(100));
            assert_eq!(d2.closing_balance, dec!(100));
            assert_eq!(d2.opening_source, OpeningSource::PreviousDay);

            let d3 = ledger.store().get_entry(day(3), Currency::Usd).unwrap().unwrap();
            assert_eq!(d3.opening_balance, dec!(100), "{lookup:?}");
            assert_eq!(d3.opening_source, OpeningSource::PreviousDay);
            assert_eq!(d3.closing_balance, dec!(110));
            assert_chain(&ledger.entries(Currency::Usd).unwrap());
        }
    }

    #[test]
    fn update_and_cascade_agree_after_a_lookup_switch() {
        let nearest = ledger(OpeningLookup::NearestPrior);
        trade(&nearest, 1, Direction::Buy, Currency::Usd, dec!(100));
        let d3 = trade(&nearest, 3, Direction::Buy, Currency::Usd, dec!(10))
            .inventory
            .unwrap()
            .entry;
        assert_eq!(d3.opening_balance, dec!(100));
        assert_eq!(d3.opening_source, OpeningSource::MostRecentPrior);

        let strict = Ledger::new(nearest.store, Currency::ALL.to_vec(), OpeningLookup::PreviousDay);
        let direct = strict.update_inventory(day(3), Currency::Usd).unwrap().entry;
        assert_eq!(direct.opening_balance, dec!(0));
        assert_eq!(direct.opening_source, OpeningSource::Initial);
        assert_eq!(direct.closing_balance, dec!(10));

        // Cascading from day 1 lands on the same answer, so nothing changes.
        let report = strict.update_inventory(day(1), Currency::Usd).unwrap();
        assert!(report.cascaded.is_empty());
        let via_cascade = strict.store().get_entry(day(3), Currency::Usd).unwrap().unwrap();
        assert_eq!(via_cascade.opening_balance, direct.opening_balance);
        assert_eq!(via_cascade.opening_source, direct.opening_source);

        // Switching back bridges the gap again on the next update.
        let nearest = Ledger::new(strict.store, Currency::ALL.to_vec(), OpeningLookup::NearestPrior);
        let report = nearest.update_inventory(day(1), Currency::Usd).unwrap();
        assert_eq!(report.cascaded.len(), 1);
        let d3 = nearest.store().get_entry(day(3), Currency::Usd).unwrap().unwrap();
        assert_eq!(d3.opening_balance, dec!(100));
        assert_eq!(d3.opening_source, OpeningSource::MostRecentPrior);
    }

    #[test]
    fn currencies_do_not_share_a_chain() {
        let ledger = ledger(OpeningLookup::NearestPrior);
        trade(&ledger, 1, Direction::Buy, Currency::Usd, dec!(100));
        let eur = trade(&ledger, 2, Direction::Buy, Currency::Eur, dec!(7))
            .inventory
            .unwrap()
            .entry;
        assert_eq!(eur.opening_balance, dec!(0));
        assert_eq!(eur.opening_source, OpeningSource::Initial);
    }

    #[test]
    fn invalid_records_are_rejected_before_storage() {
        let ledger = ledger(OpeningLookup::NearestPrior);
        let err = ledger
            .record_transaction(NewTransaction {
                date: day(1),
                direction: Direction::Buy,
                currency: Currency::Usd,
                amount: dec!(0),
                counter_value: dec!(0),
                customer: None,
                staff: None,
                source: None,
            })
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidAmount { .. }));

        let err = ledger
            .record_adjustment(NewAdjustment {
                date: day(1),
                currency: Currency::Usd,
                amount: dec!(5),
                reason: "   ".into(),
                author: None,
            })
            .unwrap_err();
        assert!(matches!(err, LedgerError::MissingReason));
        assert!(ledger.store().list_transactions().unwrap().is_empty());
        assert!(ledger.entries(Currency::Usd).unwrap().is_empty());
    }

    #[test]
    fn unknown_ids_are_not_found() {
        let ledger = ledger(OpeningLookup::NearestPrior);
        let id = Uuid::new_v4();
        assert!(matches!(ledger.transaction(id), Err(LedgerError::TransactionNotFound(x)) if x == id));
        assert!(matches!(ledger.adjustment(id), Err(LedgerError::AdjustmentNotFound(x)) if x == id));

        let stored = trade(&ledger, 1, Direction::Sell, Currency::Ves, dec!(3)).record;
        assert_eq!(ledger.transaction(stored.id).unwrap(), stored);
    }

    #[test]
    fn update_range_creates_every_day_in_order() {
        let ledger = ledger(OpeningLookup::PreviousDay);
        trade(&ledger, 1, Direction::Buy, Currency::Usd, dec!(10));
        trade(&ledger, 4, Direction::Buy, Currency::Usd, dec!(10));

        let mut seen = Vec::new();
        let reports = ledger
            .update_range_with(Currency::Usd, day(1), day(5), |r| seen.push(r.entry.date))
            .unwrap();
        assert_eq!(reports.len(), 5);
        assert_eq!(seen, (1..=5).map(day).collect::<Vec<_>>());

        let entries = ledger.entries(Currency::Usd).unwrap();
        assert_eq!(entries.last().unwrap().closing_balance, dec!(20));
        assert_chain(&entries);
    }

    #[test]
    fn update_range_rejects_reversed_bounds() {
        let ledger = ledger(OpeningLookup::NearestPrior);
        let err = ledger.update_range(Currency::Usd, day(5), day(1)).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidRange { .. }));
    }

    #[test]
    fn daily_update_covers_configured_currencies() {
        let ledger = Ledger::new(
            MemoryStore::new(),
            vec![Currency::Usd, Currency::Ves],
            OpeningLookup::NearestPrior,
        );
        let report = ledger.update_daily(day(9));
        assert!(report.failures.is_empty());
        let touched: Vec<_> = report.updated.iter().map(|r| r.entry.currency).collect();
        assert_eq!(touched, vec![Currency::Usd, Currency::Ves]);
        assert!(ledger.entries(Currency::Eur).unwrap().is_empty());
    }

    /// Fails every upsert for one date; everything else goes to a MemoryStore.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        fail_on: Mutex<Option<NaiveDate>>,
    }

    impl FlakyStore {
        fn fail_on(&self, date: Option<NaiveDate>) {
            *self.fail_on.lock().unwrap() = date;
        }
    }

    impl TransactionStore for FlakyStore {
        fn insert_transaction(&self, tx: &TransactionRecord) -> StoreResult<()> {
            self.inner.insert_transaction(tx)
        }
        fn get_transaction(&self, id: Uuid) -> StoreResult<Option<TransactionRecord>> {
            self.inner.get_transaction(id)
        }
        fn list_transactions(&self) -> StoreResult<Vec<TransactionRecord>> {
            self.inner.list_transactions()
        }
        fn transaction_totals(&self, date: NaiveDate, currency: Currency) -> StoreResult<FlowTotals> {
            self.inner.transaction_totals(date, currency)
        }
    }

    impl AdjustmentStore for FlakyStore {
        fn insert_adjustment(&self, adj: &AdjustmentRecord) -> StoreResult<()> {
            self.inner.insert_adjustment(adj)
        }
        fn get_adjustment(&self, id: Uuid) -> StoreResult<Option<AdjustmentRecord>> {
            self.inner.get_adjustment(id)
        }
        fn adjustment_total(&self, date: NaiveDate, currency: Currency) -> StoreResult<Decimal> {
            self.inner.adjustment_total(date, currency)
        }
    }

    impl LedgerRepository for FlakyStore {
        fn get_entry(&self, date: NaiveDate, currency: Currency) -> StoreResult<Option<LedgerDayEntry>> {
            self.inner.get_entry(date, currency)
        }
        fn list_entries(&self, currency: Currency) -> StoreResult<Vec<LedgerDayEntry>> {
            self.inner.list_entries(currency)
        }
        fn upsert_entry(&self, entry: &LedgerDayEntry) -> StoreResult<()> {
            if *self.fail_on.lock().unwrap() == Some(entry.date) {
                return Err(StoreError::Corrupt {
                    table: "inventory",
                    field: "date",
                    value: entry.date.to_string(),
                });
            }
            self.inner.upsert_entry(entry)
        }
    }

    #[test]
    fn failed_cascade_keeps_the_record_and_releases_the_lock() {
        let ledger = Ledger::new(FlakyStore::default(), Currency::ALL.to_vec(), OpeningLookup::NearestPrior);
        for d in 1..=4 {
            trade(&ledger, d, Direction::Buy, Currency::Usd, dec!(10));
        }

        ledger.store().fail_on(Some(day(3)));
        let outcome = trade(&ledger, 1, Direction::Buy, Currency::Usd, dec!(5));
        assert!(outcome.inventory.is_err());
        assert!(ledger.transaction(outcome.record.id).is_ok());

        // Day 2 was cascaded before the failure; day 4 was left alone.
        let entries = ledger.entries(Currency::Usd).unwrap();
        assert_eq!(entries[1].closing_balance, dec!(25));
        assert_eq!(entries[3].closing_balance, dec!(40));

        // The lock was released, and a retry completes the chain.
        ledger.store().fail_on(None);
        let report = ledger.update_inventory(day(1), Currency::Usd).unwrap();
        assert_eq!(report.cascaded.len(), 2);
        let entries = ledger.entries(Currency::Usd).unwrap();
        assert_eq!(entries[3].closing_balance, dec!(45));
        assert_chain(&entries);
    }

    #[test]
    fn concurrent_backfills_keep_the_chain_intact() {
        let ledger = Arc::new(ledger(OpeningLookup::NearestPrior));
        let handles: Vec<_> = (0..4u32)
            .map(|t| {
                let ledger = Arc::clone(&ledger);
                thread::spawn(move || {
                    for i in 0..12u32 {
                        let d = (i * 7 + t * 3) % 10 + 1;
                        trade(&*ledger, d, Direction::Buy, Currency::Usd, dec!(1));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().expect("worker panicked");
        }

        let entries = ledger.entries(Currency::Usd).unwrap();
        assert_chain(&entries);
        assert_eq!(entries.last().unwrap().closing_balance, dec!(48));
    }
}
