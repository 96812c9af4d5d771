use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, warn};

use crate::domain::Currency;
use crate::error::Result;
use crate::ledger::{Ledger, UpdateReport, approx_eq, compute_closing};
use crate::lock::CurrencyGuard;
use crate::store::LedgerStore;

/// One day of one currency recomputed from the transaction record and
/// compared against what the ledger entry holds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconciliationResult {
    pub date: NaiveDate,
    pub currency: Currency,
    pub opening_balance: Decimal,
    pub calculated_purchases: Decimal,
    pub recorded_purchases: Decimal,
    pub purchases_match: bool,
    pub calculated_sales: Decimal,
    pub recorded_sales: Decimal,
    pub sales_match: bool,
    pub adjustments: Decimal,
    pub expected_closing: Decimal,
    pub recorded_closing: Decimal,
    pub balance_match: bool,
    /// Recorded purchases/sales were overwritten with the calculated values.
    pub corrected: bool,
}

impl ReconciliationResult {
    pub fn is_reconciled(&self) -> bool {
        self.purchases_match && self.sales_match && self.balance_match
    }

    pub fn discrepancies(&self) -> Vec<String> {
        let mut out = Vec::new();
        let c = self.currency;
        if !self.purchases_match {
            out.push(format!(
                "{c} purchases: calculated {}, recorded {} (corrected)",
                self.calculated_purchases, self.recorded_purchases
            ));
        }
        if !self.sales_match {
            out.push(format!(
                "{c} sales: calculated {}, recorded {} (corrected)",
                self.calculated_sales, self.recorded_sales
            ));
        }
        if !self.balance_match {
            out.push(format!(
                "{c} closing: expected {}, recorded {} (unresolved)",
                self.expected_closing, self.recorded_closing
            ));
        }
        out
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconcileAllReport {
    pub date: NaiveDate,
    pub all_reconciled: bool,
    pub discrepancies: Vec<String>,
    pub results: Vec<ReconciliationResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RepairReport {
    pub reconciliation: ReconciliationResult,
    /// Present when the reconciliation found something and the day was re-cascaded.
    pub update: Option<UpdateReport>,
}

impl<S: LedgerStore> Ledger<S> {
    /// Recomputes purchases and sales for (date, currency) from the transaction
    /// store. Mismatched purchases/sales are overwritten in place; the closing
    /// balance is only reported, never corrected, and the corrections are not
    /// cascaded. A missing entry is created the way `resolve_entry` does.
    pub fn reconcile(&self, date: NaiveDate, currency: Currency) -> Result<ReconciliationResult> {
        let guard = self.lock(currency);
        self.reconcile_locked(&guard, date)
    }

    fn reconcile_locked(
        &self,
        guard: &CurrencyGuard<'_>,
        date: NaiveDate,
    ) -> Result<ReconciliationResult> {
        let currency = guard.currency();
        let mut entry = self.resolve_locked(guard, date)?;
        let totals = self.store.transaction_totals(date, currency)?;
        let adjustments = self.store.adjustment_total(date, currency)?;

        let purchases_match = approx_eq(totals.purchases, entry.purchases);
        let sales_match = approx_eq(totals.sales, entry.sales);
        let expected_closing = compute_closing(
            entry.opening_balance,
            totals.purchases,
            totals.sales,
            adjustments,
        );

        let result = ReconciliationResult {
            date,
            currency,
            opening_balance: entry.opening_balance,
            calculated_purchases: totals.purchases,
            recorded_purchases: entry.purchases,
            purchases_match,
            calculated_sales: totals.sales,
            recorded_sales: entry.sales,
            sales_match,
            adjustments,
            expected_closing,
            recorded_closing: entry.closing_balance,
            balance_match: approx_eq(expected_closing, entry.closing_balance),
            corrected: !(purchases_match && sales_match),
        };

        if result.corrected {
            entry.purchases = totals.purchases;
            entry.sales = totals.sales;
            entry.updated_at = Utc::now();
            self.store.upsert_entry(&entry)?;
            info!(%date, %currency, "corrected recorded purchases/sales");
        }
        if !result.balance_match {
            warn!(
                %date,
                %currency,
                expected = %result.expected_closing,
                recorded = %result.recorded_closing,
                "closing balance mismatch"
            );
        }
        Ok(result)
    }

    /// Reconciles `date` for every configured currency.
    pub fn reconcile_all(&self, date: NaiveDate) -> Result<ReconcileAllReport> {
        let mut results = Vec::with_capacity(self.currencies().len());
        for &currency in self.currencies() {
            results.push(self.reconcile(date, currency)?);
        }
        let discrepancies: Vec<String> =
            results.iter().flat_map(|r| r.discrepancies()).collect();
        Ok(ReconcileAllReport {
            date,
            all_reconciled: results.iter().all(ReconciliationResult::is_reconciled),
            discrepancies,
            results,
        })
    }

    /// Reconciles (date, currency) and, if anything was off, re-runs the
    /// inventory update so the healed flows reach the closing balance and
    /// every later day. Both steps run under one hold of the currency lock.
    pub fn repair(&self, date: NaiveDate, currency: Currency) -> Result<RepairReport> {
        let guard = self.lock(currency);
        let reconciliation = self.reconcile_locked(&guard, date)?;
        let update = if reconciliation.is_reconciled() {
            None
        } else {
            Some(self.update_locked(&guard, date)?)
        };
        Ok(RepairReport {
            reconciliation,
            update,
        })
    }
}
