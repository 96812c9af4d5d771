use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::domain::Currency;

/// One mutex per currency. Mutating ledger operations hold the guard for their
/// whole read-cascade-write sequence, so two cascades on the same currency
/// never interleave while different currencies proceed independently.
#[derive(Debug)]
pub struct CurrencyLocks {
    locks: HashMap<Currency, Mutex<()>>,
}

impl Default for CurrencyLocks {
    fn default() -> Self {
        Self {
            locks: Currency::ALL
                .into_iter()
                .map(|c| (c, Mutex::new(())))
                .collect(),
        }
    }
}

impl CurrencyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until `currency` is free. A lock poisoned by a panicking holder is
    /// recovered, since the mutex itself guards no data.
    pub fn acquire(&self, currency: Currency) -> CurrencyGuard<'_> {
        let mutex = &self.locks[&currency];
        let guard = mutex.lock().unwrap_or_else(|poisoned| {
            tracing::warn!(%currency, "recovering poisoned currency lock");
            poisoned.into_inner()
        });
        CurrencyGuard {
            currency,
            _guard: guard,
        }
    }
}

/// Proof that the caller holds the lock for `currency`.
pub struct CurrencyGuard<'a> {
    currency: Currency,
    _guard: MutexGuard<'a, ()>,
}

impl CurrencyGuard<'_> {
    pub fn currency(&self) -> Currency {
        self.currency
    }
}
