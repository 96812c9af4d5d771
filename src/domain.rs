use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::LedgerError;

/// Currencies the counter keeps stock of. `VES` is the local currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Usd,
    Gbp,
    Eur,
    Ves,
}

impl Currency {
    pub const ALL: [Currency; 4] = [Currency::Usd, Currency::Gbp, Currency::Eur, Currency::Ves];

    pub fn code(self) -> &'static str {
        match self {
            Currency::Usd => "USD",
            Currency::Gbp => "GBP",
            Currency::Eur => "EUR",
            Currency::Ves => "VES",
        }
    }

    pub fn is_local(self) -> bool {
        self == Currency::Ves
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Currency {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = s.trim().to_ascii_uppercase();
        Currency::ALL
            .into_iter()
            .find(|c| c.code() == code)
            .ok_or_else(|| LedgerError::UnknownCurrency(s.trim().to_string()))
    }
}

/// Validates a configured currency list, rejecting unknown codes and dropping duplicates.
pub fn parse_currency_list<S: AsRef<str>>(codes: &[S]) -> Result<Vec<Currency>, LedgerError> {
    let mut out: Vec<Currency> = Vec::with_capacity(codes.len());
    for raw in codes {
        let c = raw.as_ref().parse::<Currency>()?;
        if !out.contains(&c) {
            out.push(c);
        }
    }
    Ok(out)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Buy,
    Sell,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Buy => "buy",
            Direction::Sell => "sell",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "buy" => Some(Direction::Buy),
            "sell" => Some(Direction::Sell),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: Uuid,
    pub date: NaiveDate,
    pub direction: Direction,
    pub currency: Currency,
    /// Always positive; the direction carries the sign.
    pub amount: Decimal,
    /// Value of the trade in the local currency.
    pub counter_value: Decimal,
    pub customer: Option<String>,
    pub staff: Option<String>,
    pub source: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub date: NaiveDate,
    pub direction: Direction,
    pub currency: Currency,
    pub amount: Decimal,
    pub counter_value: Decimal,
    pub customer: Option<String>,
    pub staff: Option<String>,
    pub source: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjustmentRecord {
    pub id: Uuid,
    pub date: NaiveDate,
    pub currency: Currency,
    /// Signed: positive adds stock, negative removes it.
    pub amount: Decimal,
    pub reason: String,
    pub author: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAdjustment {
    pub date: NaiveDate,
    pub currency: Currency,
    pub amount: Decimal,
    pub reason: String,
    pub author: Option<String>,
}

/// Where a day's opening balance came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpeningSource {
    PreviousDay,
    MostRecentPrior,
    Initial,
}

impl OpeningSource {
    pub fn as_str(self) -> &'static str {
        match self {
            OpeningSource::PreviousDay => "previous_day",
            OpeningSource::MostRecentPrior => "most_recent_prior",
            OpeningSource::Initial => "initial",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "previous_day" => Some(OpeningSource::PreviousDay),
            "most_recent_prior" => Some(OpeningSource::MostRecentPrior),
            "initial" => Some(OpeningSource::Initial),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerDayEntry {
    pub date: NaiveDate,
    pub currency: Currency,
    pub opening_balance: Decimal,
    pub opening_source: OpeningSource,
    pub purchases: Decimal,
    pub sales: Decimal,
    pub adjustments: Decimal,
    pub closing_balance: Decimal,
    pub updated_at: DateTime<Utc>,
}

impl LedgerDayEntry {
    pub fn new(
        date: NaiveDate,
        currency: Currency,
        opening_balance: Decimal,
        opening_source: OpeningSource,
    ) -> Self {
        Self {
            date,
            currency,
            opening_balance,
            opening_source,
            purchases: Decimal::ZERO,
            sales: Decimal::ZERO,
            adjustments: Decimal::ZERO,
            closing_balance: opening_balance,
            updated_at: Utc::now(),
        }
    }
}

/// Buy/Sell totals for one (date, currency).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlowTotals {
    pub purchases: Decimal,
    pub sales: Decimal,
}
