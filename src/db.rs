use crate::config::{AppPaths, workspace_slug};
use crate::domain::{
    AdjustmentRecord, Currency, Direction, FlowTotals, LedgerDayEntry, OpeningSource,
    TransactionRecord,
};
use crate::error::StoreError;
use crate::store::{AdjustmentStore, LedgerRepository, StoreResult, TransactionStore};
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{Connection, Row, params};
use rust_decimal::Decimal;
use std::fs;
use std::path::PathBuf;
use uuid::Uuid;

pub struct Db {
    conn: Connection,
}

impl Db {
    pub fn open(paths: &AppPaths, workspace: &str) -> Result<(Self, PathBuf)> {
        let slug = workspace_slug(workspace);
        let ws_dir = paths.data_dir.join("workspaces").join(slug);
        fs::create_dir_all(&ws_dir)
            .with_context(|| format!("Failed to create workspace dir {}", ws_dir.display()))?;

        let db_path = ws_dir.join("cambio.sqlite3");
        let conn = Connection::open(&db_path)
            .with_context(|| format!("Failed to open DB {}", db_path.display()))?;

        let db = Self { conn };
        db.migrate()?;
        Ok((db, db_path))
    }

    pub fn open_in_memory() -> Result<Self> {
        let db = Self {
            conn: Connection::open_in_memory()?,
        };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS transactions (
                id TEXT PRIMARY KEY,
                date TEXT NOT NULL,
                direction TEXT NOT NULL,
                currency TEXT NOT NULL,
                amount TEXT NOT NULL,
                counter_value TEXT NOT NULL,
                customer TEXT,
                staff TEXT,
                source TEXT,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_transactions_day ON transactions(date, currency);

            CREATE TABLE IF NOT EXISTS adjustments (
                id TEXT PRIMARY KEY,
                date TEXT NOT NULL,
                currency TEXT NOT NULL,
                amount TEXT NOT NULL,
                reason TEXT NOT NULL,
                author TEXT,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_adjustments_day ON adjustments(date, currency);

            CREATE TABLE IF NOT EXISTS inventory (
                date TEXT NOT NULL,
                currency TEXT NOT NULL,
                opening_balance TEXT NOT NULL,
                opening_source TEXT NOT NULL,
                purchases TEXT NOT NULL,
                sales TEXT NOT NULL,
                adjustments TEXT NOT NULL,
                closing_balance TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (date, currency)
            );

            CREATE INDEX IF NOT EXISTS idx_inventory_currency ON inventory(currency, date);
            "#,
        )?;
        Ok(())
    }
}

fn corrupt(table: &'static str, field: &'static str, value: impl Into<String>) -> StoreError {
    StoreError::Corrupt {
        table,
        field,
        value: value.into(),
    }
}

fn decimal_col(row: &Row<'_>, idx: usize, table: &'static str, field: &'static str) -> StoreResult<Decimal> {
    let raw: String = row.get(idx)?;
    raw.parse::<Decimal>().map_err(|_| corrupt(table, field, raw))
}

fn date_col(row: &Row<'_>, idx: usize, table: &'static str) -> StoreResult<NaiveDate> {
    let raw: String = row.get(idx)?;
    NaiveDate::parse_from_str(&raw, "%Y-%m-%d").map_err(|_| corrupt(table, "date", raw))
}

fn timestamp_col(row: &Row<'_>, idx: usize, table: &'static str, field: &'static str) -> StoreResult<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| corrupt(table, field, raw))
}

fn currency_col(row: &Row<'_>, idx: usize, table: &'static str) -> StoreResult<Currency> {
    let raw: String = row.get(idx)?;
    raw.parse::<Currency>().map_err(|_| corrupt(table, "currency", raw))
}

fn uuid_col(row: &Row<'_>, idx: usize, table: &'static str) -> StoreResult<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw).map_err(|_| corrupt(table, "id", raw))
}

fn decode_transaction(row: &Row<'_>) -> StoreResult<TransactionRecord> {
    let direction: String = row.get(2)?;
    Ok(TransactionRecord {
        id: uuid_col(row, 0, "transactions")?,
        date: date_col(row, 1, "transactions")?,
        direction: Direction::parse(&direction)
            .ok_or_else(|| corrupt("transactions", "direction", direction))?,
        currency: currency_col(row, 3, "transactions")?,
        amount: decimal_col(row, 4, "transactions", "amount")?,
        counter_value: decimal_col(row, 5, "transactions", "counter_value")?,
        customer: row.get(6)?,
        staff: row.get(7)?,
        source: row.get(8)?,
        created_at: timestamp_col(row, 9, "transactions", "created_at")?,
    })
}

fn decode_adjustment(row: &Row<'_>) -> StoreResult<AdjustmentRecord> {
    Ok(AdjustmentRecord {
        id: uuid_col(row, 0, "adjustments")?,
        date: date_col(row, 1, "adjustments")?,
        currency: currency_col(row, 2, "adjustments")?,
        amount: decimal_col(row, 3, "adjustments", "amount")?,
        reason: row.get(4)?,
        author: row.get(5)?,
        created_at: timestamp_col(row, 6, "adjustments", "created_at")?,
    })
}

fn decode_entry(row: &Row<'_>) -> StoreResult<LedgerDayEntry> {
    let source: String = row.get(3)?;
    Ok(LedgerDayEntry {
        date: date_col(row, 0, "inventory")?,
        currency: currency_col(row, 1, "inventory")?,
        opening_balance: decimal_col(row, 2, "inventory", "opening_balance")?,
        opening_source: OpeningSource::parse(&source)
            .ok_or_else(|| corrupt("inventory", "opening_source", source))?,
        purchases: decimal_col(row, 4, "inventory", "purchases")?,
        sales: decimal_col(row, 5, "inventory", "sales")?,
        adjustments: decimal_col(row, 6, "inventory", "adjustments")?,
        closing_balance: decimal_col(row, 7, "inventory", "closing_balance")?,
        updated_at: timestamp_col(row, 8, "inventory", "updated_at")?,
    })
}

const TRANSACTION_COLUMNS: &str =
    "id, date, direction, currency, amount, counter_value, customer, staff, source, created_at";
const ADJUSTMENT_COLUMNS: &str = "id, date, currency, amount, reason, author, created_at";
const ENTRY_COLUMNS: &str = "date, currency, opening_balance, opening_source, purchases, sales, adjustments, closing_balance, updated_at";

impl TransactionStore for Db {
    fn insert_transaction(&self, tx: &TransactionRecord) -> StoreResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO transactions (id, date, direction, currency, amount, counter_value, customer, staff, source, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                tx.id.to_string(),
                tx.date.to_string(),
                tx.direction.as_str(),
                tx.currency.code(),
                tx.amount.to_string(),
                tx.counter_value.to_string(),
                tx.customer,
                tx.staff,
                tx.source,
                tx.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn get_transaction(&self, id: Uuid) -> StoreResult<Option<TransactionRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE id = ?1"))?;
        let mut rows = stmt.query(params![id.to_string()])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };
        Ok(Some(decode_transaction(row)?))
    }

    fn list_transactions(&self) -> StoreResult<Vec<TransactionRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions ORDER BY created_at ASC, rowid ASC"
        ))?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(decode_transaction(row)?);
        }
        Ok(out)
    }

    fn transaction_totals(&self, date: NaiveDate, currency: Currency) -> StoreResult<FlowTotals> {
        // Amounts are stored as decimal strings, so they are summed here rather than in SQL.
        let mut stmt = self.conn.prepare(
            "SELECT direction, amount FROM transactions WHERE date = ?1 AND currency = ?2",
        )?;
        let mut rows = stmt.query(params![date.to_string(), currency.code()])?;
        let mut totals = FlowTotals::default();
        while let Some(row) = rows.next()? {
            let direction: String = row.get(0)?;
            let amount = decimal_col(row, 1, "transactions", "amount")?;
            match Direction::parse(&direction) {
                Some(Direction::Buy) => totals.purchases += amount,
                Some(Direction::Sell) => totals.sales += amount,
                None => return Err(corrupt("transactions", "direction", direction)),
            }
        }
        Ok(totals)
    }
}

impl AdjustmentStore for Db {
    fn insert_adjustment(&self, adj: &AdjustmentRecord) -> StoreResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO adjustments (id, date, currency, amount, reason, author, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                adj.id.to_string(),
                adj.date.to_string(),
                adj.currency.code(),
                adj.amount.to_string(),
                adj.reason,
                adj.author,
                adj.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn get_adjustment(&self, id: Uuid) -> StoreResult<Option<AdjustmentRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {ADJUSTMENT_COLUMNS} FROM adjustments WHERE id = ?1"))?;
        let mut rows = stmt.query(params![id.to_string()])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };
        Ok(Some(decode_adjustment(row)?))
    }

    fn adjustment_total(&self, date: NaiveDate, currency: Currency) -> StoreResult<Decimal> {
        let mut stmt = self
            .conn
            .prepare("SELECT amount FROM adjustments WHERE date = ?1 AND currency = ?2")?;
        let mut rows = stmt.query(params![date.to_string(), currency.code()])?;
        let mut total = Decimal::ZERO;
        while let Some(row) = rows.next()? {
            total += decimal_col(row, 0, "adjustments", "amount")?;
        }
        Ok(total)
    }
}

impl LedgerRepository for Db {
    fn get_entry(&self, date: NaiveDate, currency: Currency) -> StoreResult<Option<LedgerDayEntry>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ENTRY_COLUMNS} FROM inventory WHERE date = ?1 AND currency = ?2"
        ))?;
        let mut rows = stmt.query(params![date.to_string(), currency.code()])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };
        Ok(Some(decode_entry(row)?))
    }

    fn list_entries(&self, currency: Currency) -> StoreResult<Vec<LedgerDayEntry>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ENTRY_COLUMNS} FROM inventory WHERE currency = ?1 ORDER BY date ASC"
        ))?;
        let mut rows = stmt.query(params![currency.code()])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(decode_entry(row)?);
        }
        Ok(out)
    }

    fn upsert_entry(&self, entry: &LedgerDayEntry) -> StoreResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO inventory (date, currency, opening_balance, opening_source, purchases, sales, adjustments, closing_balance, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(date, currency) DO UPDATE SET
                opening_balance = excluded.opening_balance,
                opening_source = excluded.opening_source,
                purchases = excluded.purchases,
                sales = excluded.sales,
                adjustments = excluded.adjustments,
                closing_balance = excluded.closing_balance,
                updated_at = excluded.updated_at
            "#,
            params![
                entry.date.to_string(),
                entry.currency.code(),
                entry.opening_balance.to_string(),
                entry.opening_source.as_str(),
                entry.purchases.to_string(),
                entry.sales.to_string(),
                entry.adjustments.to_string(),
                entry.closing_balance.to_string(),
                entry.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }
}
