mod cli;

use anyhow::{Context, Result, anyhow};
use chrono::{Local, NaiveDate, Utc};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use rust_decimal::Decimal;
use std::path::PathBuf;
use uuid::Uuid;

use cambio::config::{AppConfig, AppPaths, app_paths, load_or_init_config, write_config};
use cambio::db::Db;
use cambio::ledger::{RecordOutcome, UpdateReport};
use cambio::reconcile::ReconciliationResult;
use cambio::running::rebuild_running_balances;
use cambio::store::TransactionStore;
use cambio::{
    Currency, Direction, Ledger, LedgerDayEntry, NewAdjustment, NewTransaction, OpeningLookup,
};

use crate::cli::{
    AdjustArgs, AdjustmentCmd, Cli, Command, ConfigCmd, InventoryCmd, ReconcileArgs, TradeArgs,
    TxCmd, WsCmd,
};

fn main() {
    init_tracing();
    if let Err(err) = run() {
        eprintln!("{err:#}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let paths = app_paths(cli.home.clone())?;
    let (mut cfg, cfg_path) = load_or_init_config(&paths)?;

    match cli.command {
        Command::Config(args) => handle_config(args.cmd, &mut cfg, &cfg_path)?,
        Command::Ws(args) => handle_ws(args.cmd, &paths, &mut cfg, &cfg_path)?,
        Command::Buy(args) => {
            let (ledger, db_path) = open_ledger(&paths, &cfg)?;
            let outcome = record_trade(&ledger, &cfg, Direction::Buy, args)?;
            report_recorded("buy", outcome.record.id, &db_path, &outcome);
        }
        Command::Sell(args) => {
            let (ledger, db_path) = open_ledger(&paths, &cfg)?;
            let outcome = record_trade(&ledger, &cfg, Direction::Sell, args)?;
            report_recorded("sell", outcome.record.id, &db_path, &outcome);
        }
        Command::Adjust(args) => {
            let (ledger, db_path) = open_ledger(&paths, &cfg)?;
            let outcome = record_adjustment(&ledger, args)?;
            report_recorded("adjustment", outcome.record.id, &db_path, &outcome);
        }
        Command::Inventory(args) => {
            let (ledger, _) = open_ledger(&paths, &cfg)?;
            handle_inventory(&ledger, args.cmd, &mut cfg, &cfg_path)?;
        }
        Command::Reconcile(args) => {
            let (ledger, _) = open_ledger(&paths, &cfg)?;
            handle_reconcile(&ledger, args)?;
        }
        Command::Balances(args) => {
            let (ledger, _) = open_ledger(&paths, &cfg)?;
            let only = args
                .currency
                .as_deref()
                .map(str::parse::<Currency>)
                .transpose()?;
            print_running_balances(&ledger, only)?;
        }
        Command::Tx(args) => match args.cmd {
            TxCmd::Show { id } => {
                let (ledger, _) = open_ledger(&paths, &cfg)?;
                let tx = ledger.transaction(parse_uuid(&id)?)?;
                println!("id\t{}", tx.id);
                println!("date\t{}", tx.date);
                println!("direction\t{}", tx.direction.as_str());
                println!("currency\t{}", tx.currency);
                println!("amount\t{}", tx.amount);
                match Currency::ALL.into_iter().find(|c| c.is_local()) {
                    Some(local) => println!("counter_value\t{} {local}", tx.counter_value),
                    None => println!("counter_value\t{}", tx.counter_value),
                }
                println!("customer\t{}", tx.customer.as_deref().unwrap_or("-"));
                println!("staff\t{}", tx.staff.as_deref().unwrap_or("-"));
                println!("source\t{}", tx.source.as_deref().unwrap_or("-"));
                println!("created_at\t{}", tx.created_at.to_rfc3339());
            }
        },
        Command::Adjustment(args) => match args.cmd {
            AdjustmentCmd::Show { id } => {
                let (ledger, _) = open_ledger(&paths, &cfg)?;
                let adj = ledger.adjustment(parse_uuid(&id)?)?;
                println!("id\t{}", adj.id);
                println!("date\t{}", adj.date);
                println!("currency\t{}", adj.currency);
                println!("amount\t{}", adj.amount);
                println!("reason\t{}", adj.reason);
                println!("author\t{}", adj.author.as_deref().unwrap_or("-"));
                println!("created_at\t{}", adj.created_at.to_rfc3339());
            }
        },
    }

    Ok(())
}

fn open_ledger(paths: &AppPaths, cfg: &AppConfig) -> Result<(Ledger<Db>, PathBuf)> {
    let (db, db_path) = Db::open(paths, &cfg.current_workspace)?;
    Ok((Ledger::new(db, cfg.currencies()?, cfg.opening_lookup), db_path))
}

fn record_trade(
    ledger: &Ledger<Db>,
    cfg: &AppConfig,
    direction: Direction,
    args: TradeArgs,
) -> Result<RecordOutcome<cambio::TransactionRecord>> {
    let currency = args.currency.parse::<Currency>()?;
    let amount = parse_decimal(args.amount, "amount")?;
    let counter_value = match args.counter_value {
        Some(raw) => parse_decimal(raw, "counter value")?,
        None => Decimal::ZERO,
    };
    let new = NewTransaction {
        date: parse_date_or_today(args.date.as_deref(), "--date")?,
        direction,
        currency,
        amount,
        counter_value,
        customer: args.customer,
        staff: args.staff.or_else(|| cfg.default_staff.clone()),
        source: args.source,
    };
    Ok(ledger.record_transaction(new)?)
}

fn record_adjustment(
    ledger: &Ledger<Db>,
    args: AdjustArgs,
) -> Result<RecordOutcome<cambio::AdjustmentRecord>> {
    let new = NewAdjustment {
        date: parse_date_or_today(args.date.as_deref(), "--date")?,
        currency: args.currency.parse::<Currency>()?,
        amount: parse_decimal(args.amount, "amount")?,
        reason: args.reason,
        author: args.author,
    };
    Ok(ledger.record_adjustment(new)?)
}

fn report_recorded<T>(
    kind: &str,
    id: Uuid,
    db_path: &std::path::Path,
    outcome: &RecordOutcome<T>,
) {
    println!("Recorded {kind} {id} to {}", db_path.display());
    match &outcome.inventory {
        Ok(report) => print_update(report),
        Err(err) => eprintln!("Warning: {kind} stored, but the inventory update failed: {err}"),
    }
}

fn print_update(report: &UpdateReport) {
    let e = &report.entry;
    println!(
        "{}\t{}\topening {}\tclosing {}",
        e.date, e.currency, e.opening_balance, e.closing_balance
    );
    if !report.cascaded.is_empty() {
        println!("cascaded {} later day(s)", report.cascaded.len());
    }
}

fn handle_inventory(
    ledger: &Ledger<Db>,
    cmd: InventoryCmd,
    cfg: &mut AppConfig,
    cfg_path: &std::path::Path,
) -> Result<()> {
    match cmd {
        InventoryCmd::Update { date, currency } => {
            let date = parse_date_or_today(date.as_deref(), "--date")?;
            match currency {
                Some(raw) => {
                    let report = ledger.update_inventory(date, raw.parse::<Currency>()?)?;
                    print_update(&report);
                }
                None => {
                    let report = ledger.update_daily(date);
                    for r in &report.updated {
                        print_update(r);
                    }
                    if !report.failures.is_empty() {
                        for (currency, err) in &report.failures {
                            eprintln!("{currency}: {err}");
                        }
                        return Err(anyhow!(
                            "Daily inventory update failed for {} currency(ies)",
                            report.failures.len()
                        ));
                    }
                    cfg.last_daily_update_at = Some(Utc::now());
                    write_config(cfg_path, cfg)?;
                }
            }
            Ok(())
        }
        InventoryCmd::Rebuild { currency, from, to } => {
            let currency = currency.parse::<Currency>()?;
            let from = parse_date(&from, "--from")?;
            let to = parse_date_or_today(to.as_deref(), "--to")?;
            let days = (to - from).num_days().max(0) as u64 + 1;

            let pb = ProgressBar::new(days);
            pb.set_style(
                ProgressStyle::with_template("{spinner} {msg} {pos}/{len}")?
                    .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
            );
            pb.set_message(format!("Rebuilding {currency} inventory..."));

            let result = ledger.update_range_with(currency, from, to, |report| {
                pb.set_message(format!("Rebuilding {currency} {}", report.entry.date));
                pb.inc(1);
            });
            pb.finish_and_clear();

            let reports = result?;
            let last = reports.last().map(|r| r.entry.closing_balance);
            println!(
                "Rebuilt {} day(s) of {currency} from {from} to {to}; closing {}",
                reports.len(),
                last.unwrap_or(Decimal::ZERO)
            );
            Ok(())
        }
        InventoryCmd::Show { currency, from, to } => {
            let currencies = match currency {
                Some(raw) => vec![raw.parse::<Currency>()?],
                None => ledger.currencies().to_vec(),
            };
            let from = from.as_deref().map(|s| parse_date(s, "--from")).transpose()?;
            let to = to.as_deref().map(|s| parse_date(s, "--to")).transpose()?;

            let mut rows = Vec::new();
            for c in currencies {
                for e in ledger.entries(c)? {
                    if from.is_some_and(|f| e.date < f) || to.is_some_and(|t| e.date > t) {
                        continue;
                    }
                    rows.push(entry_row(&e));
                }
            }

            if rows.is_empty() {
                println!("(no inventory entries)");
                return Ok(());
            }
            print_table(
                &[
                    "date",
                    "currency",
                    "opening",
                    "source",
                    "purchases",
                    "sales",
                    "adjustments",
                    "closing",
                ],
                &rows,
            );
            Ok(())
        }
    }
}

fn entry_row(e: &LedgerDayEntry) -> Vec<String> {
    vec![
        e.date.to_string(),
        e.currency.to_string(),
        e.opening_balance.to_string(),
        e.opening_source.as_str().to_string(),
        e.purchases.to_string(),
        e.sales.to_string(),
        e.adjustments.to_string(),
        e.closing_balance.to_string(),
    ]
}

fn handle_reconcile(ledger: &Ledger<Db>, args: ReconcileArgs) -> Result<()> {
    let date = parse_date_or_today(args.date.as_deref(), "--date")?;
    let currencies = match args.currency {
        Some(raw) => vec![raw.parse::<Currency>()?],
        None => ledger.currencies().to_vec(),
    };

    let mut all_reconciled = true;
    for currency in currencies {
        if args.repair {
            let report = ledger.repair(date, currency)?;
            print_reconciliation(&report.reconciliation);
            all_reconciled &= report.reconciliation.is_reconciled();
            if let Some(update) = &report.update {
                print!("repaired\t");
                print_update(update);
            }
        } else {
            let result = ledger.reconcile(date, currency)?;
            print_reconciliation(&result);
            all_reconciled &= result.is_reconciled();
        }
    }

    println!(
        "all reconciled: {}",
        if all_reconciled { "yes" } else { "no" }
    );
    Ok(())
}

fn print_reconciliation(r: &ReconciliationResult) {
    fn status(ok: bool, fix: &str) -> String {
        if ok {
            "ok".to_string()
        } else {
            format!("MISMATCH ({fix})")
        }
    }

    println!("{}\t{}\topening {}", r.date, r.currency, r.opening_balance);
    println!(
        "{}\tpurchases\tcalculated {}\trecorded {}\t{}",
        r.currency,
        r.calculated_purchases,
        r.recorded_purchases,
        status(r.purchases_match, "corrected")
    );
    println!(
        "{}\tsales\tcalculated {}\trecorded {}\t{}",
        r.currency,
        r.calculated_sales,
        r.recorded_sales,
        status(r.sales_match, "corrected")
    );
    println!("{}\tadjustments\t{}", r.currency, r.adjustments);
    println!(
        "{}\tclosing\texpected {}\trecorded {}\t{}",
        r.currency,
        r.expected_closing,
        r.recorded_closing,
        status(r.balance_match, "unresolved")
    );
}

fn print_running_balances(ledger: &Ledger<Db>, only: Option<Currency>) -> Result<()> {
    let transactions = ledger.store().list_transactions()?;
    let rows: Vec<Vec<String>> = rebuild_running_balances(transactions)
        .into_iter()
        .filter(|r| only.is_none_or(|c| r.record.currency == c))
        .map(|r| {
            vec![
                r.record.date.to_string(),
                r.record.direction.as_str().to_string(),
                r.record.currency.to_string(),
                r.record.amount.to_string(),
                r.balance.to_string(),
                r.record.id.to_string(),
            ]
        })
        .collect();

    if rows.is_empty() {
        println!("(no transactions)");
        return Ok(());
    }
    print_table(
        &["date", "direction", "currency", "amount", "balance", "id"],
        &rows,
    );
    Ok(())
}

fn print_table(headers: &[&str], rows: &[Vec<String>]) {
    if headers.is_empty() {
        println!("(no columns)");
        return;
    }

    let cols = headers.len();
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();

    for row in rows {
        for (i, cell) in row.iter().take(cols).enumerate() {
            widths[i] = widths[i].max(cell.len());
        }
    }

    fn print_row(cells: &[String], widths: &[usize]) {
        print!("|");
        for (i, w) in widths.iter().enumerate() {
            let cell = cells.get(i).map(String::as_str).unwrap_or("");
            print!(" {:width$} |", cell, width = *w);
        }
        println!();
    }

    fn print_sep(widths: &[usize]) {
        print!("|");
        for w in widths {
            print!("{}|", "-".repeat(w + 2));
        }
        println!();
    }

    let header_cells: Vec<String> = headers.iter().map(|h| h.to_string()).collect();
    print_row(&header_cells, &widths);
    print_sep(&widths);
    for row in rows {
        print_row(row, &widths);
    }
}

fn handle_config(cmd: ConfigCmd, cfg: &mut AppConfig, cfg_path: &std::path::Path) -> Result<()> {
    match cmd {
        ConfigCmd::Show => {
            println!("workspace\t{}", cfg.current_workspace);
            println!("currencies\t{}", cfg.currencies.join(","));
            println!("opening_lookup\t{}", cfg.opening_lookup.as_str());
            println!(
                "default_staff\t{}",
                cfg.default_staff.as_deref().unwrap_or("-")
            );
            if let Some(at) = cfg.last_daily_update_at {
                println!("last_daily_update_at\t{}", at.to_rfc3339());
            }
        }
        ConfigCmd::Lookup { mode } => {
            let lookup = OpeningLookup::parse(&mode).ok_or_else(|| {
                anyhow!("Invalid lookup mode '{mode}'. Expected previous-day or nearest-prior")
            })?;
            cfg.opening_lookup = lookup;
            write_config(cfg_path, cfg)?;
            println!("Opening lookup set to {}", lookup.as_str());
        }
        ConfigCmd::Currencies { codes } => {
            let currencies = cambio::domain::parse_currency_list(&codes)?;
            cfg.currencies = currencies.iter().map(|c| c.code().to_string()).collect();
            write_config(cfg_path, cfg)?;
            println!("Currencies set to {}", cfg.currencies.join(","));
        }
    }
    Ok(())
}

fn handle_ws(
    cmd: WsCmd,
    paths: &AppPaths,
    cfg: &mut AppConfig,
    cfg_path: &std::path::Path,
) -> Result<()> {
    match cmd {
        WsCmd::Check => {
            println!("You are currently in workspace: {}", cfg.current_workspace);
        }
        WsCmd::Add { name } => {
            // Creating a workspace is just creating its db.
            let _ = Db::open(paths, &name)?;
            println!("Added workspace: {name}");
        }
        WsCmd::Checkout { name } => {
            let _ = Db::open(paths, &name)?;
            cfg.current_workspace = name.clone();
            write_config(cfg_path, cfg)?;
            println!("Checked out workspace: {name}");
        }
    }
    Ok(())
}

fn parse_decimal(raw: String, field: &'static str) -> Result<Decimal> {
    raw.parse::<Decimal>()
        .with_context(|| format!("Invalid decimal for {field}: {raw}"))
}

fn parse_uuid(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw.trim()).with_context(|| format!("Invalid id: {raw}"))
}

fn parse_date(raw: &str, flag: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .with_context(|| format!("Invalid {flag}. Expected YYYY-MM-DD, got: {raw}"))
}

fn parse_date_or_today(raw: Option<&str>, flag: &str) -> Result<NaiveDate> {
    match raw {
        None => Ok(Local::now().date_naive()),
        Some(s) => parse_date(s, flag),
    }
}
