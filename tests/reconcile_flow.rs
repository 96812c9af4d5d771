use assert_cmd::prelude::*;
use std::path::Path;
use std::process::Command;

fn cambio_cmd() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("cambio"))
}

fn run_ok(home: &tempfile::TempDir, args: &[&str]) {
    let mut cmd = cambio_cmd();
    cmd.env("CAMBIO_HOME", home.path());
    cmd.args(args);
    cmd.assert().success();
}

fn run_ok_out(home: &tempfile::TempDir, args: &[&str]) -> String {
    let mut cmd = cambio_cmd();
    cmd.env("CAMBIO_HOME", home.path());
    cmd.args(args);
    let out = cmd.assert().success().get_output().stdout.clone();
    String::from_utf8(out).expect("utf8 stdout")
}

fn workspace_db_path(cambio_home: &Path) -> std::path::PathBuf {
    cambio_home
        .join("data")
        .join("workspaces")
        .join("main")
        .join("cambio.sqlite3")
}

fn tamper(home: &tempfile::TempDir, sql: &str) {
    let conn = rusqlite::Connection::open(workspace_db_path(home.path())).expect("open db");
    let changed = conn.execute(sql, []).expect("tamper");
    assert!(changed > 0, "tamper statement matched no rows: {sql}");
}

fn seed_two_days(home: &tempfile::TempDir) {
    run_ok(home, &["buy", "1000", "USD", "--date", "2026-03-01"]);
    run_ok(home, &["sell", "200", "USD", "--date", "2026-03-01"]);
    run_ok(home, &["buy", "100", "USD", "--date", "2026-03-02"]);
}

#[test]
fn clean_ledger_reconciles() {
    let home = tempfile::tempdir().expect("tempdir");
    seed_two_days(&home);

    let out = run_ok_out(&home, &["reconcile", "--date", "2026-03-01"]);
    assert!(out.contains("USD\tpurchases\tcalculated 1000\trecorded 1000\tok"));
    assert!(out.contains("USD\tsales\tcalculated 200\trecorded 200\tok"));
    assert!(out.contains("USD\tclosing\texpected 800\trecorded 800\tok"));
    assert!(out.contains("all reconciled: yes"));
}

#[test]
fn wrong_recorded_purchases_are_reported_then_healed() {
    let home = tempfile::tempdir().expect("tempdir");
    seed_two_days(&home);
    tamper(
        &home,
        "UPDATE inventory SET purchases = '900' WHERE date = '2026-03-01' AND currency = 'USD'",
    );

    let out = run_ok_out(
        &home,
        &["reconcile", "--date", "2026-03-01", "--currency", "USD"],
    );
    assert!(out.contains("USD\tpurchases\tcalculated 1000\trecorded 900\tMISMATCH (corrected)"));
    assert!(out.contains("all reconciled: no"));

    let out = run_ok_out(
        &home,
        &["reconcile", "--date", "2026-03-01", "--currency", "USD"],
    );
    assert!(out.contains("USD\tpurchases\tcalculated 1000\trecorded 1000\tok"));
    assert!(out.contains("all reconciled: yes"));
}

#[test]
fn closing_drift_stays_unresolved_without_repair() {
    let home = tempfile::tempdir().expect("tempdir");
    seed_two_days(&home);
    tamper(
        &home,
        "UPDATE inventory SET closing_balance = '750' WHERE date = '2026-03-01' AND currency = 'USD'",
    );

    for _ in 0..2 {
        let out = run_ok_out(
            &home,
            &["reconcile", "--date", "2026-03-01", "--currency", "USD"],
        );
        assert!(out.contains("USD\tclosing\texpected 800\trecorded 750\tMISMATCH (unresolved)"));
        assert!(out.contains("all reconciled: no"));
    }
}

#[test]
fn repair_heals_flows_and_cascades_to_later_days() {
    let home = tempfile::tempdir().expect("tempdir");
    seed_two_days(&home);
    tamper(
        &home,
        "UPDATE inventory SET sales = '300', closing_balance = '700' WHERE date = '2026-03-01' AND currency = 'USD'",
    );
    tamper(
        &home,
        "UPDATE inventory SET opening_balance = '700', closing_balance = '800' WHERE date = '2026-03-02' AND currency = 'USD'",
    );

    let out = run_ok_out(
        &home,
        &["reconcile", "--date", "2026-03-01", "--currency", "USD", "--repair"],
    );
    assert!(out.contains("USD\tsales\tcalculated 200\trecorded 300\tMISMATCH (corrected)"));
    assert!(out.contains("repaired\t2026-03-01\tUSD\topening 0\tclosing 800"));
    assert!(out.contains("cascaded 1 later day(s)"));

    let out = run_ok_out(
        &home,
        &["reconcile", "--date", "2026-03-02", "--currency", "USD"],
    );
    assert!(out.contains("2026-03-02\tUSD\topening 800"));
    assert!(out.contains("USD\tclosing\texpected 900\trecorded 900\tok"));
    assert!(out.contains("all reconciled: yes"));
}

#[test]
fn reconciling_all_currencies_only_flags_the_broken_one() {
    let home = tempfile::tempdir().expect("tempdir");
    seed_two_days(&home);
    run_ok(&home, &["buy", "70", "GBP", "--date", "2026-03-01"]);
    tamper(
        &home,
        "UPDATE inventory SET purchases = '7' WHERE date = '2026-03-01' AND currency = 'GBP'",
    );

    let out = run_ok_out(&home, &["reconcile", "--date", "2026-03-01"]);
    assert!(out.contains("GBP\tpurchases\tcalculated 70\trecorded 7\tMISMATCH (corrected)"));
    assert!(out.contains("USD\tpurchases\tcalculated 1000\trecorded 1000\tok"));
    assert!(out.contains("EUR\tclosing\texpected 0\trecorded 0\tok"));
    assert!(out.contains("all reconciled: no"));
}
