use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::io::Write;
use std::process::Command;
use tempfile::NamedTempFile;

fn commands(rows: &[&str]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "op,account,counterparty,amount,tier,reference").unwrap();
    for row in rows {
        writeln!(file, "{}", row).unwrap();
    }
    file
}

#[test]
fn test_cli_end_to_end() -> Result<(), Box<dyn std::error::Error>> {
    let file = commands(&[
        "open,A",
        "open,B",
        "topup,A,,100,,dep-1",
        "transfer,A,B,40,,",
    ]);

    let mut cmd = Command::new(cargo_bin!("walletcore"));
    cmd.arg(file.path());

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("account,balance,currency,status"))
        .stdout(predicate::str::contains("A,60.00,USD,active"))
        .stdout(predicate::str::contains("B,40.00,USD,active"));

    Ok(())
}

#[test]
fn test_cli_reports_row_errors_and_continues() {
    let file = commands(&[
        "open,A",
        "topup,A,,10,,",
        "refund,A,,5,,",
        "transfer,A,A,1,,",
        "withdraw,A,,50,,",
        "topup,A,,2.005,,",
        "lock,A,,,,chargeback",
    ]);

    let mut cmd = Command::new(cargo_bin!("walletcore"));
    cmd.arg(file.path());

    cmd.assert()
        .success()
        .stderr(predicate::str::contains("Error reading command 3"))
        .stderr(predicate::str::contains("Error processing command 4"))
        .stderr(predicate::str::contains("Error processing command 5"))
        .stdout(predicate::str::contains("A,12.01,USD,locked"));
}

#[test]
fn test_cli_fee_lands_in_house_wallet() {
    let file = commands(&[
        "open,shop",
        "open,bob",
        "topup,shop,,1000,,",
        "transfer,shop,bob,200,merchant,",
    ]);

    let mut cmd = Command::new(cargo_bin!("walletcore"));
    cmd.arg(file.path());

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("shop,799.00,USD,active"))
        .stdout(predicate::str::contains("bob,200.00,USD,active"))
        .stdout(predicate::str::contains("house,1.00,USD,active"));
}

#[test]
fn test_cli_config_file_overrides_limits() {
    let mut config = NamedTempFile::new().unwrap();
    writeln!(
        config,
        "currency: EUR\nlimits:\n  regular: {{ daily: \"1000\", monthly: \"100000\" }}\n  merchant: {{ daily: \"1000000\", monthly: \"10000000\" }}"
    )
    .unwrap();
    let file = commands(&[
        "open,A",
        "open,B",
        "topup,A,,5000,,",
        "transfer,A,B,900,,",
        "transfer,A,B,150,,",
        "transfer,A,B,100,,",
    ]);

    let mut cmd = Command::new(cargo_bin!("walletcore"));
    cmd.arg(file.path()).arg("--config").arg(config.path());

    cmd.assert()
        .success()
        .stderr(predicate::str::contains("Error processing command 5"))
        .stdout(predicate::str::contains("A,4000.00,EUR,active"))
        .stdout(predicate::str::contains("B,1000.00,EUR,active"));
}

#[test]
fn test_cli_missing_input_fails() {
    let mut cmd = Command::new(cargo_bin!("walletcore"));
    cmd.arg("does/not/exist.csv");
    cmd.assert().failure();
}
