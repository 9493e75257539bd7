use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;

mod common;

use common::{MINT, write_config};

const MISSING_CONFIG: &str = "tests/no-such-config.json";

#[test]
fn test_classify_threshold() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::new(cargo_bin!("tollgate"));
    cmd.args(["--config", MISSING_CONFIG, "classify", "--amount", "10"]);
    cmd.assert()
        .success()
        .stdout(predicate::str::diff("premium\n"));

    let mut cmd = Command::new(cargo_bin!("tollgate"));
    cmd.args(["--config", MISSING_CONFIG, "classify", "--amount", "9"]);
    cmd.assert().success().stdout(predicate::str::diff("free\n"));

    Ok(())
}

#[test]
fn test_classify_uses_configured_threshold() -> Result<(), Box<dyn std::error::Error>> {
    let config = write_config(r#"{ "gate": { "premium_threshold": 50 } }"#);

    let mut cmd = Command::new(cargo_bin!("tollgate"));
    cmd.arg("--config")
        .arg(config.path())
        .args(["classify", "--amount", "10"]);
    cmd.assert().success().stdout(predicate::str::diff("free\n"));

    Ok(())
}

#[test]
fn test_quote_for_accepted_mint() -> Result<(), Box<dyn std::error::Error>> {
    let config = write_config(&format!(
        r#"{{
            "metric": "milliseconds",
            "step_size": 60000,
            "accepted_mints": [{{ "url": "{MINT}", "price_per_step": 2, "min_purchase_steps": 3 }}]
        }}"#
    ));

    let mut cmd = Command::new(cargo_bin!("tollgate"));
    cmd.arg("--config")
        .arg(config.path())
        .args(["quote", "--mint", MINT, "--amount", "21"]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains(r#""allotment":600000"#))
        .stdout(predicate::str::contains(r#""tier":"premium""#));

    Ok(())
}

#[test]
fn test_quote_below_minimum_fails() -> Result<(), Box<dyn std::error::Error>> {
    let config = write_config(&format!(
        r#"{{ "accepted_mints": [{{ "url": "{MINT}", "price_per_step": 2, "min_purchase_steps": 3 }}] }}"#
    ));

    let mut cmd = Command::new(cargo_bin!("tollgate"));
    cmd.arg("--config")
        .arg(config.path())
        .args(["quote", "--mint", MINT, "--amount", "5"]);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("minimum purchase is 3 steps"));

    Ok(())
}

#[test]
fn test_quote_unknown_mint_fails() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::new(cargo_bin!("tollgate"));
    cmd.args([
        "--config",
        MISSING_CONFIG,
        "quote",
        "--mint",
        "https://other.example",
        "--amount",
        "5",
    ]);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("is not accepted"));

    Ok(())
}

#[test]
fn test_open_rejects_invalid_mac() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::new(cargo_bin!("tollgate"));
    cmd.args([
        "--config",
        MISSING_CONFIG,
        "open",
        "--mac",
        "zz:zz",
        "--minutes",
        "5",
    ]);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("invalid MAC address"));

    Ok(())
}

#[test]
fn test_open_rejects_out_of_range_minutes() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::new(cargo_bin!("tollgate"));
    cmd.args([
        "--config",
        MISSING_CONFIG,
        "open",
        "--mac",
        "aa:bb:cc:dd:ee:ff",
        "--minutes",
    ])
    .arg(i64::MAX.to_string());
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("out of range"));

    Ok(())
}

#[test]
fn test_invalid_config_is_reported() -> Result<(), Box<dyn std::error::Error>> {
    let config = write_config(r#"{ "step_size": 0 }"#);

    let mut cmd = Command::new(cargo_bin!("tollgate"));
    cmd.arg("--config")
        .arg(config.path())
        .args(["classify", "--amount", "1"]);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("step_size must be positive"));

    Ok(())
}
