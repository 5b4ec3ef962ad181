mod common;

use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::io::Write;
use std::process::Command;

#[test]
fn test_cli_end_to_end() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::new(cargo_bin!());
    cmd.arg("tests/fixtures/commands.csv");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("owner,symbol,class,balance"))
        // 22 USD at 0.022 buys 1000 tokens, 100 go to the subscription
        .stdout(predicate::str::contains("u1,IND,USER,900\n"))
        .stdout(predicate::str::contains("SYS_ICO,IND,SYSTEM,89999000\n"))
        .stdout(predicate::str::contains("SYS_INCOME,IND,SYSTEM,100\n"))
        // Coupon payouts
        .stdout(predicate::str::contains("o1,USD,REWARD,1.76\n"))
        .stdout(predicate::str::contains("u1,USD,REWARD,0.44\n"))
        .stdout(predicate::str::contains("u2,USDT,REWARD,5\n"))
        .stdout(predicate::str::contains("u3,").not())
        .stderr(predicate::str::contains(
            "Command 5 refused: ERROR_BALANCE_NOT_ENOUGH",
        ))
        .stderr(predicate::str::contains("Error reading command 6"));

    Ok(())
}

#[test]
fn test_cli_config_file_overrides_defaults() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let config = dir.path().join("sale.json");
    let mut file = std::fs::File::create(&config)?;
    writeln!(
        file,
        r#"{{
            "token_symbol": "ABC",
            "genesis": {{
                "rounds": [{{"name": "Only", "price": "1", "total_tokens": "50", "sub_rounds": 1}}],
                "rates": [{{"symbol": "USD", "rate": "2"}}],
                "sale_wallet_balance": "50"
            }}
        }}"#
    )?;

    let input = dir.path().join("commands.csv");
    common::write_commands(&input, &["buy,u1,10,USD,order-1"])?;

    let mut cmd = Command::new(cargo_bin!());
    cmd.arg(&input).env("SALE_CONFIG", &config);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("u1,ABC,USER,5\n"))
        .stdout(predicate::str::contains("SYS_ICO,ABC,SYSTEM,45\n"));

    Ok(())
}

#[test]
fn test_cli_rejects_invalid_config() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let config = dir.path().join("sale.json");
    std::fs::write(&config, r#"{"token_symbol": " "}"#)?;

    let mut cmd = Command::new(cargo_bin!());
    cmd.arg("tests/fixtures/commands.csv")
        .arg("--config")
        .arg(&config);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("token_symbol"));

    Ok(())
}

#[test]
fn test_cli_missing_input_fails() {
    let mut cmd = Command::new(cargo_bin!());
    cmd.arg("tests/fixtures/does_not_exist.csv");
    cmd.assert().failure();
}
