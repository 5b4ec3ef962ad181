#![cfg(feature = "storage-rocksdb")]

mod common;

use assert_cmd::cargo_bin;
use std::process::Command;
use tempfile::tempdir;

#[test]
fn test_rocksdb_persistence_recovery() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("test_db");

    // First run seeds the sale and sells 1000 tokens
    let csv1 = dir.path().join("first.csv");
    common::write_commands(&csv1, &["buy,u1,22,USD,order-1"]).unwrap();

    let mut cmd1 = Command::new(cargo_bin!("sale-ledger"));
    cmd1.arg(&csv1).arg("--db-path").arg(&db_path);

    let output1 = cmd1.output().expect("Failed to execute command");
    assert!(output1.status.success());
    let stdout1 = String::from_utf8_lossy(&output1.stdout);
    assert!(stdout1.contains("u1,IND,USER,1000\n"));
    assert!(stdout1.contains("SYS_ICO,IND,SYSTEM,89999000\n"));

    // Second run must not seed again, and continues from the stored state
    let csv2 = dir.path().join("second.csv");
    common::write_commands(&csv2, &["buy,u1,11,USD,order-2"]).unwrap();

    let mut cmd2 = Command::new(cargo_bin!("sale-ledger"));
    cmd2.arg(&csv2).arg("--db-path").arg(&db_path);

    let output2 = cmd2.output().expect("Failed to execute command");
    assert!(output2.status.success());
    let stdout2 = String::from_utf8_lossy(&output2.stdout);

    assert!(stdout2.contains("u1,IND,USER,1500\n"));
    assert!(stdout2.contains("SYS_ICO,IND,SYSTEM,89998500\n"));
}
