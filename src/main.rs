use clap::Parser;
use miette::{IntoDiagnostic, Result};
use sale_ledger::config::SaleConfig;
use sale_ledger::domain::ports::StoreBox;
use sale_ledger::infrastructure::in_memory::InMemoryStore;
use sale_ledger::interfaces::csv::command_reader::CommandReader;
use sale_ledger::interfaces::csv::wallet_writer::WalletWriter;
use sale_ledger::runtime::{Ports, SaleRuntime};
use sale_ledger::telemetry;
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input commands CSV file
    input: PathBuf,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// JSON file overriding the default sale configuration
    #[arg(long, env = "SALE_CONFIG")]
    config: Option<PathBuf>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "warn")]
    log_level: String,
}

#[cfg(feature = "storage-rocksdb")]
fn open_store(db_path: Option<PathBuf>) -> Result<StoreBox> {
    use sale_ledger::infrastructure::rocksdb::RocksDBStore;
    match db_path {
        Some(path) => Ok(Arc::new(RocksDBStore::open(path).into_diagnostic()?)),
        None => Ok(Arc::new(InMemoryStore::new())),
    }
}

#[cfg(not(feature = "storage-rocksdb"))]
fn open_store(db_path: Option<PathBuf>) -> Result<StoreBox> {
    if db_path.is_some() {
        tracing::warn!(
            "--db-path ignored: built without the storage-rocksdb feature, using memory"
        );
    }
    Ok(Arc::new(InMemoryStore::new()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    telemetry::init(&cli.log_level);

    let config = SaleConfig::load(cli.config.as_deref()).into_diagnostic()?;
    let store = open_store(cli.db_path)?;
    let runtime = SaleRuntime::new(config, Ports::with_store(store));
    runtime.start().await.into_diagnostic()?;

    // Process commands
    let file = File::open(cli.input).into_diagnostic()?;
    let reader = CommandReader::new(file);
    for (line, command) in reader.commands().enumerate() {
        match command {
            Ok(command) => {
                let reply = runtime.service.apply(command).await.into_diagnostic()?;
                if !reply.is_ok() {
                    eprintln!("Command {} refused: {}", line + 1, reply.msg_key);
                }
            }
            Err(e) => {
                eprintln!("Error reading command {}: {}", line + 1, e);
            }
        }
    }

    // Run close jobs that became due while processing
    runtime.worker().run_due().await.into_diagnostic()?;

    let wallets = runtime.wallets.all_wallets().await.into_diagnostic()?;
    let stdout = io::stdout();
    let mut writer = WalletWriter::new(stdout.lock());
    writer.write_wallets(wallets).into_diagnostic()?;

    Ok(())
}
