use clap::Parser;
use miette::{IntoDiagnostic, Result};
use std::fs::File;
use std::io;
use std::path::PathBuf;
use tracing::info;
use walletcore::application::engine::{Storage, TransferEngine};
use walletcore::config::AppConfig;
use walletcore::interfaces::batch::apply_command;
use walletcore::interfaces::csv::command_reader::CommandReader;
use walletcore::interfaces::csv::wallet_writer::WalletWriter;
use walletcore::logging::init_logging;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input commands CSV file
    input: PathBuf,

    /// YAML configuration file. Built-in defaults are used when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[cfg(feature = "storage-rocksdb")]
    #[arg(long)]
    db_path: Option<PathBuf>,
}

fn storage(cli: &Cli) -> Result<Storage> {
    #[cfg(feature = "storage-rocksdb")]
    {
        if let Some(db_path) = &cli.db_path {
            return Storage::rocksdb(db_path).into_diagnostic();
        }
    }
    let _ = cli;
    Ok(Storage::in_memory())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AppConfig::load(path).into_diagnostic()?,
        None => AppConfig::default(),
    };
    init_logging(&config);

    let engine = TransferEngine::new(storage(&cli)?, &config);

    let file = File::open(&cli.input).into_diagnostic()?;
    let reader = CommandReader::new(file);
    let mut applied = 0usize;
    for (row, command) in reader.commands().enumerate() {
        match command {
            Ok(command) => match apply_command(&engine, command).await {
                Ok(()) => applied += 1,
                Err(e) => eprintln!("Error processing command {}: {}", row + 1, e),
            },
            Err(e) => eprintln!("Error reading command {}: {}", row + 1, e),
        }
    }
    info!(applied, "batch finished");

    let wallets = engine.wallets().get_all().await.into_diagnostic()?;
    let stdout = io::stdout();
    let mut writer = WalletWriter::new(stdout.lock());
    writer.write_wallets(&wallets).into_diagnostic()?;

    Ok(())
}
