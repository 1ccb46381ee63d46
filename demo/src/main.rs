//! Vigil forensic ledger: demo CLI
//!
//! Opens a file-backed ledger and either drives a simulated page load
//! through the full pipeline or inspects what is already recorded.
//!
//! Usage:
//!   cargo run -p vigil-demo -- --key-hex <64 hex chars> scenario
//!   cargo run -p vigil-demo -- verify
//!   cargo run -p vigil-demo -- --key-hex <key> checkpoint
//!   cargo run -p vigil-demo -- export --stream network --mark
//!   cargo run -p vigil-demo -- --key-hex <key> show --stream network --from 1 --to 5 --reveal

mod config;
mod scenario;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use vigil_contracts::{
    error::{VigilError, VigilResult},
    record::{RecordRead, RevealedField, RevealedRead},
    stream::StreamId,
};
use vigil_crypto::{EncryptionKey, KeySlot};
use vigil_integrity::IntegrityChecker;
use vigil_ledger::{FileRecordStore, Ledger};

use crate::config::VigilConfig;

// ── CLI definition ────────────────────────────────────────────────────────────

/// Vigil: tamper-evident forensic ledger of browser network activity.
#[derive(Parser)]
#[command(
    name = "vigil",
    about = "Vigil forensic ledger demo",
    long_about = "Records network activity and tamper detections into hash-chained,\n\
                  partially encrypted streams and verifies them against checkpoints."
)]
struct Cli {
    /// TOML config file.  Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Ledger directory.  Overrides `[ledger] data_dir`.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// 32-byte ledger key as hex.  Needed to append and to reveal sealed fields.
    #[arg(long, global = true, env = "VIGIL_LEDGER_KEY", hide_env_values = true)]
    key_hex: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Record a simulated page load with tamper evidence, then checkpoint and verify.
    Scenario,
    /// Verify every stream's chain and its last checkpoint.
    Verify,
    /// Checkpoint every non-empty stream.
    Checkpoint,
    /// Print records appended since the last export as JSON lines.
    Export {
        #[arg(long)]
        stream: StreamId,
        /// Advance the export marker past the printed records.
        #[arg(long)]
        mark: bool,
    },
    /// Print a range of records as JSON lines.
    Show {
        #[arg(long)]
        stream: StreamId,
        #[arg(long, default_value_t = 1)]
        from: u64,
        /// Defaults to the stream head.
        #[arg(long)]
        to: Option<u64>,
        /// Open sealed fields.  Requires the key.
        #[arg(long)]
        reveal: bool,
    },
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() {
    // Initialize structured logging.  Set RUST_LOG=debug for verbose output.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("vigil error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> VigilResult<()> {
    let mut config = match &cli.config {
        Some(path) => VigilConfig::from_file(path)?,
        None => VigilConfig::default(),
    };
    if let Some(dir) = cli.data_dir {
        config.ledger.data_dir = dir;
    }

    let ledger = open_ledger(&config, cli.key_hex.as_deref())?;

    match cli.command {
        Command::Scenario => {
            print_banner();
            let outcome = scenario::run_scenario(ledger.clone(), &config)?;
            ledger.flush()?;
            if !outcome.report.is_clean() {
                return Err(first_finding(&outcome.report));
            }
            println!("Scenario completed.");
            Ok(())
        }
        Command::Verify => {
            let report = IntegrityChecker::new(ledger).verify_all()?;
            scenario::print_report(&report);
            if report.is_clean() {
                Ok(())
            } else {
                Err(first_finding(&report))
            }
        }
        Command::Checkpoint => {
            let recorded = IntegrityChecker::new(ledger.clone()).checkpoint_all()?;
            ledger.flush()?;
            for (stream, sequence) in &recorded {
                println!("{} -> integrity#{}", stream, sequence);
            }
            if recorded.is_empty() {
                println!("nothing to checkpoint");
            }
            Ok(())
        }
        Command::Export { stream, mark } => export(&ledger, stream, mark),
        Command::Show {
            stream,
            from,
            to,
            reveal,
        } => {
            let to = match to {
                Some(to) => to,
                None => ledger.record_count(stream)?,
            };
            show(&ledger, stream, from, to, reveal)
        }
    }
}

fn open_ledger(config: &VigilConfig, key_hex: Option<&str>) -> VigilResult<Arc<Ledger>> {
    let keys = match key_hex {
        Some(hex) => KeySlot::with_key(EncryptionKey::from_hex(hex)?),
        None => KeySlot::new(),
    };
    let store = FileRecordStore::open(&config.ledger.data_dir)?;
    let ledger = Ledger::open(Arc::new(store), Arc::new(keys))?;
    info!(dir = %config.ledger.data_dir.display(), "ledger opened");
    Ok(Arc::new(ledger))
}

fn first_finding(report: &vigil_integrity::IntegrityReport) -> VigilError {
    match report.findings.first() {
        Some(finding) => VigilError::IntegrityViolation {
            stream: finding.stream,
            sequence: finding.sequence.unwrap_or(0),
            reason: format!("{} finding(s); first: {}", report.findings.len(), finding.detail),
        },
        None => VigilError::ConfigError {
            reason: "report has no findings".to_string(),
        },
    }
}

// ── Output ────────────────────────────────────────────────────────────────────

fn export(ledger: &Ledger, stream: StreamId, mark: bool) -> VigilResult<()> {
    let reads = ledger.records_since_export(stream)?;
    let mut last = None;
    for read in &reads {
        print_read(read)?;
        last = Some(read.sequence());
    }
    match (mark, last) {
        (true, Some(sequence)) => {
            ledger.mark_exported(stream, sequence)?;
            ledger.flush()?;
            eprintln!("export marker for {} now at {}", stream, sequence);
        }
        (_, None) => eprintln!("no records since the last export of {}", stream),
        _ => {}
    }
    Ok(())
}

fn show(ledger: &Ledger, stream: StreamId, from: u64, to: u64, reveal: bool) -> VigilResult<()> {
    if !reveal {
        for read in ledger.read_range(stream, from, to)? {
            print_read(&read)?;
        }
        return Ok(());
    }

    for read in ledger.read_range_revealed(stream, from, to)? {
        match read {
            RevealedRead::Intact(revealed) => {
                println!("{}", serde_json::to_string(&revealed.record)?);
                for (name, field) in &revealed.fields {
                    match field {
                        RevealedField::Plain(value) => println!("  {} = {}", name, value),
                        RevealedField::Undecipherable { reason } => {
                            println!("  {} undecipherable: {}", name, reason)
                        }
                    }
                }
            }
            RevealedRead::Corrupt { sequence, reason } => {
                eprintln!("#{} CORRUPT: {}", sequence, reason)
            }
            RevealedRead::Missing { sequence } => eprintln!("#{} MISSING", sequence),
        }
    }
    Ok(())
}

fn print_read(read: &RecordRead) -> VigilResult<()> {
    match read {
        RecordRead::Intact(record) => println!("{}", serde_json::to_string(record)?),
        RecordRead::Corrupt { sequence, reason } => eprintln!("#{} CORRUPT: {}", sequence, reason),
        RecordRead::Missing { sequence } => eprintln!("#{} MISSING", sequence),
    }
    Ok(())
}

// ── Banner ────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("Vigil: Forensic Audit Ledger");
    println!("Page Load Demo");
    println!("============================");
    println!();
    println!("Per record:");
    println!("  [1] Sensitive fields sealed with XChaCha20-Poly1305 under the ledger key");
    println!("  [2] SHA-256 over the canonical record, chained to the stream's previous hash");
    println!("  [3] Durable write, then the stream head advances");
    println!("Per stream:");
    println!("  [4] Checkpoint: record count and Merkle root written to the integrity stream");
    println!("  [5] Verification: chain walk plus comparison with the last checkpoint");
    println!();
}
