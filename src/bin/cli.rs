//! offsetstore CLI
//!
//! Offline inspection of offset index files.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use offsetstore::{Config, OffsetIndex, Verifier};
use tracing_subscriber::{fmt, EnvFilter};

/// offsetstore CLI
#[derive(Parser, Debug)]
#[command(name = "offsetstore-cli")]
#[command(about = "Inspect and verify offset index files")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Scan a file and check framing, checksums and transaction order
    Verify {
        /// Index file to scan
        file: PathBuf,

        /// Recompute every frame checksum
        #[arg(short, long)]
        checksums: bool,
    },

    /// Open an index and print its statistics
    Stats {
        /// Data directory
        #[arg(short, long, default_value = "./offsetstore_data")]
        data_dir: PathBuf,

        /// Index file name inside the data directory
        #[arg(short, long, default_value = "offsets.oix")]
        file_name: String,
    },

    /// List every frame in a file
    Dump {
        /// Index file to list
        file: PathBuf,
    },
}

fn main() -> ExitCode {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,offsetstore=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    match args.command {
        Commands::Verify { file, checksums } => verify(file, checksums),
        Commands::Stats {
            data_dir,
            file_name,
        } => stats(data_dir, file_name),
        Commands::Dump { file } => dump(file),
    }
}

fn verify(file: PathBuf, checksums: bool) -> ExitCode {
    match Verifier::new(&file).checksums(checksums).scan() {
        Ok(report) => {
            println!("{}", report);
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(file = %file.display(), "verification failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn stats(data_dir: PathBuf, file_name: String) -> ExitCode {
    let config = Config::builder()
        .data_dir(data_dir)
        .file_name(file_name)
        .create_if_missing(false)
        .build();

    let index = match OffsetIndex::open(config) {
        Ok(index) => index,
        Err(e) => {
            tracing::error!("Failed to open index: {}", e);
            return ExitCode::FAILURE;
        }
    };

    println!("{}", index.stats());

    if let Err(e) = index.close() {
        tracing::error!("Failed to close index: {}", e);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

fn dump(file: PathBuf) -> ExitCode {
    println!(
        "{:>6} {:>12} {:>10} {:>6} {:>6} {:>10} {:>6} {:>12}",
        "seq", "offset", "length", "flags", "origin", "txn", "type", "part"
    );

    let result = Verifier::new(&file).checksums(false).scan_frames(|frame| {
        let kind = if frame.flags.is_fragment() {
            "frag".to_string()
        } else if frame.flags.is_marker() {
            "mark".to_string()
        } else {
            format!("{:#04x}", frame.flags.as_byte())
        };
        let (tag, part) = match frame.record {
            Some(prefix) => (prefix.type_tag.to_string(), prefix.id.to_string()),
            None => ("-".to_string(), "-".to_string()),
        };
        println!(
            "{:>6} {:>12} {:>10} {:>6} {:>6} {:>10} {:>6} {:>12}",
            frame.sequence,
            frame.location.offset,
            frame.location.length,
            kind,
            frame.origin,
            frame.txn,
            tag,
            part
        );
    });

    match result {
        Ok(report) => {
            if let Some(offset) = report.torn_tail {
                println!("torn tail at offset {}", offset);
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(file = %file.display(), "dump stopped: {}", e);
            ExitCode::FAILURE
        }
    }
}
