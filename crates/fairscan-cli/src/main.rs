//! Command-line interface for fairscan.
//!
//! Lists FairPlay-encrypted Mach-O binaries of an app bundle or IPA,
//! grouped by the main executable of the bundle that contains them.

use anyhow::{Context, Result};
use clap::Parser;
use fairscan::{scan_ipa, BundleScanner, EncryptionInfo, Report, ScanOptions};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fairscan", version)]
#[command(about = "Find encrypted binaries in iOS and macOS app bundles")]
struct Cli {
    /// Input app bundle directory or IPA file
    input: PathBuf,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,

    /// Inspect files on all CPU cores
    #[arg(long)]
    parallel: bool,

    /// Do not follow symbolic links inside the bundle
    #[arg(long)]
    no_follow_links: bool,

    /// Plugin bundle suffix under PlugIns/ (repeatable, default: .appex)
    #[arg(long = "plugin-suffix", value_name = "SUFFIX")]
    plugin_suffixes: Vec<String>,

    /// Verbose logging (same as RUST_LOG=debug)
    #[arg(short, long)]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut options = ScanOptions {
        follow_links: !cli.no_follow_links,
        parallel: cli.parallel,
        ..ScanOptions::default()
    };
    if !cli.plugin_suffixes.is_empty() {
        options.plugin_suffixes = cli.plugin_suffixes.clone();
    }

    let is_ipa = cli
        .input
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("ipa"));

    let result = if is_ipa {
        scan_ipa(&cli.input, options)
    } else {
        BundleScanner::new(&cli.input).options(options).scan()
    };
    let report = result.with_context(|| format!("failed to scan {}", cli.input.display()))?;

    info!(bundles = report.len(), "scan finished");

    if cli.json {
        let json = serde_json::to_string_pretty(&report).context("failed to encode report")?;
        println!("{json}");
    } else {
        print_report(&report);
    }

    Ok(())
}

fn print_report(report: &Report<EncryptionInfo>) {
    if report.is_empty() {
        println!("No encrypted binaries found");
        return;
    }

    for (main_executable, files) in report {
        println!("{main_executable}");
        if files.is_empty() {
            println!("  (no other encrypted binaries)");
        }
        for file in files {
            let info = &file.info;
            let state = if info.is_encrypted() { "encrypted" } else { "decrypted" };
            println!(
                "  {}  cryptid={} offset={:#x} size={:#x} ({state})",
                file.path, info.cryptid, info.cryptoff, info.cryptsize
            );
        }
    }
}
