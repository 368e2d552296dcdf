//! Command-line front end for the extension host.
//!
//! # Responsibility
//! - Inspect extension directories without starting a host application.
//! - Render load diagnostics as text or JSON.
//!
//! ## Commands
//!
//! - `ping`: verify core linkage
//! - `check`: discover, parse and resolve; print load order and problems
//! - `report`: run the full pipeline with no compiled-in entry points

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use exthost_core::{
    init_logging_from_config, DiagnosticEntry, DiagnosticKind, ExtensionHost, HostConfig,
};
use log::info;
use std::path::PathBuf;
use std::sync::Arc;

const CLI_DEFAULT_LOG_LEVEL: &str = "warn";

#[derive(Parser)]
#[command(name = "exthost")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Inspect and load extension directories", long_about = None)]
struct Cli {
    /// Host config file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level: trace|debug|info|warn|error
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Absolute directory for rotated log files (stderr when omitted)
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print core health check and version
    Ping,

    /// Resolve extensions and print load order and diagnostics
    Check {
        /// Extra search directories, scanned after the configured ones
        dirs: Vec<PathBuf>,
    },

    /// Run the load pipeline and print every diagnostics entry
    Report {
        /// Extra search directories, scanned after the configured ones
        dirs: Vec<PathBuf>,

        /// Emit entries as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    init_logging_from_config(&config.logging)
        .map_err(anyhow::Error::msg)
        .context("failed to initialize logging")?;
    info!(
        "event=cli_start module=cli status=ok search_paths={}",
        config.extensions.search_paths.len()
    );

    match cli.command {
        Commands::Ping => {
            println!("exthost_core ping={}", exthost_core::ping());
            println!("exthost_core version={}", exthost_core::core_version());
        }
        Commands::Check { .. } => check(&config),
        Commands::Report { json, .. } => report(&config, json)?,
    }
    Ok(())
}

fn load_config(cli: &Cli) -> Result<HostConfig> {
    let mut config = match &cli.config {
        Some(path) => HostConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => HostConfig::default(),
    };
    config.apply_env_overrides(|key| std::env::var(key).ok());

    if let Some(level) = &cli.log_level {
        config.logging.level = Some(level.clone());
    }
    if config.logging.level.is_none() {
        config.logging.level = Some(CLI_DEFAULT_LOG_LEVEL.to_string());
    }
    if let Some(dir) = &cli.log_dir {
        config.logging.dir = Some(dir.clone());
    }

    let extra_dirs = match &cli.command {
        Commands::Ping => &[][..],
        Commands::Check { dirs } | Commands::Report { dirs, .. } => dirs.as_slice(),
    };
    config
        .extensions
        .search_paths
        .extend(extra_dirs.iter().cloned());
    Ok(config)
}

fn check(config: &HostConfig) {
    let host = ExtensionHost::new(config.clone());
    let sources = host.discover_sources();
    let descriptors = host.load_metadata(&sources);
    let resolution = host.resolve(&descriptors);

    println!("discovered {} extension(s)", descriptors.len());
    println!("load order:");
    for (position, descriptor) in resolution.order.iter().enumerate() {
        println!(
            "  {}. {} {} ({})",
            position + 1,
            descriptor.name,
            descriptor.version,
            descriptor.origin
        );
    }
    if !resolution.excluded.is_empty() {
        println!("excluded:");
        for exclusion in &resolution.excluded {
            println!("  {}: {}", exclusion.descriptor.name, exclusion.reason);
        }
    }
    print_entries(&host.diagnostics().all(), |kind| {
        matches!(kind, DiagnosticKind::Metadata { .. })
    });
}

fn report(config: &HostConfig, json: bool) -> Result<()> {
    let host = ExtensionHost::new(config.clone());
    let supervisor = host.start();
    let entries = host.diagnostics().all();

    if json {
        let rendered =
            serde_json::to_string_pretty(&entries).context("failed to serialize diagnostics")?;
        println!("{rendered}");
        return Ok(());
    }

    println!("active: {}", supervisor.active_extensions().join(", "));
    print_entries(&entries, |_| true);
    let failed = host.diagnostics().failed_extensions();
    if !failed.is_empty() {
        println!("failed extensions:");
        for row in failed {
            println!(
                "  #{} {}: {}",
                row.seq,
                row.extension.as_deref().unwrap_or("<unknown>"),
                row.summary
            );
        }
    }
    Ok(())
}

fn print_entries(entries: &[Arc<DiagnosticEntry>], keep: impl Fn(&DiagnosticKind) -> bool) {
    let kept: Vec<&DiagnosticEntry> = entries
        .iter()
        .map(Arc::as_ref)
        .filter(|entry| keep(&entry.kind))
        .collect();
    if kept.is_empty() {
        return;
    }
    println!("diagnostics:");
    for entry in kept {
        let line = match &entry.kind {
            DiagnosticKind::Metadata { extension, issue } => format!("{extension}: {issue}"),
            DiagnosticKind::Cycle { members } => {
                format!("cycle: {}", members.join(" -> "))
            }
            DiagnosticKind::Load(record) => format!(
                "{} [{}]: {}",
                record.extension,
                record.kind().as_str(),
                record.summary
            ),
            DiagnosticKind::Runtime(fault) => fault.to_string(),
        };
        println!("  #{} {line}", entry.seq);
    }
}
