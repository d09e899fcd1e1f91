// src/lib.rs

pub mod api;
pub mod broadcast;
pub mod cli;
pub mod clock;
pub mod config;
pub mod engine;
pub mod errors;
pub mod event;
pub mod fs;
pub mod logging;
pub mod store;
pub mod types;
pub mod watch;

use anyhow::Result;
use tracing::{debug, info};

use crate::cli::CliArgs;
use crate::config::model::ConfigFile;
use crate::config::{load_and_validate, resolve_config_path};
use crate::engine::{ServiceSummary, Supervisor};
use crate::types::RunMode;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config resolution, loading and validation
/// - logging (the config may carry a `log_level`)
/// - the supervisor in continuous or `--once` mode
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = resolve_config_path(args.config.as_deref());
    let cfg = load_and_validate(&config_path)?;

    logging::init_logging(args.log_level, cfg.log_level.as_deref())?;
    info!(config = %config_path.display(), directories = cfg.directories.len(), "configuration loaded");

    if args.dry_run {
        print_dry_run(&cfg);
        return Ok(());
    }

    let mode = if args.once {
        RunMode::Once
    } else {
        RunMode::Continuous
    };

    let summary = Supervisor::new(cfg).run(mode).await?;
    log_summary(&summary);
    Ok(())
}

fn log_summary(summary: &ServiceSummary) {
    for (root, stats) in &summary.watchers {
        info!(
            root = %root,
            cycles = stats.cycles,
            emitted = stats.emitted,
            suppressed = stats.suppressed,
            skipped = stats.skipped_entries,
            backend_failures = stats.backend_failures,
            "watcher finished"
        );
    }
    info!(
        batches = summary.writer.batches,
        events = summary.writer.events,
        max_batch = summary.writer.max_batch,
        queue_dropped = summary.queue.dropped,
        failed_watchers = summary.failed_watchers,
        drain_timed_out = summary.drain_timed_out,
        "service stopped"
    );
}

/// Simple dry-run output: print store settings and the effective targets.
fn print_dry_run(cfg: &ConfigFile) {
    println!("crm-file-events dry-run");
    println!("  database.path = {}", cfg.database.path.display());
    if let Some(days) = cfg.database.retention_days {
        println!("  database.retention_days = {days}");
    }
    println!(
        "  service.poll_interval = {:?}",
        cfg.service.poll_interval
    );
    println!(
        "  service.max_events_per_batch = {}",
        cfg.service.max_events_per_batch
    );
    println!(
        "  service.ingest_queue_capacity = {} ({:?})",
        cfg.service.ingest_queue_capacity, cfg.service.overflow_policy
    );
    println!();

    println!("directories ({}):", cfg.directories.len());
    for target in &cfg.directories {
        println!("  - {}", target.path.display());
        println!("      backend: {}", target.backend.as_str());
        if let Some(ref project) = target.project {
            println!("      project: {project}");
        }
        if let Some(ref username) = target.username {
            println!("      username: {username}");
        }
        if !target.include.is_empty() {
            println!("      include: {:?}", target.include);
        }
        if !target.exclude.is_empty() {
            println!("      exclude: {:?}", target.exclude);
        }
        if target.min_file_size.is_some() || target.max_file_size.is_some() {
            println!(
                "      size: {:?}..={:?}",
                target.min_file_size, target.max_file_size
            );
        }
        if target.compute_checksum {
            println!("      checksum: {}", target.checksum_algorithm);
        }
        if !target.recursive {
            println!("      recursive: false");
        }
        if target.emit_on_start {
            println!("      emit_on_start: true");
        }
        if !target.metadata.is_empty() {
            let rendered: Vec<String> = target
                .metadata
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect();
            println!("      metadata: {}", rendered.join(", "));
        }
    }

    debug!("dry-run complete (nothing watched)");
}
