use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use colored::Colorize;

use cask_store::{BlobStore, BlobStoreRegistry, CancelToken, QuotaService, StoreCatalog};
use cask_tasks::{CompactionConfig, CompactionTask, StoreOutcome};

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Check(_) => cmd_check(&cli.catalog, &cli.format),
        Command::Info(args) => cmd_info(&cli.catalog, &cli.format, args),
        Command::Quota(args) => cmd_quota(&cli.catalog, &cli.format, args),
        Command::Compact(args) => cmd_compact(&cli.catalog, &cli.format, args),
    }
}

fn load_catalog(path: &str) -> anyhow::Result<StoreCatalog> {
    StoreCatalog::load(Path::new(path)).with_context(|| format!("reading catalog {path}"))
}

fn open_registry(path: &str) -> anyhow::Result<BlobStoreRegistry> {
    let catalog = load_catalog(path)?;
    BlobStoreRegistry::from_catalog(&catalog).with_context(|| format!("starting stores from {path}"))
}

fn selected(
    registry: &BlobStoreRegistry,
    store: &Option<String>,
) -> anyhow::Result<Vec<Arc<dyn BlobStore>>> {
    match store {
        Some(name) => Ok(vec![registry
            .get(name)
            .with_context(|| format!("no store named {name:?}"))?]),
        None => Ok(registry.all()),
    }
}

fn cmd_check(catalog: &str, format: &OutputFormat) -> anyhow::Result<()> {
    let parsed = load_catalog(catalog)?;
    if *format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&parsed)?);
        return Ok(());
    }
    println!(
        "{} catalog {} is valid ({} stores)",
        "✓".green().bold(),
        catalog.bold(),
        parsed.stores.len()
    );
    for store in &parsed.stores {
        println!("  {} ({})", store.name.yellow(), store.store_type);
    }
    Ok(())
}

fn cmd_info(catalog: &str, format: &OutputFormat, args: InfoArgs) -> anyhow::Result<()> {
    let registry = open_registry(catalog)?;
    let stores = selected(&registry, &args.store)?;

    if *format == OutputFormat::Json {
        let entries: Vec<_> = stores
            .iter()
            .map(|s| {
                serde_json::json!({
                    "name": s.name(),
                    "type": s.configuration().store_type.as_str(),
                    "usage": s.usage(),
                    "operations": s.operation_metrics(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    for store in stores {
        let usage = store.usage();
        let ops = store.operation_metrics();
        println!("{} ({})", store.name().yellow().bold(), store.configuration().store_type);
        println!("  blobs: {}   bytes: {}", usage.blob_count, usage.total_bytes);
        println!(
            "  uploads: {} ({} bytes)   downloads: {} ({} bytes)",
            ops.upload_count, ops.upload_bytes, ops.download_count, ops.download_bytes
        );
    }
    Ok(())
}

fn cmd_quota(catalog: &str, format: &OutputFormat, args: QuotaArgs) -> anyhow::Result<()> {
    let registry = open_registry(catalog)?;
    let stores = selected(&registry, &args.store)?;
    let quota = QuotaService::new();

    if *format == OutputFormat::Json {
        let entries: Vec<_> = stores
            .iter()
            .map(|s| {
                serde_json::json!({
                    "name": s.name(),
                    "quota": quota.check(s.as_ref()),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    for store in stores {
        match quota.check(store.as_ref()) {
            None => println!("{}: no quota configured", store.name().yellow()),
            Some(result) if result.violated => {
                println!("{}: {} {}", store.name().yellow(), "VIOLATED".red().bold(), result.message)
            }
            Some(result) => {
                println!("{}: {} {}", store.name().yellow(), "ok".green(), result.message)
            }
        }
    }
    Ok(())
}

fn cmd_compact(catalog: &str, format: &OutputFormat, args: CompactArgs) -> anyhow::Result<()> {
    let registry = Arc::new(open_registry(catalog)?);
    let task = CompactionTask::new(Arc::clone(&registry)).with_quota(QuotaService::new());
    let config = match &args.store {
        Some(name) => CompactionConfig::for_store(name.clone()),
        None => CompactionConfig::all(),
    }
    .with_blobs_older_than_days(args.older_than_days);

    let report = task.run(&config, &CancelToken::new())?;

    if *format == OutputFormat::Json {
        let entries: Vec<_> = report
            .outcomes
            .iter()
            .map(|r| {
                let (status, detail) = match &r.outcome {
                    StoreOutcome::Compacted { removed } => ("compacted", removed.to_string()),
                    StoreOutcome::Conflict { task_id } => ("conflict", task_id.clone()),
                    StoreOutcome::Skipped { reason } => ("skipped", reason.clone()),
                    StoreOutcome::Failed(err) => ("failed", err.to_string()),
                };
                serde_json::json!({ "store": r.store.as_str(), "status": status, "detail": detail })
            })
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "total_removed": report.total_removed(),
                "stores": entries,
            }))?
        );
        return Ok(());
    }

    for outcome in &report.outcomes {
        match &outcome.outcome {
            StoreOutcome::Compacted { removed } => {
                println!("{} {}: removed {removed} blobs", "✓".green(), outcome.store.yellow())
            }
            StoreOutcome::Conflict { task_id } => println!(
                "{} {}: conflicting move task {task_id}",
                "✗".red(),
                outcome.store.yellow()
            ),
            StoreOutcome::Skipped { reason } => {
                println!("- {}: skipped ({reason})", outcome.store.yellow())
            }
            StoreOutcome::Failed(err) => {
                println!("{} {}: {err}", "✗".red(), outcome.store.yellow())
            }
        }
    }
    println!("{} blobs removed in total", report.total_removed());
    Ok(())
}
