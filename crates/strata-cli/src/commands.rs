//! Subcommand handlers.

use crate::Command;
use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use strata_core::{
    CancellationToken, ChecksumAlgorithm, ChecksumValidator, FormatDetector, HttpFetcher,
    ModelContext, ModelDescriptor, ModelSession,
};
use tracing::{info, warn};

pub async fn run(command: Command, root: PathBuf) -> Result<()> {
    match command {
        Command::Detect { path } => {
            let format = FormatDetector::new().detect(&path);
            print_json(&serde_json::json!({ "path": path, "format": format }))
        }
        Command::Checksum {
            path,
            algorithm,
            expected,
        } => checksum(&path, &algorithm, expected.as_deref()).await,
        Command::Validate { descriptor, path } => {
            let context = open(&root, false)?;
            let descriptor = read_descriptor(&descriptor)?;
            let verdict = context.validator.validate_model_async(&descriptor, &path).await?;
            print_json(&verdict)?;
            if !verdict.is_valid {
                bail!("{} failed validation", descriptor.id);
            }
            Ok(())
        }
        Command::Install {
            descriptor,
            from,
            replace,
        } => install(&root, &descriptor, from.as_deref(), replace).await,
        Command::Uninstall { model_id } => {
            let context = open(&root, false)?;
            let removed = context.installer.uninstall(&model_id)?;
            print_json(&serde_json::json!({ "id": model_id, "removed": removed }))
        }
        Command::List => {
            let context = open(&root, false)?;
            print_json(&context.installer.list_installed())
        }
        Command::Storage => {
            let context = open(&root, false)?;
            let info = context.analyzer.analyze()?;
            let alerts = context.alerts.evaluate(&info);
            print_json(&serde_json::json!({ "storage": info, "alerts": alerts }))
        }
        Command::Cleanup { target, full } => {
            let context = open(&root, false)?;
            let report = match target {
                Some(target) => context.cleaner.perform_automatic_cleanup(target, !full)?,
                None if full => context.cleaner.clear_cache()?,
                None => context.cleaner.cleanup_cache()?,
            };
            print_json(&report)
        }
        Command::Monitor { once } => monitor(&root, once).await,
    }
}

async fn checksum(path: &Path, algorithm: &str, expected: Option<&str>) -> Result<()> {
    let algorithm: ChecksumAlgorithm = serde_json::from_value(serde_json::Value::String(
        algorithm.to_ascii_lowercase(),
    ))
    .with_context(|| format!("Unknown checksum algorithm: {}", algorithm))?;

    let digest = ChecksumValidator::new()
        .calculate_async(path, algorithm, None, None)
        .await?;
    let matches = expected.map(|e| strata_core::validation::digests_match(&digest, e));
    print_json(&serde_json::json!({
        "path": path,
        "algorithm": algorithm,
        "digest": digest,
        "matches": matches,
    }))?;
    if matches == Some(false) {
        bail!("Checksum mismatch");
    }
    Ok(())
}

async fn install(root: &Path, descriptor: &Path, from: Option<&Path>, replace: bool) -> Result<()> {
    let context = open(root, true)?;
    let descriptor = read_descriptor(descriptor)?;
    let session = ModelSession::new(descriptor, context);
    session.discover()?;

    let verdict = match from {
        Some(source) => session.adopt_local(source).await,
        None => {
            let token = CancellationToken::new();
            let cancel = token.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupted, keeping partial download");
                    cancel.cancel();
                }
            });

            session
                .download(Arc::new(HttpFetcher::new()?), &token, None)
                .await?;
            session.extract()?;
            session.install_and_validate(replace).await
        }
    };

    match verdict {
        Ok(verdict) => {
            info!(model_id = %session.descriptor().id, state = %session.state(), "Installed");
            print_json(&verdict)
        }
        Err(e) => {
            if let Some(verdict) = session.last_verdict() {
                print_json(&verdict)?;
            }
            Err(e.into())
        }
    }
}

async fn monitor(root: &Path, once: bool) -> Result<()> {
    let context = open(root, true)?;
    let monitor = Arc::new(context.storage_monitor());
    context.alerts.subscribe(|alert| warn!(severity = ?alert.severity, "{}", alert.message));

    if once {
        let tick = monitor.run_once().await?;
        return print_json(&serde_json::json!({
            "storage": tick.info.as_ref(),
            "alerts": tick.alerts.iter().map(|d| &d.alert).collect::<Vec<_>>(),
            "cleanup": tick.cleanup,
        }));
    }

    let token = CancellationToken::new();
    let handle = Arc::clone(&monitor).spawn(token.clone());
    tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl-C")?;
    info!("Stopping monitor");
    token.cancel();
    handle.await.context("Monitor task panicked")?;
    Ok(())
}

fn open(root: &Path, create: bool) -> Result<Arc<ModelContext>> {
    let context = ModelContext::builder(root)
        .auto_create_dirs(create)
        .build()
        .with_context(|| format!("Failed to open storage root {}", root.display()))?;
    Ok(Arc::new(context))
}

fn read_descriptor(path: &Path) -> Result<ModelDescriptor> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read descriptor {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Invalid descriptor {}", path.display()))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
