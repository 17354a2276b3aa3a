use std::process::ExitCode;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use clap::Parser;
use log::{debug, error, info, warn};
use serde::Serialize;
use serde_json::json;
use tokio::sync::watch;

use prism::app::Services;
use prism::cli::{Cli, Commands};
use prism::config::{load_config, resolve_config_path, Config};
use prism::db::{report_repo, stats_repo};
use prism::logging::{self, LogFormat};
use prism::model::ReportSource;
use prism::notification::{NotifyHandler, NotifyJob};
use prism::watcher::ReadyFile;
use prism::PrismError;

const DRAIN_TIMEOUT: Duration = Duration::from_secs(120);

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let format = if cli.log_json { LogFormat::Json } else { LogFormat::Plain };
    logging::init(format, &cli.log_level);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn load(cli: &Cli) -> Result<Config, PrismError> {
    match resolve_config_path(cli.config.as_deref()) {
        Some(path) => {
            info!("Loading config from {}", path.display());
            Ok(load_config(&path)?)
        }
        None => {
            info!("No config file found, using defaults");
            Ok(Config::default())
        }
    }
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(e) => error!("Could not render output: {}", e),
    }
}

async fn run(cli: Cli) -> Result<(), PrismError> {
    let services = Services::build(load(&cli)?)?;

    match cli.command {
        Commands::Run => serve(&services).await,
        Commands::Process { file } => {
            let runner = services.start_queue()?;
            let analysis = services.process_file(&file).await;
            // Deliver the notifications the run queued.
            services.queue.wait_idle(DRAIN_TIMEOUT).await?;
            runner.shutdown().await;
            print_json(&analysis?);
            Ok(())
        }
        Commands::Batch { dir, timeout_secs } => {
            let reports = services.enqueue_directory(&dir)?;
            println!("Queued {} file(s) from {}", reports.len(), dir.display());

            let runner = services.start_queue()?;
            let drained = services
                .queue
                .wait_idle(Duration::from_secs(timeout_secs))
                .await?;
            runner.shutdown().await;
            if !drained {
                warn!("Queues not drained after {}s", timeout_secs);
            }

            let mut rows = Vec::with_capacity(reports.len());
            for report in &reports {
                if let Some(current) = report_repo::find_by_id(&services.db, &report.id)? {
                    rows.push(json!({
                        "id": current.id,
                        "filename": current.filename,
                        "status": current.status,
                        "error": current.error_message,
                    }));
                }
            }
            print_json(&rows);
            Ok(())
        }
        Commands::Webhook { payload } => {
            let body = std::fs::read(&payload).map_err(|e| prism::error::ExtractError::ReadDocument {
                path: payload.clone(),
                source: e,
            })?;
            let response = services.webhook.handle(&body);
            print_json(&response);
            Ok(())
        }
        Commands::Stats { days, tenant } => {
            let today = Utc::now().date_naive();
            let from = today - ChronoDuration::days(days.max(1) - 1);
            let usage = stats_repo::summary(
                &services.db,
                &from.format("%Y-%m-%d").to_string(),
                &today.format("%Y-%m-%d").to_string(),
                tenant.as_deref(),
            )?;
            print_json(&json!({
                "queue": services.queue.stats()?,
                "usage": usage,
            }));
            Ok(())
        }
        Commands::Digest { days } => {
            let handler = NotifyHandler::new(
                services.db.clone(),
                services.dispatcher.clone(),
                services.config.notifications.manual_review_hours,
            );
            let job = NotifyJob::Digest {
                window_days: days.unwrap_or(services.config.notifications.digest_window_days),
            };
            let report = handler.deliver(&job).await?;
            print_json(&report);
            Ok(())
        }
    }
}

/// Watches intake folders and runs the queue until Ctrl-C.
async fn serve(services: &Services) -> Result<(), PrismError> {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        let _ = shutdown_tx.send(true);
    }) {
        warn!("Could not install Ctrl-C handler: {}", e);
    }

    let runner = services.start_queue()?;
    let watcher = services.watcher()?;
    let folder = services.folder.clone();
    let watch_task = tokio::spawn(watcher.run(
        move |file: &ReadyFile| folder.submit(&file.path, ReportSource::Watch).map(|_| ()),
        shutdown_rx.clone(),
    ));

    let mut events = services.events.subscribe();
    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            event = events.recv() => {
                if let Ok(event) = event {
                    debug!(
                        "Report {} {:?} {}% {}",
                        event.report_id,
                        event.phase,
                        event.progress,
                        event.message
                    );
                }
            }
        }
    }

    match watch_task.await {
        Ok(Err(e)) => error!("Watcher stopped: {}", e),
        Err(e) => error!("Watcher task failed: {}", e),
        Ok(Ok(())) => {}
    }
    runner.shutdown().await;
    info!("Shut down cleanly");
    Ok(())
}
