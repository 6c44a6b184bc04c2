use crate::cli::RunArgs;
use crate::config::{BackendKind, Config};
use crate::orchestrator::EventKind;
use crate::output::write_reports;
use crate::service::{IntelligenceService, TripRequest};
use anyhow::Context;
use std::io::Write;
use tracing::{info, warn};

pub async fn execute(args: RunArgs) -> anyhow::Result<()> {
    info!("Loading config from {:?}", args.config);
    let mut config = Config::load_or_default(&args.config)?;

    // Apply CLI overrides
    if args.offline {
        config.backend.kind = BackendKind::Offline;
    }
    if let Some(max_iterations) = args.max_iterations {
        config.max_iterations = max_iterations;
    }
    if let Some(quality_threshold) = args.quality_threshold {
        config.quality_threshold = quality_threshold;
    }
    if let Some(concurrency) = args.concurrency {
        config.concurrency = concurrency;
    }
    if let Some(report_dir) = args.report_dir {
        config.report_dir = report_dir;
    }
    config.validate()?;

    let content = std::fs::read_to_string(&args.request)
        .with_context(|| format!("Failed to read request {:?}", args.request))?;
    // YAML parser also accepts JSON requests
    let request: TripRequest = serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse request {:?}", args.request))?;

    let service = IntelligenceService::from_config(config.clone());
    let started = service.start(request)?;
    let session_id = started.session_id;
    let memory = service.session_memory(&session_id)?;
    let mut events = started.events;

    info!(
        "Session {} started ({} backend)",
        session_id, config.backend.kind
    );

    let mut stdout = std::io::stdout();
    let mut terminal = None;
    let mut interrupted = false;
    loop {
        tokio::select! {
            frame = events.next_frame() => {
                let Some(frame) = frame else { break };
                writeln!(stdout, "{}", serde_json::to_string(&frame)?)?;
                stdout.flush()?;
                if let Some(event) = frame.event().filter(|e| e.is_terminal()) {
                    terminal = Some(event.kind.clone());
                }
            }
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                warn!("Interrupted, cancelling session {}", session_id);
                service.cancel(&session_id)?;
                interrupted = true;
            }
        }
    }

    match terminal {
        Some(EventKind::Done { .. }) => {}
        Some(EventKind::Cancelled { .. }) => anyhow::bail!("Session {} was cancelled", session_id),
        Some(EventKind::Error { message }) => anyhow::bail!("Run failed: {}", message),
        _ => anyhow::bail!("Event stream ended without a terminal event"),
    }

    if args.no_report {
        return Ok(());
    }

    let session = memory.session()?;
    let cities = memory.cities()?;
    let insights = memory.insights()?;
    write_reports(
        &config.report_dir,
        &session,
        &cities,
        insights.as_ref(),
        config.quality_threshold,
    )?;

    let below: Vec<_> = cities
        .iter()
        .filter(|c| c.quality < config.quality_threshold)
        .map(|c| c.city.id.as_str())
        .collect();
    if !below.is_empty() {
        warn!(
            "{} cities below quality threshold: {}",
            below.len(),
            below.join(", ")
        );
    }
    Ok(())
}
