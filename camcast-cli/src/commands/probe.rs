//! Probe command - pull GOP-paced units and print their timing

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use camcast_core::{ConsumerId, StreamController};
use clap::Args;
use tokio::signal;
use tracing::{error, info};

use super::{open_capture, ConfigSource};

/// Arguments for the probe command
#[derive(Args)]
pub struct ProbeArgs {
    /// Stop after this many units (0 = until Ctrl+C)
    #[arg(short = 'n', long, default_value = "0")]
    count: u64,

    /// Largest unit the simulated consumer accepts, in bytes
    #[arg(long, default_value = "1048576")]
    max_size: usize,
}

/// Totals reported when probing ends
#[derive(Debug, Default)]
struct ProbeSummary {
    units: u64,
    bytes: u64,
    truncated: u64,
}

/// Attach as a consumer and print every delivered unit
pub async fn probe(source: &ConfigSource, args: ProbeArgs) -> Result<()> {
    let config = source.load()?;
    let stop = Arc::new(AtomicBool::new(false));

    println!("Probing {}", config.device.display());
    println!("Press Ctrl+C to stop...\n");

    let worker_stop = Arc::clone(&stop);
    let mut worker = tokio::task::spawn_blocking(move || run(config, args, &worker_stop));

    let summary = tokio::select! {
        result = &mut worker => result.context("Probe task panicked")??,
        _ = signal::ctrl_c() => {
            println!("\nReceived interrupt signal...");
            stop.store(true, Ordering::SeqCst);
            worker.await.context("Probe task panicked")??
        }
    };

    println!();
    println!(
        "Delivered {} units, {} bytes ({} bytes truncated)",
        summary.units, summary.bytes, summary.truncated
    );
    Ok(())
}

fn run(
    config: camcast_core::CaptureConfig,
    args: ProbeArgs,
    stop: &AtomicBool,
) -> Result<ProbeSummary> {
    let (capture, _report) = open_capture(config)?;
    let mut controller = StreamController::new(capture);
    let consumer = ConsumerId::new(1);

    controller.attach(consumer)?;
    info!("{} attached", consumer);

    let mut summary = ProbeSummary::default();
    let mut start = None;

    while !stop.load(Ordering::SeqCst) && (args.count == 0 || summary.units < args.count) {
        let unit = match controller.pull_next_unit(consumer, args.max_size) {
            Ok(Some(unit)) => unit,
            Ok(None) => {
                println!("End of stream");
                break;
            }
            Err(e) => {
                error!("Delivery failed: {}", e);
                if let Some(hint) = e.user_hint() {
                    eprintln!("Hint: {}", hint);
                }
                break;
            }
        };

        let pts = unit.presentation_micros();
        let first = *start.get_or_insert(pts);
        println!(
            "{:>6}  {:<4} {:>8} bytes  pts +{:>10} us  dur {:>6} us{}",
            summary.units,
            unit.nal_type.name(),
            unit.data.len(),
            pts.saturating_sub(first),
            unit.duration_micros(),
            if unit.truncated > 0 {
                format!("  (truncated {} bytes)", unit.truncated)
            } else {
                String::new()
            }
        );

        summary.units += 1;
        summary.bytes += unit.data.len() as u64;
        summary.truncated += unit.truncated as u64;
    }

    controller.detach(consumer);
    Ok(summary)
}
