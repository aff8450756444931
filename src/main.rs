use anyhow::Result;
use clap::Parser;
use ddalab_playback::{create_loader, LoaderCore, LoaderEvent, LoaderEventKind, Schedule};
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cli;

use cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = match cli.verbose {
        0 => "ddalab_playback=info",
        1 => "ddalab_playback=debug",
        _ => "ddalab_playback=trace",
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = cli.command.into_config()?;
    let mut loader = create_loader(&config)?;
    register_handlers(&loader);

    info!("Starting {} playback ({})", loader.schedule().kind(), loader.id());
    loader.connect().await?;
    if let Some(timestamp) = cli.seek {
        loader.seek(timestamp).await;
    }

    let follows_live = matches!(loader.schedule(), Schedule::Live(_));
    let mut pumping = loader.schedule().uses_socket();
    let step = Duration::from_millis(cli.report_ms.max(1));
    let mut report = tokio::time::interval(step);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            alive = loader.pump(), if pumping => {
                if !alive {
                    pumping = false;
                    info!("Log session ended");
                }
            }
            _ = report.tick() => {
                log_frame(&loader);

                if !follows_live && cli.rate > 0.0 {
                    if let Some(now) = loader.current_time() {
                        loader.seek(now + step.as_secs_f64() * cli.rate).await;
                    }
                }
                if reached_end(&loader) {
                    info!("Reached end of log");
                    break;
                }
                if !pumping && !loader.is_open() {
                    break;
                }
            }
        }
    }

    loader.close();
    let stats = loader.stats();
    info!(
        "Received {} timeslices ({} stale), {} requests, {} chunks, {} reconnects, {} protocol errors",
        stats.timeslices_received,
        stats.stale_timeslices,
        stats.requests_issued,
        stats.chunks_fetched,
        stats.reconnects,
        stats.protocol_errors
    );
    let buffer = loader.buffer_stats();
    info!(
        "Buffer holds {} timeslices [{:?}, {:?}] under {:?}",
        buffer.timeslices_stored, buffer.oldest_timestamp, buffer.newest_timestamp, buffer.window
    );
    Ok(())
}

fn register_handlers(loader: &LoaderCore) {
    loader.on(LoaderEventKind::Ready, |event| {
        if let LoaderEvent::Ready(metadata) = event {
            info!(
                "Log ready: [{:?}, {:?}] with {} streams",
                metadata.start_time,
                metadata.end_time,
                metadata.streams.len()
            );
        }
    });
    loader.on(LoaderEventKind::Finish, |_| info!("Server finished sending data"));
    loader.on(LoaderEventKind::Error, |event| {
        if let LoaderEvent::Error(e) = event {
            warn!("Loader error: {}", e);
        }
    });
}

fn log_frame(loader: &LoaderCore) {
    let buffered: Vec<(f64, f64)> = loader
        .buffered_time_ranges()
        .iter()
        .map(|r| (r.start, r.end))
        .collect();

    match loader.current_frame() {
        Some(frame) => info!(
            "t={:.3} streams={} buffered={:?}",
            frame.timestamp,
            frame.streams.len(),
            buffered
        ),
        None => debug!(
            "No frame at {:?} (buffered={:?})",
            loader.current_time(),
            buffered
        ),
    }
}

fn reached_end(loader: &LoaderCore) -> bool {
    match (loader.current_time(), loader.log_end_time()) {
        (Some(now), Some(end)) => end.is_finite() && now >= end,
        _ => false,
    }
}
