//! Standalone visualizer binary (headless renderer).
//!
//! Usage:
//!   cargo run -p traffic_client -- [--config client.json] [--url http://localhost:8585]
//!                                  [--period 5] [--frame-hz 60] [--frames N]
//!   cargo run -p traffic_client -- --export-wheel wheel.obj
//!
//! The client posts the configuration form, then polls the authority every
//! period and renders interpolated cars every frame. Without a GPU backend
//! the frames go to a recording renderer whose stats are logged.

use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::info;
use traffic_client::client::{ClientStatus, VisualizationClient};
use traffic_client::poller::{Poller, PollerSettings};
use traffic_shared::config::ClientConfig;
use traffic_shared::geometry::Mesh;
use traffic_shared::net::HttpTransport;
use traffic_shared::render::{EntityKind, RecordingRenderer};

struct Args {
    cfg: ClientConfig,
    frames: Option<u64>,
    export_wheel: Option<PathBuf>,
}

fn parse_args() -> anyhow::Result<Args> {
    let args: Vec<String> = env::args().collect();

    // The config file goes first so flags can override it.
    let mut cfg = match args.iter().position(|a| a == "--config") {
        Some(i) if i + 1 < args.len() => ClientConfig::load(&PathBuf::from(&args[i + 1]))?,
        _ => ClientConfig::default(),
    };

    let mut frames = None;
    let mut export_wheel = None;
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--url" if i + 1 < args.len() => {
                cfg.server_url = args[i + 1].clone();
                i += 2;
            }
            "--period" if i + 1 < args.len() => {
                cfg.poll_period_secs = args[i + 1].parse().context("parse --period")?;
                i += 2;
            }
            "--frame-hz" if i + 1 < args.len() => {
                cfg.frame_hz = args[i + 1].parse().context("parse --frame-hz")?;
                i += 2;
            }
            "--frames" if i + 1 < args.len() => {
                frames = Some(args[i + 1].parse().context("parse --frames")?);
                i += 2;
            }
            "--export-wheel" if i + 1 < args.len() => {
                export_wheel = Some(PathBuf::from(&args[i + 1]));
                i += 2;
            }
            _ => i += 1,
        }
    }
    cfg.validate().context("invalid configuration")?;
    Ok(Args {
        cfg,
        frames,
        export_wheel,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let Args {
        cfg,
        frames,
        export_wheel,
    } = parse_args()?;

    if let Some(path) = export_wheel {
        let body = &cfg.body;
        let wheel = Mesh::wheel(body.wheel_sides, body.wheel_radius, body.wheel_width);
        std::fs::write(&path, wheel.to_obj())
            .with_context(|| format!("write {}", path.display()))?;
        info!(path = %path.display(), triangles = wheel.triangle_count(), "Wheel exported");
        return Ok(());
    }

    info!(server = %cfg.server_url, period = cfg.poll_period_secs, frame_hz = cfg.frame_hz, "Starting client");

    let transport = Arc::new(
        HttpTransport::new(&cfg.server_url, cfg.request_timeout()?).context("create transport")?,
    );
    let settings = PollerSettings::try_from(&cfg)?;
    let (tx, mut rx) = mpsc::channel(64);
    let poller = Poller::new(transport, settings, tx).spawn();

    let mut client = VisualizationClient::with_vehicle(&cfg, RecordingRenderer::new());

    // Rendering waits only for the configuration exchange.
    if let Some(first) = rx.recv().await {
        client.handle_event(first);
    }
    if client.status() == ClientStatus::Halted {
        info!("Configuration failed; rendering last known state");
    }

    let frame_hz = cfg.frame_hz.max(1);
    let mut ticker = tokio::time::interval(Duration::from_secs_f32(1.0 / frame_hz as f32));
    let stats_every = u64::from(frame_hz) * 5;
    let mut last = Instant::now();

    loop {
        ticker.tick().await;

        while let Ok(event) = rx.try_recv() {
            client.handle_event(event);
        }

        let now = Instant::now();
        let drawn = client.frame((now - last).as_secs_f32());
        last = now;

        if client.frames() % stats_every == 0 {
            info!(
                frame = client.frames(),
                drawn,
                tracked = client.table().len(),
                progress = client.progress(),
                cars = client.render.live_of_kind(EntityKind::Car),
                props = client.scene().len(),
                "Frame stats"
            );
        }

        if frames.is_some_and(|n| client.frames() >= n) {
            break;
        }
    }

    poller.abort();
    info!(frames = client.frames(), spawned = client.render.spawned_total(), "Client stopped");
    Ok(())
}
