/*
 *  main.rs
 *
 *  inkbeat - now playing, on paper
 *
 *  Wires the four workers together: button input feeds the command
 *  channel, the orchestrator feeds the render queue, the image
 *  pipeline feeds the frame queue, the display worker feeds the panel.
 *  Shutdown is cooperative via one cancellation token.
 */

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use env_logger::Env;
use log::{error, info, warn};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use inkbeat::artwork::ArtworkFetcher;
use inkbeat::buttons::{ButtonWorker, NullButtonSource};
use inkbeat::canvas::{Canvas, Fonts};
use inkbeat::config;
use inkbeat::evicting::EvictingQueue;
use inkbeat::orchestrator::PlaybackOrchestrator;
use inkbeat::pipeline::ImagePipeline;
use inkbeat::renderer::{DisplayWorker, LoggingDisplay};
use inkbeat::spotify::SpotifyClient;
use inkbeat::themecache::{DiskThemeStore, ThemeColourCache};
use inkbeat::transport::build_client;

include!(concat!(env!("OUT_DIR"), "/build_info.rs"));

/// Waits for SIGINT, SIGTERM, or SIGHUP.
async fn signal_handler() -> Result<()> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sighup = signal(SignalKind::hangup())?;

    tokio::select! {
        _ = sigint.recv() => {
            info!("SIGINT received. Initiating graceful shutdown.");
        }
        _ = sigterm.recv() => {
            info!("SIGTERM received. Initiating graceful shutdown.");
        }
        _ = sighup.recv() => {
            info!("SIGHUP received. Initiating graceful shutdown.");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = config::load()?;
    let settings = cfg.resolved();

    env_logger::Builder::from_env(Env::default().default_filter_or(settings.log_level.as_str()))
        .format_timestamp_secs()
        .init();

    info!("{} - now playing, on paper", env!("CARGO_PKG_NAME"));
    info!("v.{} built {}", env!("CARGO_PKG_VERSION"), BUILD_DATE);

    let Some(api_token) = settings.token.clone() else {
        bail!(
            "no Spotify token configured; set spotify.token, pass --token, or export {}",
            config::TOKEN_ENV_VAR
        );
    };

    let fonts = Fonts::load(&settings.fonts_dir)
        .with_context(|| format!("loading fonts from {}", settings.fonts_dir.display()))?;

    let disk_store = settings
        .theme_cache_dir
        .as_ref()
        .map(|dir| DiskThemeStore::new(dir.clone(), settings.theme_cache_limit));
    if let Some(dir) = &settings.theme_cache_dir {
        info!("theme colours persisted under {}", dir.display());
    }
    let themes = ThemeColourCache::new(disk_store);

    let canvas = Canvas::new(
        settings.resolution,
        settings.margin,
        fonts,
        ArtworkFetcher::new(build_client()),
        themes,
    );

    let requests = Arc::new(EvictingQueue::new(2));
    let frames = Arc::new(EvictingQueue::new(1));
    let (command_tx, command_rx) = mpsc::unbounded_channel();

    let provider = SpotifyClient::new(settings.base_url.clone(), api_token);
    let orchestrator = PlaybackOrchestrator::new(
        provider,
        command_rx,
        requests.clone(),
        settings.poll_interval,
    );
    let pipeline = ImagePipeline::new(canvas, requests, frames.clone());

    // Hardware panels plug in behind the EpaperDisplay trait; this build
    // ships the logging backend only.
    warn!("no panel backend wired in this build, frames go to the logging display");
    let display = DisplayWorker::new(LoggingDisplay, frames, settings.saturation);
    let buttons = ButtonWorker::new(NullButtonSource, command_tx);

    let shutdown = CancellationToken::new();
    let workers = vec![
        tokio::spawn(buttons.run(shutdown.child_token())),
        tokio::spawn(orchestrator.run(shutdown.child_token())),
        tokio::spawn(pipeline.run(shutdown.child_token())),
        tokio::spawn(display.run(shutdown.child_token())),
    ];

    signal_handler().await?;

    info!("stopping workers");
    shutdown.cancel();
    for worker in workers {
        if let Err(e) = worker.await {
            error!("worker ended abnormally: {e}");
        }
    }

    info!("inkbeat exiting");
    Ok(())
}
