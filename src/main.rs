use std::fs::OpenOptions;
use std::io::{Seek, Write};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{info, warn};

mod config;
mod core;
mod playback;
mod render;
mod services;
mod upnp;

use crate::config::{DisplayConfig, FontPaths, OutputMode};
use crate::core::player::{Player, PlayerEvent};
use crate::render::fonts::Fonts;
use crate::render::renderer::Renderer;
use crate::render::sink::{DisplaySink, PngSnapshot};
use crate::services::artwork::HttpArtworkFetcher;
use crate::services::idle_clock::{IdleClockDriver, IDLE_PERIOD};
use crate::upnp::device::DeviceDescription;
use crate::upnp::gena::GenaClient;
use crate::upnp::notify::NotifyListener;
use crate::upnp::subscription::SubscriptionManager;

/// Upper bound on the UNSUBSCRIBE round at exit
const UNSUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "wiim-display", about = "Now-playing display for UPnP media renderers")]
struct Args {
    /// Device description URL of the renderer
    #[arg(short, long, default_value = "http://192.168.68.112:49152/description.xml")]
    device: String,

    /// Service to subscribe to (repeatable; `*` for every service)
    #[arg(short, long = "service", default_value = "AVTransport")]
    services: Vec<String>,

    /// Framebuffer device
    #[arg(long, default_value = "/dev/fb0")]
    framebuffer: String,

    /// Framebuffer width in pixels
    #[arg(long, default_value_t = 480)]
    width: u32,

    /// Framebuffer height in pixels
    #[arg(long, default_value_t = 320)]
    height: u32,

    /// Output mode: framebuffer, png
    #[arg(long, default_value = "framebuffer")]
    output: String,

    /// Output file path (for png mode)
    #[arg(long, default_value = "frame.png")]
    output_path: String,

    /// Font for the track title
    #[arg(long, default_value = "/usr/share/fonts/truetype/dejavu/DejaVuSans-Bold.ttf")]
    title_font: String,

    /// Font for artist and album
    #[arg(long, default_value = "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf")]
    body_font: String,

    /// Font for the clock
    #[arg(long, default_value = "/usr/share/fonts/truetype/dejavu/DejaVuSansMono.ttf")]
    clock_font: String,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn into_config(self) -> Result<DisplayConfig> {
        Ok(DisplayConfig {
            output_mode: self.output.parse().map_err(anyhow::Error::msg)?,
            device_url: self.device,
            services: self.services,
            framebuffer: self.framebuffer.into(),
            width: self.width,
            height: self.height,
            output_path: self.output_path.into(),
            fonts: FontPaths {
                title: self.title_font.into(),
                body: self.body_font.into(),
                clock: self.clock_font.into(),
            },
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.parse().unwrap_or_default()),
        )
        .init();

    let config = args.into_config()?;
    config.validate().context("Invalid display configuration")?;

    info!(
        "wiim-display v{} starting ({}x{}, {:?} output)",
        env!("CARGO_PKG_VERSION"),
        config.width,
        config.height,
        config.output_mode
    );

    // Everything that can make the configuration unusable is checked before
    // the first pixel is drawn or the first SUBSCRIBE is sent.
    let gena = GenaClient::new().context("Failed to build HTTP client")?;
    let device = DeviceDescription::fetch(gena.http(), &config.device_url)
        .await
        .with_context(|| format!("Failed to load device description {}", config.device_url))?;
    let manager = SubscriptionManager::resolve(gena, &device, &config.services)
        .context("Failed to resolve requested services")?;

    match config.output_mode {
        OutputMode::Framebuffer => {
            let framebuffer = OpenOptions::new()
                .write(true)
                .open(&config.framebuffer)
                .with_context(|| {
                    format!("Failed to open framebuffer {}", config.framebuffer.display())
                })?;
            run(&config, framebuffer, manager).await
        }
        OutputMode::Png => {
            let snapshot =
                PngSnapshot::new(config.width, config.height, config.output_path.clone());
            run(&config, snapshot, manager).await
        }
    }
}

async fn run<W>(
    config: &DisplayConfig,
    device: W,
    mut manager: SubscriptionManager<GenaClient>,
) -> Result<()>
where
    W: Write + Seek + Send + 'static,
{
    let sink = DisplaySink::new(device, config.width, config.height);
    let renderer = Renderer::new(sink, Fonts::load(&config.fonts));
    let fetcher = HttpArtworkFetcher::new().context("Failed to build artwork client")?;

    let (events_tx, events_rx) = mpsc::channel(64);
    let mut player = Player::new(renderer, fetcher, events_tx.clone());
    player.start();

    let mut listener = NotifyListener::bind("0.0.0.0:0")
        .await
        .context("Failed to bind NOTIFY listener")?;
    for session in manager.sessions() {
        listener.route(&session.callback_path, &session.service.service_id);
    }
    let callback_base = listener
        .callback_base(&config.device_url)
        .context("Failed to determine callback address")?;

    let listener_handle = tokio::spawn(listener.run(events_tx.clone()));
    let player_handle = tokio::spawn(player.run(events_rx));

    manager.subscribe_all(&callback_base).await;

    IdleClockDriver::new(IDLE_PERIOD)
        .run(&mut manager, events_tx.clone(), shutdown_signal())
        .await;

    info!("Shutting down");
    manager.unsubscribe_all(UNSUBSCRIBE_TIMEOUT).await;
    listener_handle.abort();
    let _ = events_tx.send(PlayerEvent::Shutdown).await;
    if let Err(e) = player_handle.await {
        warn!("Player task ended abnormally: {}", e);
    }

    info!("wiim-display shutdown");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("SIGINT received"),
        _ = terminate => info!("SIGTERM received"),
    }
}
