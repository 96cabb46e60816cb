mod core;
mod http;
mod media_controls;
mod mpv;
mod socket;
mod state;

use std::sync::Arc;
use std::time::Duration;

use jukebox_core::cache::{CacheKeyStrategy, PlaylistCache};
use jukebox_core::catalog::CatalogClient;
use jukebox_core::pipeline::{Pipeline, PipelineSettings};
use jukebox_core::store::FileStore;
use jukebox_proto::config::Config;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Debug, Clone)]
pub enum BroadcastMessage {
    StateUpdated,
    Log(String),
    /// A client command was rejected.
    Error(String),
}

/// Forwards WARN and ERROR events to connected socket clients.
struct BroadcastLayer {
    sender: broadcast::Sender<BroadcastMessage>,
}

impl<S> tracing_subscriber::Layer<S> for BroadcastLayer
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let level = event.metadata().level();
        if !matches!(*level, tracing::Level::WARN | tracing::Level::ERROR) {
            return;
        }

        let mut message = format!("{} [{}] ", chrono::Local::now().format("%H:%M:%S"), level);
        event.record(&mut MessageVisitor(&mut message));

        // No receivers is fine.
        let _ = self.sender.send(BroadcastMessage::Log(message));
    }
}

struct MessageVisitor<'a>(&'a mut String);

impl tracing::field::Visit for MessageVisitor<'_> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0.push_str(&format!("{:?}", value));
        } else {
            self.0.push_str(&format!(" {}={:?}", field.name(), value));
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (broadcast_tx, _) = broadcast::channel::<BroadcastMessage>(100);

    let data_dir = jukebox_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("daemon.log");
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(log_file)
                .with_ansi(false),
        )
        .with(BroadcastLayer {
            sender: broadcast_tx.clone(),
        })
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("info,jukebox_daemon=debug,jukebox_core=debug")
            }),
        )
        .init();

    info!("Log file: {:?}", log_path);

    let config = Config::load()?;
    info!("Config loaded from: {:?}", Config::config_path());

    let catalog = CatalogClient::from_config(&config.catalog)?;
    let cache = PlaylistCache::new(
        FileStore::new(&config.cache.file),
        CacheKeyStrategy::from(&config.cache),
        Duration::from_secs(config.cache.freshness_secs),
    );
    info!("Playlist cache: {:?}", config.cache.file);
    let pipeline = Arc::new(Pipeline::new(
        catalog.clone(),
        cache,
        PipelineSettings::from(&config.catalog),
    ));

    // Every external input funnels into DaemonCore through this channel.
    let (event_tx, event_rx) = tokio::sync::mpsc::channel::<core::DaemonEvent>(256);

    let output = mpv::MpvOutput::start(
        mpv::MpvDriver::new(config.player.default_volume),
        event_tx.clone(),
    );
    let daemon_core = core::DaemonCore::new(
        &config,
        pipeline,
        output,
        broadcast_tx.clone(),
        event_tx.clone(),
    );
    let state_manager = daemon_core.state_manager();

    let _socket_handle = socket::start_server(
        config.http.bind_address.clone(),
        jukebox_proto::platform::DAEMON_TCP_PORT,
        state_manager.clone(),
        event_tx.clone(),
        broadcast_tx.clone(),
    );

    if config.http.enabled {
        let _http_handle = http::start_server(
            config.http.bind_address.clone(),
            config.http.port,
            http::HttpState {
                state_manager: state_manager.clone(),
                event_tx: event_tx.clone(),
                catalog,
            },
        );
    }

    if config.player.media_controls {
        let _media_handle = media_controls::start(
            state_manager.clone(),
            event_tx.clone(),
            broadcast_tx.subscribe(),
        );
    }

    let shutdown_tx = event_tx.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                let _ = shutdown_tx.send(core::DaemonEvent::Shutdown).await;
            }
            Err(e) => warn!("Failed to listen for ctrl-c: {}", e),
        }
    });

    info!("Daemon initialised, running event loop");
    daemon_core.run(event_rx).await?;

    Ok(())
}
