mod controller;
mod core;
mod http;
mod media;
mod mpv;
mod socket;
mod stations;

use std::path::PathBuf;

use clap::Parser;
use lofi_proto::config::Config;
use lofi_proto::protocol::Broadcast;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Debug, Clone)]
pub enum BroadcastMessage {
    /// The published snapshot has a new revision.
    StateUpdated,
    /// A discrete event to forward to clients as-is.
    Notice(Broadcast),
    Log(String),
}

/// Lo-fi internet radio daemon.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Config file (default: ~/.config/lofi/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Look up mpv on PATH only
    #[arg(long)]
    use_system_mpv: bool,
}

/// A custom tracing layer that forwards log messages to the broadcast channel
struct BroadcastLayer {
    sender: broadcast::Sender<BroadcastMessage>,
}

impl<S> tracing_subscriber::Layer<S> for BroadcastLayer
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        // Only forward WARN and ERROR to clients to avoid clogging the channel
        let level = event.metadata().level();
        if !matches!(*level, tracing::Level::WARN | tracing::Level::ERROR) {
            return;
        }

        let mut message = format!("{} [{}] ", chrono::Local::now().format("%H:%M:%S"), level);
        let mut visitor = MessageVisitor(&mut message);
        event.record(&mut visitor);

        // No receivers is OK
        let _ = self.sender.send(BroadcastMessage::Log(message));
    }
}

struct MessageVisitor<'a>(&'a mut String);

impl<'a> tracing::field::Visit for MessageVisitor<'a> {
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
    let args = Args::parse();

    // Setup broadcast channel first so we can use it for logging
    let (broadcast_tx, _) = broadcast::channel::<BroadcastMessage>(100);

    let data_dir = lofi_proto::platform::data_dir();
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
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,lofi_daemon=debug")),
        )
        .init();

    info!("Log file: {:?}", log_path);

    let config_path = args.config.unwrap_or_else(Config::config_path);
    let config = Config::load_from(&config_path)?;
    info!("Config loaded from: {:?}", config_path);

    lofi_proto::platform::set_use_system_deps(args.use_system_mpv || config.mpv.use_system_binary);

    let registry = stations::load_registry(&config.stations).await;

    // Event channel: all external inputs funnel into DaemonCore
    let (event_tx, event_rx) = tokio::sync::mpsc::channel::<core::DaemonEvent>(256);

    let (media_tx, media_rx) = tokio::sync::mpsc::unbounded_channel();
    let initial_volume = f32::from(config.player.default_volume.min(100)) / 100.0;
    let media = mpv::MpvMedia::spawn(initial_volume, media_tx);
    core::forward_media_output(media_rx, event_tx.clone());

    let daemon_core = core::DaemonCore::new(
        registry,
        config.player.clone(),
        media,
        broadcast_tx.clone(),
    )?;
    let state_manager = daemon_core.state_manager();

    let listener = tokio::net::TcpListener::bind(lofi_proto::platform::daemon_address()).await?;
    socket::start_server(
        listener,
        state_manager.clone(),
        event_tx.clone(),
        broadcast_tx.clone(),
    );

    if config.http.enabled {
        http::start_server(
            config.http.bind_address.clone(),
            config.http.port,
            state_manager.clone(),
            event_tx.clone(),
        );
    }

    let shutdown_tx = event_tx.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received");
                let _ = shutdown_tx.send(core::DaemonEvent::Shutdown).await;
            }
            Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
        }
    });
    drop(event_tx);

    info!("Daemon initialised, running event loop");
    daemon_core.run(event_rx).await?;

    // Let the media sequencer stop mpv before the runtime goes away.
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    Ok(())
}
