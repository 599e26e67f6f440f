use soundmaster_player::http;
use soundmaster_player::mpv::MpvEngine;
use soundmaster_player::preferences;
use soundmaster_player::{ControllerOptions, StreamController};
use soundmaster_proto::config::Config;
use soundmaster_proto::protocol::Broadcast;
use soundmaster_proto::state::{stream_sources, PreferenceStore};
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Forwards WARN and ERROR log lines to connected clients.
struct BroadcastLayer {
    sender: broadcast::Sender<Broadcast>,
}

impl BroadcastLayer {
    fn new(sender: broadcast::Sender<Broadcast>) -> Self {
        Self { sender }
    }
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

        // no receivers is fine
        let _ = self.sender.send(Broadcast::Log { message });
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
    // Broadcast channel first so logging can feed it
    let (broadcast_tx, _) = broadcast::channel::<Broadcast>(100);

    let data_dir = soundmaster_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("player.log");
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(BroadcastLayer::new(broadcast_tx.clone()))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,soundmaster_player=debug")),
        )
        .init();

    info!("Log file: {:?}", log_path);

    let config = Config::load()?;
    info!("Config loaded from: {:?}", Config::config_path());

    let sources = stream_sources(&config.streams)?;
    info!("{} stream sources, primary {}", sources.len(), config.streams.primary);

    let store = PreferenceStore::new(config.daemon.preferences_file.clone());
    let options = ControllerOptions::from_config(&config, sources).with_preferences(store.load());

    // All commands, session events and timer expiries funnel into the controller
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let controller = StreamController::new(MpvEngine::spawn(), options, broadcast_tx.clone(), event_tx)?;
    let handle = controller.handle();

    let _prefs_writer = preferences::spawn_writer(store, handle.subscribe());

    if config.http.enabled {
        let _http_handle = http::start_server(
            config.http.bind_address.clone(),
            config.http.port,
            handle.clone(),
        );
    }

    let shutdown = handle.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Interrupt received, shutting down"),
            Err(e) => warn!("Cannot listen for Ctrl-C: {}", e),
        }
        shutdown.shutdown();
    });

    info!("Player initialised, running event loop");
    controller.run(event_rx).await;

    Ok(())
}
