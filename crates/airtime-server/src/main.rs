mod core;
mod external;
mod http;
mod ledger;
mod queue;
mod socket;
mod state;

use std::sync::Arc;

use airtime_proto::config::Config;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Fan-out notifications from the core loop to every push-socket subscriber.
#[derive(Debug, Clone)]
pub enum BroadcastMessage {
    StateUpdated,
    QueueUpdated,
    PendingNotesUpdated,
    Log(String),
}

/// A custom tracing layer that forwards log messages to the broadcast channel
struct BroadcastLayer {
    sender: broadcast::Sender<BroadcastMessage>,
}

impl BroadcastLayer {
    fn new(sender: broadcast::Sender<BroadcastMessage>) -> Self {
        Self { sender }
    }
}

impl<S> tracing_subscriber::Layer<S> for BroadcastLayer
where
    S: tracing::Subscriber,
{
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        // Only forward WARN and ERROR to clients to avoid clogging the channel
        let level = event.metadata().level();
        if !matches!(*level, tracing::Level::WARN | tracing::Level::ERROR) {
            return;
        }

        let mut message = String::new();

        let now = chrono::Local::now();
        message.push_str(&format!("{} ", now.format("%H:%M:%S")));
        message.push_str(&format!("[{}] ", level));

        let mut visitor = MessageVisitor(&mut message);
        event.record(&mut visitor);

        // Send to broadcast channel (ignore errors - no receivers is OK)
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
    // Setup broadcast channel first so we can use it for logging
    let (broadcast_tx, _) = broadcast::channel::<BroadcastMessage>(100);

    // Setup file logging + broadcast layer
    let data_dir = airtime_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("server.log");

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);

    let broadcast_layer = BroadcastLayer::new(broadcast_tx.clone());

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(broadcast_layer)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,airtime_server=debug")),
        )
        .init();

    info!("Log file: {:?}", log_path);

    let config = Config::load()?;
    info!("Config loaded from: {:?}", Config::config_path());

    // Event channel — all external inputs funnel into StationCore
    let (event_tx, event_rx) = tokio::sync::mpsc::channel::<core::StationEvent>(256);

    let state = state::StateManager::new(config.server.history_limit);
    let ledger = ledger::RewardLedger::load(
        config.server.ledger_file.clone(),
        config.rewards.clone(),
    );

    // External collaborators — development implementations; production
    // deployments wire in their own gateway and store here.
    let gateway: Arc<dyn external::PaymentGateway> = Arc::new(external::DevPaymentGateway);
    let clips_dir = data_dir.join("clips");
    let public_base = format!("http://{}:{}", config.http.bind_address, config.http.port);
    let clips: Arc<dyn external::ClipStore> = Arc::new(external::FsClipStore::new(
        clips_dir.clone(),
        public_base,
    ));

    let admission = Arc::new(queue::AdmissionControl::new(
        config.clone(),
        gateway.clone(),
        clips,
        state.clone(),
        ledger.clone(),
        event_tx.clone(),
    ));

    // Client list for subscriber counting
    let clients = Arc::new(tokio::sync::RwLock::new(Vec::<socket::ClientHandle>::new()));

    // Start TCP push socket
    let _socket_handle = socket::start_server(
        config.http.bind_address.clone(),
        airtime_proto::platform::SERVER_TCP_PORT,
        state.clone(),
        clients.clone(),
        event_tx.clone(),
        broadcast_tx.clone(),
    );

    // Start HTTP API if enabled
    if config.http.enabled {
        let _http_handle = http::start_server(
            config.http.bind_address.clone(),
            config.http.port,
            http::HttpDeps {
                state: state.clone(),
                ledger: ledger.clone(),
                admission: admission.clone(),
                gateway: gateway.clone(),
                event_tx: event_tx.clone(),
                clips_dir,
            },
        );
    }

    let station_core = core::StationCore::new(
        config,
        state,
        ledger,
        broadcast_tx.clone(),
        event_tx.clone(),
    );

    info!("Server initialised, running timeline loop");
    station_core.run(event_rx).await?;

    Ok(())
}
