//! smith-probe: standalone probe host for exercising an agent.
//!
//! Connects with the environment-derived client configuration, logs every
//! policy the agent pushes and reports the applied policy uuids back in a
//! periodic heartbeat. Runs until ctrl-c.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use smith_client::{
    BlockConfig, Client, ClientConfig, FilterConfig, Heartbeat, LimitConfig, MessageHandler,
    Operate, PatchConfig,
};

const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);

/// Initialize tracing with SMITH_LOG and LOG_FORMAT support.
fn init_tracing() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match std::env::var("SMITH_LOG").as_deref() {
            Ok("trace") => "trace",
            Ok("debug") => "debug",
            Ok("warn") | Ok("warning") => "warn",
            Ok("error") => "error",
            _ => "info",
        };
        EnvFilter::new(format!("smith_client={level},smith_probe={level}"))
    };

    let use_json = std::env::var("LOG_FORMAT").as_deref() == Ok("json");

    if use_json {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    }
}

fn heartbeat_interval() -> Duration {
    std::env::var("SMITH_HEARTBEAT_SECS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_HEARTBEAT_INTERVAL)
}

/// Logs agent policies and remembers which ones are applied.
#[derive(Default)]
struct PolicyLog {
    applied: Mutex<Heartbeat>,
}

impl PolicyLog {
    fn heartbeat(&self) -> Heartbeat {
        self.applied
            .lock()
            .map(|applied| applied.clone())
            .unwrap_or_default()
    }

    fn apply(&self, update: impl FnOnce(&mut Heartbeat)) {
        if let Ok(mut applied) = self.applied.lock() {
            update(&mut applied);
        }
    }
}

impl MessageHandler for PolicyLog {
    fn on_config(&self, config: String) {
        info!(%config, "Agent config");
    }

    fn on_control(&self, action: i32) {
        info!(action, "Agent control");
    }

    fn on_detect(&self) {
        info!("Agent requested detection");
    }

    fn on_filter(&self, config: FilterConfig) {
        info!(uuid = %config.uuid, filters = config.filters.len(), "Applying filter policy");
        self.apply(|hb| hb.filter = config.uuid);
    }

    fn on_block(&self, config: BlockConfig) {
        info!(uuid = %config.uuid, blocks = config.blocks.len(), "Applying block policy");
        self.apply(|hb| hb.block = config.uuid);
    }

    fn on_limit(&self, config: LimitConfig) {
        info!(uuid = %config.uuid, limits = config.limits.len(), "Applying limit policy");
        self.apply(|hb| hb.limit = config.uuid);
    }

    fn on_patch(&self, config: PatchConfig) {
        info!(uuid = %config.uuid, patches = config.patches.len(), "Applying patch policy");
        self.apply(|hb| hb.patch = config.uuid);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    info!("smith-probe {}", env!("CARGO_PKG_VERSION"));

    let config = ClientConfig::from_env();
    info!(
        socket = %config.socket_path.display(),
        mailbox_dir = %config.mailbox_dir.display(),
        pid = config.pid,
        "Probe configuration"
    );

    let policies = Arc::new(PolicyLog::default());
    let client = Client::new(config, Arc::clone(&policies));
    client.spawn();

    let sender = client.sender();
    let interval = heartbeat_interval();
    let heartbeat = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            sender.write(Operate::Heartbeat, &policies.heartbeat());
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;

    heartbeat.abort();
    client.stop().await;
    info!("smith-probe exiting");
    Ok(())
}
