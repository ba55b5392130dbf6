use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use common_mm::events::EventBus;
use common_mm::metrics;
use common_mm::rules::RulesRegistry;
use common_mm::shutdown;
use common_mm::store::TicketStore;
use tracing::{debug, error, info, warn};

pub mod balance;
pub mod proposal;
pub mod region;
pub mod round;

pub type BoxError = common_mm::BoxError;

const DEFAULT_TICK_SECS: u64 = 2;
const DEFAULT_METRICS_ADDR: &str = "127.0.0.1:3100";
const TTL_SWEEP_SECS: u64 = 60;

pub const METRICS_PATH: &str = "/metrics";

#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct MatchmakerSettings {
    pub tick_secs: u64,
    pub metrics_addr: String,
}

impl Default for MatchmakerSettings {
    fn default() -> Self {
        Self {
            tick_secs: DEFAULT_TICK_SECS,
            metrics_addr: DEFAULT_METRICS_ADDR.to_string(),
        }
    }
}

impl MatchmakerSettings {
    pub fn from_env() -> Result<Self, BoxError> {
        let tick_secs = match std::env::var("MATCHMAKER_TICK_SECS") {
            Ok(raw) => raw.parse().map_err(|err| Box::new(err) as BoxError)?,
            Err(_) => DEFAULT_TICK_SECS,
        };
        Ok(Self {
            tick_secs,
            metrics_addr: std::env::var("MATCHMAKER_METRICS_ADDR")
                .unwrap_or_else(|_| DEFAULT_METRICS_ADDR.to_string()),
        })
    }
}

/// Runtime wiring for the scheduler: parsed settings plus the shared store,
/// bus and rules it drives.
#[derive(Debug, Clone)]
pub struct MatchmakerConfig {
    pub tick_interval: Duration,
    pub metrics_addr: SocketAddr,
    pub store: TicketStore,
    pub bus: EventBus,
    pub rules: Arc<RulesRegistry>,
}

impl MatchmakerConfig {
    pub fn from_settings(
        settings: MatchmakerSettings,
        store: TicketStore,
        bus: EventBus,
        rules: Arc<RulesRegistry>,
    ) -> Result<Self, BoxError> {
        Ok(Self {
            tick_interval: Duration::from_secs(settings.tick_secs.max(1)),
            metrics_addr: settings
                .metrics_addr
                .parse()
                .map_err(|err| Box::new(err) as BoxError)?,
            store,
            bus,
            rules,
        })
    }
}

pub async fn run_with_ctrl_c(config: MatchmakerConfig) -> Result<(), BoxError> {
    let (shutdown_tx, shutdown_rx) = shutdown::channel();

    let ctrl_c = tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(%err, "matchmaker: could not listen for ctrl_c");
        }
        shutdown::trigger(&shutdown_tx);
    });

    let result = run(config, shutdown_rx).await;

    ctrl_c.abort();
    result
}

/// The scheduler task: every tick, one round per configured mode, in the
/// rules document's declaration order. A failed round is logged and the next
/// mode proceeds; on shutdown the in-flight round finishes before exit.
pub async fn run(
    config: MatchmakerConfig,
    shutdown_rx: shutdown::ShutdownReceiver,
) -> Result<(), BoxError> {
    metrics::matchmaking_metrics().on_startup();
    let _metrics_task =
        metrics::spawn_metrics_exporter(config.metrics_addr, METRICS_PATH, "matchmaker");

    let sweep_store = config.store.clone();
    let sweep_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(TTL_SWEEP_SECS));
        interval.tick().await;
        loop {
            interval.tick().await;
            match sweep_store.cleanup_expired().await {
                Ok(0) => {}
                Ok(count) => info!(count, "expired tickets reaped"),
                Err(err) => warn!(%err, "ticket TTL sweep failed"),
            }
        }
    });

    info!(
        tick = ?config.tick_interval,
        modes = config.rules.len(),
        "matchmaker: scheduler starting"
    );

    let mut ticker = tokio::time::interval(config.tick_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut shutdown_wait = Box::pin(shutdown::wait(shutdown_rx.clone()));

    loop {
        tokio::select! {
            _ = &mut shutdown_wait => break,
            _ = ticker.tick() => {
                run_tick(&config, &shutdown_rx).await;
                if shutdown::is_triggered(&shutdown_rx) {
                    break;
                }
            }
        }
    }

    sweep_task.abort();
    info!("matchmaker: scheduler stopped");
    Ok(())
}

/// One pass over every mode. The shutdown receiver is only consulted between
/// rounds so an in-flight round always runs to completion.
pub async fn run_tick(config: &MatchmakerConfig, shutdown_rx: &shutdown::ShutdownReceiver) {
    let now = common_mm::epoch_secs();

    for (mode, rules) in config.rules.modes() {
        if shutdown::is_triggered(shutdown_rx) {
            return;
        }

        match round::run_round(&config.store, &config.bus, mode, rules, now).await {
            Ok(outcome) => debug!(mode, ?outcome, "round finished"),
            Err(err) => error!(%err, mode, "matchmaking round failed"),
        }

        match config.store.pool_size(mode).await {
            Ok(depth) => metrics::matchmaking_metrics().set_pool_depth(mode, depth as i64),
            Err(err) => debug!(%err, mode, "could not read pool depth"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common_mm::rules::ModeRules;

    fn registry() -> Arc<RulesRegistry> {
        Arc::new(RulesRegistry::from_modes(vec![(
            "test".to_string(),
            ModeRules {
                team_size: 2,
                num_teams: 2,
                skill_tolerance: 50.0,
                expand_search_steps: vec![],
                max_latency: 200,
            },
        )]))
    }

    #[test]
    fn settings_parse_into_config() {
        let settings = MatchmakerSettings::default();
        let config = MatchmakerConfig::from_settings(
            settings,
            TicketStore::default(),
            EventBus::default(),
            registry(),
        )
        .expect("valid settings");
        assert_eq!(config.tick_interval, Duration::from_secs(2));
    }

    #[tokio::test]
    async fn scheduler_exits_on_shutdown() {
        let config = MatchmakerConfig {
            tick_interval: Duration::from_millis(10),
            metrics_addr: "127.0.0.1:0".parse().unwrap(),
            store: TicketStore::default(),
            bus: EventBus::default(),
            rules: registry(),
        };

        let (shutdown_tx, shutdown_rx) = shutdown::channel();
        let scheduler = tokio::spawn(run(config, shutdown_rx));

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown::trigger(&shutdown_tx);

        tokio::time::timeout(Duration::from_secs(2), scheduler)
            .await
            .expect("scheduler should stop promptly")
            .expect("join")
            .expect("clean exit");
    }
}
