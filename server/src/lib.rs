use std::{fs, future::Future, path::Path, pin::Pin, sync::Arc};

use common_mm::events::EventBus;
use common_mm::rules::{RulesRegistry, DEFAULT_RULES_PATH, RULES_PATH_ENV};
use common_mm::session::SessionRegistry;
use common_mm::shutdown;
use common_mm::store::{StoreConfig, TicketStore};
use gateway::{ws::WsHub, AppState, GatewayConfig, GatewaySettings};
use matchmaker::{MatchmakerConfig, MatchmakerSettings};
use notifier::{NotifierConfig, NotifierSettings};
use tokio::task::JoinSet;
use tracing::{error, info};

pub type BoxError = common_mm::BoxError;

#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct ServerSettings {
    #[serde(default = "default_rules_path")]
    pub rules_path: String,
    #[serde(default)]
    pub gateway: GatewaySettings,
    #[serde(default)]
    pub matchmaker: MatchmakerSettings,
    #[serde(default)]
    pub notifier: NotifierSettings,
}

fn default_rules_path() -> String {
    DEFAULT_RULES_PATH.to_string()
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            rules_path: default_rules_path(),
            gateway: GatewaySettings::default(),
            matchmaker: MatchmakerSettings::default(),
            notifier: NotifierSettings::default(),
        }
    }
}

impl ServerSettings {
    pub fn from_env() -> Result<Self, BoxError> {
        Ok(Self {
            rules_path: std::env::var(RULES_PATH_ENV)
                .unwrap_or_else(|_| DEFAULT_RULES_PATH.to_string()),
            gateway: GatewaySettings::from_env()?,
            matchmaker: MatchmakerSettings::from_env()?,
            notifier: NotifierSettings::from_env()?,
        })
    }

    pub fn from_file(path: &Path) -> Result<Self, BoxError> {
        let raw = fs::read_to_string(path).map_err(|err| Box::new(err) as BoxError)?;
        let settings = serde_json::from_str(&raw).map_err(|err| Box::new(err) as BoxError)?;
        Ok(settings)
    }

    pub fn into_config(self) -> Result<ServerConfig, BoxError> {
        ServerConfig::from_settings(self)
    }
}

/// Fully wired engine: per-service configs sharing one store, one bus, one
/// rules registry and one session surface.
pub struct ServerConfig {
    pub gateway: GatewayConfig,
    pub matchmaker: MatchmakerConfig,
    pub notifier: NotifierConfig,
    /// The shared handles, kept for tests and introspection.
    pub state: AppState,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig").finish_non_exhaustive()
    }
}

impl ServerConfig {
    /// Load the rules document and wire every service. A missing document
    /// aborts startup.
    pub fn from_settings(settings: ServerSettings) -> Result<Self, BoxError> {
        let rules = RulesRegistry::load(&settings.rules_path)
            .map_err(|err| Box::new(err) as BoxError)?;
        info!(
            path = %settings.rules_path,
            modes = rules.len(),
            "rules document loaded"
        );
        Self::from_parts(settings, Arc::new(rules))
    }

    pub fn from_parts(
        settings: ServerSettings,
        rules: Arc<RulesRegistry>,
    ) -> Result<Self, BoxError> {
        let store = TicketStore::new(StoreConfig::from_env());
        let bus = EventBus::default();
        let sessions = Arc::new(SessionRegistry::default());
        let hub = Arc::new(WsHub::default());

        let state = AppState {
            store: store.clone(),
            bus: bus.clone(),
            rules: Arc::clone(&rules),
            sessions: Arc::clone(&sessions),
            hub: Arc::clone(&hub),
        };

        Ok(Self {
            gateway: GatewayConfig::from_settings(settings.gateway, state.clone()),
            matchmaker: MatchmakerConfig::from_settings(
                settings.matchmaker,
                store,
                bus.clone(),
                rules,
            )?,
            notifier: NotifierConfig::from_settings(settings.notifier, bus, sessions, hub),
            state,
        })
    }

    pub fn from_env() -> Result<Self, BoxError> {
        ServerSettings::from_env()?.into_config()
    }
}

pub async fn run() -> Result<(), BoxError> {
    let config = ServerConfig::from_env()?;
    run_with_ctrl_c(config).await
}

pub async fn run_with_ctrl_c(config: ServerConfig) -> Result<(), BoxError> {
    let (shutdown_tx, shutdown_rx) = shutdown::channel();

    let ctrl_c = tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(%err, "server: could not listen for ctrl_c");
        }
        shutdown::trigger(&shutdown_tx);
    });

    let result = run_with_shutdown(config, shutdown_rx).await;

    ctrl_c.abort();
    result
}

pub async fn run_with_shutdown(
    config: ServerConfig,
    shutdown_rx: shutdown::ShutdownReceiver,
) -> Result<(), BoxError> {
    let (service_shutdown_tx, service_shutdown_rx) = shutdown::channel();

    let ServerConfig {
        gateway,
        matchmaker,
        notifier,
        state: _,
    } = config;

    let mut join_set: JoinSet<Result<(), BoxError>> = JoinSet::new();

    let gateway_shutdown = service_shutdown_rx.clone();
    join_set.spawn(async move { gateway::run(gateway, gateway_shutdown).await });

    let matchmaker_shutdown = service_shutdown_rx.clone();
    join_set.spawn(async move { matchmaker::run(matchmaker, matchmaker_shutdown).await });

    let notifier_shutdown = service_shutdown_rx;
    join_set.spawn(async move { notifier::run(notifier, notifier_shutdown).await });

    let mut shutdown_future: Pin<Box<dyn Future<Output = ()> + Send>> =
        Box::pin(shutdown::wait(shutdown_rx));
    let mut service_error: Option<BoxError> = None;

    loop {
        tokio::select! {
            _ = &mut shutdown_future => {
                info!("server: external shutdown signal received");
                shutdown::trigger(&service_shutdown_tx);
                break;
            }
            maybe_task = join_set.join_next() => {
                match maybe_task {
                    Some(Ok(Ok(()))) => continue,
                    Some(Ok(Err(err))) => {
                        error!(%err, "server: a service exited with an error");
                        service_error = Some(err);
                        shutdown::trigger(&service_shutdown_tx);
                        break;
                    }
                    Some(Err(join_err)) => {
                        let err: BoxError = Box::new(join_err);
                        error!(%err, "server: a service task panicked");
                        service_error = Some(err);
                        shutdown::trigger(&service_shutdown_tx);
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    shutdown::trigger(&service_shutdown_tx);

    let drain_result = drain_join_set(&mut join_set).await;

    if let Some(err) = service_error {
        return Err(err);
    }

    drain_result
}

async fn drain_join_set(join_set: &mut JoinSet<Result<(), BoxError>>) -> Result<(), BoxError> {
    let mut first_err: Option<BoxError> = None;

    while let Some(task) = join_set.join_next().await {
        match task {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                if first_err.is_none() {
                    first_err = Some(err);
                }
            }
            Err(join_err) => {
                if first_err.is_none() {
                    first_err = Some(Box::new(join_err) as BoxError);
                }
            }
        }
    }

    if let Some(err) = first_err {
        return Err(err);
    }

    Ok(())
}
