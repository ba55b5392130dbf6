use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use common_mm::events::{BusEvent, EventBus};
use common_mm::metrics;
use common_mm::session::{NotifyMessage, NotifySink, SessionRegistry};
use common_mm::shutdown;
use common_mm::ticket::Player;

pub type BoxError = common_mm::BoxError;

const DEFAULT_METRICS_ADDR: &str = "127.0.0.1:3200";

pub const METRICS_PATH: &str = "/metrics";

#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct NotifierSettings {
    pub metrics_addr: SocketAddr,
}

impl NotifierSettings {
    pub fn from_env() -> Result<Self, BoxError> {
        let metrics_addr = std::env::var("NOTIFIER_METRICS_ADDR")
            .unwrap_or_else(|_| DEFAULT_METRICS_ADDR.to_string());
        let metrics_addr = metrics_addr
            .parse()
            .map_err(|err| Box::new(err) as BoxError)?;
        Ok(Self { metrics_addr })
    }
}

impl Default for NotifierSettings {
    fn default() -> Self {
        Self {
            metrics_addr: DEFAULT_METRICS_ADDR
                .parse()
                .expect("default notifier metrics addr"),
        }
    }
}

pub struct NotifierConfig {
    pub metrics_addr: SocketAddr,
    pub bus: EventBus,
    pub sessions: Arc<SessionRegistry>,
    pub sink: Arc<dyn NotifySink>,
    pub ready_tx: Option<oneshot::Sender<()>>,
}

impl NotifierConfig {
    pub fn from_settings(
        settings: NotifierSettings,
        bus: EventBus,
        sessions: Arc<SessionRegistry>,
        sink: Arc<dyn NotifySink>,
    ) -> Self {
        Self {
            metrics_addr: settings.metrics_addr,
            bus,
            sessions,
            sink,
            ready_tx: None,
        }
    }
}

pub async fn run_with_ctrl_c(config: NotifierConfig) -> Result<(), BoxError> {
    let (shutdown_tx, shutdown_rx) = shutdown::channel();

    let ctrl_c = tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(%err, "notifier: could not listen for ctrl_c");
        }
        shutdown::trigger(&shutdown_tx);
    });

    let result = run(config, shutdown_rx).await;

    ctrl_c.abort();
    result
}

/// Consume `match_found` and translate each event into per-player socket
/// deliveries. On shutdown, already-published events are drained before the
/// task exits.
pub async fn run(
    config: NotifierConfig,
    shutdown_rx: shutdown::ShutdownReceiver,
) -> Result<(), BoxError> {
    metrics::notifier_metrics().on_startup();
    let _metrics_task =
        metrics::spawn_metrics_exporter(config.metrics_addr, METRICS_PATH, "notifier");

    let mut events = config.bus.subscribe_match_found();
    if let Some(tx) = config.ready_tx {
        let _ = tx.send(());
    }
    info!("notifier: listening for match_found events");

    let mut shutdown_wait = Box::pin(shutdown::wait(shutdown_rx));
    loop {
        tokio::select! {
            _ = &mut shutdown_wait => break,
            received = events.recv() => match received {
                Ok(event) => {
                    fan_out(&event, &config.sessions, config.sink.as_ref()).await;
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "notifier lagged behind the bus");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    // Drain whatever was published before the shutdown signal.
    loop {
        match events.try_recv() {
            Ok(event) => {
                fan_out(&event, &config.sessions, config.sink.as_ref()).await;
            }
            Err(TryRecvError::Lagged(skipped)) => {
                warn!(skipped, "notifier lagged behind the bus");
            }
            Err(_) => break,
        }
    }

    info!("notifier: stopped");
    Ok(())
}

/// Deliver one `match_found` event. Players without a live session are
/// skipped silently; no retry state is kept. Returns (sent, dropped).
pub async fn fan_out(
    event: &BusEvent,
    sessions: &SessionRegistry,
    sink: &dyn NotifySink,
) -> (usize, usize) {
    let BusEvent::MatchFound {
        match_id,
        region,
        teams,
        ..
    } = event
    else {
        return (0, 0);
    };

    let mut sent = 0;
    let mut dropped = 0;
    for player in roster(teams) {
        let Some(session_id) = sessions.resolve(&player.player_name).await else {
            debug!(player = %player.player_name, %match_id, "player offline, notification dropped");
            metrics::notifier_metrics().inc_dropped();
            dropped += 1;
            continue;
        };

        let message = NotifyMessage {
            message: format!("Match {match_id} is ready!"),
            match_id: match_id.clone(),
            region: region.clone(),
            teams: teams.clone(),
        };
        if sink.send_notify(&session_id, message).await {
            metrics::notifier_metrics().inc_sent();
            sent += 1;
        } else {
            debug!(player = %player.player_name, %match_id, "session vanished mid-delivery");
            metrics::notifier_metrics().inc_dropped();
            dropped += 1;
        }
    }

    debug!(%match_id, sent, dropped, "match notifications dispatched");
    (sent, dropped)
}

fn roster(teams: &BTreeMap<String, Vec<Player>>) -> impl Iterator<Item = &Player> {
    teams.values().flatten()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        deliveries: Mutex<Vec<(String, NotifyMessage)>>,
    }

    #[async_trait]
    impl NotifySink for RecordingSink {
        async fn send_notify(&self, session_id: &str, message: NotifyMessage) -> bool {
            let mut deliveries = self.deliveries.lock().await;
            deliveries.push((session_id.to_string(), message));
            true
        }
    }

    fn player(name: &str) -> Player {
        Player {
            player_name: name.to_string(),
            skill: 100,
            region_preference: vec![],
        }
    }

    fn match_event() -> BusEvent {
        BusEvent::MatchFound {
            match_id: "m-1".to_string(),
            game_mode: "ranked_2v2".to_string(),
            region: "us-east".to_string(),
            teams: BTreeMap::from([
                ("team_1".to_string(), vec![player("ana"), player("bob")]),
                ("team_2".to_string(), vec![player("cid"), player("dee")]),
            ]),
            timestamp: 100,
            ticket_ids: vec!["t-1".to_string()],
        }
    }

    #[tokio::test]
    async fn delivers_to_online_players_and_drops_offline() {
        let sessions = SessionRegistry::default();
        sessions.register("ana", "sid-ana").await;
        sessions.register("bob", "sid-bob").await;
        sessions.register("cid", "sid-cid").await;
        // "dee" is offline.

        let sink = RecordingSink::default();
        let (sent, dropped) = fan_out(&match_event(), &sessions, &sink).await;

        assert_eq!(sent, 3);
        assert_eq!(dropped, 1);

        let deliveries = sink.deliveries.lock().await;
        let sids: Vec<&str> = deliveries.iter().map(|(sid, _)| sid.as_str()).collect();
        assert_eq!(sids, vec!["sid-ana", "sid-bob", "sid-cid"]);
        for (_, message) in deliveries.iter() {
            assert_eq!(message.message, "Match m-1 is ready!");
            assert_eq!(message.region, "us-east");
        }
    }

    #[tokio::test]
    async fn replay_produces_the_same_payload_set() {
        let sessions = SessionRegistry::default();
        sessions.register("ana", "sid-ana").await;
        sessions.register("bob", "sid-bob").await;
        sessions.register("cid", "sid-cid").await;
        sessions.register("dee", "sid-dee").await;

        let sink = RecordingSink::default();
        let event = match_event();
        fan_out(&event, &sessions, &sink).await;
        fan_out(&event, &sessions, &sink).await;

        let deliveries = sink.deliveries.lock().await;
        assert_eq!(deliveries.len(), 8);
        let (first, second) = deliveries.split_at(4);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn non_match_events_are_ignored() {
        let sessions = SessionRegistry::default();
        let sink = RecordingSink::default();

        let event = BusEvent::pool_updated("ranked_2v2", Some("enqueued"), 1);
        let (sent, dropped) = fan_out(&event, &sessions, &sink).await;
        assert_eq!((sent, dropped), (0, 0));
        assert!(sink.deliveries.lock().await.is_empty());
    }

    #[tokio::test]
    async fn end_to_end_from_bus_to_sink() {
        let bus = EventBus::default();
        let sessions = Arc::new(SessionRegistry::default());
        sessions.register("ana", "sid-ana").await;
        let sink = Arc::new(RecordingSink::default());

        let (ready_tx, ready_rx) = oneshot::channel();
        let config = NotifierConfig {
            metrics_addr: "127.0.0.1:0".parse().unwrap(),
            bus: bus.clone(),
            sessions: Arc::clone(&sessions),
            sink: Arc::clone(&sink) as Arc<dyn NotifySink>,
            ready_tx: Some(ready_tx),
        };

        let (shutdown_tx, shutdown_rx) = shutdown::channel();
        let task = tokio::spawn(run(config, shutdown_rx));
        ready_rx.await.expect("notifier ready");

        bus.publish_match_found(match_event());

        tokio::time::timeout(std::time::Duration::from_secs(2), async {
            loop {
                if !sink.deliveries.lock().await.is_empty() {
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("delivery should arrive");

        shutdown::trigger(&shutdown_tx);
        task.await.expect("join").expect("clean exit");

        let deliveries = sink.deliveries.lock().await;
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].0, "sid-ana");
    }
}
