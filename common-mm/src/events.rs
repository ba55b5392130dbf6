use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::ticket::Player;

pub const MATCH_FOUND_CHANNEL: &str = "match_found";
pub const DASHBOARD_CHANNEL: &str = "dashboard_events";

const DEFAULT_BUS_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// Every event crossing the bus, tagged for the serialization boundary.
/// The same `MatchFound` shape travels on both the `match_found` channel and
/// its dashboard duplicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BusEvent {
    #[serde(rename_all = "camelCase")]
    MatchFound {
        match_id: String,
        game_mode: String,
        region: String,
        /// team_1..team_N, each a list of the source tickets' players.
        teams: BTreeMap<String, Vec<Player>>,
        timestamp: u64,
        ticket_ids: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    PoolUpdated {
        game_mode: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        action: Option<String>,
        timestamp: u64,
    },
    Log {
        message: String,
        timestamp: u64,
        level: LogLevel,
    },
}

impl BusEvent {
    pub fn log(level: LogLevel, message: impl Into<String>, timestamp: u64) -> Self {
        Self::Log {
            message: message.into(),
            timestamp,
            level,
        }
    }

    pub fn pool_updated(game_mode: &str, action: Option<&str>, timestamp: u64) -> Self {
        Self::PoolUpdated {
            game_mode: game_mode.to_string(),
            action: action.map(str::to_string),
            timestamp,
        }
    }
}

/// In-process pub/sub over two logical channels. Delivery is at-least-once
/// for live subscribers; subscribers must tolerate duplicates. A publish
/// with no subscribers is not an error, and a publish failure never rolls
/// back the commit that produced it.
#[derive(Debug, Clone)]
pub struct EventBus {
    match_found: broadcast::Sender<BusEvent>,
    dashboard: broadcast::Sender<BusEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (match_found, _) = broadcast::channel(capacity);
        let (dashboard, _) = broadcast::channel(capacity);
        Self {
            match_found,
            dashboard,
        }
    }

    pub fn publish_match_found(&self, event: BusEvent) {
        if self.match_found.send(event).is_err() {
            debug!(channel = MATCH_FOUND_CHANNEL, "publish with no subscribers");
        }
    }

    pub fn publish_dashboard(&self, event: BusEvent) {
        if self.dashboard.send(event).is_err() {
            debug!(channel = DASHBOARD_CHANNEL, "publish with no subscribers");
        }
    }

    pub fn subscribe_match_found(&self) -> broadcast::Receiver<BusEvent> {
        self.match_found.subscribe()
    }

    pub fn subscribe_dashboard(&self) -> broadcast::Receiver<BusEvent> {
        self.dashboard.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_match_found() -> BusEvent {
        let player = Player {
            player_name: "ana".to_string(),
            skill: 120,
            region_preference: vec![],
        };
        BusEvent::MatchFound {
            match_id: "m-1".to_string(),
            game_mode: "ranked_2v2".to_string(),
            region: "us-east".to_string(),
            teams: BTreeMap::from([
                ("team_1".to_string(), vec![player.clone()]),
                ("team_2".to_string(), vec![player]),
            ]),
            timestamp: 1_700_000_000,
            ticket_ids: vec!["t-1".to_string(), "t-2".to_string()],
        }
    }

    #[test]
    fn match_found_wire_shape() {
        let value = serde_json::to_value(sample_match_found()).expect("serialize");

        assert_eq!(value["event"], "match_found");
        assert_eq!(value["matchId"], "m-1");
        assert_eq!(value["gameMode"], "ranked_2v2");
        assert_eq!(value["region"], "us-east");
        assert_eq!(value["ticketIds"][0], "t-1");
        assert_eq!(value["teams"]["team_1"][0]["playerName"], "ana");
    }

    #[test]
    fn pool_updated_omits_absent_action() {
        let bare = serde_json::to_value(BusEvent::pool_updated("ranked_2v2", None, 1)).unwrap();
        assert_eq!(bare["event"], "pool_updated");
        assert_eq!(bare["gameMode"], "ranked_2v2");
        assert!(bare.get("action").is_none());

        let tagged =
            serde_json::to_value(BusEvent::pool_updated("ranked_2v2", Some("enqueued"), 1))
                .unwrap();
        assert_eq!(tagged["action"], "enqueued");
    }

    #[test]
    fn log_event_wire_shape() {
        let value =
            serde_json::to_value(BusEvent::log(LogLevel::Info, "MATCH FOUND: m-1", 7)).unwrap();
        assert_eq!(value["event"], "log");
        assert_eq!(value["level"], "info");
        assert_eq!(value["message"], "MATCH FOUND: m-1");
    }

    #[tokio::test]
    async fn subscribers_see_duplicate_publishes() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe_match_found();

        let event = sample_match_found();
        bus.publish_match_found(event.clone());
        bus.publish_match_found(event.clone());

        assert_eq!(rx.recv().await.unwrap(), event);
        assert_eq!(rx.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn channels_are_isolated() {
        let bus = EventBus::default();
        let mut dashboard = bus.subscribe_dashboard();

        bus.publish_dashboard(BusEvent::pool_updated("m", Some("enqueued"), 1));
        bus.publish_match_found(sample_match_found());

        let got = dashboard.recv().await.unwrap();
        assert!(matches!(got, BusEvent::PoolUpdated { .. }));
        assert!(dashboard.try_recv().is_err());
    }
}
