use std::collections::HashMap;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Json,
};
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use common_mm::error::EngineError;
use common_mm::events::BusEvent;
use common_mm::metrics;
use common_mm::ticket::{Player, Ticket, TicketStatus};

use crate::{count_request, AppState, GAME_MODES_PATH, JOIN_QUEUE_PATH, POOL_STATUS_PATH};

const LATENCY_FLOOR_MS: u32 = 10;

type ApiError = (StatusCode, Json<serde_json::Value>);

#[derive(Debug, Deserialize)]
pub struct JoinQueueParams {
    #[serde(rename = "gameMode")]
    pub game_mode: String,
}

/// Ticket creation payload: one player joining a queue. Latency figures may
/// come with the request; otherwise a deterministic fallback keyed by the
/// player name stands in for the geo probe.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinQueueRequest {
    pub player_name: String,
    pub skill: u32,
    #[serde(default)]
    pub region_preference: Vec<HashMap<String, u32>>,
    #[serde(default)]
    pub latency_data: Option<HashMap<String, u32>>,
}

/// POST /api/v1/join_queue?gameMode=...
pub async fn join_queue(
    State(state): State<AppState>,
    Query(params): Query<JoinQueueParams>,
    Json(request): Json<JoinQueueRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    count_request(JOIN_QUEUE_PATH);

    match enqueue_ticket(&state, &params.game_mode, request, common_mm::epoch_secs()).await {
        Ok(ticket) => Ok(Json(serde_json::json!({
            "message": "Ticket created and successfully queued",
            "ticketId": ticket.ticket_id,
            "ticket": ticket,
        }))),
        Err(err) => {
            metrics::ingress_metrics().inc_rejected();
            Err(error_response(err))
        }
    }
}

/// The ingress contract behind the HTTP handler: validate, build the ticket,
/// persist record + pool entry, announce the pool change. Returns the stored
/// ticket.
pub async fn enqueue_ticket(
    state: &AppState,
    game_mode: &str,
    request: JoinQueueRequest,
    now: u64,
) -> Result<Ticket, EngineError> {
    if !state.rules.contains(game_mode) {
        return Err(EngineError::UnknownMode(game_mode.to_string()));
    }
    if request.player_name.trim().is_empty() {
        return Err(EngineError::InvalidTicket(
            "playerName must not be empty".to_string(),
        ));
    }

    let latency_data = match request.latency_data {
        Some(data) => {
            if data.is_empty() {
                return Err(EngineError::InvalidTicket(
                    "latencyData must not be empty".to_string(),
                ));
            }
            if data.values().any(|&ms| ms < LATENCY_FLOOR_MS) {
                return Err(EngineError::InvalidTicket(format!(
                    "latencyData entries must be >= {LATENCY_FLOOR_MS}ms"
                )));
            }
            data
        }
        None => fallback_latency(&request.player_name),
    };

    let player = Player {
        player_name: request.player_name,
        skill: request.skill,
        region_preference: request.region_preference.clone(),
    };
    let ticket = Ticket {
        ticket_id: Uuid::new_v4().to_string(),
        players: vec![player],
        game_mode: game_mode.to_string(),
        region_preference: request.region_preference,
        latency_data,
        creation_time: now,
        status: TicketStatus::Searching,
    };

    let score = ticket.average_skill();
    state.store.put_ticket(&ticket).await?;
    if let Err(err) = state
        .store
        .pool_insert(game_mode, &ticket.ticket_id, score)
        .await
    {
        // Best-effort cleanup so a half-written ticket does not linger.
        warn!(%err, ticket_id = %ticket.ticket_id, "pool insert failed, rolling back record");
        let _ = state.store.delete_ticket(&ticket.ticket_id).await;
        return Err(err);
    }

    state
        .bus
        .publish_dashboard(BusEvent::pool_updated(game_mode, Some("enqueued"), now));
    metrics::ingress_metrics().inc_enqueued();
    info!(
        ticket_id = %ticket.ticket_id,
        mode = game_mode,
        players = ticket.party_size(),
        "ticket queued"
    );

    Ok(ticket)
}

fn error_response(err: EngineError) -> ApiError {
    let (status, code) = match &err {
        EngineError::UnknownMode(_) => (StatusCode::BAD_REQUEST, "unknown_mode"),
        EngineError::InvalidTicket(_) => (StatusCode::BAD_REQUEST, "invalid_ticket"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "store_error"),
    };
    (
        status,
        Json(serde_json::json!({
            "error": code,
            "detail": err.to_string(),
        })),
    )
}

/// Deterministic latency table keyed by player identity, used when the
/// request carries no measurements.
pub fn fallback_latency(player_name: &str) -> HashMap<String, u32> {
    use std::hash::{Hash, Hasher};

    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    player_name.hash(&mut hasher);
    let variation = (hasher.finish() % 50) as i64 - 25;

    let base = [
        ("in-central", 30i64),
        ("us-east", 180),
        ("eu-west", 120),
        ("asia-se", 80),
    ];
    base.into_iter()
        .map(|(region, ms)| {
            (
                region.to_string(),
                (ms + variation).max(i64::from(LATENCY_FLOOR_MS)) as u32,
            )
        })
        .collect()
}

/// GET /api/v1/game_modes
pub async fn game_modes(State(state): State<AppState>) -> Json<serde_json::Value> {
    count_request(GAME_MODES_PATH);
    Json(serde_json::json!({ "gameModes": state.rules.to_document() }))
}

/// GET /api/v1/pool_status
pub async fn pool_status(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    count_request(POOL_STATUS_PATH);

    let mut status = serde_json::Map::new();
    for (mode, _) in state.rules.modes() {
        let size = state
            .store
            .pool_size(mode)
            .await
            .map_err(error_response)?;
        status.insert(
            mode.to_string(),
            serde_json::json!({ "queueSize": size }),
        );
    }
    Ok(Json(serde_json::json!({ "poolStatus": status })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use common_mm::events::EventBus;
    use common_mm::rules::{ModeRules, RulesRegistry};
    use common_mm::session::SessionRegistry;
    use common_mm::store::TicketStore;
    use std::sync::Arc;

    fn test_state() -> AppState {
        let rules = RulesRegistry::from_modes(vec![(
            "ranked_2v2".to_string(),
            ModeRules {
                team_size: 2,
                num_teams: 2,
                skill_tolerance: 50.0,
                expand_search_steps: vec![],
                max_latency: 150,
            },
        )]);
        AppState {
            store: TicketStore::default(),
            bus: EventBus::default(),
            rules: Arc::new(rules),
            sessions: Arc::new(SessionRegistry::default()),
            hub: Arc::new(crate::ws::WsHub::default()),
        }
    }

    fn request(name: &str) -> JoinQueueRequest {
        JoinQueueRequest {
            player_name: name.to_string(),
            skill: 120,
            region_preference: vec![HashMap::from([("us-east".to_string(), 3)])],
            latency_data: None,
        }
    }

    #[tokio::test]
    async fn enqueue_stores_and_pools_the_ticket() {
        let state = test_state();
        let mut dash_rx = state.bus.subscribe_dashboard();

        let ticket = enqueue_ticket(&state, "ranked_2v2", request("ana"), 100)
            .await
            .unwrap();

        assert_eq!(ticket.status, TicketStatus::Searching);
        assert_eq!(ticket.creation_time, 100);
        assert!(state
            .store
            .get_ticket(&ticket.ticket_id)
            .await
            .unwrap()
            .is_some());
        assert!(state
            .store
            .pool_contains("ranked_2v2", &ticket.ticket_id)
            .await
            .unwrap());

        let BusEvent::PoolUpdated { game_mode, action, .. } = dash_rx.try_recv().unwrap()
        else {
            panic!("expected pool_updated");
        };
        assert_eq!(game_mode, "ranked_2v2");
        assert_eq!(action.as_deref(), Some("enqueued"));
    }

    #[tokio::test]
    async fn unknown_mode_is_rejected() {
        let state = test_state();
        let err = enqueue_ticket(&state, "battle_royale", request("ana"), 100)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::UnknownMode(_)));
        assert_eq!(state.store.pool_size("battle_royale").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn blank_player_name_is_invalid() {
        let state = test_state();
        let err = enqueue_ticket(&state, "ranked_2v2", request("  "), 100)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidTicket(_)));
    }

    #[tokio::test]
    async fn sub_floor_latency_is_invalid() {
        let state = test_state();
        let mut req = request("ana");
        req.latency_data = Some(HashMap::from([("us-east".to_string(), 5)]));
        let err = enqueue_ticket(&state, "ranked_2v2", req, 100)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidTicket(_)));
    }

    #[tokio::test]
    async fn request_latency_wins_over_fallback() {
        let state = test_state();
        let mut req = request("ana");
        req.latency_data = Some(HashMap::from([("eu-west".to_string(), 33)]));
        let ticket = enqueue_ticket(&state, "ranked_2v2", req, 100)
            .await
            .unwrap();
        assert_eq!(ticket.latency_data.get("eu-west"), Some(&33));
        assert_eq!(ticket.latency_data.len(), 1);
    }

    #[test]
    fn fallback_latency_is_deterministic_and_floored() {
        let a = fallback_latency("ana");
        let b = fallback_latency("ana");
        assert_eq!(a, b);
        assert_eq!(a.len(), 4);
        assert!(a.values().all(|&ms| ms >= LATENCY_FLOOR_MS));
        assert!(a.contains_key("us-east"));
    }
}
