use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::StatusCode;
use tokio::{sync::oneshot, task::JoinHandle};

use common_mm::events::EventBus;
use common_mm::rules::RulesRegistry;
use common_mm::session::{NotifyMessage, NotifySink, SessionRegistry};
use common_mm::store::TicketStore;
use common_mm::telemetry;
use gateway::{build_router, ws::WsHub, AppState};

type BoxError = common_mm::BoxError;

const RULES_DOC: &str = r#"{
    "ranked_2v2": {
        "teamSize": 2,
        "numTeams": 2,
        "skillTolerance": 50,
        "expandSearchSteps": [{"afterSeconds": 30, "newTolerance": 150}],
        "maxLatency": 150
    }
}"#;

fn test_state() -> AppState {
    AppState {
        store: TicketStore::default(),
        bus: EventBus::default(),
        rules: Arc::new(RulesRegistry::from_json(RULES_DOC).expect("test rules")),
        sessions: Arc::new(SessionRegistry::default()),
        hub: Arc::new(WsHub::default()),
    }
}

async fn spawn_gateway(
    state: AppState,
) -> Result<(SocketAddr, oneshot::Sender<()>, JoinHandle<()>), BoxError> {
    telemetry::init("gateway-test");

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let server = tokio::spawn(async move {
        let shutdown = async {
            let _ = shutdown_rx.await;
        };

        if let Err(err) = axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await
        {
            tracing::error!(%err, "gateway test server failed");
        }
    });

    Ok((addr, shutdown_tx, server))
}

#[tokio::test]
async fn http_endpoints_work() -> Result<(), BoxError> {
    let (addr, shutdown_tx, server) = spawn_gateway(test_state()).await?;
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()?;
    let base = format!("http://{}", addr);

    let health = client.get(format!("{base}/healthz")).send().await?;
    assert_eq!(StatusCode::OK, health.status());

    let version_resp = client.get(format!("{base}/version")).send().await?;
    assert_eq!(StatusCode::OK, version_resp.status());
    let version_body: serde_json::Value = version_resp.json().await?;
    assert_eq!("gateway", version_body["name"]);

    let modes_resp = client.get(format!("{base}/api/v1/game_modes")).send().await?;
    let modes_body: serde_json::Value = modes_resp.json().await?;
    assert_eq!(modes_body["gameModes"]["ranked_2v2"]["teamSize"], 2);

    let metrics_resp = client.get(format!("{base}/metrics")).send().await?;
    assert_eq!(StatusCode::OK, metrics_resp.status());
    let metrics_text = metrics_resp.text().await?;
    assert!(metrics_text.contains("gateway_http_requests_total"));

    shutdown_tx.send(()).ok();
    let _ = server.await;
    Ok(())
}

#[tokio::test]
async fn join_queue_accepts_and_rejects() -> Result<(), BoxError> {
    let state = test_state();
    let store = state.store.clone();
    let (addr, shutdown_tx, server) = spawn_gateway(state).await?;
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()?;
    let base = format!("http://{}", addr);

    let body = serde_json::json!({
        "playerName": "ana",
        "skill": 1200,
        "regionPreference": [{"us-east": 3}]
    });

    let accepted = client
        .post(format!("{base}/api/v1/join_queue?gameMode=ranked_2v2"))
        .json(&body)
        .send()
        .await?;
    assert_eq!(StatusCode::OK, accepted.status());
    let accepted_body: serde_json::Value = accepted.json().await?;
    let ticket_id = accepted_body["ticketId"].as_str().expect("ticket id");
    assert!(!ticket_id.is_empty());
    assert_eq!(accepted_body["ticket"]["status"], "searching");

    assert_eq!(store.pool_size("ranked_2v2").await?, 1);
    assert!(store.get_ticket(ticket_id).await?.is_some());

    let pool_resp = client.get(format!("{base}/api/v1/pool_status")).send().await?;
    let pool_body: serde_json::Value = pool_resp.json().await?;
    assert_eq!(pool_body["poolStatus"]["ranked_2v2"]["queueSize"], 1);

    let unknown = client
        .post(format!("{base}/api/v1/join_queue?gameMode=battle_royale"))
        .json(&body)
        .send()
        .await?;
    assert_eq!(StatusCode::BAD_REQUEST, unknown.status());
    let unknown_body: serde_json::Value = unknown.json().await?;
    assert_eq!(unknown_body["error"], "unknown_mode");

    let invalid = client
        .post(format!("{base}/api/v1/join_queue?gameMode=ranked_2v2"))
        .json(&serde_json::json!({"playerName": "", "skill": 10}))
        .send()
        .await?;
    assert_eq!(StatusCode::BAD_REQUEST, invalid.status());
    let invalid_body: serde_json::Value = invalid.json().await?;
    assert_eq!(invalid_body["error"], "invalid_ticket");

    shutdown_tx.send(()).ok();
    let _ = server.await;
    Ok(())
}

#[tokio::test]
async fn ws_session_registers_and_receives_notifies() -> Result<(), BoxError> {
    let state = test_state();
    let sessions = Arc::clone(&state.sessions);
    let hub = Arc::clone(&state.hub);
    let (addr, shutdown_tx, server) = spawn_gateway(state).await?;

    let (mut socket, _) =
        tokio_tungstenite::connect_async(format!("ws://{addr}/ws?playerId=ana")).await?;

    // The session map is written by the socket task; poll until it lands.
    let session_id = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if let Some(sid) = sessions.resolve("ana").await {
                return sid;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .map_err(|err| Box::new(err) as BoxError)?;

    let delivered = hub
        .send_notify(
            &session_id,
            NotifyMessage {
                message: "Match m-1 is ready!".to_string(),
                match_id: "m-1".to_string(),
                region: "us-east".to_string(),
                teams: Default::default(),
            },
        )
        .await;
    assert!(delivered);

    let frame = tokio::time::timeout(Duration::from_secs(2), socket.next())
        .await
        .map_err(|err| Box::new(err) as BoxError)?
        .expect("socket open")?;
    let text = frame.into_text()?;
    let value: serde_json::Value = serde_json::from_str(&text)?;
    assert_eq!(value["event"], "send_notify");
    assert_eq!(value["matchId"], "m-1");
    assert_eq!(value["message"], "Match m-1 is ready!");

    drop(socket);
    shutdown_tx.send(()).ok();
    let _ = server.await;
    Ok(())
}

#[tokio::test]
async fn anonymous_ws_connect_is_refused() -> Result<(), BoxError> {
    let (addr, shutdown_tx, server) = spawn_gateway(test_state()).await?;

    let refused = tokio_tungstenite::connect_async(format!("ws://{addr}/ws")).await;
    assert!(refused.is_err());

    shutdown_tx.send(()).ok();
    let _ = server.await;
    Ok(())
}
