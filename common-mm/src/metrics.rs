use std::net::SocketAddr;

use axum::{
    body::Body,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use once_cell::sync::OnceCell;
use prometheus::{
    register_int_counter, register_int_gauge_vec, Encoder, IntCounter, IntGaugeVec, TextEncoder,
};
use tokio::net::TcpListener;
use tracing::error;

pub use crate::error::BoxError;

/// Metric set for the matchmaker scheduler.
pub struct MatchmakingMetrics {
    pub matches_created_total: IntCounter,
    pub rounds_total: IntCounter,
    pub stale_tickets_dropped_total: IntCounter,
    pub commit_races_lost_total: IntCounter,
    pub pool_depth: IntGaugeVec,
}

impl MatchmakingMetrics {
    pub fn on_startup(&self) {
        self.matches_created_total.inc_by(0);
        self.rounds_total.inc_by(0);
        self.stale_tickets_dropped_total.inc_by(0);
        self.commit_races_lost_total.inc_by(0);
    }

    pub fn inc_matches_created(&self) {
        self.matches_created_total.inc();
    }

    pub fn inc_rounds(&self) {
        self.rounds_total.inc();
    }

    pub fn inc_stale_dropped(&self) {
        self.stale_tickets_dropped_total.inc();
    }

    pub fn inc_commit_races_lost(&self) {
        self.commit_races_lost_total.inc();
    }

    pub fn set_pool_depth(&self, mode: &str, depth: i64) {
        self.pool_depth.with_label_values(&[mode]).set(depth);
    }
}

/// Metric set for ticket ingress.
pub struct IngressMetrics {
    pub tickets_enqueued_total: IntCounter,
    pub tickets_rejected_total: IntCounter,
}

impl IngressMetrics {
    pub fn on_startup(&self) {
        self.tickets_enqueued_total.inc_by(0);
        self.tickets_rejected_total.inc_by(0);
    }

    pub fn inc_enqueued(&self) {
        self.tickets_enqueued_total.inc();
    }

    pub fn inc_rejected(&self) {
        self.tickets_rejected_total.inc();
    }
}

/// Metric set for the notification fan-out.
pub struct NotifierMetrics {
    pub notifications_sent_total: IntCounter,
    pub notifications_dropped_total: IntCounter,
}

impl NotifierMetrics {
    pub fn on_startup(&self) {
        self.notifications_sent_total.inc_by(0);
        self.notifications_dropped_total.inc_by(0);
    }

    pub fn inc_sent(&self) {
        self.notifications_sent_total.inc();
    }

    pub fn inc_dropped(&self) {
        self.notifications_dropped_total.inc();
    }
}

static MATCHMAKING_METRICS: OnceCell<MatchmakingMetrics> = OnceCell::new();
static INGRESS_METRICS: OnceCell<IngressMetrics> = OnceCell::new();
static NOTIFIER_METRICS: OnceCell<NotifierMetrics> = OnceCell::new();

pub fn matchmaking_metrics() -> &'static MatchmakingMetrics {
    MATCHMAKING_METRICS.get_or_init(|| MatchmakingMetrics {
        matches_created_total: register_int_counter!(
            "matchmaker_matches_created_total",
            "Matches committed and published by the scheduler"
        )
        .expect("register matchmaker_matches_created_total"),
        rounds_total: register_int_counter!(
            "matchmaker_rounds_total",
            "Per-mode matchmaking rounds executed"
        )
        .expect("register matchmaker_rounds_total"),
        stale_tickets_dropped_total: register_int_counter!(
            "matchmaker_stale_tickets_dropped_total",
            "Pool entries dropped because their ticket record was gone"
        )
        .expect("register matchmaker_stale_tickets_dropped_total"),
        commit_races_lost_total: register_int_counter!(
            "matchmaker_commit_races_lost_total",
            "Commits abandoned after a partial pool removal"
        )
        .expect("register matchmaker_commit_races_lost_total"),
        pool_depth: register_int_gauge_vec!(
            "matchmaker_pool_depth",
            "Tickets waiting in the pool, per game mode",
            &["game_mode"]
        )
        .expect("register matchmaker_pool_depth"),
    })
}

pub fn ingress_metrics() -> &'static IngressMetrics {
    INGRESS_METRICS.get_or_init(|| IngressMetrics {
        tickets_enqueued_total: register_int_counter!(
            "gateway_tickets_enqueued_total",
            "Tickets accepted and pooled via ingress"
        )
        .expect("register gateway_tickets_enqueued_total"),
        tickets_rejected_total: register_int_counter!(
            "gateway_tickets_rejected_total",
            "Ingress requests rejected at validation"
        )
        .expect("register gateway_tickets_rejected_total"),
    })
}

pub fn notifier_metrics() -> &'static NotifierMetrics {
    NOTIFIER_METRICS.get_or_init(|| NotifierMetrics {
        notifications_sent_total: register_int_counter!(
            "notifier_notifications_sent_total",
            "Per-player match notifications delivered"
        )
        .expect("register notifier_notifications_sent_total"),
        notifications_dropped_total: register_int_counter!(
            "notifier_notifications_dropped_total",
            "Notifications dropped because the player had no live session"
        )
        .expect("register notifier_notifications_dropped_total"),
    })
}

pub fn metrics_router(metrics_path: &'static str) -> Router {
    Router::new().route(metrics_path, get(metrics_handler))
}

pub async fn serve_metrics(
    listener: TcpListener,
    metrics_path: &'static str,
) -> Result<(), BoxError> {
    let router = metrics_router(metrics_path);
    axum::serve(listener, router)
        .await
        .map_err(|err| Box::new(err) as BoxError)
}

pub fn spawn_metrics_exporter(
    addr: SocketAddr,
    metrics_path: &'static str,
    service_name: &'static str,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        match TcpListener::bind(addr).await {
            Ok(listener) => {
                if let Err(err) = serve_metrics(listener, metrics_path).await {
                    error!(%err, service = service_name, %addr, path = metrics_path, "metrics exporter stopped unexpectedly");
                }
            }
            Err(err) => {
                error!(%err, service = service_name, %addr, path = metrics_path, "metrics exporter could not bind");
            }
        }
    })
}

async fn metrics_handler() -> impl IntoResponse {
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();

    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        error!(%err, "metrics: encode failed");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    let body = match String::from_utf8(buffer) {
        Ok(text) => text,
        Err(err) => {
            error!(%err, "metrics: invalid UTF-8 in exposition");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, encoder.format_type())
        .body(Body::from(body))
        .unwrap()
}
