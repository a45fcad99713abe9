//! Health-Check-Endpunkt fuer Callbridge
//!
//! Endpoint: `GET /health`
//! Response: JSON mit Status, Version, Uptime, verbundenen Endpunkten und
//! offenen Sessions

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

use crate::metrics::CallbridgeMetrics;

/// Status des Health-Checks
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    /// Relay laeuft, nimmt aber keine neuen Verbindungen mehr an
    Degraded,
    Unhealthy,
}

/// Antwort des Health-Check-Endpunkts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_seconds: u64,
    pub connected_endpoints: i64,
    pub active_sessions: i64,
}

/// Geteilter Zustand fuer den Health-Check-Handler
#[derive(Clone)]
pub struct HealthState {
    pub start_time: Arc<Instant>,
    pub metriken: CallbridgeMetrics,
    /// Verbindungslimit des Relays (0 = unbegrenzt)
    pub max_endpoints: u32,
}

impl HealthState {
    pub fn neu(metriken: CallbridgeMetrics, max_endpoints: u32) -> Self {
        Self {
            start_time: Arc::new(Instant::now()),
            metriken,
            max_endpoints,
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Baut die aktuelle Antwort aus den Gauges
    pub fn momentaufnahme(&self) -> HealthResponse {
        let connected_endpoints = self.metriken.connected_endpoints.get();
        let voll = self.max_endpoints > 0 && connected_endpoints >= i64::from(self.max_endpoints);

        HealthResponse {
            status: if voll {
                HealthStatus::Degraded
            } else {
                HealthStatus::Healthy
            },
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: self.uptime_seconds(),
            connected_endpoints,
            active_sessions: self.metriken.sessions_active.get(),
        }
    }
}

/// Axum-Router fuer den `/health`-Endpunkt
pub fn health_router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .with_state(state)
}

/// `GET /health` – gibt den Relay-Status zurueck
async fn health_handler(State(state): State<HealthState>) -> impl IntoResponse {
    let response = state.momentaufnahme();

    let http_status = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (http_status, Json(response))
}
