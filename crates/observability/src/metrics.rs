//! Prometheus-kompatible Metriken fuer Callbridge
//!
//! Registrierte Metriken:
//! - `callbridge_connected_endpoints` – Gauge: Aktuell verbundene Endpunkte
//! - `callbridge_sessions_active` – Gauge: Offene Call-Sessions
//! - `callbridge_signal_messages_total` – Counter: Weitergeleitete Negotiation-Nachrichten (kind)
//! - `callbridge_routing_errors_total` – Counter: Verworfene Nachrichten (reason)
//! - `callbridge_group_messages_total` – Counter: Zugestellte Gruppen-Nachrichten

use anyhow::Result;
use axum::{response::IntoResponse, routing::get, Router};
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Alle Callbridge-Prometheus-Metriken
///
/// Clone teilt die Registry und alle Metrik-Handles.
#[derive(Clone)]
pub struct CallbridgeMetrics {
    pub registry: Arc<Registry>,

    pub connected_endpoints: IntGauge,
    pub sessions_active: IntGauge,
    pub signal_messages_total: IntCounterVec,
    pub routing_errors_total: IntCounterVec,
    pub group_messages_total: IntCounter,
}

impl CallbridgeMetrics {
    /// Erstellt und registriert alle Metriken in einer neuen Registry
    pub fn neu() -> Result<Self> {
        let registry = Registry::new();

        let connected_endpoints = IntGauge::with_opts(Opts::new(
            "callbridge_connected_endpoints",
            "Anzahl aktuell verbundener Endpunkte",
        ))?;
        registry.register(Box::new(connected_endpoints.clone()))?;

        let sessions_active = IntGauge::with_opts(Opts::new(
            "callbridge_sessions_active",
            "Anzahl offener Call-Sessions",
        ))?;
        registry.register(Box::new(sessions_active.clone()))?;

        let signal_messages_total = IntCounterVec::new(
            Opts::new(
                "callbridge_signal_messages_total",
                "Weitergeleitete Negotiation-Nachrichten",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(signal_messages_total.clone()))?;

        let routing_errors_total = IntCounterVec::new(
            Opts::new(
                "callbridge_routing_errors_total",
                "Verworfene Negotiation-Nachrichten",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(routing_errors_total.clone()))?;

        let group_messages_total = IntCounter::with_opts(Opts::new(
            "callbridge_group_messages_total",
            "Zugestellte Gruppen-Nachrichten (pro Empfaenger)",
        ))?;
        registry.register(Box::new(group_messages_total.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            connected_endpoints,
            sessions_active,
            signal_messages_total,
            routing_errors_total,
            group_messages_total,
        })
    }

    /// Exportiert alle Metriken im Prometheus-Textformat
    pub fn exportieren(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Axum-Router fuer den `/metrics`-Endpunkt
pub fn metrics_router(metriken: CallbridgeMetrics) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metriken)
}

async fn metrics_handler(
    axum::extract::State(metriken): axum::extract::State<CallbridgeMetrics>,
) -> impl IntoResponse {
    match metriken.exportieren() {
        Ok(text) => (
            axum::http::StatusCode::OK,
            [(
                axum::http::header::CONTENT_TYPE,
                "text/plain; version=0.0.4",
            )],
            text,
        )
            .into_response(),
        Err(err) => {
            tracing::error!("Metriken-Export fehlgeschlagen: {err}");
            axum::http::StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
