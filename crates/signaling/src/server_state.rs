//! Gemeinsamer Server-Zustand fuer den Signaling-Service
//!
//! Haelt alle geteilten Komponenten, die sicher zwischen tokio-Tasks
//! geteilt werden koennen.

use callbridge_observability::CallbridgeMetrics;
use callbridge_protocol::wire::DEFAULT_MAX_FRAME_SIZE;
use std::sync::Arc;
use std::time::Instant;

use crate::broadcast::{EventBroadcaster, SEND_QUEUE_GROESSE};
use crate::groups::GroupRelay;
use crate::registry::SessionRegistry;
use crate::router::SignalingRouter;

/// Konfiguration fuer den Signaling-Service
#[derive(Debug, Clone)]
pub struct SignalingConfig {
    /// Anzeigename des Relays
    pub server_name: String,
    /// Maximale gleichzeitige Verbindungen (0 = unbegrenzt)
    pub max_clients: u32,
    /// Keepalive-Intervall in Sekunden
    pub keepalive_sek: u64,
    /// Timeout fuer inaktive Verbindungen in Sekunden
    pub verbindungs_timeout_sek: u64,
    /// Groesse der Send-Queue pro Endpunkt
    pub send_queue_groesse: usize,
    /// Maximale Frame-Groesse in Bytes
    pub max_frame_groesse: usize,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            server_name: "Callbridge Relay".to_string(),
            max_clients: 512,
            keepalive_sek: 30,
            verbindungs_timeout_sek: 90,
            send_queue_groesse: SEND_QUEUE_GROESSE,
            max_frame_groesse: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

/// Gemeinsamer Relay-Zustand (thread-safe, Arc-geteilt)
pub struct SignalingState {
    pub config: Arc<SignalingConfig>,
    /// Send-Queues aller verbundenen Endpunkte
    pub broadcaster: EventBroadcaster,
    pub registry: SessionRegistry,
    pub router: SignalingRouter,
    pub groups: GroupRelay,
    pub metriken: CallbridgeMetrics,
    /// Startzeitpunkt des Relays (fuer Uptime-Berechnung)
    pub start_time: Instant,
}

impl SignalingState {
    pub fn neu(config: SignalingConfig, metriken: CallbridgeMetrics) -> Arc<Self> {
        let broadcaster = EventBroadcaster::mit_queue_groesse(config.send_queue_groesse);
        let registry = SessionRegistry::neu();
        let router = SignalingRouter::neu(registry.clone(), broadcaster.clone(), metriken.clone());
        let groups = GroupRelay::neu(broadcaster.clone());

        Arc::new(Self {
            config: Arc::new(config),
            broadcaster,
            registry,
            router,
            groups,
            metriken,
            start_time: Instant::now(),
        })
    }

    /// Gibt die Uptime in Sekunden zurueck
    pub fn uptime_sek(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Prueft ob eine weitere Verbindung angenommen werden darf
    pub fn hat_platz(&self) -> bool {
        self.config.max_clients == 0
            || (self.broadcaster.endpoint_anzahl() as u64) < u64::from(self.config.max_clients)
    }
}
