//! callbridge-server – Bibliotheks-Root
//!
//! Verdrahtet Konfiguration, Signaling-Relay und Observability zu einem
//! lauffaehigen Prozess und stellt den Einstiegspunkt fuer
//! Integrationstests bereit.

pub mod config;

use anyhow::{Context, Result};
use callbridge_observability::{observability_server_starten, CallbridgeMetrics};
use callbridge_signaling::{SignalingServer, SignalingState};
use config::ServerConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Haelt die Konfiguration bis zum Start zusammen
pub struct Server {
    pub config: ServerConfig,
}

/// Gestartete Subsysteme eines Servers
pub struct LaufenderServer {
    /// Tatsaechlich gebundene Signaling-Adresse (relevant bei Port 0)
    pub signaling_adresse: SocketAddr,
    /// Gemeinsamer Relay-Zustand
    pub state: Arc<SignalingState>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Server {
    /// Erstellt einen neuen Server aus der gegebenen Konfiguration
    pub fn neu(config: ServerConfig) -> Self {
        Self { config }
    }

    /// Bindet alle Listener und startet die Subsysteme im Hintergrund
    ///
    /// Reihenfolge:
    /// 1. Konfiguration pruefen
    /// 2. Metriken anlegen
    /// 3. Signaling-Listener binden und starten
    /// 4. Observability-Server starten (falls aktiviert)
    pub async fn binden(self) -> Result<LaufenderServer> {
        self.config.validieren()?;

        let metriken = CallbridgeMetrics::neu().context("Metriken konnten nicht erstellt werden")?;
        let state = SignalingState::neu(self.config.signaling_config(), metriken.clone());

        let tcp_adresse = self.config.tcp_bind_adresse()?;
        let signaling = SignalingServer::binden(state.clone(), tcp_adresse)
            .await
            .with_context(|| format!("Signaling-Listener auf {tcp_adresse} nicht bindbar"))?;
        let signaling_adresse = signaling.lokale_adresse()?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut tasks = Vec::new();

        let rx = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = signaling.starten(rx).await {
                tracing::error!(fehler = %e, "Signaling-Server beendet mit Fehler");
            }
        }));

        if self.config.observability.aktiviert {
            let obs_adresse = self.config.observability_bind_adresse()?;
            let max_clients = self.config.server.max_clients;
            tasks.push(tokio::spawn(async move {
                if let Err(e) =
                    observability_server_starten(obs_adresse, metriken, max_clients, shutdown_rx).await
                {
                    tracing::error!(fehler = %e, "Observability-Server beendet mit Fehler");
                }
            }));
        }

        tracing::info!(
            server_name = %self.config.server.name,
            signaling = %signaling_adresse,
            max_clients = self.config.server.max_clients,
            observability = self.config.observability.aktiviert,
            "Server gestartet"
        );

        Ok(LaufenderServer {
            signaling_adresse,
            state,
            shutdown_tx,
            tasks,
        })
    }

    /// Startet alle Subsysteme und laeuft bis zum Shutdown-Signal (Ctrl-C)
    pub async fn starten(self) -> Result<()> {
        let laufend = self.binden().await?;

        tracing::info!("Server laeuft. Warte auf Shutdown-Signal (Ctrl-C)...");
        tokio::signal::ctrl_c().await?;
        tracing::info!("Shutdown-Signal empfangen, Server wird beendet");

        laufend.stoppen().await;
        Ok(())
    }
}

impl LaufenderServer {
    /// Signalisiert allen Subsystemen das Ende und wartet auf sie
    pub async fn stoppen(self) {
        self.shutdown_tx.send_replace(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::warn!(fehler = %e, "Server-Task nicht sauber beendet");
            }
        }
        tracing::info!("Server gestoppt");
    }
}
