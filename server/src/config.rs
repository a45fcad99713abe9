//! Server-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! sinnvolle Standardwerte, sodass das Relay ohne Konfigurationsdatei
//! lauffaehig ist.

use anyhow::{bail, Context};
use callbridge_observability::logging::{log_format_gueltig, log_level_gueltig};
use callbridge_signaling::SignalingConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Umgebungsvariable mit dem Pfad zur Konfigurationsdatei
pub const ENV_CONFIG_PFAD: &str = "CALLBRIDGE_CONFIG";

/// Standard-Pfad wenn `CALLBRIDGE_CONFIG` nicht gesetzt ist
pub const STANDARD_CONFIG_PFAD: &str = "config.toml";

/// Vollstaendige Server-Konfiguration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Allgemeine Server-Einstellungen
    pub server: ServerEinstellungen,
    /// Netzwerk-Einstellungen
    pub netzwerk: NetzwerkEinstellungen,
    /// Keepalive und Queues der Verbindungen
    pub signaling: SignalingEinstellungen,
    /// Logging-Einstellungen
    pub logging: LoggingEinstellungen,
    /// Observability-Einstellungen (Metriken, Health)
    pub observability: ObservabilityEinstellungen,
}

/// Allgemeine Server-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerEinstellungen {
    /// Anzeigename des Relays
    pub name: String,
    /// Maximale Anzahl gleichzeitiger Endpunkte (0 = unbegrenzt)
    pub max_clients: u32,
}

impl Default for ServerEinstellungen {
    fn default() -> Self {
        Self {
            name: "Callbridge Relay".into(),
            max_clients: 512,
        }
    }
}

/// Netzwerk-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetzwerkEinstellungen {
    /// Bind-Adresse fuer TCP und Observability
    pub bind_adresse: String,
    /// Port fuer Signaling-Verbindungen
    pub tcp_port: u16,
    /// Maximale Frame-Groesse in Bytes
    pub max_frame_groesse: usize,
}

impl Default for NetzwerkEinstellungen {
    fn default() -> Self {
        Self {
            bind_adresse: "0.0.0.0".into(),
            tcp_port: 9987,
            max_frame_groesse: SignalingConfig::default().max_frame_groesse,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingEinstellungen {
    /// Ping-Intervall in Sekunden
    pub keepalive_sek: u64,
    /// Verbindungen ohne Lebenszeichen werden nach dieser Zeit getrennt
    pub verbindungs_timeout_sek: u64,
    /// Groesse der Send-Queue pro Endpunkt
    pub send_queue_groesse: usize,
}

impl Default for SignalingEinstellungen {
    fn default() -> Self {
        let standard = SignalingConfig::default();
        Self {
            keepalive_sek: standard.keepalive_sek,
            verbindungs_timeout_sek: standard.verbindungs_timeout_sek,
            send_queue_groesse: standard.send_queue_groesse,
        }
    }
}

/// Logging-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Log-Level: "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// Format: "json" oder "text"
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

/// Observability-Einstellungen (Metriken + Health-Check)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityEinstellungen {
    /// Aktiviert den Observability-Server
    pub aktiviert: bool,
    /// Port fuer Metriken und Health (Standard: 9300)
    pub port: u16,
}

impl Default for ObservabilityEinstellungen {
    fn default() -> Self {
        Self {
            aktiviert: true,
            port: 9300,
        }
    }
}

impl ServerConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> anyhow::Result<Self> {
        match std::fs::read_to_string(pfad) {
            Ok(inhalt) => {
                let config: Self = toml::from_str(&inhalt)
                    .map_err(|e| anyhow::anyhow!("Konfigurationsfehler in '{pfad}': {e}"))?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "Konfigurationsdatei '{pfad}' nicht lesbar: {e}"
            )),
        }
    }

    /// Pfad der Konfigurationsdatei aus `CALLBRIDGE_CONFIG` oder Standard
    pub fn pfad_aus_umgebung() -> String {
        std::env::var(ENV_CONFIG_PFAD).unwrap_or_else(|_| STANDARD_CONFIG_PFAD.into())
    }

    /// Prueft Werte die serde allein nicht abfangen kann
    pub fn validieren(&self) -> anyhow::Result<()> {
        if !log_level_gueltig(&self.logging.level) {
            bail!("Ungueltiger Log-Level '{}'", self.logging.level);
        }
        if !log_format_gueltig(&self.logging.format) {
            bail!("Ungueltiges Log-Format '{}'", self.logging.format);
        }
        if self.netzwerk.max_frame_groesse == 0 {
            bail!("max_frame_groesse muss groesser als 0 sein");
        }
        if self.signaling.keepalive_sek == 0 {
            bail!("keepalive_sek muss groesser als 0 sein");
        }
        if self.signaling.verbindungs_timeout_sek <= self.signaling.keepalive_sek {
            bail!(
                "verbindungs_timeout_sek ({}) muss groesser als keepalive_sek ({}) sein",
                self.signaling.verbindungs_timeout_sek,
                self.signaling.keepalive_sek
            );
        }
        self.tcp_bind_adresse()?;
        Ok(())
    }

    /// Gibt die Bind-Adresse fuer Signaling-Verbindungen zurueck
    pub fn tcp_bind_adresse(&self) -> anyhow::Result<SocketAddr> {
        adresse(&self.netzwerk.bind_adresse, self.netzwerk.tcp_port)
    }

    /// Gibt die Bind-Adresse fuer den Observability-Server zurueck
    pub fn observability_bind_adresse(&self) -> anyhow::Result<SocketAddr> {
        adresse(&self.netzwerk.bind_adresse, self.observability.port)
    }

    /// Uebersetzt die Datei-Konfiguration in die Relay-Konfiguration
    pub fn signaling_config(&self) -> SignalingConfig {
        SignalingConfig {
            server_name: self.server.name.clone(),
            max_clients: self.server.max_clients,
            keepalive_sek: self.signaling.keepalive_sek,
            verbindungs_timeout_sek: self.signaling.verbindungs_timeout_sek,
            send_queue_groesse: self.signaling.send_queue_groesse,
            max_frame_groesse: self.netzwerk.max_frame_groesse,
        }
    }
}

fn adresse(host: &str, port: u16) -> anyhow::Result<SocketAddr> {
    format!("{host}:{port}")
        .parse()
        .with_context(|| format!("Ungueltige Bind-Adresse '{host}:{port}'"))
}
