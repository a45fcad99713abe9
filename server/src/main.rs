//! Callbridge Server – Einstiegspunkt
//!
//! Laedt die Konfiguration, initialisiert das Logging und startet das Relay.

use anyhow::Result;
use callbridge_observability::logging_initialisieren;
use callbridge_server::{config::ServerConfig, Server};

#[tokio::main]
async fn main() -> Result<()> {
    let config_pfad = ServerConfig::pfad_aus_umgebung();
    let config = ServerConfig::laden(&config_pfad)?;

    logging_initialisieren(&config.logging.level, &config.logging.format);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_pfad,
        "Callbridge Server wird initialisiert"
    );

    Server::neu(config).starten().await
}
