//! Structured Logging Setup via tracing-subscriber
//!
//! Konfigurierbar per Umgebungsvariable:
//! - `CB_LOG_LEVEL`: Log-Level oder EnvFilter-Direktive, Standard aus der Config
//! - `CB_LOG_FORMAT`: Format (text/json), Standard aus der Config
//!
//! Die Umgebung hat Vorrang vor `[logging]` in der Konfigurationsdatei.

use tracing_subscriber::{fmt, EnvFilter};

/// Umgebungsvariable fuer den Log-Level
pub const ENV_LOG_LEVEL: &str = "CB_LOG_LEVEL";

/// Umgebungsvariable fuer das Log-Format
pub const ENV_LOG_FORMAT: &str = "CB_LOG_FORMAT";

/// Initialisiert das Logging-System.
///
/// `level` und `format` kommen aus der Konfiguration und werden von
/// `CB_LOG_LEVEL` / `CB_LOG_FORMAT` ueberschrieben. Ein bereits
/// installierter Subscriber bleibt bestehen (z.B. in Tests).
pub fn logging_initialisieren(level: &str, format: &str) {
    let filter = EnvFilter::try_from_env(ENV_LOG_LEVEL)
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let format = format_aufloesen(std::env::var(ENV_LOG_FORMAT).ok(), format);

    let ergebnis = match format.as_str() {
        "json" => fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(true)
            .with_current_span(true)
            .try_init(),
        _ => fmt().with_env_filter(filter).with_target(true).try_init(),
    };

    if ergebnis.is_err() {
        tracing::debug!("Logging war bereits initialisiert");
    }
}

/// Waehlt das effektive Log-Format: Umgebung vor Config, ungueltige Werte
/// fallen auf `text` zurueck
pub fn format_aufloesen(aus_env: Option<String>, aus_config: &str) -> String {
    let kandidat = aus_env.unwrap_or_else(|| aus_config.to_string());
    if log_format_gueltig(&kandidat) {
        kandidat
    } else {
        "text".to_string()
    }
}

/// Validiert ob ein Log-Level-String gueltig ist.
pub fn log_level_gueltig(level: &str) -> bool {
    matches!(level, "trace" | "debug" | "info" | "warn" | "error")
}

/// Validiert ob ein Log-Format-String gueltig ist.
pub fn log_format_gueltig(format: &str) -> bool {
    matches!(format, "text" | "json")
}
