use tracing_subscriber::{fmt, EnvFilter};

/// Installs a process-wide tracing subscriber.
///
/// Honors `RUST_LOG` if set, otherwise defaults to `info`. When `PINAX_LOG_JSON=1`
/// is set, emits newline-delimited JSON instead of the human-readable format,
/// matching the switch an orchestrator expects when scraping logs from a
/// sidecar rather than a terminal.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let json = std::env::var("PINAX_LOG_JSON")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    let subscriber = fmt().with_env_filter(filter);
    if json {
        let _ = subscriber.json().try_init();
    } else {
        let _ = subscriber.try_init();
    }
}
