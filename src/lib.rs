pub mod agent_core;
pub mod inference;

/// Async mutex for types that require `.await` inside their methods.
pub type TokioMutex<T> = tokio::sync::Mutex<T>;

/// Initialize the tracing subscriber. Logs go to stderr so stdout stays free
/// for the event stream.
///
/// `RUST_LOG` overrides the default filter; `LEGALDRAFT_LOG_FORMAT=json`
/// switches to one JSON object per line.
pub fn init_tracing() {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("legaldraft=info,warn"));

    let json = std::env::var("LEGALDRAFT_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let builder = fmt::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false);

    // A second init (tests, embedding) keeps the first subscriber.
    let result = if json {
        builder.json().try_init()
    } else {
        builder.with_ansi(false).try_init()
    };
    if result.is_err() {
        return;
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = std::process::id(),
        format = if json { "json" } else { "text" },
        "=== LegalDraft starting ==="
    );
}
