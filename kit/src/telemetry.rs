use tracing_subscriber::EnvFilter;

/// Initialize a simple stdout tracing subscriber for development.
///
/// `RUST_LOG` takes precedence over the built-in filter.
pub fn init_stdout_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tessera_runtime=debug"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Like [`init_stdout_tracing`], but does nothing if a global subscriber is
/// already installed. Safe to call from every test.
pub fn try_init_stdout_tracing() -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tessera_runtime=debug"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init()
        .is_ok()
}
