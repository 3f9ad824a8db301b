use tracing_subscriber::EnvFilter;

const LOG_ENV_VAR: &str = "KEEPTODO_LOG";

/// Diagnostics go to stderr so command output on stdout stays parseable.
pub fn init_logging() {
    let env_filter =
        EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new("warn"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
