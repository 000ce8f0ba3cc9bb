/// Logging initialization for hosts and tests.
///
/// Installs a `tracing-subscriber` fmt subscriber writing to stderr. `RUST_LOG`
/// wins when set; otherwise the core logs at debug and everything else at info.
///
/// Safe to call more than once: later calls are no-ops.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quad_core=debug,info".into()),
        )
        .with_target(true)
        .try_init();
}
