use tracing_subscriber::EnvFilter;

/// Installs the global subscriber, honouring `RUST_LOG`. Later calls are
/// no-ops, so tests and binaries may both call it.
pub fn init_tracing() {
    let env_filter = std::env::var("RUST_LOG")
        .map(EnvFilter::new)
        .unwrap_or_else(|_| EnvFilter::new("linkup_feed=info,linkup_store=info"));
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(env_filter)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}
