use tracing_subscriber::EnvFilter;

/// Installs the process-wide tracing subscriber. Honors `RUST_LOG`; falls
/// back to `info` for the `pbs` target family. Safe to call once at
/// startup; a second call is a bug in the caller, not something this
/// function should quietly tolerate.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}
