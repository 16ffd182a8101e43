use tracing::Level;

/// Installs a fmt subscriber at the given level.
///
/// Safe to call more than once; later calls are ignored once a global
/// subscriber is set.
pub fn init_tracing(level: Level) {
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(true)
        .try_init();
}
