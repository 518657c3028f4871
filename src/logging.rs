use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Initialize standard structured logging. `quiet` keeps only errors, for
/// CLI commands whose output is the terminal text itself.
pub fn init_logging(quiet: bool) {
    let level = if quiet { Level::ERROR } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber).ok(); // Ignore err in restart loop
}
