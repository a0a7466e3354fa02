use anyhow::Result;
use tracing_subscriber::fmt;
use tracing_subscriber::filter::LevelFilter;

/// Installs the stderr subscriber. Warnings (skipped regions, retries) are
/// always shown; `verbose` adds per-stage and per-candidate detail.
pub fn init(verbose: bool) -> Result<()> {
    let level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::WARN
    };
    let _ = fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .try_init();
    Ok(())
}
