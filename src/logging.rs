use anyhow::Result;
use tracing_subscriber::{EnvFilter, fmt};

/// Installs the stderr subscriber. Silent unless `verbose`; `RUST_LOG`
/// narrows or widens the default `info` filter.
pub fn init(verbose: bool) -> Result<()> {
    if !verbose {
        return Ok(());
    }
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .try_init();
    Ok(())
}
