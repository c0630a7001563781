use tracing_subscriber::{fmt, EnvFilter};

use crate::{Error, Result};

/// Initialize logging/tracing for a telepyth binary.
///
/// Default: info for our crates, warn-ish noise from dependencies filtered by
/// the same level. Can be overridden with `RUST_LOG`.
pub fn init(service_name: &str) -> Result<()> {
    let crate_name = service_name.replace('-', "_");
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "info,telepyth=info,telepyth_core=info,telepyth_http=info,telepyth_telegram=info,{crate_name}=info"
        ))
    });

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(true)
        .try_init()
        .map_err(|e| Error::Config(format!("failed to install log subscriber: {e}")))
}
