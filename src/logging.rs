//! Subscriber setup for binaries embedding the backend

use tandem_core::ServerConfig;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Build the filter for `config`.
///
/// `RUST_LOG` wins when set. Otherwise the configured `log_level` applies,
/// and `debug = true` additionally enables SQL statement logging.
pub fn env_filter(config: &ServerConfig) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    let mut directives = config.log_level.as_directive().to_string();
    if config.debug {
        directives.push_str(",tandem::sql=debug");
    }
    EnvFilter::try_new(&directives).unwrap_or_else(|_| EnvFilter::new("error"))
}

/// Install a fmt subscriber for `config`.
///
/// Returns `false` if a global subscriber was already installed, in which
/// case nothing changes.
pub fn init_tracing(config: &ServerConfig) -> bool {
    let installed = tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(env_filter(config))
        .try_init()
        .is_ok();
    if installed {
        tracing::debug!(
            target: "tandem::config",
            level = config.log_level.as_directive(),
            sql = config.debug,
            "Logging initialized"
        );
    }
    installed
}
