use tracing_subscriber::{EnvFilter, Registry, prelude::*};

/// Initialize tracing with a JSON formatter. The `LOG` environment variable
/// takes precedence over the configured level.
pub fn init(level: &str) {
    let logger = tracing_subscriber::fmt::layer().json();
    let env_filter = EnvFilter::try_from_env("LOG")
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    Registry::default().with(env_filter).with(logger).init();
}
