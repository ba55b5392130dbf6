use std::sync::Once;

use tracing::info;
use tracing_subscriber::EnvFilter;

/// Engine-specific log filter; takes precedence over `RUST_LOG` so the
/// engine can be turned up without touching the host's global setting.
pub const LOG_FILTER_ENV: &str = "MM_LOG";

const DEFAULT_DIRECTIVES: &str = "info";

static INIT: Once = Once::new();

/// Install the fmt subscriber once per process. Every service calls this on
/// startup; whichever runs first wins the installation and the rest only
/// announce themselves.
pub fn init(service_name: &str) {
    INIT.call_once(|| {
        let env_filter = match std::env::var(LOG_FILTER_ENV) {
            Ok(directives) => EnvFilter::new(directives),
            Err(_) => EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES)),
        };
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .compact()
            .init();
    });

    info!(service = service_name, "telemetry initialized");
}
