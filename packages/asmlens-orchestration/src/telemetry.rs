//! Tracing initialization.

use std::sync::Once;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub const LOG_ENV: &str = "ASMLENS_LOG";

static INIT: Once = Once::new();

/// Installs the fmt subscriber filtered by `ASMLENS_LOG` (default `info`).
///
/// Format: `ASMLENS_LOG=asmlens_orchestration=debug,asmlens_storage=warn`.
/// Idempotent; later calls are no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    install(filter);
}

/// Same as [`init_tracing`] with an explicit directive string.
pub fn init_tracing_with_filter(directives: &str) {
    install(EnvFilter::new(directives));
}

fn install(filter: EnvFilter) {
    INIT.call_once(|| {
        // another subscriber may already be installed by an embedding host
        let _ = tracing_subscriber::registry()
            .with(fmt::layer().with_target(true))
            .with(filter)
            .try_init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init_tracing_with_filter("warn");
        init_tracing();
        tracing::info!("still alive");
    }
}
