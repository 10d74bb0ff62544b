//! # Observability Infrastructure
//!
//! Structured logging for the edgeplane control plane, built on the tracing
//! ecosystem. Level selection honors `RUST_LOG` first and falls back to the
//! configured default; output is plain text or JSON lines.

use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::config::{LogSettings, Settings};
use crate::errors::Result;

/// Initialize the global tracing subscriber
///
/// Safe to call more than once; later calls are no-ops (integration tests
/// initialize logging per-process).
pub fn init_tracing(config: &LogSettings) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let result = if config.json {
        tracing::subscriber::set_global_default(
            FmtSubscriber::builder().with_env_filter(filter).json().finish(),
        )
    } else {
        tracing::subscriber::set_global_default(
            FmtSubscriber::builder().with_env_filter(filter).finish(),
        )
    };

    // Subscriber already set elsewhere (e.g. integration tests); ignore.
    let _ = result;

    Ok(())
}

/// Log configuration at startup
pub fn log_startup_info(settings: &Settings) {
    tracing::info!(
        xds_address = %format!("{}:{}", settings.xds.bind_address, settings.xds.port),
        node_id = %settings.xds.node_id,
        gateway_file = %settings
            .gateway_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<built-in default>".to_string()),
        "Edgeplane control plane configuration"
    );
}

/// Create a tracing span for xDS operations
#[macro_export]
macro_rules! xds_span {
    ($operation:expr, $node_id:expr) => {
        tracing::info_span!(
            "xds_operation",
            operation = %$operation,
            node_id = %$node_id,
            operation_id = %uuid::Uuid::new_v4()
        )
    };
    ($operation:expr, $node_id:expr, $($field:tt)*) => {
        tracing::info_span!(
            "xds_operation",
            operation = %$operation,
            node_id = %$node_id,
            operation_id = %uuid::Uuid::new_v4(),
            $($field)*
        )
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_is_idempotent() {
        let config = LogSettings::default();
        init_tracing(&config).expect("first init");
        init_tracing(&config).expect("second init is a no-op");
    }

    #[test]
    fn test_macros_compile() {
        let _span = xds_span!("assemble", "node-1");
        let _span = xds_span!("publish", "node-1", version = 3);
    }

    #[test]
    fn test_log_startup_info() {
        let settings = Settings::default();

        // This should not panic
        log_startup_info(&settings);
    }
}
