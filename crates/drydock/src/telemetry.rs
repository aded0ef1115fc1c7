//! Process-wide tracing setup for the `drydock` binary and embedders.
//!
//! Log lines go to stderr; stdout belongs to the run outcome.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Filter used when `RUST_LOG` is unset: `level` for drydock, warnings for
/// everything else.
pub fn default_filter(level: Level) -> String {
    format!("warn,drydock={level},drydock_cli={level}", level = level.as_str().to_ascii_lowercase())
}

/// Install the global subscriber. `RUST_LOG` wins over `level`.
///
/// Only the first call in a process takes effect.
pub fn init_tracing(json: bool, level: Level) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(level)));

    let layer = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(layer.json().with_current_span(true))
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(layer)
            .try_init()
            .ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_scopes_crates() {
        let filter = default_filter(Level::DEBUG);
        assert_eq!(filter, "warn,drydock=debug,drydock_cli=debug");
        assert!(EnvFilter::try_new(filter).is_ok());
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init_tracing(false, Level::INFO);
        init_tracing(true, Level::DEBUG);
    }
}
