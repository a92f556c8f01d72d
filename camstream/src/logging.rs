//! Logging initialisation

use tracing_subscriber::EnvFilter;

/// Install a fmt subscriber honouring `RUST_LOG`
///
/// Falls back to `debug` or `info` depending on `debug`. Returns false when a
/// global subscriber was already installed.
pub fn init_logging(debug: bool) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(fallback_directive(debug)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .is_ok()
}

/// Filter used when `RUST_LOG` is not set
pub fn fallback_directive(debug: bool) -> &'static str {
    if debug {
        "debug"
    } else {
        "info"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_follows_debug_flag() {
        assert_eq!(fallback_directive(true), "debug");
        assert_eq!(fallback_directive(false), "info");
    }

    #[test]
    fn test_second_init_is_not_an_error() {
        let _ = init_logging(true);
        assert!(!init_logging(false));
    }
}
