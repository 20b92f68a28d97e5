//! Tracing subscriber setup
//!
//! The library itself only emits `tracing` events. Hosts that do not install
//! their own subscriber can call [`init`] once at startup.

use std::sync::OnceLock;
use tracing_subscriber::EnvFilter;

static INSTALLED: OnceLock<bool> = OnceLock::new();

/// Install a formatting subscriber.
///
/// `RUST_LOG` takes precedence over `default_filter` when set. Calling this
/// more than once is harmless; only the first call has any effect. Returns
/// whether a subscriber from this crate is active.
pub fn init(default_filter: &str) -> bool {
    *INSTALLED.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(default_filter))
            .unwrap_or_else(|_| EnvFilter::new("info"));

        let installed = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init()
            .is_ok();
        if installed {
            tracing::debug!("tracing subscriber installed");
        }
        installed
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        let first = init("enquiry_pipeline=debug");
        let second = init("warn");
        assert_eq!(first, second);
    }

    #[test]
    fn test_bad_filter_does_not_panic() {
        // Falls back to "info" when the directive cannot be parsed
        let _ = init("[[not a filter");
    }
}
