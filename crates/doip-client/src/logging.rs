//! Process-wide initialisation

use std::sync::OnceLock;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

static INIT: OnceLock<()> = OnceLock::new();

/// Install a `tracing` subscriber filtered by `RUST_LOG`
/// (default `doip_client=info`).
///
/// Idempotent. If the host application already installed a global
/// subscriber, that one is kept.
pub fn init() {
    INIT.get_or_init(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("doip_client=info"));
        let _ = tracing_subscriber::registry()
            .with(fmt::layer().with_target(false))
            .with(filter)
            .try_init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init();
        init();
        assert!(INIT.get().is_some());
    }
}
