//! Tracing setup and a prelude for the rest of the crate.
//!
//! Modules import `crate::tracing::prelude::*` to get the level macros
//! without repeating the extern-crate path everywhere.

use tracing_subscriber::EnvFilter;

pub mod prelude {
    pub use ::tracing::{debug, error, info, trace, warn};
}

/// Install a subscriber reading the `REVEIL_LOG` environment variable,
/// defaulting to `info`. Intended for binaries; the library never calls it.
pub fn init() {
    let filter = EnvFilter::try_from_env("REVEIL_LOG")
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}
