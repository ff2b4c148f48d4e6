//! What-if carrier pricing over a merchant's historical shipments.
//!
//! Load a shipment dataset and a pricing template through a
//! [`Coordinator`], then ask it for portfolio metrics per candidate carrier
//! selection. Results are cached in memory and on disk, keyed by a hash of
//! the inputs.

pub mod config;
pub mod coordinator;
pub mod domain;
pub mod error;
pub mod formula;
pub mod infra;
pub mod util;

pub use config::{EngineConfig, MerchantConfig, TemplateLayout};
pub use coordinator::{Computed, Coordinator, SourceHash};
pub use domain::{MetricsResult, Selection};
pub use error::{EngineError, EngineResult};

use tracing_subscriber::EnvFilter;

/// Installs the global `fmt` subscriber. `RUST_LOG` overrides the default
/// `info` level. Safe to call more than once.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
