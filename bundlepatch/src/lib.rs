//! bundlepatch - content-addressed patch sync for game asset bundles
//!
//! This library compares the baseline manifest shipped with an application
//! against the latest published manifest, downloads the bundles whose hashes
//! changed, verifies and caches them, and loads bundles with their
//! dependencies on demand.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use bundlepatch::config::SyncConfig;
//! use bundlepatch::lifecycle::{BundleLifecycleManager, FileBundleLoader};
//! use bundlepatch::sync::SyncOrchestrator;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SyncConfig::new("https://cdn.example.com/game")
//!     .with_baseline_dir("/opt/game/bundles")
//!     .with_preferred_variant("en");
//!
//! let mut session = SyncOrchestrator::with_default_transport(config.clone())?;
//! let outcome = session.run_to_completion(Duration::from_millis(50))?;
//!
//! let mut bundles = BundleLifecycleManager::from_config(FileBundleLoader::new(), outcome, &config);
//! bundles.acquire("scenes/intro.bundle")?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod checksum;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod manifest;
pub mod planner;
pub mod platform;
pub mod publish;
pub mod sync;
pub mod transfer;

pub use error::{ItemError, SyncError, SyncResult};
pub use lifecycle::{BundleLifecycleManager, LifecycleError};
pub use manifest::Manifest;
pub use platform::Platform;
pub use sync::{SyncOrchestrator, SyncOutcome, SyncState};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
