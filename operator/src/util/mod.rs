pub mod backoff;
pub mod concurrency;
pub mod metrics;
pub mod mutexmap;
pub mod patch;
pub mod trigger;

pub(crate) mod colors;

mod error;

pub use error::*;

/// Field manager name used for every server-side write this process makes.
pub(crate) const MANAGER_NAME: &str = "dr-syncer";
