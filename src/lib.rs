pub mod callbacks;
pub mod catalog;
pub mod config;
pub mod constants;
pub mod dataset;
pub mod domain;
pub mod error;
pub mod finding;
pub mod logging;
pub mod metrics;
pub mod registry;
pub mod storage;
pub mod units;

// Entry points shared by the CLI and library users
pub use callbacks::{builtin_callbacks, CallbackRegistry, HaloCallback};
pub use catalog::HaloCatalog;
pub use error::{HaloError, Result};
pub use finding::{builtin_finding_methods, FinderBackends, FindingMethodRegistry, FindingOutcome};
