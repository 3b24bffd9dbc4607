//! Halo finder backends.
//!
//! The clustering itself happens in external programs. A backend starts the
//! program for a dataset and hands back what it produced.

pub mod external;
pub mod rockstar;

use crate::dataset::Dataset;
use crate::domain::HaloList;
use crate::error::Result;
use crate::finding::FinderOptions;

pub use external::{ExternalHaloFinder, RecordedListFinder};
pub use rockstar::{RockstarDataset, RockstarProcess};

/// A finder whose result is an in-memory halo list (FoF, HOP).
pub trait HaloFinderBackend: Send + Sync {
    fn name(&self) -> &str;

    fn find_halos(&self, ds: &Dataset, options: &FinderOptions) -> Result<Box<dyn HaloList>>;
}

/// A finder that writes its catalog to disk (Rockstar).
///
/// `run` blocks until the finder has exited.
pub trait RockstarBackend: Send + Sync {
    fn run(&self, ds: &Dataset, options: &FinderOptions) -> Result<()>;
}
