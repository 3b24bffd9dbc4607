//! Halo catalog context shared by finding methods and callbacks.

pub mod table;

use tracing::{info, info_span};

use crate::callbacks::{run_callbacks, HaloCallback};
use crate::dataset::Dataset;
use crate::domain::HaloList;
use crate::error::Result;
use crate::finding::{FinderOptions, FindingMethodRegistry, FindingOutcome};
use crate::metrics::CatalogMetrics;
use crate::storage::{CatalogStore, SavedCatalog};
use crate::units::UnitSystem;

pub use table::{FieldArray, FieldCategory, FieldTypes, FieldValues, HaloPropertyTable};

/// The dataset being analyzed plus the place its halo catalogs are saved to.
pub struct HaloCatalog {
    pub data_ds: Dataset,
    store: Box<dyn CatalogStore>,
    saved: Vec<SavedCatalog>,
}

impl HaloCatalog {
    pub fn new(data_ds: Dataset, store: impl CatalogStore + 'static) -> Self {
        Self {
            data_ds,
            store: Box::new(store),
            saved: Vec::new(),
        }
    }

    pub fn unit_system(&self) -> UnitSystem {
        self.data_ds.unit_system()
    }

    /// Validates and persists a halo property table.
    pub fn save_catalog(
        &mut self,
        data: HaloPropertyTable,
        ftypes: FieldTypes,
    ) -> Result<SavedCatalog> {
        let num_halos = data.validate(&ftypes)?;
        let saved = self.store.save(&self.data_ds, &data, &ftypes, num_halos)?;

        CatalogMetrics::record_catalog_saved(num_halos, data.len());
        info!(
            dataset = %self.data_ds.name,
            halos = num_halos,
            fields = data.len(),
            location = %saved.location,
            "Saved halo catalog"
        );
        self.saved.push(saved.clone());
        Ok(saved)
    }

    /// Catalogs saved through this context, in save order
    pub fn saved_catalogs(&self) -> &[SavedCatalog] {
        &self.saved
    }

    /// Runs the finding method registered under `name` against this catalog,
    /// with `options` merged over the method's bound keyword arguments.
    pub fn find_halos(
        &mut self,
        methods: &FindingMethodRegistry,
        name: &str,
        options: FinderOptions,
    ) -> Result<Option<FindingOutcome>> {
        let method = methods.lookup(name)?.bind(Vec::new(), options);
        let span = info_span!("finding_method", method = %name, dataset = %self.data_ds.name);
        let _enter = span.enter();
        method.call(self)
    }

    /// Applies callbacks to every halo of `halos`, see [`run_callbacks`].
    pub fn apply_callbacks(
        &self,
        halos: &dyn HaloList,
        callbacks: &mut [Box<dyn HaloCallback>],
    ) -> Result<usize> {
        run_callbacks(self, halos, callbacks)
    }
}
