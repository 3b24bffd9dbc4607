use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::debug;
use uuid::Uuid;

use crate::catalog::table::{FieldArray, FieldCategory, FieldTypes, HaloPropertyTable};
use crate::dataset::Dataset;
use crate::error::{HaloError, Result};

/// Receipt for a persisted halo catalog
#[derive(Debug, Clone, PartialEq)]
pub struct SavedCatalog {
    pub location: String,
    pub num_halos: usize,
    /// Content digest of the written bytes, when the store produces one
    pub digest: Option<String>,
}

/// Persistence backend for halo catalogs
pub trait CatalogStore {
    fn save(
        &self,
        dataset: &Dataset,
        data: &HaloPropertyTable,
        ftypes: &FieldTypes,
        num_halos: usize,
    ) -> Result<SavedCatalog>;
}

/// A catalog held by [`InMemoryCatalogStore`]
#[derive(Debug, Clone, PartialEq)]
pub struct StoredCatalog {
    pub dataset: String,
    pub data: HaloPropertyTable,
    pub ftypes: FieldTypes,
}

/// In-memory store for development/testing. Clones share the same storage.
#[derive(Clone, Default)]
pub struct InMemoryCatalogStore {
    catalogs: Arc<Mutex<Vec<StoredCatalog>>>,
}

impl InMemoryCatalogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every catalog saved so far, in save order
    pub fn catalogs(&self) -> Vec<StoredCatalog> {
        self.catalogs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl CatalogStore for InMemoryCatalogStore {
    fn save(
        &self,
        dataset: &Dataset,
        data: &HaloPropertyTable,
        ftypes: &FieldTypes,
        num_halos: usize,
    ) -> Result<SavedCatalog> {
        let mut catalogs = self
            .catalogs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        catalogs.push(StoredCatalog {
            dataset: dataset.name.clone(),
            data: data.clone(),
            ftypes: ftypes.clone(),
        });

        debug!("Stored catalog #{} for {} in memory", catalogs.len(), dataset.name);
        Ok(SavedCatalog {
            location: format!("memory:{}/{}", dataset.name, catalogs.len() - 1),
            num_halos,
            digest: None,
        })
    }
}

/// On-disk layout written by [`JsonCatalogStore`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogDocument {
    pub run_id: Uuid,
    pub dataset: String,
    pub created_at: DateTime<Utc>,
    pub num_halos: usize,
    pub fields: BTreeMap<String, CatalogField>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogField {
    pub field_type: FieldCategory,
    #[serde(flatten)]
    pub array: FieldArray,
}

/// Writes each catalog to `<root>/<dataset>/halo_catalog.json`.
pub struct JsonCatalogStore {
    root: PathBuf,
}

impl JsonCatalogStore {
    pub const FILE_NAME: &'static str = "halo_catalog.json";

    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn catalog_path(&self, dataset: &Dataset) -> PathBuf {
        self.root.join(&dataset.name).join(Self::FILE_NAME)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<CatalogDocument> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

impl CatalogStore for JsonCatalogStore {
    fn save(
        &self,
        dataset: &Dataset,
        data: &HaloPropertyTable,
        ftypes: &FieldTypes,
        num_halos: usize,
    ) -> Result<SavedCatalog> {
        let mut fields = BTreeMap::new();
        for (name, array) in data.iter() {
            let field_type = *ftypes.get(name).ok_or_else(|| {
                HaloError::Config(format!("field '{}' has no storage category", name))
            })?;
            fields.insert(
                name.to_string(),
                CatalogField {
                    field_type,
                    array: array.clone(),
                },
            );
        }

        let document = CatalogDocument {
            run_id: Uuid::new_v4(),
            dataset: dataset.name.clone(),
            created_at: Utc::now(),
            num_halos,
            fields,
        };
        let bytes = serde_json::to_vec_pretty(&document)?;

        let path = self.catalog_path(dataset);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, &bytes)?;

        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        let digest = format!("sha256:{}", hex::encode(hasher.finalize()));

        debug!("Wrote {} bytes to {}", bytes.len(), path.display());
        Ok(SavedCatalog {
            location: path.display().to_string(),
            num_halos,
            digest: Some(digest),
        })
    }
}
