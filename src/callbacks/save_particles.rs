use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use tracing::{debug, info};

use super::HaloCallback;
use crate::catalog::HaloCatalog;
use crate::constants::SAVE_PARTICLES_CALLBACK;
use crate::domain::{Halo, ParticleArray};
use crate::error::{HaloError, Result};
use crate::finding::FinderOptions;

pub const DEFAULT_PARTICLE_ARRAY: &str = "particle_ids";

/// One line of the output file
#[derive(Debug, Serialize)]
struct ParticleGroup<'a> {
    group: String,
    datasets: BTreeMap<&'a str, ParticleArray>,
}

/// Writes member particle arrays of every halo to a JSON-lines file.
///
/// Each halo becomes one line holding its group name (`/Halo00000042`) and
/// the requested arrays. The file is opened on initialize and closed on
/// finalize.
pub struct SaveParticles {
    filename: PathBuf,
    arr_names: Vec<String>,
    handle: Option<BufWriter<File>>,
    written: usize,
}

impl SaveParticles {
    pub fn new(filename: impl Into<PathBuf>, arr_names: Vec<String>) -> Self {
        Self {
            filename: filename.into(),
            arr_names,
            handle: None,
            written: 0,
        }
    }

    /// Reads `filename` (keyword or first positional) and optional `arr_names`.
    pub fn from_options(args: &[Value], kwargs: &FinderOptions) -> Result<Self> {
        let filename = kwargs
            .get("filename")
            .or_else(|| args.first())
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                HaloError::Config(format!("{} requires a filename", SAVE_PARTICLES_CALLBACK))
            })?;

        let arr_names = match kwargs.get("arr_names").or_else(|| args.get(1)) {
            None => vec![DEFAULT_PARTICLE_ARRAY.to_string()],
            Some(Value::String(name)) => vec![name.clone()],
            Some(Value::Array(names)) => names
                .iter()
                .map(|name| {
                    name.as_str().map(str::to_string).ok_or_else(|| {
                        HaloError::Config(format!(
                            "arr_names entries must be strings, got {}",
                            name
                        ))
                    })
                })
                .collect::<Result<Vec<_>>>()?,
            Some(other) => {
                return Err(HaloError::Config(format!(
                    "arr_names must be a string or a list of strings, got {}",
                    other
                )))
            }
        };

        Ok(Self::new(filename, arr_names))
    }

    pub fn group_name(halo_id: i64) -> String {
        format!("/Halo{:08}", halo_id)
    }
}

impl HaloCallback for SaveParticles {
    fn name(&self) -> &str {
        SAVE_PARTICLES_CALLBACK
    }

    fn initialize(&mut self, _catalog: &HaloCatalog) -> Result<()> {
        if let Some(parent) = self.filename.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = File::create(&self.filename)?;
        self.handle = Some(BufWriter::new(file));
        self.written = 0;
        debug!("Opened particle file {}", self.filename.display());
        Ok(())
    }

    fn call(&mut self, _catalog: &HaloCatalog, halo: &dyn Halo) -> Result<()> {
        let mut datasets = BTreeMap::new();
        for name in &self.arr_names {
            let array = halo.particle_array(name).ok_or_else(|| {
                HaloError::MissingField(format!(
                    "halo {} has no particle array '{}'",
                    halo.id(),
                    name
                ))
            })?;
            datasets.insert(name.as_str(), array);
        }

        let handle = self.handle.as_mut().ok_or_else(|| {
            HaloError::Config(format!("{} called before initialize", SAVE_PARTICLES_CALLBACK))
        })?;
        let group = ParticleGroup {
            group: Self::group_name(halo.id()),
            datasets,
        };
        serde_json::to_writer(&mut *handle, &group)?;
        handle.write_all(b"\n")?;
        self.written += 1;
        Ok(())
    }

    fn finalize(&mut self, _catalog: &HaloCatalog) -> Result<()> {
        if let Some(mut handle) = self.handle.take() {
            handle.flush()?;
            info!(
                path = %self.filename.display(),
                halos = self.written,
                "Saved halo particles"
            );
        }
        Ok(())
    }
}
