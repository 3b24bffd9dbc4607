use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::constants::{
    CONFIG_PATH_ENV, DEFAULT_CONFIG_PATH, DEFAULT_ROCKSTAR_OUTBASE, FOF_METHOD, HOP_METHOD,
};
use crate::error::{HaloError, Result};
use crate::finding::backends::{
    ExternalHaloFinder, HaloFinderBackend, RecordedListFinder, RockstarProcess,
};
use crate::finding::FinderBackends;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub finders: FindersConfig,
    #[serde(default)]
    pub rockstar: RockstarConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FindersConfig {
    #[serde(default)]
    pub fof: FinderConfig,
    #[serde(default)]
    pub hop: FinderConfig,
}

/// An external FoF/HOP program, or a previously written halo list when no
/// program is configured.
#[derive(Debug, Clone, Deserialize)]
pub struct FinderConfig {
    pub program: Option<PathBuf>,
    #[serde(default = "default_finder_args")]
    pub args: Vec<String>,
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    pub halo_list: Option<PathBuf>,
}

impl Default for FinderConfig {
    fn default() -> Self {
        Self {
            program: None,
            args: default_finder_args(),
            work_dir: default_work_dir(),
            halo_list: None,
        }
    }
}

impl FinderConfig {
    pub fn backend(&self, name: &str) -> Arc<dyn HaloFinderBackend> {
        match &self.program {
            Some(program) => Arc::new(ExternalHaloFinder::new(
                name,
                program,
                self.args.clone(),
                &self.work_dir,
            )),
            None => {
                let path = self
                    .halo_list
                    .clone()
                    .unwrap_or_else(|| self.work_dir.join(format!("{}.json", name)));
                Arc::new(RecordedListFinder::new(name, path))
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RockstarConfig {
    #[serde(default = "default_rockstar_program")]
    pub program: PathBuf,
    #[serde(default = "default_io_tasks")]
    pub num_readers: u32,
    #[serde(default = "default_io_tasks")]
    pub num_writers: u32,
    #[serde(default = "default_rockstar_outbase")]
    pub outbase: PathBuf,
    #[serde(default = "default_file_format")]
    pub file_format: String,
}

impl Default for RockstarConfig {
    fn default() -> Self {
        Self {
            program: default_rockstar_program(),
            num_readers: default_io_tasks(),
            num_writers: default_io_tasks(),
            outbase: default_rockstar_outbase(),
            file_format: default_file_format(),
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("catalogs")
}

fn default_finder_args() -> Vec<String> {
    vec!["{dataset}".to_string(), "{output}".to_string()]
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("halo_lists")
}

fn default_rockstar_program() -> PathBuf {
    PathBuf::from("rockstar")
}

fn default_io_tasks() -> u32 {
    1
}

fn default_rockstar_outbase() -> PathBuf {
    PathBuf::from(DEFAULT_ROCKSTAR_OUTBASE)
}

fn default_file_format() -> String {
    "GADGET2".to_string()
}

impl Config {
    /// Loads `$HALO_CATALOG_CONFIG`, or `config.toml` in the working directory.
    /// A missing default file yields the default config.
    pub fn load() -> Result<Self> {
        match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::load_from(path),
            Err(_) => {
                let path = Path::new(DEFAULT_CONFIG_PATH);
                if path.exists() {
                    Self::load_from(path)
                } else {
                    info!("No {} found, using default configuration", DEFAULT_CONFIG_PATH);
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let config_path = path.as_ref();
        let config_content = fs::read_to_string(config_path).map_err(|e| {
            HaloError::Config(format!(
                "Failed to read config file '{}': {}",
                config_path.display(),
                e
            ))
        })?;

        let config: Config = toml::from_str(&config_content)?;
        debug!("Loaded configuration from {}", config_path.display());
        Ok(config)
    }

    pub fn finder_backends(&self) -> FinderBackends {
        let rockstar = RockstarProcess::new(
            &self.rockstar.program,
            self.rockstar.num_readers,
            self.rockstar.num_writers,
        )
        .with_file_format(&self.rockstar.file_format);

        FinderBackends {
            hop: self.finders.hop.backend(HOP_METHOD),
            fof: self.finders.fof.backend(FOF_METHOD),
            rockstar: Arc::new(rockstar),
        }
    }
}
