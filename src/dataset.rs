use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{HaloError, Result};
use crate::units::{Unit, UnitArray, UnitSystem};

/// Descriptor of a simulation snapshot that halo finding runs against.
///
/// The particle data itself is never read here; external finders receive
/// `path` and the domain geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub name: String,
    /// Particle data handed to the external finders
    pub path: PathBuf,
    /// Domain corners in centimeters
    pub domain_left_edge: [f64; 3],
    pub domain_right_edge: [f64; 3],
    #[serde(default)]
    pub current_redshift: f64,
    #[serde(default)]
    pub cosmology: Option<Cosmology>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Cosmology {
    pub omega_matter: f64,
    pub omega_lambda: f64,
    /// Dimensionless Hubble parameter h
    pub hubble_constant: f64,
}

impl Dataset {
    /// Loads a dataset descriptor from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            HaloError::Config(format!(
                "Failed to read dataset descriptor '{}': {}",
                path.display(),
                e
            ))
        })?;
        let dataset: Dataset = toml::from_str(&content)?;
        dataset.validate()?;
        Ok(dataset)
    }

    fn validate(&self) -> Result<()> {
        for axis in 0..3 {
            let (left, right) = (self.domain_left_edge[axis], self.domain_right_edge[axis]);
            if !(right - left).is_finite() {
                return Err(HaloError::Config(format!(
                    "dataset '{}' has a non-finite domain edge along axis {}",
                    self.name, axis
                )));
            }
            if right <= left {
                return Err(HaloError::Config(format!(
                    "dataset '{}' has an empty domain along axis {}",
                    self.name, axis
                )));
            }
        }
        Ok(())
    }

    /// Domain width along each axis, in centimeters.
    pub fn domain_width(&self) -> [f64; 3] {
        [
            self.domain_right_edge[0] - self.domain_left_edge[0],
            self.domain_right_edge[1] - self.domain_left_edge[1],
            self.domain_right_edge[2] - self.domain_left_edge[2],
        ]
    }

    /// Unit context of this dataset. `unitary` spans the widest axis.
    pub fn unit_system(&self) -> UnitSystem {
        let width = self.domain_width();
        UnitSystem::new(width[0].max(width[1]).max(width[2]))
    }

    /// Unit-tagged array bound to this dataset, zero filled.
    pub fn arr(&self, len: usize, unit: Unit) -> UnitArray {
        UnitArray::zeros(len, unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_descriptor() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
name = "snapshot_033"
path = "data/snapshot_033.bin"
domain_left_edge = [0.0, 0.0, 0.0]
domain_right_edge = [3.0e24, 2.0e24, 3.0e24]
current_redshift = 0.5

[cosmology]
omega_matter = 0.3
omega_lambda = 0.7
hubble_constant = 0.7
"#
        )
        .unwrap();

        let ds = Dataset::load(file.path()).unwrap();
        assert_eq!(ds.name, "snapshot_033");
        assert_eq!(ds.unit_system().domain_width_cm, 3.0e24);
        assert_eq!(ds.cosmology.unwrap().hubble_constant, 0.7);
    }

    #[test]
    fn test_rejects_non_finite_edges() {
        for right in ["nan", "inf"] {
            let mut file = tempfile::NamedTempFile::new().unwrap();
            writeln!(
                file,
                "name = \"broken\"\npath = \"broken.bin\"\n\
                 domain_left_edge = [0.0, 0.0, 0.0]\n\
                 domain_right_edge = [{}, 2.0, 2.0]",
                right
            )
            .unwrap();

            let err = Dataset::load(file.path()).unwrap_err();
            assert!(matches!(err, HaloError::Config(ref msg) if msg.contains("non-finite")));
        }
    }

    #[test]
    fn test_rejects_empty_domain() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
name = "flat"
path = "flat.bin"
domain_left_edge = [0.0, 0.0, 0.0]
domain_right_edge = [1.0, 0.0, 1.0]
"#
        )
        .unwrap();

        assert!(matches!(Dataset::load(file.path()), Err(HaloError::Config(_))));
    }
}
