use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::error::{HaloError, Result};
use crate::units::Quantity;

/// Capabilities every halo exposes, whichever finder produced it.
pub trait Halo {
    fn id(&self) -> i64;

    fn virial_mass(&self) -> Result<Quantity>;

    fn virial_radius(&self) -> Result<Quantity>;

    fn center_of_mass(&self) -> Result<[Quantity; 3]>;

    fn bulk_velocity(&self) -> Result<[Quantity; 3]>;

    /// Indices of the member particles, when the finder tracked membership.
    fn particle_indices(&self) -> Option<&[i64]> {
        None
    }

    /// Named per-particle array of this halo.
    fn particle_array(&self, name: &str) -> Option<ParticleArray> {
        match name {
            "particle_ids" | "particle_index" => self
                .particle_indices()
                .map(|indices| ParticleArray::Int64(indices.to_vec())),
            _ => None,
        }
    }
}

/// Ordered halos from a single finder run. Iteration order defines halo index.
pub trait HaloList {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn halos(&self) -> Box<dyn Iterator<Item = &dyn Halo> + '_>;

    /// Whether member particles can be exported alongside the halo properties
    fn save_particles(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParticleArray {
    Int64(Vec<i64>),
    Float64(Vec<f64>),
}

impl ParticleArray {
    pub fn len(&self) -> usize {
        match self {
            Self::Int64(values) => values.len(),
            Self::Float64(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A halo as written by an external finder run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedHalo {
    pub id: i64,
    #[serde(default)]
    pub virial_mass: Option<Quantity>,
    #[serde(default)]
    pub virial_radius: Option<Quantity>,
    #[serde(default)]
    pub center_of_mass: Option<[Quantity; 3]>,
    #[serde(default)]
    pub bulk_velocity: Option<[Quantity; 3]>,
    #[serde(default)]
    pub particle_index: Option<Vec<i64>>,
    /// Additional per-particle arrays, keyed by field name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub particle_fields: BTreeMap<String, Vec<f64>>,
}

impl RecordedHalo {
    fn required<T: Copy>(&self, value: &Option<T>, field: &str) -> Result<T> {
        value
            .ok_or_else(|| HaloError::MissingField(format!("halo {} has no {}", self.id, field)))
    }
}

impl Halo for RecordedHalo {
    fn id(&self) -> i64 {
        self.id
    }

    fn virial_mass(&self) -> Result<Quantity> {
        self.required(&self.virial_mass, "virial_mass")
    }

    fn virial_radius(&self) -> Result<Quantity> {
        self.required(&self.virial_radius, "virial_radius")
    }

    fn center_of_mass(&self) -> Result<[Quantity; 3]> {
        self.required(&self.center_of_mass, "center_of_mass")
    }

    fn bulk_velocity(&self) -> Result<[Quantity; 3]> {
        self.required(&self.bulk_velocity, "bulk_velocity")
    }

    fn particle_indices(&self) -> Option<&[i64]> {
        self.particle_index.as_deref()
    }

    fn particle_array(&self, name: &str) -> Option<ParticleArray> {
        match name {
            "particle_ids" | "particle_index" => self
                .particle_indices()
                .map(|indices| ParticleArray::Int64(indices.to_vec())),
            other => self
                .particle_fields
                .get(other)
                .map(|values| ParticleArray::Float64(values.clone())),
        }
    }
}

/// Halo list file format produced by the external FoF and HOP runners.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordedHaloList {
    /// Name of the finder that produced the list
    #[serde(default)]
    pub finder: Option<String>,
    #[serde(default)]
    pub save_particles: bool,
    pub halos: Vec<RecordedHalo>,
}

impl RecordedHaloList {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            HaloError::Finder(format!("Failed to read halo list '{}': {}", path.display(), e))
        })?;
        Ok(serde_json::from_str(&content)?)
    }
}

impl HaloList for RecordedHaloList {
    fn len(&self) -> usize {
        self.halos.len()
    }

    fn halos(&self) -> Box<dyn Iterator<Item = &dyn Halo> + '_> {
        Box::new(self.halos.iter().map(|h| h as &dyn Halo))
    }

    fn save_particles(&self) -> bool {
        self.save_particles
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::Unit;
    use serde_json::json;

    #[test]
    fn test_recorded_list_from_json() {
        let list: RecordedHaloList = serde_json::from_value(json!({
            "finder": "fof",
            "save_particles": true,
            "halos": [{
                "id": 7,
                "virial_mass": {"value": 1.0e12, "unit": "Msun"},
                "virial_radius": {"value": 210.0, "unit": "kpc"},
                "center_of_mass": [
                    {"value": 0.25, "unit": "unitary"},
                    {"value": 0.5, "unit": "unitary"},
                    {"value": 0.75, "unit": "unitary"}
                ],
                "bulk_velocity": [
                    {"value": 10.0, "unit": "km/s"},
                    {"value": 0.0, "unit": "km/s"},
                    {"value": -10.0, "unit": "km/s"}
                ],
                "particle_index": [4, 8, 15]
            }]
        }))
        .unwrap();

        assert_eq!(list.len(), 1);
        assert!(list.save_particles());
        let halo = list.halos().next().unwrap();
        assert_eq!(halo.id(), 7);
        assert_eq!(halo.virial_mass().unwrap().unit, Unit::Msun);
        assert_eq!(halo.particle_indices(), Some(&[4, 8, 15][..]));
        assert_eq!(
            halo.particle_array("particle_ids"),
            Some(ParticleArray::Int64(vec![4, 8, 15]))
        );
    }

    #[test]
    fn test_missing_accessor_is_an_error() {
        let halo = RecordedHalo {
            id: 3,
            virial_mass: None,
            virial_radius: None,
            center_of_mass: None,
            bulk_velocity: None,
            particle_index: None,
            particle_fields: BTreeMap::new(),
        };
        assert!(matches!(halo.virial_mass(), Err(HaloError::MissingField(_))));
        assert!(halo.particle_array("particle_ids").is_none());
    }
}
