use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::constants::{
    GENERIC_FIELD_TYPE, MEMBER_IDS, PARTICLES_FIELD_TYPE, PARTICLE_INDEX_START, PARTICLE_NUMBER,
};
use crate::error::{HaloError, Result};
use crate::units::{Unit, UnitArray};

/// Storage category of a saved field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FieldCategory {
    /// Per-halo property, tagged "."
    Generic,
    /// Per-particle data, tagged "particles"
    Particles,
}

impl FieldCategory {
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Generic => GENERIC_FIELD_TYPE,
            Self::Particles => PARTICLES_FIELD_TYPE,
        }
    }
}

impl TryFrom<String> for FieldCategory {
    type Error = HaloError;

    fn try_from(value: String) -> Result<Self> {
        match value.as_str() {
            GENERIC_FIELD_TYPE => Ok(Self::Generic),
            PARTICLES_FIELD_TYPE => Ok(Self::Particles),
            other => Err(HaloError::Config(format!("unknown field category '{}'", other))),
        }
    }
}

impl From<FieldCategory> for String {
    fn from(category: FieldCategory) -> Self {
        category.tag().to_string()
    }
}

/// Field name to storage category, handed to the catalog save operation
pub type FieldTypes = BTreeMap<String, FieldCategory>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "dtype", content = "values", rename_all = "lowercase")]
pub enum FieldValues {
    Float64(Vec<f64>),
    Int32(Vec<i32>),
    Int64(Vec<i64>),
}

impl FieldValues {
    pub fn len(&self) -> usize {
        match self {
            Self::Float64(v) => v.len(),
            Self::Int32(v) => v.len(),
            Self::Int64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dtype(&self) -> &'static str {
        match self {
            Self::Float64(_) => "float64",
            Self::Int32(_) => "int32",
            Self::Int64(_) => "int64",
        }
    }
}

/// One saved column: values plus the unit they are expressed in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldArray {
    pub unit: Unit,
    pub values: FieldValues,
}

impl FieldArray {
    pub fn dimensionless(values: FieldValues) -> Self {
        Self {
            unit: Unit::Dimensionless,
            values,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl From<UnitArray> for FieldArray {
    fn from(array: UnitArray) -> Self {
        Self {
            unit: array.unit,
            values: FieldValues::Float64(array.values),
        }
    }
}

/// Halo properties keyed by field name, one entry per halo.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HaloPropertyTable {
    fields: BTreeMap<String, FieldArray>,
}

impl HaloPropertyTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, array: impl Into<FieldArray>) {
        self.fields.insert(name.into(), array.into());
    }

    pub fn get(&self, name: &str) -> Option<&FieldArray> {
        self.fields.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(|k| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldArray)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn float64(&self, name: &str) -> Option<&[f64]> {
        match self.fields.get(name).map(|f| &f.values) {
            Some(FieldValues::Float64(values)) => Some(values),
            _ => None,
        }
    }

    pub fn int32(&self, name: &str) -> Option<&[i32]> {
        match self.fields.get(name).map(|f| &f.values) {
            Some(FieldValues::Int32(values)) => Some(values),
            _ => None,
        }
    }

    pub fn int64(&self, name: &str) -> Option<&[i64]> {
        match self.fields.get(name).map(|f| &f.values) {
            Some(FieldValues::Int64(values)) => Some(values),
            _ => None,
        }
    }

    /// Number of halos, taken from the per-halo (generic) fields.
    pub fn num_halos(&self, ftypes: &FieldTypes) -> usize {
        self.fields
            .iter()
            .find(|(name, _)| ftypes.get(name.as_str()) != Some(&FieldCategory::Particles))
            .map(|(_, array)| array.len())
            .unwrap_or(0)
    }

    /// Checks the table layout before it is persisted.
    ///
    /// Every field has a category, per-halo fields share one length, and the
    /// membership arrays agree with each other when present.
    pub fn validate(&self, ftypes: &FieldTypes) -> Result<usize> {
        let num_halos = self.num_halos(ftypes);

        for (name, array) in &self.fields {
            let category = ftypes.get(name).ok_or_else(|| {
                HaloError::Config(format!("field '{}' has no storage category", name))
            })?;
            if *category == FieldCategory::Generic && array.len() != num_halos {
                return Err(HaloError::Config(format!(
                    "field '{}' has {} entries, expected {}",
                    name,
                    array.len(),
                    num_halos
                )));
            }
        }

        let membership = [MEMBER_IDS, PARTICLE_NUMBER, PARTICLE_INDEX_START];
        let present = membership.iter().filter(|f| self.contains(f)).count();
        if present != 0 && present != membership.len() {
            return Err(HaloError::Config(
                "particle membership fields must be saved together".to_string(),
            ));
        }
        if present == membership.len() {
            let counts = self
                .int32(PARTICLE_NUMBER)
                .ok_or_else(|| HaloError::Config("particle_number must be int32".to_string()))?;
            let ids = self
                .int64(MEMBER_IDS)
                .ok_or_else(|| HaloError::Config("ids must be int64".to_string()))?;
            let total: i64 = counts.iter().map(|c| i64::from(*c)).sum();
            if total != ids.len() as i64 {
                return Err(HaloError::Config(format!(
                    "particle_number sums to {} but {} member ids were given",
                    total,
                    ids.len()
                )));
            }
        }

        Ok(num_halos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generic(names: &[&str]) -> FieldTypes {
        names
            .iter()
            .map(|n| (n.to_string(), FieldCategory::Generic))
            .collect()
    }

    #[test]
    fn test_validate_counts_halos() {
        let mut table = HaloPropertyTable::new();
        table.insert("particle_mass", UnitArray::new(vec![1.0, 2.0], Unit::Msun));
        table.insert("virial_radius", UnitArray::new(vec![3.0, 4.0], Unit::Kiloparsec));

        let ftypes = generic(&["particle_mass", "virial_radius"]);
        assert_eq!(table.validate(&ftypes).unwrap(), 2);
    }

    #[test]
    fn test_validate_rejects_ragged_fields() {
        let mut table = HaloPropertyTable::new();
        table.insert("particle_mass", UnitArray::new(vec![1.0, 2.0], Unit::Msun));
        table.insert("virial_radius", UnitArray::new(vec![3.0], Unit::Kiloparsec));

        let ftypes = generic(&["particle_mass", "virial_radius"]);
        assert!(table.validate(&ftypes).is_err());
    }

    #[test]
    fn test_validate_rejects_inconsistent_membership() {
        let mut table = HaloPropertyTable::new();
        table.insert("particle_mass", UnitArray::new(vec![1.0, 2.0], Unit::Msun));
        table.insert(
            PARTICLE_NUMBER,
            FieldArray::dimensionless(FieldValues::Int32(vec![2, 2])),
        );
        table.insert(
            PARTICLE_INDEX_START,
            FieldArray::dimensionless(FieldValues::Int64(vec![0, 2])),
        );
        table.insert(MEMBER_IDS, FieldArray::dimensionless(FieldValues::Int64(vec![1, 2, 3])));

        let mut ftypes = generic(&["particle_mass", PARTICLE_NUMBER, PARTICLE_INDEX_START]);
        ftypes.insert(MEMBER_IDS.to_string(), FieldCategory::Particles);
        assert!(table.validate(&ftypes).is_err());
    }

    #[test]
    fn test_category_tags() {
        assert_eq!(FieldCategory::Generic.tag(), ".");
        assert_eq!(FieldCategory::Particles.tag(), "particles");
        let json = serde_json::to_string(&FieldCategory::Particles).unwrap();
        assert_eq!(json, "\"particles\"");
    }
}
