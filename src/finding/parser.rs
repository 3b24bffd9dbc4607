use tracing::debug;

use crate::catalog::{
    FieldArray, FieldCategory, FieldTypes, FieldValues, HaloCatalog, HaloPropertyTable,
};
use crate::constants::{
    MEMBER_IDS, PARTICLE_IDENTIFIER, PARTICLE_INDEX_START, PARTICLE_MASS, PARTICLE_NUMBER,
    PARTICLE_POSITION_X, PARTICLE_POSITION_Y, PARTICLE_POSITION_Z, PARTICLE_VELOCITY_X,
    PARTICLE_VELOCITY_Y, PARTICLE_VELOCITY_Z, VIRIAL_RADIUS,
};
use crate::domain::HaloList;
use crate::error::{HaloError, Result};
use crate::metrics::FindingMetrics;
use crate::storage::SavedCatalog;
use crate::units::{Quantity, Unit, UnitArray, UnitSystem};

/// Per-halo fields pulled from every halo, with the unit each is saved in.
pub const HALO_FIELDS: [(&str, Unit); 9] = [
    (PARTICLE_IDENTIFIER, Unit::Dimensionless),
    (PARTICLE_MASS, Unit::Msun),
    (VIRIAL_RADIUS, Unit::Kiloparsec),
    (PARTICLE_POSITION_X, Unit::Unitary),
    (PARTICLE_POSITION_Y, Unit::Unitary),
    (PARTICLE_POSITION_Z, Unit::Unitary),
    (PARTICLE_VELOCITY_X, Unit::KilometerPerSecond),
    (PARTICLE_VELOCITY_Y, Unit::KilometerPerSecond),
    (PARTICLE_VELOCITY_Z, Unit::KilometerPerSecond),
];

// Column positions in HALO_FIELDS
const IDENTIFIER: usize = 0;
const MASS: usize = 1;
const RADIUS: usize = 2;
const POSITION: usize = 3;
const VELOCITY: usize = 6;

/// Saves a halo list as a halo catalog.
///
/// Any failure aborts before anything is written.
pub fn parse_halo_list(hc: &mut HaloCatalog, halo_list: &dyn HaloList) -> Result<SavedCatalog> {
    let (data, ftypes) = build_halo_properties(halo_list, &hc.unit_system())?;
    FindingMetrics::record_halos_parsed(halo_list.len());
    hc.save_catalog(data, ftypes)
}

/// Builds the unit-tagged property table for `halo_list`.
///
/// Halo `i` of the iteration lands at index `i` of every field. Member
/// particle arrays are added only when the list exports particles.
pub fn build_halo_properties(
    halo_list: &dyn HaloList,
    system: &UnitSystem,
) -> Result<(HaloPropertyTable, FieldTypes)> {
    let num_halos = halo_list.len();
    let mut columns: Vec<UnitArray> = HALO_FIELDS
        .iter()
        .map(|(_, unit)| UnitArray::zeros(num_halos, *unit))
        .collect();

    let save_particles = halo_list.save_particles();
    let mut n_particles: Vec<i32> = if save_particles { vec![0; num_halos] } else { Vec::new() };
    let mut member_ids: Vec<i64> = Vec::new();

    let mut seen = 0;
    for (i, halo) in halo_list.halos().enumerate() {
        if i >= num_halos {
            return Err(HaloError::Finder(format!(
                "halo list reported {} halos but yielded more",
                num_halos
            )));
        }

        columns[IDENTIFIER].set(i, Quantity::dimensionless(halo.id() as f64), system)?;
        columns[MASS].set(i, halo.virial_mass()?, system)?;
        columns[RADIUS].set(i, halo.virial_radius()?, system)?;

        let com = halo.center_of_mass()?;
        for (axis, value) in com.into_iter().enumerate() {
            columns[POSITION + axis].set(i, value, system)?;
        }

        let bv = halo.bulk_velocity()?;
        for (axis, value) in bv.into_iter().enumerate() {
            columns[VELOCITY + axis].set(i, value, system)?;
        }

        if save_particles {
            let indices = halo.particle_indices().ok_or_else(|| {
                HaloError::MissingField(format!("halo {} has no particle_index", halo.id()))
            })?;
            n_particles[i] = i32::try_from(indices.len()).map_err(|_| {
                HaloError::Finder(format!(
                    "halo {} has too many particles ({})",
                    halo.id(),
                    indices.len()
                ))
            })?;
            member_ids.extend_from_slice(indices);
        }
        seen = i + 1;
    }

    if seen != num_halos {
        return Err(HaloError::Finder(format!(
            "halo list reported {} halos but yielded {}",
            num_halos, seen
        )));
    }

    let mut data = HaloPropertyTable::new();
    for ((name, _), column) in HALO_FIELDS.iter().zip(columns) {
        data.insert(*name, column);
    }

    if save_particles {
        // Exclusive prefix sum of the member counts
        let start: Vec<i64> = n_particles
            .iter()
            .scan(0i64, |offset, count| {
                let current = *offset;
                *offset += i64::from(*count);
                Some(current)
            })
            .collect();

        debug!(
            "Collected {} member particles across {} halos",
            member_ids.len(),
            num_halos
        );
        data.insert(MEMBER_IDS, FieldArray::dimensionless(FieldValues::Int64(member_ids)));
        data.insert(PARTICLE_NUMBER, FieldArray::dimensionless(FieldValues::Int32(n_particles)));
        data.insert(PARTICLE_INDEX_START, FieldArray::dimensionless(FieldValues::Int64(start)));
    }

    let ftypes: FieldTypes = data
        .field_names()
        .map(|name| {
            let category = if name == MEMBER_IDS {
                FieldCategory::Particles
            } else {
                FieldCategory::Generic
            };
            (name.to_string(), category)
        })
        .collect();

    Ok((data, ftypes))
}
