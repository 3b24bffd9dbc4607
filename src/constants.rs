/// Names under which the built-in finding methods and callbacks are registered.
/// These are stable keys; new backends get new names.
pub const HOP_METHOD: &str = "hop";
pub const FOF_METHOD: &str = "fof";
pub const ROCKSTAR_METHOD: &str = "rockstar";

pub const SAVE_PARTICLES_CALLBACK: &str = "save_particles";

/// Rockstar output directory used when the `outbase` option is not given
pub const DEFAULT_ROCKSTAR_OUTBASE: &str = "rockstar_halos";
/// First output file of a Rockstar run, relative to the outbase
pub const ROCKSTAR_OUTPUT_FILE: &str = "halos_0.0.bin";

// Halo catalog schema
pub const PARTICLE_IDENTIFIER: &str = "particle_identifier";
pub const PARTICLE_MASS: &str = "particle_mass";
pub const VIRIAL_RADIUS: &str = "virial_radius";
pub const PARTICLE_POSITION_X: &str = "particle_position_x";
pub const PARTICLE_POSITION_Y: &str = "particle_position_y";
pub const PARTICLE_POSITION_Z: &str = "particle_position_z";
pub const PARTICLE_VELOCITY_X: &str = "particle_velocity_x";
pub const PARTICLE_VELOCITY_Y: &str = "particle_velocity_y";
pub const PARTICLE_VELOCITY_Z: &str = "particle_velocity_z";

// Particle membership, only present when the halo list exports particles
pub const MEMBER_IDS: &str = "ids";
pub const PARTICLE_NUMBER: &str = "particle_number";
pub const PARTICLE_INDEX_START: &str = "particle_index_start";

/// Storage category tags attached to each saved field
pub const GENERIC_FIELD_TYPE: &str = ".";
pub const PARTICLES_FIELD_TYPE: &str = "particles";

/// Default config file, overridable through `HALO_CATALOG_CONFIG`
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";
pub const CONFIG_PATH_ENV: &str = "HALO_CATALOG_CONFIG";
