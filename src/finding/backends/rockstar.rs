//! Rockstar runner and reader for its binary halo output.
//!
//! # Output header
//!
//! Every `halos_*.bin` file starts with a 256-byte little-endian header:
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0 | 8 | magic `0xfadedacec0c0d0d0` |
//! | 8 | 8 | snapshot |
//! | 16 | 8 | chunk |
//! | 24 | 4 × 4 | scale, Ω_m, Ω_Λ, h |
//! | 40 | 6 × 4 | chunk bounds |
//! | 64 | 8 | halo count |
//! | 72 | 8 | particle count |
//! | 80 | 4 × 2 | box size, particle mass |
//! | 88 | 8 | particle type |
//! | 96 | 4 | format revision |
//! | 100 | 12 | Rockstar version |
//! | 112 | 144 | unused |

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde_json::Value;
use std::fs::{self, File};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

use super::RockstarBackend;
use crate::dataset::Dataset;
use crate::error::{HaloError, Result};
use crate::finding::{rockstar_outbase, FinderOptions};
use crate::units::PARSEC_CM;

pub const ROCKSTAR_MAGIC: u64 = 0xfade_dace_c0c0_d0d0;
pub const BINARY_HEADER_SIZE: usize = 256;
const VERSION_LEN: usize = 12;
const HEADER_USED: usize = 112;

/// Header of a Rockstar binary output file.
#[derive(Debug, Clone, PartialEq)]
pub struct RockstarHeader {
    pub snap: i64,
    pub chunk: i64,
    pub scale: f32,
    pub omega_matter: f32,
    pub omega_lambda: f32,
    pub h0: f32,
    pub bounds: [f32; 6],
    pub num_halos: i64,
    pub num_particles: i64,
    pub box_size: f32,
    pub particle_mass: f32,
    pub particle_type: i64,
    pub format_revision: i32,
    pub version: String,
}

impl RockstarHeader {
    /// Reads and checks a header. The reader is left at the first halo.
    pub fn read<R: Read>(reader: &mut R) -> io::Result<Self> {
        let magic = reader.read_u64::<LittleEndian>()?;
        if magic != ROCKSTAR_MAGIC {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("bad magic {:#018x}", magic),
            ));
        }

        let snap = reader.read_i64::<LittleEndian>()?;
        let chunk = reader.read_i64::<LittleEndian>()?;
        let scale = reader.read_f32::<LittleEndian>()?;
        let omega_matter = reader.read_f32::<LittleEndian>()?;
        let omega_lambda = reader.read_f32::<LittleEndian>()?;
        let h0 = reader.read_f32::<LittleEndian>()?;
        let mut bounds = [0f32; 6];
        reader.read_f32_into::<LittleEndian>(&mut bounds)?;
        let num_halos = reader.read_i64::<LittleEndian>()?;
        let num_particles = reader.read_i64::<LittleEndian>()?;
        let box_size = reader.read_f32::<LittleEndian>()?;
        let particle_mass = reader.read_f32::<LittleEndian>()?;
        let particle_type = reader.read_i64::<LittleEndian>()?;
        let format_revision = reader.read_i32::<LittleEndian>()?;

        let mut version = [0u8; VERSION_LEN];
        reader.read_exact(&mut version)?;
        let mut unused = [0u8; BINARY_HEADER_SIZE - HEADER_USED];
        reader.read_exact(&mut unused)?;

        let version = String::from_utf8_lossy(&version)
            .trim_end_matches('\0')
            .to_string();

        Ok(Self {
            snap,
            chunk,
            scale,
            omega_matter,
            omega_lambda,
            h0,
            bounds,
            num_halos,
            num_particles,
            box_size,
            particle_mass,
            particle_type,
            format_revision,
            version,
        })
    }

    pub fn write<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_u64::<LittleEndian>(ROCKSTAR_MAGIC)?;
        writer.write_i64::<LittleEndian>(self.snap)?;
        writer.write_i64::<LittleEndian>(self.chunk)?;
        writer.write_f32::<LittleEndian>(self.scale)?;
        writer.write_f32::<LittleEndian>(self.omega_matter)?;
        writer.write_f32::<LittleEndian>(self.omega_lambda)?;
        writer.write_f32::<LittleEndian>(self.h0)?;
        for bound in self.bounds {
            writer.write_f32::<LittleEndian>(bound)?;
        }
        writer.write_i64::<LittleEndian>(self.num_halos)?;
        writer.write_i64::<LittleEndian>(self.num_particles)?;
        writer.write_f32::<LittleEndian>(self.box_size)?;
        writer.write_f32::<LittleEndian>(self.particle_mass)?;
        writer.write_i64::<LittleEndian>(self.particle_type)?;
        writer.write_i32::<LittleEndian>(self.format_revision)?;

        let mut version = [0u8; VERSION_LEN];
        let bytes = self.version.as_bytes();
        let len = bytes.len().min(VERSION_LEN);
        version[..len].copy_from_slice(&bytes[..len]);
        writer.write_all(&version)?;
        writer.write_all(&[0u8; BINARY_HEADER_SIZE - HEADER_USED])?;
        Ok(())
    }

    pub fn current_redshift(&self) -> f64 {
        1.0 / f64::from(self.scale) - 1.0
    }
}

/// A field Rockstar writes per halo, with its unit as Rockstar reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldInfo {
    pub name: &'static str,
    pub unit: &'static str,
}

const ROCKSTAR_HALO_FIELDS: &[FieldInfo] = &[
    FieldInfo { name: "particle_identifier", unit: "" },
    FieldInfo { name: "particle_position_x", unit: "Mpccm/h" },
    FieldInfo { name: "particle_position_y", unit: "Mpccm/h" },
    FieldInfo { name: "particle_position_z", unit: "Mpccm/h" },
    FieldInfo { name: "particle_velocity_x", unit: "km/s" },
    FieldInfo { name: "particle_velocity_y", unit: "km/s" },
    FieldInfo { name: "particle_velocity_z", unit: "km/s" },
    FieldInfo { name: "particle_mass", unit: "Msun/h" },
    FieldInfo { name: "virial_radius", unit: "kpccm/h" },
    FieldInfo { name: "num_p", unit: "" },
    FieldInfo { name: "vmax", unit: "km/s" },
    FieldInfo { name: "rvmax", unit: "kpccm/h" },
    FieldInfo { name: "vrms", unit: "km/s" },
];

/// A Rockstar output file loaded back as a dataset.
#[derive(Debug)]
pub struct RockstarDataset {
    pub path: PathBuf,
    pub header: RockstarHeader,
    field_info: Option<Vec<FieldInfo>>,
}

impl RockstarDataset {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);

        let header = RockstarHeader::read(&mut reader).map_err(|e| {
            HaloError::InvalidRockstarOutput {
                path: path.display().to_string(),
                reason: e.to_string(),
            }
        })?;
        debug!(
            "Opened {} (snapshot {}, {} halos, revision {})",
            path.display(),
            header.snap,
            header.num_halos,
            header.format_revision
        );

        Ok(Self {
            path: path.to_path_buf(),
            header,
            field_info: None,
        })
    }

    /// Builds the field list for this output; fails when it holds no halos.
    pub fn create_field_info(&mut self) -> Result<&[FieldInfo]> {
        if self.header.num_halos <= 0 {
            return Err(HaloError::NoFieldInfo(format!(
                "{} contains no halos",
                self.path.display()
            )));
        }
        Ok(self.field_info.insert(ROCKSTAR_HALO_FIELDS.to_vec()).as_slice())
    }

    /// Field list, once [`create_field_info`](Self::create_field_info) succeeded
    pub fn field_info(&self) -> Option<&[FieldInfo]> {
        self.field_info.as_deref()
    }
}

/// Runs the Rockstar executable in parallel I/O mode and waits for it.
pub struct RockstarProcess {
    program: PathBuf,
    num_readers: u32,
    num_writers: u32,
    file_format: String,
}

impl RockstarProcess {
    pub fn new(program: impl Into<PathBuf>, num_readers: u32, num_writers: u32) -> Self {
        Self {
            program: program.into(),
            num_readers,
            num_writers,
            file_format: "GADGET2".to_string(),
        }
    }

    pub fn with_file_format(mut self, file_format: impl Into<String>) -> Self {
        self.file_format = file_format.into();
        self
    }

    /// Rockstar config for `ds`. Options other than the ones handled here are
    /// passed through as upper-cased config keys.
    pub fn render_config(&self, ds: &Dataset, options: &FinderOptions, outbase: &Path) -> String {
        let num_readers = options
            .get("num_readers")
            .and_then(|v| v.as_u64())
            .unwrap_or(u64::from(self.num_readers));
        let num_writers = options
            .get("num_writers")
            .and_then(|v| v.as_u64())
            .unwrap_or(u64::from(self.num_writers));
        let file_format = options
            .get("file_format")
            .and_then(|v| v.as_str())
            .unwrap_or(&self.file_format);

        let inbase = ds
            .path
            .parent()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        let filename = ds
            .path
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_default();

        let mut lines = vec![
            format!("FILE_FORMAT = \"{}\"", file_format),
            format!("INBASE = \"{}\"", inbase),
            format!("FILENAME = \"{}\"", filename),
            "NUM_SNAPS = 1".to_string(),
            "NUM_BLOCKS = 1".to_string(),
            format!("OUTBASE = \"{}\"", outbase.display()),
            "OUTPUT_FORMAT = \"BINARY\"".to_string(),
            "PARALLEL_IO = 1".to_string(),
            format!("NUM_READERS = {}", num_readers),
            format!("NUM_WRITERS = {}", num_writers),
            "FORK_READERS_FROM_WRITERS = 1".to_string(),
            format!("FORK_PROCESSORS_PER_MACHINE = {}", num_writers),
            format!("SCALE_NOW = {}", 1.0 / (1.0 + ds.current_redshift)),
        ];

        let width_mpc = ds.unit_system().domain_width_cm / (1.0e6 * PARSEC_CM);
        match ds.cosmology {
            Some(cosmology) => {
                lines.push(format!("h0 = {}", cosmology.hubble_constant));
                lines.push(format!("Om = {}", cosmology.omega_matter));
                lines.push(format!("Ol = {}", cosmology.omega_lambda));
                lines.push(format!("BOX_SIZE = {}", width_mpc * cosmology.hubble_constant));
            }
            None => lines.push(format!("BOX_SIZE = {}", width_mpc)),
        }

        for (key, value) in options {
            if matches!(
                key.as_str(),
                "outbase" | "num_readers" | "num_writers" | "file_format"
            ) {
                continue;
            }
            lines.push(format!("{} = {}", key.to_uppercase(), config_value(value)));
        }

        lines.join("\n") + "\n"
    }
}

impl RockstarBackend for RockstarProcess {
    fn run(&self, ds: &Dataset, options: &FinderOptions) -> Result<()> {
        let outbase = PathBuf::from(rockstar_outbase(options)?);
        fs::create_dir_all(&outbase)?;

        let config_path = outbase.join("rockstar.cfg");
        fs::write(&config_path, self.render_config(ds, options, &outbase))?;

        info!(
            program = %self.program.display(),
            readers = self.num_readers,
            writers = self.num_writers,
            "Running Rockstar"
        );
        let status = Command::new(&self.program)
            .arg("-c")
            .arg(&config_path)
            .status()
            .map_err(|e| {
                HaloError::Finder(format!(
                    "failed to start rockstar ({}): {}",
                    self.program.display(),
                    e
                ))
            })?;

        if !status.success() {
            return Err(HaloError::Finder(format!("rockstar exited with {}", status)));
        }
        Ok(())
    }
}

fn config_value(value: &Value) -> String {
    match value {
        Value::String(s) => format!("\"{}\"", s),
        Value::Bool(b) => if *b { "1" } else { "0" }.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use crate::dataset::Cosmology;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn header(num_halos: i64) -> RockstarHeader {
        RockstarHeader {
            snap: 33,
            chunk: 0,
            scale: 0.5,
            omega_matter: 0.3,
            omega_lambda: 0.7,
            h0: 0.7,
            bounds: [0.0, 0.0, 0.0, 100.0, 100.0, 100.0],
            num_halos,
            num_particles: num_halos * 50,
            box_size: 100.0,
            particle_mass: 1.0e9,
            particle_type: 0,
            format_revision: 2,
            version: "0.99.9-RC3".to_string(),
        }
    }

    fn write_output(dir: &Path, header: &RockstarHeader) -> PathBuf {
        let path = dir.join("halos_0.0.bin");
        let mut file = File::create(&path).unwrap();
        header.write(&mut file).unwrap();
        path
    }

    #[test]
    fn test_header_layout() {
        let mut bytes = Vec::new();
        header(4).write(&mut bytes).unwrap();
        assert_eq!(bytes.len(), BINARY_HEADER_SIZE);
        assert_eq!(&bytes[..8], &ROCKSTAR_MAGIC.to_le_bytes());
        assert_eq!(&bytes[64..72], &4i64.to_le_bytes());

        let parsed = RockstarHeader::read(&mut bytes.as_slice()).unwrap();
        assert_eq!(parsed, header(4));
        assert_abs_diff_eq!(parsed.current_redshift(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_open_and_create_field_info() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_output(dir.path(), &header(12));

        let mut ds = RockstarDataset::open(&path).unwrap();
        assert!(ds.field_info().is_none());
        let fields = ds.create_field_info().unwrap();
        assert!(fields.iter().any(|f| f.name == "particle_mass"));
        assert_eq!(ds.header.num_halos, 12);
        assert!(ds.field_info().is_some());
    }

    #[test]
    fn test_empty_output_has_no_field_info() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_output(dir.path(), &header(0));

        let mut ds = RockstarDataset::open(&path).unwrap();
        assert!(matches!(ds.create_field_info(), Err(HaloError::NoFieldInfo(_))));
    }

    #[test]
    fn test_bad_magic_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("halos_0.0.bin");
        fs::write(&path, vec![0u8; BINARY_HEADER_SIZE]).unwrap();

        let err = RockstarDataset::open(&path).unwrap_err();
        assert!(matches!(err, HaloError::InvalidRockstarOutput { .. }));
    }

    #[test]
    fn test_truncated_header_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("halos_0.0.bin");
        fs::write(&path, ROCKSTAR_MAGIC.to_le_bytes()).unwrap();

        let err = RockstarDataset::open(&path).unwrap_err();
        assert!(matches!(err, HaloError::InvalidRockstarOutput { .. }));
    }

    #[test]
    fn test_render_config() {
        let mpc = 1.0e6 * PARSEC_CM;
        let ds = Dataset {
            name: "snap".to_string(),
            path: PathBuf::from("sim/snapshot_033"),
            domain_left_edge: [0.0; 3],
            domain_right_edge: [100.0 * mpc; 3],
            current_redshift: 1.0,
            cosmology: Some(Cosmology {
                omega_matter: 0.3,
                omega_lambda: 0.7,
                hubble_constant: 0.5,
            }),
        };
        let process = RockstarProcess::new("rockstar", 1, 4);
        let options = BTreeMap::from([
            ("num_readers".to_string(), json!(2)),
            ("mass_definition".to_string(), json!("vir")),
            ("min_halo_output_size".to_string(), json!(25)),
        ]);

        let config = process.render_config(&ds, &options, Path::new("rockstar_halos"));
        assert!(config.contains("INBASE = \"sim\"\n"));
        assert!(config.contains("FILENAME = \"snapshot_033\"\n"));
        assert!(config.contains("OUTBASE = \"rockstar_halos\"\n"));
        assert!(config.contains("NUM_READERS = 2\n"));
        assert!(config.contains("NUM_WRITERS = 4\n"));
        assert!(config.contains("SCALE_NOW = 0.5\n"));
        let box_size: f64 = config
            .lines()
            .find_map(|line| line.strip_prefix("BOX_SIZE = "))
            .unwrap()
            .parse()
            .unwrap();
        assert_relative_eq!(box_size, 50.0, max_relative = 1e-12);
        assert!(config.contains("MASS_DEFINITION = \"vir\"\n"));
        assert!(config.contains("MIN_HALO_OUTPUT_SIZE = 25\n"));
    }
}
