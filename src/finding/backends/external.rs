use serde_json::Value;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

use super::HaloFinderBackend;
use crate::dataset::Dataset;
use crate::domain::{HaloList, RecordedHaloList};
use crate::error::{HaloError, Result};
use crate::finding::FinderOptions;

const DATASET_PLACEHOLDER: &str = "{dataset}";
const OUTPUT_PLACEHOLDER: &str = "{output}";

/// Runs an external FoF/HOP program and reads back the JSON halo list it writes.
///
/// `{dataset}` and `{output}` in `args` are replaced by the dataset path and
/// the halo list path. Finder options are appended as `--key=value`; the
/// `output` option overrides the halo list path.
pub struct ExternalHaloFinder {
    name: String,
    program: PathBuf,
    args: Vec<String>,
    work_dir: PathBuf,
}

impl ExternalHaloFinder {
    pub fn new(
        name: impl Into<String>,
        program: impl Into<PathBuf>,
        args: Vec<String>,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args,
            work_dir: work_dir.into(),
        }
    }

    fn output_path(&self, ds: &Dataset, options: &FinderOptions) -> PathBuf {
        match options.get("output").and_then(|v| v.as_str()) {
            Some(path) => PathBuf::from(path),
            None => self.work_dir.join(format!("{}_{}.json", self.name, ds.name)),
        }
    }

    fn command_args(&self, ds: &Dataset, output: &Path, options: &FinderOptions) -> Vec<String> {
        let dataset = ds.path.display().to_string();
        let output = output.display().to_string();

        let mut args: Vec<String> = self
            .args
            .iter()
            .map(|arg| {
                arg.replace(DATASET_PLACEHOLDER, &dataset)
                    .replace(OUTPUT_PLACEHOLDER, &output)
            })
            .collect();

        for (key, value) in options {
            if key == "output" {
                continue;
            }
            args.push(format!("--{}={}", key, option_value(value)));
        }
        args
    }
}

impl HaloFinderBackend for ExternalHaloFinder {
    fn name(&self) -> &str {
        &self.name
    }

    fn find_halos(&self, ds: &Dataset, options: &FinderOptions) -> Result<Box<dyn HaloList>> {
        let output = self.output_path(ds, options);
        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent)?;
        }
        // Drop any list written by an earlier run
        match std::fs::remove_file(&output) {
            Ok(()) => debug!("Removed previous halo list {}", output.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let args = self.command_args(ds, &output, options);
        info!(
            finder = %self.name,
            program = %self.program.display(),
            "Running external halo finder"
        );
        debug!("Finder arguments: {:?}", args);

        let result = Command::new(&self.program).args(&args).output().map_err(|e| {
            HaloError::Finder(format!(
                "failed to start {} ({}): {}",
                self.name,
                self.program.display(),
                e
            ))
        })?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(HaloError::Finder(format!(
                "{} exited with {}: {}",
                self.name,
                result.status,
                stderr.trim()
            )));
        }

        if !output.exists() {
            return Err(HaloError::Finder(format!(
                "{} exited successfully but wrote no halo list at {}",
                self.name,
                output.display()
            )));
        }

        let halos = RecordedHaloList::load(&output)?;
        Ok(Box::new(halos))
    }
}

/// Reads a halo list an earlier finder run already wrote.
///
/// The `halo_list` option overrides the configured path.
pub struct RecordedListFinder {
    name: String,
    path: PathBuf,
}

impl RecordedListFinder {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }
}

impl HaloFinderBackend for RecordedListFinder {
    fn name(&self) -> &str {
        &self.name
    }

    fn find_halos(&self, _ds: &Dataset, options: &FinderOptions) -> Result<Box<dyn HaloList>> {
        let path = options
            .get("halo_list")
            .and_then(|v| v.as_str())
            .map(PathBuf::from)
            .unwrap_or_else(|| self.path.clone());
        debug!(finder = %self.name, "Loading recorded halo list from {}", path.display());
        Ok(Box::new(RecordedHaloList::load(&path)?))
    }
}

fn option_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn dataset(path: &Path) -> Dataset {
        Dataset {
            name: "snap".to_string(),
            path: path.to_path_buf(),
            domain_left_edge: [0.0; 3],
            domain_right_edge: [1.0; 3],
            current_redshift: 0.0,
            cosmology: None,
        }
    }

    fn halo_list_json() -> serde_json::Value {
        json!({
            "save_particles": false,
            "halos": [{
                "id": 1,
                "virial_mass": {"value": 1.0e12, "unit": "Msun"},
                "virial_radius": {"value": 200.0, "unit": "kpc"},
                "center_of_mass": [
                    {"value": 0.1, "unit": "unitary"},
                    {"value": 0.2, "unit": "unitary"},
                    {"value": 0.3, "unit": "unitary"}
                ],
                "bulk_velocity": [
                    {"value": 1.0, "unit": "km/s"},
                    {"value": 2.0, "unit": "km/s"},
                    {"value": 3.0, "unit": "km/s"}
                ]
            }]
        })
    }

    #[test]
    fn test_command_args_expand_placeholders() {
        let finder = ExternalHaloFinder::new(
            "fof",
            "fof-finder",
            vec!["--in".to_string(), "{dataset}".to_string(), "--out={output}".to_string()],
            "work",
        );
        let ds = dataset(Path::new("data/snap.bin"));
        let options = BTreeMap::from([
            ("link".to_string(), json!(0.2)),
            ("output".to_string(), json!("ignored")),
            ("ptype".to_string(), json!("dm")),
        ]);

        let args = finder.command_args(&ds, Path::new("work/fof_snap.json"), &options);
        assert_eq!(
            args,
            vec!["--in", "data/snap.bin", "--out=work/fof_snap.json", "--link=0.2", "--ptype=dm"]
        );
        assert_eq!(finder.output_path(&ds, &options), PathBuf::from("ignored"));
    }

    #[cfg(unix)]
    #[test]
    fn test_runs_program_and_reads_its_output() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("snap.json");
        std::fs::write(&input, halo_list_json().to_string()).unwrap();

        let finder = ExternalHaloFinder::new(
            "fof",
            "sh",
            vec![
                "-c".to_string(),
                "cp \"$1\" \"$2\"".to_string(),
                "sh".to_string(),
                "{dataset}".to_string(),
                "{output}".to_string(),
            ],
            dir.path().join("out"),
        );

        let halos = finder.find_halos(&dataset(&input), &BTreeMap::new()).unwrap();
        assert_eq!(halos.len(), 1);
        assert!(dir.path().join("out").join("fof_snap.json").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_failing_program_is_a_finder_error() {
        let dir = tempfile::tempdir().unwrap();
        let finder = ExternalHaloFinder::new(
            "hop",
            "sh",
            vec!["-c".to_string(), "echo boom >&2; exit 3".to_string()],
            dir.path(),
        );

        let err = finder
            .find_halos(&dataset(Path::new("missing.bin")), &BTreeMap::new())
            .err()
            .unwrap();
        match err {
            HaloError::Finder(message) => assert!(message.contains("boom")),
            other => panic!("expected a finder error, got {}", other),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_previous_output_is_not_reused() {
        let dir = tempfile::tempdir().unwrap();
        let stale = dir.path().join("fof_snap.json");
        std::fs::write(&stale, halo_list_json().to_string()).unwrap();

        // exits 0 without writing anything
        let finder = ExternalHaloFinder::new("fof", "true", Vec::new(), dir.path());

        let err = finder
            .find_halos(&dataset(Path::new("snap.bin")), &BTreeMap::new())
            .err()
            .unwrap();
        assert!(matches!(err, HaloError::Finder(ref msg) if msg.contains("wrote no halo list")));
        assert!(!stale.exists());
    }

    #[test]
    fn test_recorded_list_option_overrides_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hop.json");
        std::fs::write(&path, halo_list_json().to_string()).unwrap();

        let finder = RecordedListFinder::new("hop", dir.path().join("missing.json"));
        assert!(finder.find_halos(&dataset(&path), &BTreeMap::new()).is_err());

        let options = BTreeMap::from([(
            "halo_list".to_string(),
            json!(path.display().to_string()),
        )]);
        let halos = finder.find_halos(&dataset(&path), &options).unwrap();
        assert_eq!(halos.len(), 1);
    }
}
