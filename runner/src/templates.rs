use crate::layout::DECLARATION_FILE;
use once_cell::sync::Lazy;
use std::{
    fs, io,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::info;

pub const DEFAULT_TEMPLATE_FOLDER: &str = "sim_study";
pub const RUN_CONFIG_FILE: &str = "run_config.yaml";

const DECLARATION: &str = r#"study_name: my_study
# parent folder of the study, relative to this file
study_path: .
original_folder: master_study
main_file: run.sh
config_file: config.yaml

parameters_inspected:
  - parameter_name: physics/energy
    parameter_file_name: energy
    inspection_method: linspace
    min_value: 0.0
    max_value: 10.0
    n_samples: 3

  - parameter_name: solver/tolerance
    parameter_file_name: tol
    inspection_method: logspace
    min_value: 1.0e-6
    max_value: 1.0e-3
    n_samples: 2
    combination_idx: 0
    combination_method: meshgrid

  - parameter_name: solver/seed
    parameter_file_name: seed
    inspection_method: custom
    values: [1, 2]
    combination_idx: 0
    combination_method: meshgrid

environment:
  OMP_NUM_THREADS: "1"

# applied to the test case only
test_overrides:
  solver/steps: 1
"#;

const RUN_CONFIG: &str = r#"run_local:
  n_concurrent_jobs: 2
  # one lane per listed GPU, exported as CUDA_VISIBLE_DEVICES
  gpu_available_list: []
  run_test: false

run_htcondor:
  request_cpus: 1
  request_gpus: false
  time_limit: longlunch
  bump_schedd: false

run_slurm:
  request_cpus: 1
  time_limit: "02:00:00"
"#;

const MAIN_FILE: &str = r#"#!/bin/bash
# reads config.yaml of the case folder, results go to ./output_files
mkdir -p output_files

echo "Running $(basename "$(pwd)")"
cat config.yaml > output_files/used_config.yaml
"#;

const CONFIG_DOCUMENT: &str = r#"physics:
  energy: 1.0
solver:
  steps: 1000
  tolerance: 1.0e-4
  seed: 0
"#;

struct TemplateFile {
    path: &'static str,
    content: &'static str,
    executable: bool,
}

static FILES: Lazy<Vec<TemplateFile>> = Lazy::new(|| {
    vec![
        TemplateFile {
            path: DECLARATION_FILE,
            content: DECLARATION,
            executable: false,
        },
        TemplateFile {
            path: RUN_CONFIG_FILE,
            content: RUN_CONFIG,
            executable: false,
        },
        TemplateFile {
            path: "master_study/run.sh",
            content: MAIN_FILE,
            executable: true,
        },
        TemplateFile {
            path: "master_study/config.yaml",
            content: CONFIG_DOCUMENT,
            executable: false,
        },
    ]
});

#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("{} already exists, refusing to overwrite it", .0.display())]
    AlreadyExists(PathBuf),
    #[error("Failed to write {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
}

/// Write a starter study (declaration, run configuration and template folder)
/// into `destination/folder_name`. Returns the created folder.
pub fn copy_template(destination: &Path, folder_name: &str) -> Result<PathBuf, TemplateError> {
    let folder = destination.join(folder_name);

    if let Some(existing) = FILES
        .iter()
        .map(|file| folder.join(file.path))
        .find(|path| path.exists())
    {
        return Err(TemplateError::AlreadyExists(existing));
    }

    for file in FILES.iter() {
        let path = folder.join(file.path);
        let io_error = |source| TemplateError::Io {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_error)?;
        }
        fs::write(&path, file.content).map_err(io_error)?;

        if file.executable {
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).map_err(io_error)?;
        }
    }

    info!(folder = ?folder, "Copied study template");

    Ok(folder)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::RunConfig, state::SimStatus, study::Study};
    use tempfile::tempdir;

    #[test]
    fn starter_study_can_be_created() {
        let dir = tempdir().unwrap();
        let folder = copy_template(dir.path(), DEFAULT_TEMPLATE_FOLDER).unwrap();

        let study = Study::load(&folder.join(DECLARATION_FILE)).unwrap();
        let state = study.create().unwrap();

        assert_eq!(state.count(SimStatus::NotStarted), 12);
        assert!(state
            .cases(SimStatus::NotStarted)
            .iter()
            .any(|case| case.starts_with("case_energy_5d0_tol_") && case.ends_with("_seed_2d0")));

        let run_config = RunConfig::load(&folder.join(RUN_CONFIG_FILE)).unwrap();
        assert_eq!(run_config.run_local.unwrap().n_concurrent_jobs, 2);
        assert!(run_config.run_htcondor.is_some());
        assert!(run_config.run_slurm.is_some());
    }

    #[test]
    fn existing_files_are_kept() {
        let dir = tempdir().unwrap();
        copy_template(dir.path(), "study").unwrap();

        assert!(matches!(
            copy_template(dir.path(), "study"),
            Err(TemplateError::AlreadyExists(_))
        ));
    }
}
