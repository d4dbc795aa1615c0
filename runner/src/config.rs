use crate::{
    document::{get_nested, read_yaml, update_nested, DocumentError},
    executors::{
        htcondor::HtcondorConfig, local::LocalConfig, slurm::SlurmConfig, ExecutorError,
    },
    parameter::{ParameterDeclaration, ParameterError, ParameterSet, ParameterSpec},
};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::{
    collections::BTreeMap,
    env,
    fs::File,
    io::Error,
    os::unix::fs::MetadataExt,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, error, warn};

// check if a file is executable
pub fn check_executable(path: &Path) -> Result<bool, ConfigErrors> {
    if !path.is_file() {
        Err(ConfigErrors::FileNotFound(path.to_owned()))
    } else {
        match File::open(path).map(|file| file.metadata()) {
            Ok(Ok(metadata)) => Ok((metadata.mode() & 0o111) != 0),
            Ok(Err(e)) | Err(e) => Err(ConfigErrors::MetadataNotFound(e)),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigErrors {
    #[error("Executor {0} is not configured in the run configuration")]
    MissingExecutor(&'static str),
    #[error("Executor failed to load")]
    FailedLoadExecutor(#[from] ExecutorError),
    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),
    #[error("Metadata not found")]
    MetadataNotFound(#[from] Error),
    #[error(transparent)]
    Document(#[from] DocumentError),
    #[error(transparent)]
    Parameter(#[from] ParameterError),
    #[error("Preflight checks failed with {0} error(s)")]
    Preflight(usize),
}

/// The declarative description of a study, `simulation_study.yaml`
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct StudyDeclaration {
    pub study_name: String,
    // parent folder of the study root
    #[serde(default = "default_study_path")]
    pub study_path: PathBuf,
    // template every case is cloned from
    pub original_folder: PathBuf,
    // script inside the template that runs one case
    pub main_file: String,
    // nested config document inside the template
    pub config_file: String,
    pub parameters_inspected: Vec<ParameterDeclaration>,
    // exported to every run of a case
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
    // key chain -> value, applied to the test case only
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub test_overrides: BTreeMap<String, Value>,
    #[serde(default = "default_key_separator")]
    pub key_separator: String,
}

impl StudyDeclaration {
    /// Read a declaration, relative paths are resolved against the folder of the file
    pub fn load(path: &Path) -> Result<Self, ConfigErrors> {
        let mut declaration: Self = read_yaml(path)?;
        let base = match path.parent() {
            Some(parent) if parent.is_absolute() => parent.to_owned(),
            Some(parent) => env::current_dir()?.join(parent),
            None => env::current_dir()?,
        };

        declaration.resolve(&base);
        debug!(study = %declaration.study_name, "Loaded study declaration");

        Ok(declaration)
    }

    pub fn resolve(&mut self, base: &Path) {
        if self.study_path.is_relative() {
            self.study_path = base.join(&self.study_path);
        }
        if self.original_folder.is_relative() {
            self.original_folder = base.join(&self.original_folder);
        }
    }

    /// `<study_path>/<study_name>`
    pub fn root(&self) -> PathBuf {
        self.study_path.join(&self.study_name)
    }

    pub fn parameters(&self) -> Result<ParameterSet, ParameterError> {
        ParameterSet::from_declarations(&self.parameters_inspected)
    }

    /// Validate the whole declaration, logging every problem instead of stopping at
    /// the first one, and build the parameter set.
    pub fn preflight_checks(&self) -> Result<ParameterSet, ConfigErrors> {
        let mut errors = 0;

        if self.study_name.is_empty() || self.study_name.contains('/') {
            error!(
                "study_name '{}' must be a non empty folder name",
                self.study_name
            );
            errors += 1;
        }

        if self.key_separator.is_empty() {
            error!("key_separator cannot be empty");
            errors += 1;
        }

        for key in self.environment.keys() {
            if !is_shell_identifier(key) {
                error!("environment.{key} is not a valid shell variable name");
                errors += 1;
            }
        }

        let document = self.check_template(&mut errors);

        if self.parameters_inspected.is_empty() {
            error!("parameters_inspected is empty, a study needs at least one parameter");
            errors += 1;
        }

        let mut specs = Vec::with_capacity(self.parameters_inspected.len());
        for (index, declaration) in self.parameters_inspected.iter().enumerate() {
            match ParameterSpec::from_declaration(declaration) {
                Ok(spec) => specs.push(spec),
                Err(e) => {
                    error!("parameters_inspected[{index}]: {e}");
                    errors += 1;
                }
            }
        }

        if let Some(document) = document.as_ref() {
            for spec in specs.iter() {
                if let Err(e) =
                    update_nested(&mut document.clone(), &spec.name, &self.key_separator, Value::Null)
                {
                    error!("parameter {} cannot be written to {}: {e}", spec.name, self.config_file);
                    errors += 1;
                }
            }

            for chain in self.test_overrides.keys() {
                if get_nested(document, chain, &self.key_separator).is_none() {
                    warn!("test_overrides.{chain} is not present in {}, it will be added", self.config_file);
                }
            }
        }

        if errors > 0 {
            return Err(ConfigErrors::Preflight(errors));
        }

        // group consistency can only be checked once every spec is valid
        ParameterSet::new(specs).map_err(|e| {
            error!("parameters_inspected: {e}");
            ConfigErrors::Parameter(e)
        })
    }

    fn check_template(&self, errors: &mut usize) -> Option<Value> {
        if !self.original_folder.is_dir() {
            error!(
                "original_folder {} is not a folder",
                self.original_folder.display()
            );
            *errors += 1;
            return None;
        }

        let main_file = self.original_folder.join(&self.main_file);
        match check_executable(&main_file) {
            Ok(true) => {}
            Ok(false) => warn!(
                "main_file {} is not executable, remote schedulers might refuse to run it",
                main_file.display()
            ),
            Err(e) => {
                error!("main_file {}: {e}", main_file.display());
                *errors += 1;
            }
        }

        match read_yaml::<Value>(&self.original_folder.join(&self.config_file)) {
            Ok(document) if document.is_mapping() => Some(document),
            Ok(_) => {
                error!("config_file {} does not hold a mapping", self.config_file);
                *errors += 1;
                None
            }
            Err(e) => {
                error!("config_file: {e}");
                *errors += 1;
                None
            }
        }
    }
}

/// Executor settings, `run_config.yaml`. Only the sections of the executors in use
/// need to be present.
#[derive(Deserialize, Serialize, Clone, Debug, Default)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_local: Option<LocalConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_htcondor: Option<HtcondorConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_slurm: Option<SlurmConfig>,
}

impl RunConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigErrors> {
        Ok(read_yaml(path)?)
    }
}

fn is_shell_identifier(name: &str) -> bool {
    let mut characters = name.chars();

    characters
        .next()
        .map_or(false, |first| first == '_' || first.is_ascii_alphabetic())
        && characters.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

fn default_study_path() -> PathBuf {
    PathBuf::from(".")
}

fn default_key_separator() -> String {
    "/".to_owned()
}

#[cfg(test)]
mod config_test;
