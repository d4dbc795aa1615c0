use crate::{
    combination::{Assignment, Case, CaseId},
    document::{read_yaml, write_yaml_atomic, ConfigDocument, DocumentError},
    layout::StudyLayout,
    state::SimStatus,
};
use ignore::WalkBuilder;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::{
    collections::BTreeMap,
    fs, io,
    os::unix::fs::symlink,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum MaterializeError {
    #[error("Failed to copy {} to {}: {source}", from.display(), to.display())]
    Copy {
        from: PathBuf,
        to: PathBuf,
        source: io::Error,
    },
    #[error("Failed to move {} to {}: {source}", from.display(), to.display())]
    Move {
        from: PathBuf,
        to: PathBuf,
        source: io::Error,
    },
    #[error("Failed to remove {}: {source}", path.display())]
    Remove { path: PathBuf, source: io::Error },
    #[error("Failed to walk template folder: {0}")]
    Walk(#[from] ignore::Error),
    #[error("Case folder {} already exists", .0.display())]
    AlreadyExists(PathBuf),
    #[error("Config document {} does not exist", .0.display())]
    MissingConfig(PathBuf),
    #[error("Case {0} has no recorded parameters")]
    Unregistered(CaseId),
    #[error(transparent)]
    Document(#[from] DocumentError),
}

/// Recursively copy the content of `source` into `target`, symlinks are recreated as
/// symlinks instead of being followed.
pub fn clone_folder_content(source: &Path, target: &Path) -> Result<(), MaterializeError> {
    let copy_error = |from: &Path, to: &Path| {
        let (from, to) = (from.to_owned(), to.to_owned());
        move |source| MaterializeError::Copy { from, to, source }
    };

    fs::create_dir_all(target).map_err(copy_error(source, target))?;

    let walker = WalkBuilder::new(source)
        .standard_filters(false)
        .follow_links(false)
        .build();

    for entry in walker {
        let entry = entry?;
        let path = entry.path();
        let relative = match path.strip_prefix(source) {
            Ok(relative) if !relative.as_os_str().is_empty() => relative,
            _ => continue,
        };
        let destination = target.join(relative);

        match entry.file_type() {
            Some(kind) if kind.is_symlink() => {
                let link = fs::read_link(path).map_err(copy_error(path, &destination))?;
                symlink(&link, &destination).map_err(copy_error(path, &destination))?;
            }
            Some(kind) if kind.is_dir() => {
                fs::create_dir_all(&destination).map_err(copy_error(path, &destination))?;
            }
            Some(_) => {
                fs::copy(path, &destination).map_err(copy_error(path, &destination))?;
            }
            None => warn!(path = ?path, "Skipping entry without file type"),
        }
    }

    Ok(())
}

/// Side table of the parameters every case was created with
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(transparent)]
pub struct CaseRegistry {
    cases: BTreeMap<CaseId, Vec<Assignment>>,
}

impl CaseRegistry {
    pub fn load(path: &Path) -> Result<Self, DocumentError> {
        read_yaml(path)
    }

    pub fn save(&self, path: &Path) -> Result<(), DocumentError> {
        write_yaml_atomic(path, self)
    }

    pub fn insert(&mut self, case: CaseId, assignments: Vec<Assignment>) {
        self.cases.insert(case, assignments);
    }

    pub fn get(&self, case: &str) -> Option<&[Assignment]> {
        self.cases.get(case).map(Vec::as_slice)
    }

    pub fn contains(&self, case: &str) -> bool {
        self.cases.contains_key(case)
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }
}

/// Creates case folders from the frozen template of a study
#[derive(Clone, Debug)]
pub struct CaseMaterializer {
    layout: StudyLayout,
    config_file: String,
    separator: String,
}

impl CaseMaterializer {
    pub fn new(layout: StudyLayout, config_file: impl Into<String>, separator: impl Into<String>) -> Self {
        Self {
            layout,
            config_file: config_file.into(),
            separator: separator.into(),
        }
    }

    pub fn layout(&self) -> &StudyLayout {
        &self.layout
    }

    /// Clone the template into a fresh folder named after the case and write its
    /// values. A failing case leaves no folder behind.
    pub fn materialize(&self, case: &Case) -> Result<PathBuf, MaterializeError> {
        let folder = self.layout.case_folder(&case.folder_name());

        if folder.exists() {
            return Err(MaterializeError::AlreadyExists(folder));
        }

        self.populate(&folder, &case.assignments, &BTreeMap::new())?;

        debug!(case = %case.folder_name(), "Materialized case");

        Ok(folder)
    }

    /// the smoke-test case: same values as `case`, with the overrides applied on top
    pub fn materialize_test(
        &self,
        case: &Case,
        overrides: &BTreeMap<String, Value>,
    ) -> Result<PathBuf, MaterializeError> {
        let folder = self.layout.test_folder();

        remove_folder(&folder)?;
        self.populate(&folder, &case.assignments, overrides)?;

        info!(folder = ?folder, overrides = overrides.len(), "Materialized test case");

        Ok(folder)
    }

    /// Clone the case again and reapply its recorded values. The fresh copy is built
    /// next to the study root first, the old folder is only replaced once it succeeded.
    pub fn restore(&self, case: &str, registry: &CaseRegistry) -> Result<PathBuf, MaterializeError> {
        let assignments = registry
            .get(case)
            .ok_or_else(|| MaterializeError::Unregistered(case.to_owned()))?;
        let folder = self.layout.case_folder(case);
        let staging = self.layout.root().join(format!(".restore_{case}"));

        remove_folder(&staging)?;
        self.populate(&staging, assignments, &BTreeMap::new())?;

        let swapped = remove_folder(&folder).and_then(|()| {
            fs::rename(&staging, &folder).map_err(|source| MaterializeError::Move {
                from: staging.clone(),
                to: folder.clone(),
                source,
            })
        });
        if swapped.is_err() {
            if let Err(error) = remove_folder(&staging) {
                warn!(folder = ?staging, "Failed to clean up restored copy: {error}");
            }
        }
        swapped?;

        debug!(case, "Restored case from the original folder");

        Ok(folder)
    }

    pub fn config_path(&self, case: &str) -> PathBuf {
        self.layout.case_folder(case).join(&self.config_file)
    }

    fn populate(
        &self,
        folder: &Path,
        assignments: &[Assignment],
        overrides: &BTreeMap<String, Value>,
    ) -> Result<(), MaterializeError> {
        let result = clone_folder_content(&self.layout.original_folder(), folder)
            .and_then(|()| self.apply(folder, assignments, overrides));

        if result.is_err() {
            if let Err(error) = remove_folder(folder) {
                warn!(folder = ?folder, "Failed to clean up half materialized case: {error}");
            }
        }

        result
    }

    fn apply(
        &self,
        folder: &Path,
        assignments: &[Assignment],
        overrides: &BTreeMap<String, Value>,
    ) -> Result<(), MaterializeError> {
        let path = folder.join(&self.config_file);

        if !path.is_file() {
            return Err(MaterializeError::MissingConfig(path));
        }

        let mut document = ConfigDocument::load(&path)?;

        for assignment in assignments {
            document.update(
                &assignment.parameter_name,
                &self.separator,
                assignment.value.clone(),
            )?;
        }

        for (chain, value) in overrides {
            document.update(chain, &self.separator, value.clone())?;
        }

        document.set_status(SimStatus::NotStarted.as_str())?;
        document.save()?;

        Ok(())
    }
}

fn remove_folder(folder: &Path) -> Result<(), MaterializeError> {
    match fs::remove_dir_all(folder) {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(MaterializeError::Remove {
            path: folder.to_owned(),
            source,
        }),
    }
}
