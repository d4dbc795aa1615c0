use crate::{
    combination::{Case, CaseId},
    config::{ConfigErrors, StudyDeclaration},
    document::{write_yaml_atomic, DocumentError},
    executors::ExecutorError,
    inspect::InspectError,
    layout::StudyLayout,
    materialize::{clone_folder_content, CaseMaterializer, CaseRegistry, MaterializeError},
    parameter::{ParameterError, ParameterSet},
    report::StatusReport,
    state::StudyState,
    store::{ResetOptions, StoreError, StudyStore},
};
use std::{
    collections::HashMap,
    fs, io,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{info, instrument, warn};

#[derive(Error, Debug)]
pub enum StudyError {
    #[error(transparent)]
    Config(#[from] ConfigErrors),
    #[error(transparent)]
    Parameter(#[from] ParameterError),
    #[error(transparent)]
    Document(#[from] DocumentError),
    #[error(transparent)]
    Materialize(#[from] MaterializeError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Executor(#[from] ExecutorError),
    #[error(transparent)]
    Inspect(#[from] InspectError),
    #[error("Cases {first} and {second} map to the same folder name {name}")]
    DuplicateCase {
        name: CaseId,
        first: usize,
        second: usize,
    },
    #[error("Expected {expected} case folders but found {found}")]
    CountMismatch { expected: usize, found: usize },
    #[error("Study at {} already exists", .0.display())]
    AlreadyCreated(PathBuf),
    #[error("No study found at {}", .0.display())]
    NotCreated(PathBuf),
    #[error("Failed to access {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
}

/// A study: its validated declaration plus everything derived from it
#[derive(Clone, Debug)]
pub struct Study {
    declaration: StudyDeclaration,
    parameters: ParameterSet,
    layout: StudyLayout,
    store: StudyStore,
    materializer: CaseMaterializer,
}

impl Study {
    pub fn from_declaration(declaration: StudyDeclaration) -> Result<Self, StudyError> {
        let parameters = declaration.preflight_checks()?;
        let layout = StudyLayout::new(declaration.root());

        Ok(Self {
            store: StudyStore::new(layout.clone(), declaration.config_file.clone()),
            materializer: CaseMaterializer::new(
                layout.clone(),
                declaration.config_file.clone(),
                declaration.key_separator.clone(),
            ),
            declaration,
            parameters,
            layout,
        })
    }

    /// read a declaration file that has not necessarily been created yet
    pub fn load(path: &Path) -> Result<Self, StudyError> {
        Self::from_declaration(StudyDeclaration::load(path)?)
    }

    /// open an already created study from its root folder
    pub fn open(root: &Path) -> Result<Self, StudyError> {
        let layout = StudyLayout::new(root);

        if !layout.state_file().is_file() {
            return Err(StudyError::NotCreated(root.to_owned()));
        }

        Self::load(&layout.declaration_file())
    }

    pub fn declaration(&self) -> &StudyDeclaration {
        &self.declaration
    }

    pub fn parameters(&self) -> &ParameterSet {
        &self.parameters
    }

    pub fn layout(&self) -> &StudyLayout {
        &self.layout
    }

    pub fn store(&self) -> &StudyStore {
        &self.store
    }

    pub fn materializer(&self) -> &CaseMaterializer {
        &self.materializer
    }

    pub fn is_created(&self) -> bool {
        self.layout.state_file().is_file()
    }

    /// Build the study folder: freeze the template, materialize every case and the
    /// test case, then record the state with every case not started.
    #[instrument(skip(self), fields(study = %self.declaration.study_name), level = "info")]
    pub fn create(&self) -> Result<StudyState, StudyError> {
        if self.is_created() {
            return Err(StudyError::AlreadyCreated(self.layout.root().to_owned()));
        }

        let cases = self.parameters.cases().collect::<Vec<_>>();
        let names = cases.iter().map(|case| case.folder_name()).collect::<Vec<_>>();
        check_unique(&names)?;

        info!(cases = cases.len(), "Creating study");

        let fresh = self
            .layout
            .skeleton()
            .into_iter()
            .filter(|folder| !folder.exists())
            .collect::<Vec<_>>();

        let created = self.build(&cases, names);
        if created.is_err() {
            self.discard(&fresh);
        }

        created
    }

    fn build(&self, cases: &[Case], names: Vec<CaseId>) -> Result<StudyState, StudyError> {
        for folder in self.layout.skeleton() {
            fs::create_dir_all(&folder).map_err(|source| StudyError::Io {
                path: folder.clone(),
                source,
            })?;
        }

        let frozen = self.layout.original_folder();
        if self.declaration.original_folder != frozen {
            clone_folder_content(&self.declaration.original_folder, &frozen)?;
        }

        let mut registry = CaseRegistry::default();

        for (index, case) in cases.iter().enumerate() {
            self.materializer.materialize(case)?;

            if index == 0 {
                self.materializer
                    .materialize_test(case, &self.declaration.test_overrides)?;
            }

            registry.insert(names[index].clone(), case.assignments.clone());
        }

        registry.save(&self.layout.combos_file())?;

        let found = self
            .layout
            .listed_cases()
            .map_err(|source| StudyError::Io {
                path: self.layout.scan_folder(),
                source,
            })?
            .len();
        if found != names.len() {
            return Err(StudyError::CountMismatch {
                expected: names.len(),
                found,
            });
        }

        // the stored declaration points to the frozen template so the study can be
        // reopened without the original one
        let mut stored = self.declaration.clone();
        stored.original_folder = frozen;
        write_yaml_atomic(&self.layout.declaration_file(), &stored)?;

        Ok(self.store.initialize(names)?)
    }

    /// Undo a failed creation: the skeleton folders in `fresh` did not exist before it,
    /// the bookkeeping files of the root are always its own.
    fn discard(&self, fresh: &[PathBuf]) {
        let root = self.layout.root();
        let leftovers = if fresh.iter().any(|folder| folder == root) {
            vec![root.to_owned()]
        } else {
            let mut leftovers = fresh.to_vec();
            leftovers.push(self.layout.combos_file());
            leftovers.push(self.layout.declaration_file());
            leftovers
        };

        for path in leftovers.iter().rev() {
            let removed = if path.is_dir() {
                fs::remove_dir_all(path)
            } else {
                fs::remove_file(path)
            };

            match removed {
                Ok(()) => {}
                Err(error) if error.kind() == io::ErrorKind::NotFound => {}
                Err(error) => warn!(path = ?path, "Failed to clean up after a failed create: {error}"),
            }
        }

        warn!(root = ?root, "Study creation failed, removed what it had created");
    }

    /// counts and members of every status bucket, optionally folding in remote markers first
    pub fn status(&self, reconcile_remote: bool) -> Result<StatusReport, StudyError> {
        if reconcile_remote {
            let updated = self.store.reconcile_remote()?;

            if !updated.is_empty() {
                info!(updated = updated.len(), "Incorporated remote status markers");
            }
        }

        Ok(StatusReport::new(self.store.load()?))
    }

    pub fn reset(&self, options: ResetOptions) -> Result<Vec<CaseId>, StudyError> {
        Ok(self.store.reset(options, &self.materializer)?)
    }

    /// delete the whole study folder
    pub fn teardown(self) -> Result<(), StudyError> {
        if !self.layout.root().exists() {
            warn!(root = ?self.layout.root(), "Study folder does not exist");
            return Ok(());
        }

        Ok(self.store.teardown()?)
    }
}

fn check_unique(names: &[CaseId]) -> Result<(), StudyError> {
    let mut seen = HashMap::with_capacity(names.len());

    for (index, name) in names.iter().enumerate() {
        if let Some(first) = seen.insert(name.as_str(), index) {
            return Err(StudyError::DuplicateCase {
                name: name.clone(),
                first,
                second: index,
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod study_test;
