use crate::{
    combination::CaseId,
    document::{read_yaml, write_yaml_atomic, ConfigDocument, DocumentError},
    layout::StudyLayout,
    materialize::{CaseMaterializer, CaseRegistry, MaterializeError},
    sentinel::{self, Sentinel},
    state::{SimStatus, StateError, StudyState},
};
use std::{fs, io, path::PathBuf};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Document(#[from] DocumentError),
    #[error(transparent)]
    Materialize(#[from] MaterializeError),
    #[error("Failed to access {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
}

/// Which cases a reset picks up
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResetScope {
    All,
    /// everything except finished cases
    Unfinished,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResetOptions {
    pub scope: ResetScope,
    /// re-clone the case folders and reapply their parameters
    pub restore_original: bool,
    pub clear_out: bool,
    pub clear_err: bool,
    pub clear_log: bool,
}

impl Default for ResetOptions {
    fn default() -> Self {
        Self {
            scope: ResetScope::Unfinished,
            restore_original: false,
            clear_out: false,
            clear_err: false,
            clear_log: false,
        }
    }
}

/// Persistent home of the [`StudyState`] document.
///
/// Every mutation re-reads the document, applies the change and writes it back.
/// There is no locking between processes, concurrent writers race and the last
/// write wins.
#[derive(Clone, Debug)]
pub struct StudyStore {
    layout: StudyLayout,
    config_file: String,
}

impl StudyStore {
    pub fn new(layout: StudyLayout, config_file: impl Into<String>) -> Self {
        Self {
            layout,
            config_file: config_file.into(),
        }
    }

    pub fn layout(&self) -> &StudyLayout {
        &self.layout
    }

    /// write a fresh state with every case not started
    pub fn initialize(&self, cases: Vec<CaseId>) -> Result<StudyState, StoreError> {
        let state = StudyState::new(self.layout.root(), cases)?;

        self.save(&state)?;
        info!(cases = state.total(), "Initialized study state");

        Ok(state)
    }

    pub fn load(&self) -> Result<StudyState, StoreError> {
        Ok(read_yaml(&self.layout.state_file())?)
    }

    pub fn save(&self, state: &StudyState) -> Result<(), StoreError> {
        Ok(write_yaml_atomic(&self.layout.state_file(), state)?)
    }

    /// Move a case to `status`, mirror the status into its config document and
    /// persist the state. Returns the status the case left.
    #[instrument(skip(self), level = "debug")]
    pub fn transition(&self, case: &str, status: SimStatus) -> Result<SimStatus, StoreError> {
        let mut state = self.load()?;
        let previous = state.move_to(case, status)?;

        self.mirror_status(case, status)?;
        self.save(&state)?;

        debug!(case, from = %previous, to = %status, "Transitioned case");

        Ok(previous)
    }

    fn mirror_status(&self, case: &str, status: SimStatus) -> Result<(), StoreError> {
        let path = self.layout.case_folder(case).join(&self.config_file);

        if !path.is_file() {
            warn!(case, path = ?path, "Case config document is missing, status not mirrored");
            return Ok(());
        }

        let mut document = ConfigDocument::load(&path)?;
        document.set_status(status.as_str())?;
        document.save()?;

        Ok(())
    }

    /// Fold the sentinel markers written by remote jobs into the state. Only cases
    /// not started or running are checked, a missing marker changes nothing.
    #[instrument(skip(self), level = "debug")]
    pub fn reconcile_remote(&self) -> Result<Vec<(CaseId, SimStatus)>, StoreError> {
        let state = self.load()?;
        let touch = self.layout.touch_folder();

        let hits = [SimStatus::NotStarted, SimStatus::Running]
            .into_iter()
            .flat_map(|status| state.cases(status).iter())
            .filter_map(|case| {
                sentinel::detect(&touch, case).map(|sentinel| (case.clone(), sentinel))
            })
            .collect::<Vec<(CaseId, Sentinel)>>();

        let mut updated = Vec::with_capacity(hits.len());

        for (case, sentinel) in hits {
            let status = sentinel.status();

            self.transition(&case, status)?;
            info!(case = %case, marker = sentinel.prefix(), status = %status, "Case finished remotely");

            updated.push((case, status));
        }

        Ok(updated)
    }

    /// Move the selected cases back to not started. Sentinel markers of every reset
    /// case are removed, the folders are rebuilt only if `restore_original` is set.
    /// Cases reset before a failure stay reset.
    #[instrument(skip(self, materializer), level = "info")]
    pub fn reset(
        &self,
        options: ResetOptions,
        materializer: &CaseMaterializer,
    ) -> Result<Vec<CaseId>, StoreError> {
        let mut state = self.load()?;
        let statuses: &[SimStatus] = match options.scope {
            ResetScope::All => &SimStatus::ALL,
            ResetScope::Unfinished => &SimStatus::UNFINISHED,
        };

        let selected = statuses
            .iter()
            .flat_map(|status| state.cases(*status).to_vec())
            .collect::<Vec<_>>();

        let registry = if options.restore_original {
            Some(CaseRegistry::load(&self.layout.combos_file())?)
        } else {
            None
        };
        let touch = self.layout.touch_folder();

        for case in selected.iter() {
            match registry.as_ref() {
                Some(registry) => {
                    materializer.restore(case, registry)?;
                }
                None => self.mirror_status(case, SimStatus::NotStarted)?,
            }

            sentinel::clear(&touch, case).map_err(|source| StoreError::Io {
                path: touch.clone(),
                source,
            })?;
            state.move_to(case, SimStatus::NotStarted)?;
            self.save(&state)?;

            debug!(case = %case, "Reset case");
        }

        for (clear, folder) in [
            (options.clear_out, self.layout.out_folder()),
            (options.clear_err, self.layout.err_folder()),
            (options.clear_log, self.layout.log_folder()),
        ] {
            if clear {
                clear_folder(&folder)?;
            }
        }

        info!(cases = selected.len(), "Reset finished");

        Ok(selected)
    }

    /// delete the whole study root
    pub fn teardown(&self) -> Result<(), StoreError> {
        let root = self.layout.root();

        fs::remove_dir_all(root).map_err(|source| StoreError::Io {
            path: root.to_owned(),
            source,
        })?;

        warn!(root = ?root, "Removed study");

        Ok(())
    }
}

/// remove the files inside a folder, keeping the folder itself
fn clear_folder(folder: &std::path::Path) -> Result<(), StoreError> {
    let io_error = |source| StoreError::Io {
        path: folder.to_owned(),
        source,
    };

    if !folder.is_dir() {
        return Ok(());
    }

    for entry in fs::read_dir(folder).map_err(io_error)? {
        let path = entry.map_err(io_error)?.path();

        if path.is_dir() {
            fs::remove_dir_all(&path).map_err(io_error)?;
        } else {
            fs::remove_file(&path).map_err(io_error)?;
        }
    }

    debug!(folder = ?folder, "Cleared folder");

    Ok(())
}
