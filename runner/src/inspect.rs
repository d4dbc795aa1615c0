use crate::{state::SimStatus, store::StoreError, study::Study};
use globset::{Glob, GlobMatcher};
use std::{
    fs, io,
    os::unix::fs::symlink,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, info};

/// files extracted when no glob is given
pub const DEFAULT_EXTRACT_GLOB: &str = "*.{h5,pkl}";
/// folder, relative to the study root, receiving extracted files
pub const DEFAULT_EXTRACT_TARGET: &str = "extracted_files";

#[derive(Error, Debug)]
pub enum InspectError {
    #[error("Invalid file pattern: {0}")]
    InvalidGlob(#[from] globset::Error),
    #[error("Failed to access {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
    #[error("Index {idx} is out of range, {} holds {len} files", folder.display())]
    OutOfRange {
        folder: PathBuf,
        idx: usize,
        len: usize,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> InspectError {
    let path = path.to_owned();
    move |source| InspectError::Io { path, source }
}

/// Regular files of `folder` sorted by name, or only the `idx`-th of them
pub fn list_files(folder: &Path, idx: Option<usize>) -> Result<Vec<PathBuf>, InspectError> {
    let mut files = fs::read_dir(folder)
        .map_err(io_error(folder))?
        .map(|entry| entry.map(|entry| entry.path()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(io_error(folder))?;
    files.retain(|path| path.is_file());
    files.sort();

    match idx {
        None => Ok(files),
        Some(idx) if idx < files.len() => Ok(vec![files.swap_remove(idx)]),
        Some(idx) => Err(InspectError::OutOfRange {
            folder: folder.to_owned(),
            idx,
            len: files.len(),
        }),
    }
}

/// Contents of the files selected by [`list_files`], paired with their path
pub fn cat_files(folder: &Path, idx: Option<usize>) -> Result<Vec<(PathBuf, String)>, InspectError> {
    list_files(folder, idx)?
        .into_iter()
        .map(|path| {
            let content = fs::read_to_string(&path).map_err(io_error(&path))?;
            Ok((path, content))
        })
        .collect()
}

/// Copy the files of every finished case matching `pattern` into `target` as
/// `<case>_<file>`. Only the top level of a case folder is searched, symlinks are
/// recreated pointing at the same file. Returns the created paths.
pub fn extract_files(
    study: &Study,
    pattern: &str,
    target: &Path,
) -> Result<Vec<PathBuf>, InspectError> {
    let matcher = Glob::new(pattern)?.compile_matcher();
    let state = study.store().load()?;

    fs::create_dir_all(target).map_err(io_error(target))?;

    let mut extracted = Vec::new();
    for case in state.cases(SimStatus::Finished) {
        let folder = study.layout().case_folder(case);

        for source in matching_entries(&folder, &matcher)? {
            let Some(name) = source.file_name() else {
                continue;
            };
            let destination = target.join(format!("{case}_{}", name.to_string_lossy()));

            extract_one(&folder, &source, &destination)?;
            debug!(from = ?source, to = ?destination, "Extracted file");
            extracted.push(destination);
        }
    }

    info!(files = extracted.len(), target = ?target, "Extracted files of finished cases");

    Ok(extracted)
}

fn matching_entries(folder: &Path, matcher: &GlobMatcher) -> Result<Vec<PathBuf>, InspectError> {
    let mut entries = fs::read_dir(folder)
        .map_err(io_error(folder))?
        .map(|entry| entry.map(|entry| entry.path()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(io_error(folder))?;

    entries.retain(|path| {
        path.file_name()
            .map_or(false, |name| matcher.is_match(Path::new(name)))
            && path.symlink_metadata().map_or(false, |meta| !meta.is_dir())
    });
    entries.sort();

    Ok(entries)
}

fn extract_one(folder: &Path, source: &Path, destination: &Path) -> Result<(), InspectError> {
    let metadata = source.symlink_metadata().map_err(io_error(source))?;

    if metadata.file_type().is_symlink() {
        let link = fs::read_link(source).map_err(io_error(source))?;
        let link = if link.is_relative() {
            folder.join(link)
        } else {
            link
        };

        if destination.symlink_metadata().is_ok() {
            fs::remove_file(destination).map_err(io_error(destination))?;
        }
        symlink(&link, destination).map_err(io_error(destination))
    } else {
        fs::copy(source, destination)
            .map(|_| ())
            .map_err(io_error(destination))
    }
}
