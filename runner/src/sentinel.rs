use crate::state::SimStatus;
use std::{
    fs, io,
    path::{Path, PathBuf},
};
use tracing::debug;

/// Marker files written by jobs this process does not control. Only their
/// existence carries information, a missing marker means "still pending".
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Sentinel {
    Finished,
    Error,
    IoError,
}

impl Sentinel {
    /// checked in this order, the first marker found wins
    pub const PRECEDENCE: [Sentinel; 3] = [Sentinel::Error, Sentinel::IoError, Sentinel::Finished];

    pub fn prefix(self) -> &'static str {
        match self {
            Self::Finished => "FINISHED_",
            Self::Error => "ERROR_",
            Self::IoError => "IO_ERROR_",
        }
    }

    pub fn status(self) -> SimStatus {
        match self {
            Self::Finished => SimStatus::Finished,
            Self::Error | Self::IoError => SimStatus::Error,
        }
    }

    pub fn file_name(self, case: &str) -> String {
        format!("{}{case}", self.prefix())
    }

    pub fn path(self, touch_dir: &Path, case: &str) -> PathBuf {
        touch_dir.join(self.file_name(case))
    }

    /// split a marker file name into its kind and case id
    pub fn parse(file_name: &str) -> Option<(Sentinel, &str)> {
        Self::PRECEDENCE.iter().find_map(|sentinel| {
            file_name
                .strip_prefix(sentinel.prefix())
                .filter(|case| !case.is_empty())
                .map(|case| (*sentinel, case))
        })
    }

    pub fn touch(self, touch_dir: &Path, case: &str) -> io::Result<()> {
        fs::create_dir_all(touch_dir)?;
        fs::write(self.path(touch_dir, case), b"")
    }
}

/// the terminal marker of a case, if any was written
pub fn detect(touch_dir: &Path, case: &str) -> Option<Sentinel> {
    Sentinel::PRECEDENCE
        .into_iter()
        .find(|sentinel| sentinel.path(touch_dir, case).exists())
}

/// remove every marker of a case, returns how many were removed
pub fn clear(touch_dir: &Path, case: &str) -> io::Result<usize> {
    let mut removed = 0;

    for sentinel in Sentinel::PRECEDENCE {
        match fs::remove_file(sentinel.path(touch_dir, case)) {
            Ok(()) => removed += 1,
            Err(error) if error.kind() == io::ErrorKind::NotFound => {}
            Err(error) => return Err(error),
        }
    }

    if removed > 0 {
        debug!(case, removed, "Cleared sentinel markers");
    }

    Ok(removed)
}

#[cfg(test)]
mod sentinel_test;
