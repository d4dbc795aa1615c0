use crate::combination::CaseId;
use serde::{Deserialize, Serialize};
use std::{collections::HashSet, fmt, path::PathBuf};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StateError {
    #[error("Case {0} is not tracked by this study")]
    UnknownCase(CaseId),
    #[error("Case {0} is tracked more than once")]
    DuplicateCase(CaseId),
}

/// Lifecycle of a single case
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum SimStatus {
    NotStarted,
    Running,
    Finished,
    Interrupted,
    Error,
}

impl SimStatus {
    pub const ALL: [SimStatus; 5] = [
        SimStatus::NotStarted,
        SimStatus::Running,
        SimStatus::Finished,
        SimStatus::Interrupted,
        SimStatus::Error,
    ];

    /// statuses a reset of unfinished cases picks up
    pub const UNFINISHED: [SimStatus; 4] = [
        SimStatus::NotStarted,
        SimStatus::Running,
        SimStatus::Error,
        SimStatus::Interrupted,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Running => "running",
            Self::Finished => "finished",
            Self::Interrupted => "interrupted",
            Self::Error => "error",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Interrupted | Self::Error)
    }
}

impl fmt::Display for SimStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Partition of every case of a study into the five status buckets.
/// Cases are only ever moved between buckets, never added or dropped.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct StudyState {
    pub root_folder: PathBuf,
    #[serde(default)]
    pub sim_not_started: Vec<CaseId>,
    #[serde(default)]
    pub sim_running: Vec<CaseId>,
    #[serde(default)]
    pub sim_finished: Vec<CaseId>,
    #[serde(default)]
    pub sim_interrupted: Vec<CaseId>,
    #[serde(default)]
    pub sim_error: Vec<CaseId>,
}

impl StudyState {
    /// every case starts as not started
    pub fn new(
        root_folder: impl Into<PathBuf>,
        cases: impl IntoIterator<Item = CaseId>,
    ) -> Result<Self, StateError> {
        let state = Self {
            root_folder: root_folder.into(),
            sim_not_started: cases.into_iter().collect(),
            sim_running: Vec::new(),
            sim_finished: Vec::new(),
            sim_interrupted: Vec::new(),
            sim_error: Vec::new(),
        };

        state.check_partition()?;

        Ok(state)
    }

    pub fn cases(&self, status: SimStatus) -> &[CaseId] {
        match status {
            SimStatus::NotStarted => &self.sim_not_started,
            SimStatus::Running => &self.sim_running,
            SimStatus::Finished => &self.sim_finished,
            SimStatus::Interrupted => &self.sim_interrupted,
            SimStatus::Error => &self.sim_error,
        }
    }

    fn bucket_mut(&mut self, status: SimStatus) -> &mut Vec<CaseId> {
        match status {
            SimStatus::NotStarted => &mut self.sim_not_started,
            SimStatus::Running => &mut self.sim_running,
            SimStatus::Finished => &mut self.sim_finished,
            SimStatus::Interrupted => &mut self.sim_interrupted,
            SimStatus::Error => &mut self.sim_error,
        }
    }

    pub fn status_of(&self, case: &str) -> Option<SimStatus> {
        SimStatus::ALL
            .into_iter()
            .find(|status| self.cases(*status).iter().any(|tracked| tracked == case))
    }

    /// Move a case into `status` and return the status it left. Moving a case into
    /// its current bucket keeps the membership and puts it at the end of the bucket.
    pub fn move_to(&mut self, case: &str, status: SimStatus) -> Result<SimStatus, StateError> {
        let previous = self
            .status_of(case)
            .ok_or_else(|| StateError::UnknownCase(case.to_owned()))?;

        let bucket = self.bucket_mut(previous);
        if let Some(position) = bucket.iter().position(|tracked| tracked == case) {
            let removed = bucket.remove(position);
            self.bucket_mut(status).push(removed);
        }

        Ok(previous)
    }

    pub fn count(&self, status: SimStatus) -> usize {
        self.cases(status).len()
    }

    pub fn counts(&self) -> [(SimStatus, usize); 5] {
        SimStatus::ALL.map(|status| (status, self.count(status)))
    }

    pub fn total(&self) -> usize {
        SimStatus::ALL.iter().map(|status| self.count(*status)).sum()
    }

    pub fn all_cases(&self) -> impl Iterator<Item = &CaseId> {
        SimStatus::ALL
            .into_iter()
            .flat_map(move |status| self.cases(status).iter())
    }

    /// every case has to be in exactly one bucket
    pub fn check_partition(&self) -> Result<(), StateError> {
        let mut seen = HashSet::with_capacity(self.total());

        match self.all_cases().find(|case| !seen.insert(case.as_str())) {
            Some(duplicate) => Err(StateError::DuplicateCase(duplicate.clone())),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod state_test;
