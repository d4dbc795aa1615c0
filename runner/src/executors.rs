pub mod htcondor;
pub mod interrupt;
pub mod local;
pub mod script;
pub mod slurm;

use crate::{
    config::{ConfigErrors, RunConfig},
    store::StoreError,
    study::Study,
};
use std::{fmt, io, path::PathBuf};
use thiserror::Error;

pub use interrupt::Interrupt;

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Failed to access {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
    #[error("Failed to build worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
    #[error("Failed to run {command}: {source}")]
    Spawn { command: String, source: io::Error },
    #[error("Submission through {command} was rejected ({status})")]
    SubmissionRejected { command: String, status: String },
    #[error("Invalid executor configuration, {field}: {reason}")]
    InvalidConfig { field: &'static str, reason: String },
    #[error("The test case has not been materialized at {}", .0.display())]
    MissingTestCase(PathBuf),
}

impl ExecutorError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> Self {
        let path = path.into();
        move |source| Self::Io { path, source }
    }
}

/// Outcome of one executor run
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecutionReport {
    pub finished: usize,
    pub error: usize,
    pub interrupted: usize,
    /// cases left not started because dispatch was stopped
    pub skipped: usize,
    /// cases handed to a remote scheduler
    pub submitted: usize,
    /// highest number of cases running at the same time
    pub peak_running: usize,
}

impl fmt::Display for ExecutionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "finished: {}, error: {}, interrupted: {}, skipped: {}, submitted: {}, peak running: {}",
            self.finished,
            self.error,
            self.interrupted,
            self.skipped,
            self.submitted,
            self.peak_running
        )
    }
}

pub trait Executor<'a>: Sized {
    type Config;

    /// validate the configuration and bind the executor to a study
    fn load(config: Self::Config, study: &'a Study) -> Result<Self, ExecutorError>;

    /// dispatch every not started case (or only the test case)
    fn execute(&mut self) -> Result<ExecutionReport, ExecutorError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutorKind {
    Local,
    Htcondor,
    Slurm,
}

impl ExecutorKind {
    pub fn section(self) -> &'static str {
        match self {
            Self::Local => "run_local",
            Self::Htcondor => "run_htcondor",
            Self::Slurm => "run_slurm",
        }
    }
}

pub enum Executors<'a> {
    Local(local::LocalExecutor<'a>),
    Htcondor(htcondor::HtcondorExecutor<'a>),
    Slurm(slurm::SlurmExecutor<'a>),
}

impl<'a> Executors<'a> {
    /// Pick the executor section out of the run configuration. A missing local
    /// section falls back to the defaults, remote sections have to be present.
    pub fn load(
        kind: ExecutorKind,
        config: RunConfig,
        study: &'a Study,
        interrupt: Interrupt,
    ) -> Result<Self, ConfigErrors> {
        match kind {
            ExecutorKind::Local => {
                let executor =
                    local::LocalExecutor::load(config.run_local.unwrap_or_default(), study)?;

                Ok(Self::Local(executor.with_interrupt(interrupt)))
            }
            ExecutorKind::Htcondor => {
                let section = config
                    .run_htcondor
                    .ok_or(ConfigErrors::MissingExecutor(kind.section()))?;

                Ok(Self::Htcondor(htcondor::HtcondorExecutor::load(section, study)?))
            }
            ExecutorKind::Slurm => {
                let section = config
                    .run_slurm
                    .ok_or(ConfigErrors::MissingExecutor(kind.section()))?;

                Ok(Self::Slurm(slurm::SlurmExecutor::load(section, study)?))
            }
        }
    }

    pub fn execute(&mut self) -> Result<ExecutionReport, ExecutorError> {
        match self {
            Self::Local(executor) => executor.execute(),
            Self::Htcondor(executor) => executor.execute(),
            Self::Slurm(executor) => executor.execute(),
        }
    }
}
