use super::{
    interrupt::Interrupt,
    script::{self, Placeholders},
    ExecutionReport, Executor, ExecutorError,
};
use crate::{
    combination::CaseId,
    layout::TEST_CASE,
    state::SimStatus,
    store::StoreError,
    study::Study,
};
use chrono::Local;
use crossbeam_channel::{unbounded, Receiver, Sender};
use itertools::Itertools;
use nix::{
    sys::signal::{killpg, Signal},
    unistd::Pid,
};
use rayon::{prelude::*, ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};
use std::{
    fs::{self, File},
    os::unix::process::CommandExt,
    path::PathBuf,
    process::{Child, Command, ExitStatus, Stdio},
    thread,
    time::{Duration, Instant},
};
use tracing::{debug, error, info, instrument, warn};
use wait_timeout::ChildExt;

pub const INITIAL_INSTRUCTIONS: &str = "#!/bin/bash
# initial instructions
SIMPATH=$(pwd)
#___END_INITIAL_INSTRUCTIONS___
";

pub const FINAL_INSTRUCTIONS: &str = "#___BEGIN_FINAL_INSTRUCTIONS___
SIM_EXIT_CODE=$?
# final instructions
OUTPUT_DIR=$SIMPATH
exit $SIM_EXIT_CODE
";

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Settings of the `run_local` section
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct LocalConfig {
    #[serde(default = "default_initial_instructions")]
    pub initial_instructions: String,
    #[serde(default = "default_final_instructions")]
    pub final_instructions: String,
    // default <root>/out
    #[serde(default)]
    pub stdout_path: Option<PathBuf>,
    // default <root>/err
    #[serde(default)]
    pub stderr_path: Option<PathBuf>,
    // default <root>/log
    #[serde(default)]
    pub log_path: Option<PathBuf>,
    // one single slot worker per listed GPU, exported as CUDA_VISIBLE_DEVICES
    #[serde(default)]
    pub gpu_available_list: Vec<u32>,
    // pool size when no GPU is listed
    #[serde(default = "num_cpus::get")]
    pub n_concurrent_jobs: usize,
    #[serde(default = "default_interpreter")]
    pub interpreter: String,
    // run only the test case, the study state is left alone
    #[serde(default)]
    pub run_test: bool,
    // time between SIGTERM and SIGKILL when terminating cases
    #[serde(default = "default_kill_grace_secs")]
    pub kill_grace_secs: u64,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            initial_instructions: default_initial_instructions(),
            final_instructions: default_final_instructions(),
            stdout_path: None,
            stderr_path: None,
            log_path: None,
            gpu_available_list: Vec::new(),
            n_concurrent_jobs: num_cpus::get(),
            interpreter: default_interpreter(),
            run_test: false,
            kill_grace_secs: default_kill_grace_secs(),
        }
    }
}

impl LocalConfig {
    pub fn validate(&self) -> Result<(), ExecutorError> {
        if self.n_concurrent_jobs == 0 {
            return Err(ExecutorError::InvalidConfig {
                field: "n_concurrent_jobs",
                reason: "at least one job has to run at a time".to_owned(),
            });
        }

        if self.interpreter.trim().is_empty() {
            return Err(ExecutorError::InvalidConfig {
                field: "interpreter",
                reason: "cannot be empty".to_owned(),
            });
        }

        if let Some(gpu) = self.gpu_available_list.iter().duplicates().next() {
            return Err(ExecutorError::InvalidConfig {
                field: "gpu_available_list",
                reason: format!("GPU {gpu} is listed more than once"),
            });
        }

        Ok(())
    }
}

fn default_initial_instructions() -> String {
    INITIAL_INSTRUCTIONS.to_owned()
}

fn default_final_instructions() -> String {
    FINAL_INSTRUCTIONS.to_owned()
}

fn default_interpreter() -> String {
    "bash".to_owned()
}

fn default_kill_grace_secs() -> u64 {
    10
}

/// Messages from the workers to the coordinating thread
#[derive(Debug)]
enum Event {
    Started(CaseId),
    Completed(CaseId, SimStatus),
    Skipped(CaseId),
}

/// A pool together with the cases it works through
struct Lane {
    gpu: Option<u32>,
    pool: ThreadPool,
    cases: Vec<CaseId>,
}

/// Executor that runs cases as child processes on local thread pools.
///
/// Workers never touch the study state themselves, they report over a channel to
/// the calling thread which is the only writer.
pub struct LocalExecutor<'a> {
    study: &'a Study,
    config: LocalConfig,
    interrupt: Interrupt,
}

impl<'a> Executor<'a> for LocalExecutor<'a> {
    type Config = LocalConfig;

    fn load(config: LocalConfig, study: &'a Study) -> Result<Self, ExecutorError> {
        config.validate()?;

        Ok(Self {
            study,
            config,
            interrupt: Interrupt::new(),
        })
    }

    /// execute every not started case concurrently
    #[instrument(skip(self), fields(study = %self.study.declaration().study_name), level = "info")]
    fn execute(&mut self) -> Result<ExecutionReport, ExecutorError> {
        for folder in [self.stdout_folder(), self.stderr_folder(), self.log_folder()] {
            fs::create_dir_all(&folder).map_err(ExecutorError::io(&folder))?;
        }

        if self.config.run_test {
            return self.execute_test();
        }

        let cases = self
            .study
            .store()
            .load()?
            .cases(SimStatus::NotStarted)
            .to_vec();

        if cases.is_empty() {
            info!("No case left to run");
            return Ok(ExecutionReport::default());
        }

        for case in cases.iter() {
            self.prepare(case)?;
        }

        let lanes = self.lanes(cases)?;
        let start = Local::now();
        let timer = Instant::now();

        info!(
            lanes = lanes.len(),
            cases = lanes.iter().map(|lane| lane.cases.len()).sum::<usize>(),
            "Starting local execution"
        );

        let (sender, receiver) = unbounded();
        let mut report = ExecutionReport::default();
        let executor: &Self = self;

        let failure = thread::scope(|scope| {
            for lane in lanes.iter() {
                let sender = sender.clone();
                scope.spawn(move || executor.dispatch(lane, sender));
            }
            drop(sender);

            executor.coordinate(receiver, &mut report)
        });

        report.interrupted += self.interrupt_leftovers()?;

        info!(
            elapsed = ?timer.elapsed(),
            "Finished local execution: {report}"
        );
        self.write_log(start, timer.elapsed(), &report);

        match failure {
            Some(error) => Err(error.into()),
            None => Ok(report),
        }
    }
}

impl<'a> LocalExecutor<'a> {
    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    pub fn config(&self) -> &LocalConfig {
        &self.config
    }

    fn stdout_folder(&self) -> PathBuf {
        self.config
            .stdout_path
            .clone()
            .unwrap_or_else(|| self.study.layout().out_folder())
    }

    fn stderr_folder(&self) -> PathBuf {
        self.config
            .stderr_path
            .clone()
            .unwrap_or_else(|| self.study.layout().err_folder())
    }

    fn log_folder(&self) -> PathBuf {
        self.config
            .log_path
            .clone()
            .unwrap_or_else(|| self.study.layout().log_folder())
    }

    /// wrap the main file of a case with the local instructions
    fn prepare(&self, case: &str) -> Result<(), ExecutorError> {
        let layout = self.study.layout();
        let main = layout
            .case_folder(case)
            .join(&self.study.declaration().main_file);
        let placeholders =
            Placeholders::for_case(case, layout, &self.study.declaration().config_file);

        script::prepare_main_file(
            &main,
            &self.config.initial_instructions,
            &self.config.final_instructions,
            "",
            &placeholders,
        )
        .map_err(ExecutorError::io(&main))
    }

    fn build_pool(threads: usize) -> Result<ThreadPool, ExecutorError> {
        debug!("Starting thread pool with {threads} threads");

        Ok(ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|index| format!("case-worker-{index}"))
            .build()?)
    }

    /// one shared pool on the CPU, or one single slot pool per GPU with the cases
    /// dealt out round-robin
    fn lanes(&self, cases: Vec<CaseId>) -> Result<Vec<Lane>, ExecutorError> {
        if self.config.gpu_available_list.is_empty() {
            return Ok(vec![Lane {
                gpu: None,
                pool: Self::build_pool(self.config.n_concurrent_jobs)?,
                cases,
            }]);
        }

        let mut lanes = self
            .config
            .gpu_available_list
            .iter()
            .map(|gpu| -> Result<Lane, ExecutorError> {
                Ok(Lane {
                    gpu: Some(*gpu),
                    pool: Self::build_pool(1)?,
                    cases: Vec::new(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let count = lanes.len();
        for (index, case) in cases.into_iter().enumerate() {
            lanes[index % count].cases.push(case);
        }

        Ok(lanes)
    }

    /// worker side: run the cases of a lane on its pool and report every step
    fn dispatch(&self, lane: &Lane, sender: Sender<Event>) {
        let send = |event: Event| {
            if let Err(e) = sender.send(event) {
                error!("Coordinator is gone, dropping event: {e}");
            }
        };

        lane.pool.install(|| {
            lane.cases.par_iter().for_each(|case| {
                if self.interrupt.stop_dispatch() {
                    send(Event::Skipped(case.clone()));
                    return;
                }

                send(Event::Started(case.clone()));
                let status = self.run_case(case, lane.gpu);
                send(Event::Completed(case.clone(), status));
            })
        });
    }

    /// coordinator side: apply the reported transitions until every worker is done
    fn coordinate(&self, receiver: Receiver<Event>, report: &mut ExecutionReport) -> Option<StoreError> {
        let store = self.study.store();
        let mut running = 0usize;
        let mut failure = None;

        let mut record = |case: &str, status: SimStatus| {
            if let Err(e) = store.transition(case, status) {
                error!(case, status = %status, "Failed to record transition: {e}");
                failure.get_or_insert(e);
            }
        };

        for event in receiver.iter() {
            match event {
                Event::Started(case) => {
                    running += 1;
                    report.peak_running = report.peak_running.max(running);
                    record(&case, SimStatus::Running);
                    info!(case = %case, running, "Started case");
                }
                Event::Completed(case, status) => {
                    running = running.saturating_sub(1);
                    match status {
                        SimStatus::Finished => report.finished += 1,
                        SimStatus::Error => report.error += 1,
                        SimStatus::Interrupted => report.interrupted += 1,
                        SimStatus::NotStarted | SimStatus::Running => {}
                    }
                    record(&case, status);
                    info!(case = %case, status = %status, "Completed case");
                }
                Event::Skipped(case) => {
                    report.skipped += 1;
                    debug!(case = %case, "Skipped case after interrupt");
                }
            }
        }

        failure
    }

    /// cases still marked running once the pool drained are interrupted
    fn interrupt_leftovers(&self) -> Result<usize, ExecutorError> {
        let store = self.study.store();
        let leftovers = store.load()?.cases(SimStatus::Running).to_vec();

        for case in leftovers.iter() {
            warn!(case = %case, "Case was left running, marking it interrupted");
            store.transition(case, SimStatus::Interrupted)?;
        }

        Ok(leftovers.len())
    }

    fn run_case(&self, case: &str, gpu: Option<u32>) -> SimStatus {
        let folder = self.study.layout().case_folder(case);
        let main = folder.join(&self.study.declaration().main_file);
        let stdout = self.stdout_folder().join(format!("{case}.out"));
        let stderr = self.stderr_folder().join(format!("{case}.err"));

        let (stdout, stderr) = match File::create(&stdout)
            .and_then(|out| File::create(&stderr).map(|err| (out, err)))
        {
            Ok(files) => files,
            Err(e) => {
                error!(case, "Failed to open output files: {e}");
                return SimStatus::Error;
            }
        };

        let mut command = Command::new(&self.config.interpreter);
        command
            .arg(&main)
            .current_dir(&folder)
            .envs(&self.study.declaration().environment)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            // own process group, a terminal interrupt only reaches this process
            .process_group(0);

        if let Some(gpu) = gpu {
            command.env("CUDA_VISIBLE_DEVICES", gpu.to_string());
        }

        debug!(case, gpu = ?gpu, "Spawning case");

        match command.spawn() {
            Ok(child) => self.supervise(case, child),
            Err(e) => {
                error!(case, "Failed to spawn {}: {e}", self.config.interpreter);
                SimStatus::Error
            }
        }
    }

    fn supervise(&self, case: &str, mut child: Child) -> SimStatus {
        loop {
            match child.wait_timeout(POLL_INTERVAL) {
                Ok(Some(status)) => return exit_status(case, status),
                Ok(None) if self.interrupt.terminate() => return self.terminate(case, child),
                Ok(None) => {}
                Err(e) => {
                    error!(case, "Failed to wait for case: {e}");
                    self.terminate(case, child);
                    return SimStatus::Error;
                }
            }
        }
    }

    /// SIGTERM the process group of the case, SIGKILL it after the grace period
    fn terminate(&self, case: &str, mut child: Child) -> SimStatus {
        let group = Pid::from_raw(child.id() as i32);
        let grace = Duration::from_secs(self.config.kill_grace_secs);

        warn!(case, "Terminating case");

        if let Err(e) = killpg(group, Signal::SIGTERM) {
            warn!(case, "Failed to send SIGTERM: {e}");
        }

        if !matches!(child.wait_timeout(grace), Ok(Some(_))) {
            if let Err(e) = killpg(group, Signal::SIGKILL) {
                warn!(case, "Failed to send SIGKILL: {e}");
            }
            if let Err(e) = child.wait() {
                error!(case, "Failed to reap case: {e}");
            }
        }

        SimStatus::Interrupted
    }

    /// run the test case alone, without touching the study state
    fn execute_test(&self) -> Result<ExecutionReport, ExecutorError> {
        let folder = self.study.layout().test_folder();

        if !folder.is_dir() {
            return Err(ExecutorError::MissingTestCase(folder));
        }

        self.prepare(TEST_CASE)?;
        info!("Running the test case");

        let status = self.run_case(TEST_CASE, self.config.gpu_available_list.first().copied());
        let mut report = ExecutionReport {
            peak_running: 1,
            ..ExecutionReport::default()
        };

        match status {
            SimStatus::Finished => report.finished = 1,
            SimStatus::Interrupted => report.interrupted = 1,
            _ => report.error = 1,
        }

        info!(status = %status, "Test case done");

        Ok(report)
    }

    fn write_log(&self, start: chrono::DateTime<Local>, elapsed: Duration, report: &ExecutionReport) {
        let path = self
            .log_folder()
            .join(format!("run_local_{}.log", start.format("%Y_%m_%d_%H_%M_%S")));
        let content = format!(
            "started: {}\nfinished: {}\nelapsed: {:.3}s\n{report}\n",
            start.to_rfc3339(),
            Local::now().to_rfc3339(),
            elapsed.as_secs_f64()
        );

        if let Err(e) = fs::write(&path, content) {
            warn!(path = ?path, "Failed to write run log: {e}");
        }
    }
}

fn exit_status(case: &str, status: ExitStatus) -> SimStatus {
    if status.success() {
        SimStatus::Finished
    } else {
        warn!(case, code = ?status.code(), "Case exited with an error");
        SimStatus::Error
    }
}

#[cfg(test)]
mod local_test;
