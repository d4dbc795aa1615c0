use super::{
    script::{self, Placeholders},
    ExecutionReport, Executor, ExecutorError,
};
use crate::{layout::TEST_CASE, state::SimStatus, study::Study};
use chrono::Local;
use itertools::Itertools;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    process::Command,
};
use tracing::{info, instrument, warn};

pub const INITIAL_INSTRUCTIONS: &str = r#"#!/bin/bash
# initial instructions
SIMPATH=$1
SIMNAME=__REPLACE_WITH_CASENAME__
STUDYPATH=__REPLACE_WITH_STUDY_ROOT__
TOUCHPATH=__REPLACE_WITH_TOUCH_DIR__

echo "SIMPATH: $SIMPATH"
echo "SIMNAME: $SIMNAME"

# the case folder is transferred next to the job, work inside its copy
cp -r ./$SIMNAME/* .
rm -rf ./$SIMNAME

__REPLACE_WITH_SOURCE_SCRIPTS__
#___END_INITIAL_INSTRUCTIONS___
"#;

pub const FINAL_INSTRUCTIONS: &str = r#"#___BEGIN_FINAL_INSTRUCTIONS___
SIM_EXIT_CODE=$?

OUTPUT_DIR=__REPLACE_WITH_OUTPUT_DIR__
if [ -n "$OUTPUT_DIR" ]; then
    mkdir -p "$OUTPUT_DIR/$SIMNAME" && cp -r ./output_files/* "$OUTPUT_DIR/$SIMNAME/" \
        || touch "$TOUCHPATH/IO_ERROR_$SIMNAME"
fi

if [ $SIM_EXIT_CODE -eq 0 ]; then
    touch "$TOUCHPATH/FINISHED_$SIMNAME"
else
    touch "$TOUCHPATH/ERROR_$SIMNAME"
fi

exit $SIM_EXIT_CODE
"#;

const SUBMIT_FILE_HEAD: &str = r#"universe   = vanilla

executable = $(Executable)
arguments  = $(Simpath)

output     = $(Outpath)
error      = $(Errpath)
log        = __REPLACE_WITH_LOG_PATH__

transfer_input_files = $(Simpath)
transfer_output_files = ""

request_cpus = __REPLACE_WITH_REQUEST_CPUS__

MY.JobFlavour = "__REPLACE_WITH_TIME_LIMIT__"
"#;

const SUBMIT_FILE_GPU: &str = r#"
request_GPUs = __REPLACE_WITH_REQUEST_GPUS__
"#;

const SUBMIT_FILE_TAIL: &str = r#"
queue Executable,Simpath,Outpath,Errpath from __REPLACE_WITH_QUEUE_FILE__
"#;

/// default submit file without GPUs
pub static SUBMIT_TEMPLATE_CPU: Lazy<String> =
    Lazy::new(|| format!("{SUBMIT_FILE_HEAD}{SUBMIT_FILE_TAIL}"));

/// default submit file requesting one GPU per job
pub static SUBMIT_TEMPLATE_GPU: Lazy<String> =
    Lazy::new(|| format!("{SUBMIT_FILE_HEAD}{SUBMIT_FILE_GPU}{SUBMIT_FILE_TAIL}"));

/// HTCondor job flavours, in increasing wall time
pub const TIME_LIMITS: [&str; 7] = [
    "espresso",
    "microcentury",
    "longlunch",
    "workday",
    "tomorrow",
    "testmatch",
    "nextweek",
];

pub const SUBMIT_FILE: &str = "htcondor_submit_file.sub";
pub const QUEUE_FILE: &str = "queue.txt";

/// Settings of the `run_htcondor` section
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct HtcondorConfig {
    #[serde(default = "default_initial_instructions")]
    pub initial_instructions: String,
    #[serde(default = "default_final_instructions")]
    pub final_instructions: String,
    // defaults to the CPU or GPU submit file depending on request_gpus
    #[serde(default)]
    pub submit_template: Option<String>,
    #[serde(default)]
    pub stdout_path: Option<PathBuf>,
    #[serde(default)]
    pub stderr_path: Option<PathBuf>,
    #[serde(default)]
    pub log_path: Option<PathBuf>,
    #[serde(default)]
    pub request_gpus: bool,
    #[serde(default = "default_request_cpus")]
    pub request_cpus: u32,
    #[serde(default = "default_time_limit")]
    pub time_limit: String,
    #[serde(default = "default_test_time_limit")]
    pub test_time_limit: String,
    #[serde(default)]
    pub run_test: bool,
    // run `myschedd bump` before submitting
    #[serde(default)]
    pub bump_schedd: bool,
    // sourced at the start of every job
    #[serde(default)]
    pub source_scripts: Vec<PathBuf>,
    // results in ./output_files are copied to <output_dir>/<case>
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    #[serde(default = "default_submit_command")]
    pub submit_command: String,
}

impl Default for HtcondorConfig {
    fn default() -> Self {
        Self {
            initial_instructions: default_initial_instructions(),
            final_instructions: default_final_instructions(),
            submit_template: None,
            stdout_path: None,
            stderr_path: None,
            log_path: None,
            request_gpus: false,
            request_cpus: default_request_cpus(),
            time_limit: default_time_limit(),
            test_time_limit: default_test_time_limit(),
            run_test: false,
            bump_schedd: false,
            source_scripts: Vec::new(),
            output_dir: None,
            submit_command: default_submit_command(),
        }
    }
}

impl HtcondorConfig {
    pub fn validate(&self) -> Result<(), ExecutorError> {
        for (field, limit) in [
            ("time_limit", &self.time_limit),
            ("test_time_limit", &self.test_time_limit),
        ] {
            if !TIME_LIMITS.contains(&limit.as_str()) {
                return Err(ExecutorError::InvalidConfig {
                    field,
                    reason: format!("{limit} is not one of {}", TIME_LIMITS.join(", ")),
                });
            }
        }

        if self.request_cpus == 0 {
            return Err(ExecutorError::InvalidConfig {
                field: "request_cpus",
                reason: "at least one CPU has to be requested".to_owned(),
            });
        }

        if self.submit_command.trim().is_empty() {
            return Err(ExecutorError::InvalidConfig {
                field: "submit_command",
                reason: "cannot be empty".to_owned(),
            });
        }

        Ok(())
    }

    fn submit_template(&self) -> &str {
        match (&self.submit_template, self.request_gpus) {
            (Some(template), _) => template.as_str(),
            (None, false) => SUBMIT_TEMPLATE_CPU.as_str(),
            (None, true) => SUBMIT_TEMPLATE_GPU.as_str(),
        }
    }
}

fn default_initial_instructions() -> String {
    INITIAL_INSTRUCTIONS.to_owned()
}

fn default_final_instructions() -> String {
    FINAL_INSTRUCTIONS.to_owned()
}

fn default_request_cpus() -> u32 {
    1
}

fn default_time_limit() -> String {
    "longlunch".to_owned()
}

fn default_test_time_limit() -> String {
    "espresso".to_owned()
}

fn default_submit_command() -> String {
    "condor_submit".to_owned()
}

/// `source` lines for the environment scripts of a remote job
pub(crate) fn source_lines(scripts: &[PathBuf]) -> String {
    scripts
        .iter()
        .map(|script| format!("source {}\necho \"sourced {}\"", script.display(), script.display()))
        .join("\n")
}

/// Writes the submit and queue files for all not started cases and hands them to
/// HTCondor. Completion is only learnt later from the sentinel markers.
pub struct HtcondorExecutor<'a> {
    study: &'a Study,
    config: HtcondorConfig,
}

impl<'a> Executor<'a> for HtcondorExecutor<'a> {
    type Config = HtcondorConfig;

    fn load(config: HtcondorConfig, study: &'a Study) -> Result<Self, ExecutorError> {
        config.validate()?;

        Ok(Self { study, config })
    }

    #[instrument(skip(self), fields(study = %self.study.declaration().study_name), level = "info")]
    fn execute(&mut self) -> Result<ExecutionReport, ExecutorError> {
        let layout = self.study.layout();
        let support = layout.htcondor_folder();
        let stdout = self.config.stdout_path.clone().unwrap_or_else(|| layout.out_folder());
        let stderr = self.config.stderr_path.clone().unwrap_or_else(|| layout.err_folder());
        let log = self.config.log_path.clone().unwrap_or_else(|| layout.log_folder());

        for folder in [&support, &stdout, &stderr, &log, &layout.touch_folder()] {
            fs::create_dir_all(folder).map_err(ExecutorError::io(folder))?;
        }

        let cases = if self.config.run_test {
            if !layout.test_folder().is_dir() {
                return Err(ExecutorError::MissingTestCase(layout.test_folder()));
            }
            vec![TEST_CASE.to_owned()]
        } else {
            self.study
                .store()
                .load()?
                .cases(SimStatus::NotStarted)
                .to_vec()
        };

        if cases.is_empty() {
            info!("No case left to submit");
            return Ok(ExecutionReport::default());
        }

        let mut queue = String::new();
        for case in cases.iter() {
            let folder = layout.case_folder(case);
            let main = folder.join(&self.study.declaration().main_file);

            self.prepare(case, &main)?;

            queue.push_str(&format!(
                "{}, {}, {}, {}\n",
                main.display(),
                folder.display(),
                stdout.join(format!("{case}.out")).display(),
                stderr.join(format!("{case}.err")).display()
            ));
            info!(case = %case, "Added case to the queue file");
        }

        let queue_file = support.join(QUEUE_FILE);
        let submit_file = support.join(SUBMIT_FILE);
        let log_file = log.join(format!(
            "htcondor_{}.log",
            Local::now().format("%Y_%m_%d_%H_%M_%S")
        ));

        let submit = Placeholders::new()
            .with("__REPLACE_WITH_REQUEST_CPUS__", self.config.request_cpus.to_string())
            .with("__REPLACE_WITH_REQUEST_GPUS__", "1")
            .with(
                "__REPLACE_WITH_TIME_LIMIT__",
                if self.config.run_test {
                    self.config.test_time_limit.as_str()
                } else {
                    self.config.time_limit.as_str()
                },
            )
            .with("__REPLACE_WITH_QUEUE_FILE__", queue_file.to_string_lossy())
            .with("__REPLACE_WITH_LOG_PATH__", log_file.to_string_lossy())
            .fill(self.config.submit_template());

        fs::write(&queue_file, queue).map_err(ExecutorError::io(&queue_file))?;
        fs::write(&submit_file, submit).map_err(ExecutorError::io(&submit_file))?;

        info!(jobs = cases.len(), "Wrote submit file");

        if self.config.bump_schedd {
            bump_schedd();
        }

        submit_jobs(&self.config.submit_command, &submit_file, &support)?;

        info!(jobs = cases.len(), "Jobs submitted, check progress with `status`");

        Ok(ExecutionReport {
            submitted: cases.len(),
            ..ExecutionReport::default()
        })
    }
}

impl<'a> HtcondorExecutor<'a> {
    fn prepare(&self, case: &str, main: &Path) -> Result<(), ExecutorError> {
        let layout = self.study.layout();
        let declaration = self.study.declaration();
        let placeholders = Placeholders::for_case(case, layout, &declaration.config_file)
            .with("__REPLACE_WITH_SOURCE_SCRIPTS__", source_lines(&self.config.source_scripts))
            .with(
                "__REPLACE_WITH_OUTPUT_DIR__",
                self.config
                    .output_dir
                    .as_ref()
                    .map(|dir| dir.to_string_lossy().into_owned())
                    .unwrap_or_default(),
            );

        script::prepare_main_file(
            main,
            &self.config.initial_instructions,
            &self.config.final_instructions,
            &script::environment_exports(&declaration.environment),
            &placeholders,
        )
        .map_err(ExecutorError::io(main))
    }
}

fn bump_schedd() {
    info!("Bumping the schedd");

    match Command::new("myschedd").arg("bump").status() {
        Ok(status) if status.success() => {}
        Ok(status) => warn!("myschedd bump failed with {status}, continuing anyway"),
        Err(e) => warn!("Failed to run myschedd bump: {e}, continuing anyway"),
    }
}

/// run `<command> <submit file>` inside the support folder and wait for the verdict
pub(crate) fn submit_jobs(command: &str, file: &Path, cwd: &Path) -> Result<(), ExecutorError> {
    let mut words = command.split_whitespace();
    let program = words.next().unwrap_or_default();

    let status = Command::new(program)
        .args(words)
        .arg(file)
        .current_dir(cwd)
        .status()
        .map_err(|source| ExecutorError::Spawn {
            command: command.to_owned(),
            source,
        })?;

    if status.success() {
        Ok(())
    } else {
        Err(ExecutorError::SubmissionRejected {
            command: command.to_owned(),
            status: status.to_string(),
        })
    }
}

#[cfg(test)]
mod htcondor_test;
