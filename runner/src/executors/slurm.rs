use super::{
    htcondor::{source_lines, submit_jobs},
    script::{self, Placeholders},
    ExecutionReport, Executor, ExecutorError,
};
use crate::{layout::TEST_CASE, state::SimStatus, study::Study};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::{info, instrument};

pub const JOB_TEMPLATE: &str = r#"#!/bin/bash

#SBATCH --job-name=__REPLACE_WITH_JOB_NAME__
#SBATCH --output=__REPLACE_WITH_SLURM_OUT_PATH__
#SBATCH --error=__REPLACE_WITH_SLURM_ERR_PATH__
#SBATCH --time=__REPLACE_WITH_TIME_LIMIT__
#SBATCH --nodes=1
#SBATCH --ntasks=1
#SBATCH --cpus-per-task=__REPLACE_WITH_REQUEST_CPUS__
#SBATCH --mem=__REPLACE_WITH_REQUEST_MEM__
#SBATCH --gres=__REPLACE_WITH_REQUEST_GPUS__
#SBATCH --partition=__REPLACE_WITH_PARTITION__

SIMPATH=$1
SIMNAME=$(basename "$SIMPATH")
TOUCHPATH=__REPLACE_WITH_TOUCH_DIR__
cd "$SIMPATH"

__REPLACE_WITH_SOURCE_SCRIPTS__

bash "$2" > "$3" 2> "$4"
SIM_EXIT_CODE=$?

if [ $SIM_EXIT_CODE -eq 0 ]; then
    touch "$TOUCHPATH/FINISHED_$SIMNAME"
else
    touch "$TOUCHPATH/ERROR_$SIMNAME"
fi

exit $SIM_EXIT_CODE
"#;

pub const SUBMISSION_TEMPLATE: &str = r#"#!/bin/bash
set -e

SIMPATHS=__REPLACE_WITH_SIMPATHS__
OUTPATHS=__REPLACE_WITH_OUTPATHS__
ERRPATHS=__REPLACE_WITH_ERRPATHS__

length=${#SIMPATHS[@]}

for ((i = 0; i < length; i++)); do
    __REPLACE_WITH_SBATCH__ __REPLACE_WITH_SLURM_SUBMIT_FILE__ "${SIMPATHS[i]}" __REPLACE_WITH_MAIN_FILE__ "${OUTPATHS[i]}" "${ERRPATHS[i]}"
done
"#;

const GRES_LINE: &str = "#SBATCH --gres=__REPLACE_WITH_REQUEST_GPUS__\n";
const PARTITION_LINE: &str = "#SBATCH --partition=__REPLACE_WITH_PARTITION__\n";

pub const JOB_FILE: &str = "slurm_submit_file.slurm";
pub const SUBMISSION_FILE: &str = "submission_file.sh";

/// Settings of the `run_slurm` section
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SlurmConfig {
    #[serde(default = "default_job_template")]
    pub job_template: String,
    #[serde(default = "default_submission_template")]
    pub submission_template: String,
    #[serde(default)]
    pub stdout_path: Option<PathBuf>,
    #[serde(default)]
    pub stderr_path: Option<PathBuf>,
    // output of slurm itself, defaults to out/slurm.out and err/slurm.err
    #[serde(default)]
    pub slurm_stdout_path: Option<PathBuf>,
    #[serde(default)]
    pub slurm_stderr_path: Option<PathBuf>,
    #[serde(default)]
    pub request_gpus: bool,
    #[serde(default = "default_request_cpus")]
    pub request_cpus: u32,
    /// defaults to 2 GB per requested CPU
    #[serde(default)]
    pub request_ram_gb: Option<u32>,
    #[serde(default = "default_time_limit")]
    pub time_limit: String,
    #[serde(default)]
    pub source_scripts: Vec<PathBuf>,
    #[serde(default)]
    pub partition: Option<String>,
    #[serde(default = "default_sbatch_command")]
    pub sbatch_command: String,
    #[serde(default)]
    pub run_test: bool,
}

impl Default for SlurmConfig {
    fn default() -> Self {
        Self {
            job_template: default_job_template(),
            submission_template: default_submission_template(),
            stdout_path: None,
            stderr_path: None,
            slurm_stdout_path: None,
            slurm_stderr_path: None,
            request_gpus: false,
            request_cpus: default_request_cpus(),
            request_ram_gb: None,
            time_limit: default_time_limit(),
            source_scripts: Vec::new(),
            partition: None,
            sbatch_command: default_sbatch_command(),
            run_test: false,
        }
    }
}

impl SlurmConfig {
    pub fn validate(&self) -> Result<(), ExecutorError> {
        if !is_time_limit(&self.time_limit) {
            return Err(ExecutorError::InvalidConfig {
                field: "time_limit",
                reason: format!("{} is not in the hh:mm:ss format", self.time_limit),
            });
        }

        if self.request_cpus == 0 {
            return Err(ExecutorError::InvalidConfig {
                field: "request_cpus",
                reason: "at least one CPU has to be requested".to_owned(),
            });
        }

        if self.request_ram_gb == Some(0) {
            return Err(ExecutorError::InvalidConfig {
                field: "request_ram_gb",
                reason: "cannot be zero".to_owned(),
            });
        }

        if self.sbatch_command.trim().is_empty() {
            return Err(ExecutorError::InvalidConfig {
                field: "sbatch_command",
                reason: "cannot be empty".to_owned(),
            });
        }

        Ok(())
    }

    pub fn request_ram_gb(&self) -> u32 {
        self.request_ram_gb.unwrap_or(2 * self.request_cpus)
    }
}

/// `hh:mm:ss`, hours may have more than two digits
fn is_time_limit(limit: &str) -> bool {
    let parts = limit.split(':').collect_vec();

    parts.len() == 3
        && parts
            .iter()
            .all(|part| part.len() >= 2 && part.chars().all(|c| c.is_ascii_digit()))
        && parts[1..]
            .iter()
            .all(|part| part.len() == 2 && part.parse::<u32>().map_or(false, |v| v < 60))
}

fn default_job_template() -> String {
    JOB_TEMPLATE.to_owned()
}

fn default_submission_template() -> String {
    SUBMISSION_TEMPLATE.to_owned()
}

fn default_request_cpus() -> u32 {
    1
}

fn default_time_limit() -> String {
    "02:00:00".to_owned()
}

fn default_sbatch_command() -> String {
    "sbatch".to_owned()
}

/// bash array literal of double quoted paths
fn bash_array<'p>(paths: impl IntoIterator<Item = &'p PathBuf>) -> String {
    format!(
        "({})",
        paths
            .into_iter()
            .map(|path| format!("\"{}\"", path.display()))
            .join(" ")
    )
}

/// Writes one job script shared by every case plus a submission script calling
/// sbatch once per case, then runs the submission script.
pub struct SlurmExecutor<'a> {
    study: &'a Study,
    config: SlurmConfig,
}

impl<'a> Executor<'a> for SlurmExecutor<'a> {
    type Config = SlurmConfig;

    fn load(config: SlurmConfig, study: &'a Study) -> Result<Self, ExecutorError> {
        config.validate()?;

        Ok(Self { study, config })
    }

    #[instrument(skip(self), fields(study = %self.study.declaration().study_name), level = "info")]
    fn execute(&mut self) -> Result<ExecutionReport, ExecutorError> {
        let layout = self.study.layout();
        let support = layout.slurm_folder();
        let stdout = self.config.stdout_path.clone().unwrap_or_else(|| layout.out_folder());
        let stderr = self.config.stderr_path.clone().unwrap_or_else(|| layout.err_folder());

        for folder in [&support, &stdout, &stderr, &layout.touch_folder()] {
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

        let declaration = self.study.declaration();
        let exports = script::environment_exports(&declaration.environment);
        let mut folders = Vec::with_capacity(cases.len());
        let mut outs = Vec::with_capacity(cases.len());
        let mut errs = Vec::with_capacity(cases.len());

        for case in cases.iter() {
            let folder = layout.case_folder(case);
            let main = folder.join(&declaration.main_file);
            let placeholders = Placeholders::for_case(case, layout, &declaration.config_file);

            script::prepare_main_file(&main, "", "", &exports, &placeholders)
                .map_err(ExecutorError::io(&main))?;

            folders.push(folder);
            outs.push(stdout.join(format!("{case}.out")));
            errs.push(stderr.join(format!("{case}.err")));
            info!(case = %case, "Added case to the submission file");
        }

        let job_file = support.join(JOB_FILE);
        let submission_file = support.join(SUBMISSION_FILE);

        let job = self.job_script(&stdout, &stderr);
        let submission = Placeholders::new()
            .with("__REPLACE_WITH_SIMPATHS__", bash_array(&folders))
            .with("__REPLACE_WITH_OUTPATHS__", bash_array(&outs))
            .with("__REPLACE_WITH_ERRPATHS__", bash_array(&errs))
            .with("__REPLACE_WITH_SBATCH__", self.config.sbatch_command.as_str())
            .with("__REPLACE_WITH_SLURM_SUBMIT_FILE__", job_file.to_string_lossy())
            .with(
                "__REPLACE_WITH_MAIN_FILE__",
                self.study.declaration().main_file.as_str(),
            )
            .fill(&self.config.submission_template);

        fs::write(&job_file, job).map_err(ExecutorError::io(&job_file))?;
        fs::write(&submission_file, submission).map_err(ExecutorError::io(&submission_file))?;

        info!(jobs = cases.len(), "Wrote slurm files");

        submit_jobs("bash", &submission_file, &support)?;

        info!(jobs = cases.len(), "Jobs submitted, check progress with `status`");

        Ok(ExecutionReport {
            submitted: cases.len(),
            ..ExecutionReport::default()
        })
    }
}

impl<'a> SlurmExecutor<'a> {
    fn job_script(&self, stdout: &Path, stderr: &Path) -> String {
        let mut template = self.config.job_template.clone();

        if !self.config.request_gpus {
            template = template.replace(GRES_LINE, "");
        }
        if self.config.partition.is_none() {
            template = template.replace(PARTITION_LINE, "");
        }

        let slurm_out = self
            .config
            .slurm_stdout_path
            .clone()
            .unwrap_or_else(|| stdout.join("slurm.out"));
        let slurm_err = self
            .config
            .slurm_stderr_path
            .clone()
            .unwrap_or_else(|| stderr.join("slurm.err"));

        Placeholders::new()
            .with(
                "__REPLACE_WITH_JOB_NAME__",
                self.study.declaration().study_name.as_str(),
            )
            .with("__REPLACE_WITH_SLURM_OUT_PATH__", slurm_out.to_string_lossy())
            .with("__REPLACE_WITH_SLURM_ERR_PATH__", slurm_err.to_string_lossy())
            .with("__REPLACE_WITH_TIME_LIMIT__", self.config.time_limit.as_str())
            .with(
                "__REPLACE_WITH_REQUEST_CPUS__",
                self.config.request_cpus.to_string(),
            )
            .with(
                "__REPLACE_WITH_REQUEST_MEM__",
                format!("{}G", self.config.request_ram_gb()),
            )
            .with("__REPLACE_WITH_REQUEST_GPUS__", "gpu:1")
            .with(
                "__REPLACE_WITH_PARTITION__",
                self.config.partition.clone().unwrap_or_default(),
            )
            .with(
                script::TOUCH_DIR,
                self.study.layout().touch_folder().to_string_lossy(),
            )
            .with(
                "__REPLACE_WITH_SOURCE_SCRIPTS__",
                source_lines(&self.config.source_scripts),
            )
            .fill(&template)
    }
}
