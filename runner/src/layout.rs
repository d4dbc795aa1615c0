use crate::combination::CaseId;
use std::path::{Path, PathBuf};

/// folder name of the smoke-test case under `scan/`
pub const TEST_CASE: &str = "test";

pub const DECLARATION_FILE: &str = "simulation_study.yaml";
pub const STATE_FILE: &str = "simulation_info.yaml";
pub const COMBOS_FILE: &str = "simulation_combos.yaml";

/// Every path of a study, derived from its root folder
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StudyLayout {
    root: PathBuf,
}

impl StudyLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn declaration_file(&self) -> PathBuf {
        self.root.join(DECLARATION_FILE)
    }

    pub fn state_file(&self) -> PathBuf {
        self.root.join(STATE_FILE)
    }

    pub fn combos_file(&self) -> PathBuf {
        self.root.join(COMBOS_FILE)
    }

    /// frozen clone of the template every case is copied from
    pub fn original_folder(&self) -> PathBuf {
        self.root.join("original_folder")
    }

    pub fn scan_folder(&self) -> PathBuf {
        self.root.join("scan")
    }

    pub fn case_folder(&self, case: &str) -> PathBuf {
        self.scan_folder().join(case)
    }

    pub fn test_folder(&self) -> PathBuf {
        self.case_folder(TEST_CASE)
    }

    pub fn out_folder(&self) -> PathBuf {
        self.root.join("out")
    }

    pub fn err_folder(&self) -> PathBuf {
        self.root.join("err")
    }

    pub fn log_folder(&self) -> PathBuf {
        self.root.join("log")
    }

    pub fn touch_folder(&self) -> PathBuf {
        self.root.join("remote_touch_files")
    }

    pub fn htcondor_folder(&self) -> PathBuf {
        self.root.join("htcondor_support")
    }

    pub fn slurm_folder(&self) -> PathBuf {
        self.root.join("slurm_support")
    }

    /// folders created together with the study root
    pub fn skeleton(&self) -> [PathBuf; 9] {
        [
            self.root.clone(),
            self.scan_folder(),
            self.out_folder(),
            self.err_folder(),
            self.log_folder(),
            self.touch_folder(),
            self.htcondor_folder(),
            self.slurm_folder(),
            self.original_folder(),
        ]
    }

    /// every case folder name found under `scan/`, the test case excluded
    pub fn listed_cases(&self) -> std::io::Result<Vec<CaseId>> {
        let mut cases = std::fs::read_dir(self.scan_folder())?
            .filter_map(Result::ok)
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| name != TEST_CASE)
            .collect::<Vec<_>>();

        cases.sort();

        Ok(cases)
    }
}
