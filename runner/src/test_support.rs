use crate::{
    config::StudyDeclaration,
    parameter::{InspectionMethod, ParameterDeclaration, SINGLE_AXIS},
    study::Study,
};
use serde_yaml::Value;
use std::{collections::BTreeMap, fs, os::unix::fs::PermissionsExt, path::Path};
use tempfile::{tempdir, TempDir};

pub(crate) const CONFIG: &str = "seed: 0\nsolver:\n  steps: 10\n";

/// a template with an executable `run.sh` and a `config.yaml`
pub(crate) fn write_template(folder: &Path, script: &str) {
    fs::create_dir_all(folder).unwrap();
    fs::write(folder.join("config.yaml"), CONFIG).unwrap();

    let main = folder.join("run.sh");
    fs::write(&main, script).unwrap();
    fs::set_permissions(&main, fs::Permissions::from_mode(0o755)).unwrap();
}

pub(crate) fn declaration(dir: &Path, seeds: &[i64]) -> StudyDeclaration {
    StudyDeclaration {
        study_name: "study".to_owned(),
        study_path: dir.to_owned(),
        original_folder: dir.join("template"),
        main_file: "run.sh".to_owned(),
        config_file: "config.yaml".to_owned(),
        parameters_inspected: vec![ParameterDeclaration {
            parameter_name: "seed".to_owned(),
            inspection_method: InspectionMethod::Custom,
            min_value: None,
            max_value: None,
            n_samples: None,
            values: Some(seeds.iter().map(|&seed| Value::from(seed)).collect()),
            combination_idx: SINGLE_AXIS,
            combination_method: None,
            parameter_file_name: None,
            force_type: None,
        }],
        environment: BTreeMap::new(),
        test_overrides: BTreeMap::from([("solver/steps".to_owned(), Value::from(1))]),
        key_separator: "/".to_owned(),
    }
}

/// A created study with one case per seed, living as long as the temporary folder
pub(crate) struct TestStudy {
    pub dir: TempDir,
    pub study: Study,
}

pub(crate) fn created_study(script: &str, seeds: &[i64]) -> TestStudy {
    created_study_with(script, seeds, |_| {})
}

pub(crate) fn created_study_with(
    script: &str,
    seeds: &[i64],
    customize: impl FnOnce(&mut StudyDeclaration),
) -> TestStudy {
    let dir = tempdir().unwrap();
    write_template(&dir.path().join("template"), script);

    let mut declaration = declaration(dir.path(), seeds);
    customize(&mut declaration);

    let study = Study::from_declaration(declaration).unwrap();
    study.create().unwrap();

    TestStudy { dir, study }
}
