use super::*;
use crate::test_support::{declaration, write_template};
use std::fs;
use tempfile::tempdir;

const DECLARATION: &str = r#"study_name: scan
original_folder: template
main_file: run.sh
config_file: config.yaml
parameters_inspected:
  - parameter_name: solver/steps
    inspection_method: range
    min_value: 1
    max_value: 3
environment:
  OMP_NUM_THREADS: "2"
"#;

#[test]
fn relative_paths_resolve_against_the_declaration() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("simulation_study.yaml");
    fs::write(&path, DECLARATION).unwrap();

    let declaration = StudyDeclaration::load(&path).unwrap();

    assert_eq!(declaration.study_path, dir.path().join("."));
    assert_eq!(declaration.original_folder, dir.path().join("template"));
    assert_eq!(declaration.root(), dir.path().join(".").join("scan"));
    assert_eq!(declaration.key_separator, "/");
    assert_eq!(declaration.environment["OMP_NUM_THREADS"], "2");
}

#[test]
fn preflight_accepts_a_valid_declaration() {
    let dir = tempdir().unwrap();
    write_template(&dir.path().join("template"), "true\n");

    let parameters = declaration(dir.path(), &[1, 2, 3]).preflight_checks().unwrap();

    assert_eq!(parameters.total(), 3);
}

#[test]
fn preflight_counts_every_problem() {
    let dir = tempdir().unwrap();
    write_template(&dir.path().join("template"), "true\n");

    let mut declaration = declaration(dir.path(), &[1]);
    declaration.study_name = String::new();
    declaration
        .environment
        .insert("1BAD".to_owned(), "x".to_owned());
    declaration.parameters_inspected[0].parameter_name = "physics/energy".to_owned();

    assert!(matches!(
        declaration.preflight_checks(),
        Err(ConfigErrors::Preflight(3))
    ));
}

#[test]
fn preflight_reports_a_missing_template() {
    let dir = tempdir().unwrap();

    assert!(matches!(
        declaration(dir.path(), &[1]).preflight_checks(),
        Err(ConfigErrors::Preflight(1))
    ));
}

#[test]
fn preflight_rejects_an_empty_parameter_list() {
    let dir = tempdir().unwrap();
    write_template(&dir.path().join("template"), "true\n");

    let mut declaration = declaration(dir.path(), &[1]);
    declaration.parameters_inspected.clear();

    assert!(matches!(
        declaration.preflight_checks(),
        Err(ConfigErrors::Preflight(1))
    ));
}

#[test]
fn unknown_fields_are_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("simulation_study.yaml");
    fs::write(&path, format!("{DECLARATION}mystery: 1\n")).unwrap();

    assert!(matches!(
        StudyDeclaration::load(&path),
        Err(ConfigErrors::Document(_))
    ));
}

#[test]
fn run_config_sections_are_optional() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("run_config.yaml");
    fs::write(&path, "run_local:\n  n_concurrent_jobs: 3\n").unwrap();

    let config = RunConfig::load(&path).unwrap();
    let local = config.run_local.unwrap();

    assert_eq!(local.n_concurrent_jobs, 3);
    assert_eq!(local.interpreter, "bash");
    assert!(local.gpu_available_list.is_empty());
    assert!(config.run_htcondor.is_none());
    assert!(config.run_slurm.is_none());
}

#[test]
fn executable_check() {
    let dir = tempdir().unwrap();
    write_template(dir.path(), "true\n");

    assert!(check_executable(&dir.path().join("run.sh")).unwrap());
    assert!(!check_executable(&dir.path().join("config.yaml")).unwrap());
    assert!(matches!(
        check_executable(&dir.path().join("missing.sh")),
        Err(ConfigErrors::FileNotFound(_))
    ));
}
