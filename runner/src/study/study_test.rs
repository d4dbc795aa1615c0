use super::*;
use crate::{
    document::ConfigDocument,
    sentinel::Sentinel,
    state::SimStatus,
    store::ResetScope,
    test_support::{created_study, declaration, write_template},
};
use serde_yaml::Value;
use std::{collections::BTreeMap, fs};
use tempfile::tempdir;

#[test]
fn create_builds_the_study_folder() {
    let fixture = created_study("true\n", &[1, 2, 3]);
    let study = &fixture.study;
    let layout = study.layout();

    assert!(study.is_created());
    for folder in layout.skeleton() {
        assert!(folder.is_dir(), "{} is missing", folder.display());
    }

    let state = study.store().load().unwrap();
    assert_eq!(
        state.cases(SimStatus::NotStarted),
        ["case_seed_1d0", "case_seed_2d0", "case_seed_3d0"].map(str::to_owned)
    );
    assert_eq!(state.total(), 3);
    assert_eq!(layout.listed_cases().unwrap().len(), 3);

    let registry = CaseRegistry::load(&layout.combos_file()).unwrap();
    assert_eq!(registry.len(), 3);
    assert_eq!(
        registry.get("case_seed_2d0").unwrap()[0].value,
        Value::from(2)
    );

    // the test case copies the first case with the overrides applied
    let test = ConfigDocument::load(&layout.test_folder().join("config.yaml")).unwrap();
    assert_eq!(test.get("seed", "/").unwrap(), &Value::from(1));
    assert_eq!(test.get("solver/steps", "/").unwrap(), &Value::from(1));

    let stored = StudyDeclaration::load(&layout.declaration_file()).unwrap();
    assert_eq!(stored.original_folder, layout.original_folder());
    assert!(layout.original_folder().join("run.sh").is_file());
}

#[test]
fn created_study_can_be_reopened() {
    let fixture = created_study("true\n", &[1, 2]);

    let reopened = Study::open(fixture.study.layout().root()).unwrap();

    assert_eq!(reopened.layout().root(), fixture.study.layout().root());
    assert_eq!(reopened.parameters().total(), 2);
    assert_eq!(
        reopened.declaration().original_folder,
        fixture.study.layout().original_folder()
    );
}

#[test]
fn open_requires_a_created_study() {
    let dir = tempdir().unwrap();

    assert!(matches!(
        Study::open(dir.path()),
        Err(StudyError::NotCreated(_))
    ));
}

#[test]
fn second_create_is_refused() {
    let fixture = created_study("true\n", &[1]);

    assert!(matches!(
        fixture.study.create(),
        Err(StudyError::AlreadyCreated(_))
    ));
}

#[test]
fn colliding_folder_names_abort_before_touching_disk() {
    let dir = tempdir().unwrap();
    write_template(&dir.path().join("template"), "true\n");

    let mut declaration = declaration(dir.path(), &[]);
    declaration.parameters_inspected[0].values = Some(vec![Value::from(1.0), Value::from(1)]);

    let study = Study::from_declaration(declaration).unwrap();

    assert!(matches!(
        study.create(),
        Err(StudyError::DuplicateCase { first: 0, second: 1, .. })
    ));
    assert!(!study.layout().root().exists());
}

#[test]
fn failed_create_removes_the_new_root_and_can_be_retried() {
    let dir = tempdir().unwrap();
    write_template(&dir.path().join("template"), "true\n");

    // `absent` is not in config.yaml, so the test case fails after the first case
    let mut broken = declaration(dir.path(), &[1, 2, 3]);
    broken.test_overrides = BTreeMap::from([("absent/steps".to_owned(), Value::from(1))]);

    let study = Study::from_declaration(broken).unwrap();
    assert!(matches!(study.create(), Err(StudyError::Materialize(_))));
    assert!(!study.layout().root().exists());
    assert!(matches!(
        Study::open(study.layout().root()),
        Err(StudyError::NotCreated(_))
    ));

    let study = Study::from_declaration(declaration(dir.path(), &[1, 2, 3])).unwrap();
    let state = study.create().unwrap();

    assert_eq!(state.count(SimStatus::NotStarted), 3);
    assert!(dir.path().join("template").join("run.sh").is_file());
}

#[test]
fn failed_create_keeps_an_existing_root() {
    let dir = tempdir().unwrap();
    write_template(&dir.path().join("template"), "true\n");

    let mut broken = declaration(dir.path(), &[1, 2]);
    broken.test_overrides = BTreeMap::from([("absent/steps".to_owned(), Value::from(1))]);
    let study = Study::from_declaration(broken).unwrap();

    let root = study.layout().root().to_owned();
    fs::create_dir_all(&root).unwrap();
    fs::write(root.join("notes.txt"), "keep me").unwrap();

    assert!(study.create().is_err());
    assert_eq!(fs::read_to_string(root.join("notes.txt")).unwrap(), "keep me");
    assert!(!study.layout().scan_folder().exists());
    assert!(!study.layout().combos_file().exists());

    let study = Study::from_declaration(declaration(dir.path(), &[1, 2])).unwrap();
    assert_eq!(study.create().unwrap().total(), 2);
}

#[test]
fn status_folds_in_remote_markers() {
    let fixture = created_study("true\n", &[1, 2, 3]);
    let study = &fixture.study;
    let touch = study.layout().touch_folder();

    Sentinel::Finished.touch(&touch, "case_seed_1d0").unwrap();
    Sentinel::Error.touch(&touch, "case_seed_2d0").unwrap();

    let offline = study.status(false).unwrap();
    assert_eq!(offline.count(SimStatus::NotStarted), 3);

    let report = study.status(true).unwrap();
    assert_eq!(report.count(SimStatus::Finished), 1);
    assert_eq!(report.count(SimStatus::Error), 1);
    assert_eq!(report.count(SimStatus::NotStarted), 1);
}

#[test]
fn reset_returns_unfinished_cases() {
    let fixture = created_study("true\n", &[1, 2]);
    let study = &fixture.study;

    study
        .store()
        .transition("case_seed_1d0", SimStatus::Finished)
        .unwrap();
    study
        .store()
        .transition("case_seed_2d0", SimStatus::Error)
        .unwrap();

    let reset = study
        .reset(ResetOptions {
            scope: ResetScope::Unfinished,
            ..ResetOptions::default()
        })
        .unwrap();

    assert_eq!(reset, ["case_seed_2d0".to_owned()]);
    let state = study.store().load().unwrap();
    assert_eq!(state.count(SimStatus::Finished), 1);
    assert_eq!(state.count(SimStatus::NotStarted), 1);
}

#[test]
fn teardown_removes_the_root() {
    let fixture = created_study("true\n", &[1]);
    let root = fixture.study.layout().root().to_owned();

    fixture.study.clone().teardown().unwrap();

    assert!(!root.exists());
    assert!(fixture.dir.path().join("template").is_dir());
}
