use super::*;
use serde_yaml::Value;
use tempfile::tempdir;

fn sample() -> Value {
    serde_yaml::from_str("physics:\n  field:\n    strength: 1.0\n  steps: 10\nname: run\n")
        .unwrap()
}

#[test]
fn update_nested_overwrites_leaf() {
    let mut root = sample();

    update_nested(&mut root, "physics/field/strength", "/", Value::from(2.5)).unwrap();

    assert_eq!(
        get_nested(&root, "physics/field/strength", "/"),
        Some(&Value::from(2.5))
    );
    assert_eq!(get_nested(&root, "physics/steps", "/"), Some(&Value::from(10)));
}

#[test]
fn update_nested_inserts_missing_leaf() {
    let mut root = sample();

    update_nested(&mut root, "physics/seed", "/", Value::from(4)).unwrap();

    assert_eq!(get_nested(&root, "physics/seed", "/"), Some(&Value::from(4)));
}

#[test]
fn update_nested_reports_missing_intermediate() {
    let mut root = sample();

    match update_nested(&mut root, "physics/missing/strength", "/", Value::from(1)) {
        Err(DocumentError::MissingKey { key, .. }) => assert_eq!(key, "missing"),
        other => panic!("expected missing key, got {other:?}"),
    }
}

#[test]
fn update_nested_reports_non_mapping_intermediate() {
    let mut root = sample();

    match update_nested(&mut root, "physics/steps/inner", "/", Value::from(1)) {
        Err(DocumentError::NotAMapping { key, .. }) => assert_eq!(key, "steps"),
        other => panic!("expected non mapping, got {other:?}"),
    }
}

#[test]
fn update_nested_honors_separator() {
    let mut root = sample();

    update_nested(&mut root, "physics.steps", ".", Value::from(20)).unwrap();

    assert_eq!(get_nested(&root, "physics.steps", "."), Some(&Value::from(20)));
    assert!(matches!(
        update_nested(&mut root, "", "/", Value::from(1)),
        Err(DocumentError::EmptyKey)
    ));
}

#[test]
fn document_round_trips_through_disk() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.yaml");
    std::fs::write(&path, "voltage: 1.0\n").unwrap();

    let mut document = ConfigDocument::load(&path).unwrap();
    document.update("voltage", "/", Value::from(5.0)).unwrap();
    document.set_status("not_started").unwrap();
    document.save().unwrap();

    let reloaded = ConfigDocument::load(&path).unwrap();
    assert_eq!(reloaded.get("voltage", "/"), Some(&Value::from(5.0)));
    assert_eq!(reloaded.status(), Some("not_started"));
    assert_eq!(reloaded, document);

    // no temporary files are left behind
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempdir().unwrap();

    assert!(matches!(
        ConfigDocument::load(&dir.path().join("absent.yaml")),
        Err(DocumentError::Io { .. })
    ));
}
