use super::*;
use std::collections::BTreeMap;
use tempfile::tempdir;

const INITIAL: &str = "#!/bin/bash\n# initial instructions\nSIMPATH=$(pwd)\n";
const FINAL: &str = "#___BEGIN_FINAL_INSTRUCTIONS___\nSIM_EXIT_CODE=$?\nexit $SIM_EXIT_CODE\n";

#[test]
fn wrap_places_markers_around_body() {
    let wrapped = wrap("python run.py", INITIAL, FINAL, "");

    assert_eq!(
        wrapped,
        "#!/bin/bash\n# initial instructions\nSIMPATH=$(pwd)\n#___END_INITIAL_INSTRUCTIONS___\npython run.py\n#___BEGIN_FINAL_INSTRUCTIONS___\nSIM_EXIT_CODE=$?\nexit $SIM_EXIT_CODE\n"
    );
    assert_eq!(strip_injected(&wrapped), "python run.py");
}

#[test]
fn rewrapping_is_idempotent() {
    let once = wrap("echo one\necho two", INITIAL, FINAL, "export A='1'\n");
    let twice = wrap(strip_injected(&once), INITIAL, FINAL, "export A='1'\n");

    assert_eq!(once, twice);
}

#[test]
fn strip_keeps_untouched_scripts() {
    assert_eq!(strip_injected("\necho plain\n"), "echo plain");
}

#[test]
fn exports_are_quoted() {
    let environment = BTreeMap::from([
        ("OMP_NUM_THREADS".to_owned(), "4".to_owned()),
        ("LABEL".to_owned(), "it's".to_owned()),
    ]);

    assert_eq!(
        environment_exports(&environment),
        "export LABEL='it'\\''s'\nexport OMP_NUM_THREADS='4'\n"
    );
}

#[test]
fn placeholders_are_substituted() {
    let placeholders = Placeholders::new()
        .with(CASENAME, "case_a_1d0")
        .with(TOUCH_DIR, "/study/remote_touch_files");

    assert_eq!(
        placeholders.fill("touch __REPLACE_WITH_TOUCH_DIR__/FINISHED___REPLACE_WITH_CASENAME__"),
        "touch /study/remote_touch_files/FINISHED_case_a_1d0"
    );
}

#[test]
fn main_file_is_prepared_in_place() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("run.sh");
    std::fs::write(&path, "echo __REPLACE_WITH_CASENAME__\n").unwrap();
    let placeholders = Placeholders::new().with(CASENAME, "case_x");

    prepare_main_file(&path, INITIAL, FINAL, "", &placeholders).unwrap();
    let first = std::fs::read_to_string(&path).unwrap();
    prepare_main_file(&path, INITIAL, FINAL, "", &placeholders).unwrap();

    assert_eq!(std::fs::read_to_string(&path).unwrap(), first);
    assert!(first.contains("\necho case_x\n"));
    assert!(first.starts_with("#!/bin/bash\n"));
}
