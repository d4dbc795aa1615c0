use super::*;
use crate::state::SimStatus;
use tempfile::tempdir;

#[test]
fn parse_distinguishes_prefixes() {
    assert_eq!(
        Sentinel::parse("IO_ERROR_case_a_1d0"),
        Some((Sentinel::IoError, "case_a_1d0"))
    );
    assert_eq!(
        Sentinel::parse("ERROR_case_a_1d0"),
        Some((Sentinel::Error, "case_a_1d0"))
    );
    assert_eq!(
        Sentinel::parse("FINISHED_case_a_1d0"),
        Some((Sentinel::Finished, "case_a_1d0"))
    );
    assert_eq!(Sentinel::parse("FINISHED_"), None);
    assert_eq!(Sentinel::parse("case_a_1d0"), None);
}

#[test]
fn detect_prefers_errors() {
    let dir = tempdir().unwrap();
    let touch = dir.path().join("remote_touch_files");

    assert_eq!(detect(&touch, "case_x"), None);

    Sentinel::Finished.touch(&touch, "case_x").unwrap();
    assert_eq!(detect(&touch, "case_x"), Some(Sentinel::Finished));

    Sentinel::IoError.touch(&touch, "case_x").unwrap();
    assert_eq!(detect(&touch, "case_x"), Some(Sentinel::IoError));
    assert_eq!(detect(&touch, "case_x").map(Sentinel::status), Some(SimStatus::Error));

    Sentinel::Error.touch(&touch, "case_x").unwrap();
    assert_eq!(detect(&touch, "case_x"), Some(Sentinel::Error));

    // markers of other cases are ignored
    assert_eq!(detect(&touch, "case_y"), None);
}

#[test]
fn clear_removes_every_marker() {
    let dir = tempdir().unwrap();
    let touch = dir.path();

    Sentinel::Finished.touch(touch, "case_x").unwrap();
    Sentinel::Error.touch(touch, "case_x").unwrap();
    Sentinel::Finished.touch(touch, "case_y").unwrap();

    assert_eq!(clear(touch, "case_x").unwrap(), 2);
    assert_eq!(clear(touch, "case_x").unwrap(), 0);
    assert_eq!(detect(touch, "case_x"), None);
    assert_eq!(detect(touch, "case_y"), Some(Sentinel::Finished));
}
