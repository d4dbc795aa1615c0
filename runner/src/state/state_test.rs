use super::*;
use std::collections::HashSet;

fn cases(count: usize) -> Vec<CaseId> {
    (0..count).map(|i| format!("case_a_{i}d0")).collect()
}

fn as_set(state: &StudyState) -> HashSet<CaseId> {
    state.all_cases().cloned().collect()
}

#[test]
fn new_state_starts_not_started() {
    let state = StudyState::new("/tmp/study", cases(3)).unwrap();

    assert_eq!(state.count(SimStatus::NotStarted), 3);
    assert_eq!(state.total(), 3);
    assert_eq!(state.status_of("case_a_1d0"), Some(SimStatus::NotStarted));
    assert_eq!(state.status_of("case_b"), None);
}

#[test]
fn new_state_rejects_duplicates() {
    let mut duplicated = cases(2);
    duplicated.push("case_a_0d0".to_owned());

    assert_eq!(
        StudyState::new("/tmp/study", duplicated),
        Err(StateError::DuplicateCase("case_a_0d0".to_owned()))
    );
}

#[test]
fn transitions_keep_the_partition() {
    let original = cases(6);
    let mut state = StudyState::new("/tmp/study", original.clone()).unwrap();
    let expected: HashSet<CaseId> = original.iter().cloned().collect();

    let moves = [
        (0, SimStatus::Running),
        (1, SimStatus::Running),
        (0, SimStatus::Finished),
        (1, SimStatus::Error),
        (2, SimStatus::Interrupted),
        (2, SimStatus::NotStarted),
        (3, SimStatus::Running),
        (3, SimStatus::Running),
        (4, SimStatus::Finished),
        (1, SimStatus::NotStarted),
    ];

    for (index, status) in moves {
        state.move_to(&original[index], status).unwrap();

        assert_eq!(state.status_of(&original[index]), Some(status));
        assert!(state.check_partition().is_ok());
        assert_eq!(state.total(), original.len());
        assert_eq!(as_set(&state), expected);
    }

    assert_eq!(state.count(SimStatus::Finished), 2);
    assert_eq!(state.count(SimStatus::Running), 1);
    assert_eq!(state.count(SimStatus::NotStarted), 3);
}

#[test]
fn same_status_transition_keeps_membership() {
    let mut state = StudyState::new("/tmp/study", cases(3)).unwrap();

    let previous = state.move_to("case_a_0d0", SimStatus::NotStarted).unwrap();

    assert_eq!(previous, SimStatus::NotStarted);
    assert_eq!(state.count(SimStatus::NotStarted), 3);
    assert_eq!(
        state.cases(SimStatus::NotStarted).last().map(String::as_str),
        Some("case_a_0d0")
    );
}

#[test]
fn unknown_case_is_an_error() {
    let mut state = StudyState::new("/tmp/study", cases(1)).unwrap();

    assert_eq!(
        state.move_to("case_missing", SimStatus::Running),
        Err(StateError::UnknownCase("case_missing".to_owned()))
    );
    assert_eq!(state.total(), 1);
}

#[test]
fn state_document_uses_snake_case_buckets() {
    let mut state = StudyState::new("/tmp/study", cases(2)).unwrap();
    state.move_to("case_a_1d0", SimStatus::Finished).unwrap();

    let yaml = serde_yaml::to_string(&state).unwrap();

    assert!(yaml.contains("root_folder: /tmp/study"));
    assert!(yaml.contains("sim_finished:\n- case_a_1d0"));
    assert_eq!(serde_yaml::from_str::<StudyState>(&yaml).unwrap(), state);
    assert_eq!(
        serde_yaml::to_string(&SimStatus::NotStarted).unwrap().trim(),
        "not_started"
    );
}
