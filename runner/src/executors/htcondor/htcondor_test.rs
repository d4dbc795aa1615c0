use super::*;
use crate::test_support::{created_study, created_study_with};
use std::fs;

fn config(submit_command: &str) -> HtcondorConfig {
    HtcondorConfig {
        submit_command: submit_command.to_owned(),
        ..HtcondorConfig::default()
    }
}

#[test]
fn writes_queue_and_submit_files() {
    let fixture = created_study_with("python3 sim.py\n", &[1, 2, 3], |declaration| {
        declaration
            .environment
            .insert("OMP_NUM_THREADS".to_owned(), "4".to_owned());
    });
    let study = &fixture.study;
    let support = study.layout().htcondor_folder();

    let report = HtcondorExecutor::load(config("true"), study)
        .unwrap()
        .execute()
        .unwrap();

    assert_eq!(report.submitted, 3);

    let queue = fs::read_to_string(support.join(QUEUE_FILE)).unwrap();
    let lines = queue.lines().collect::<Vec<_>>();
    assert_eq!(lines.len(), 3);

    let folder = study.layout().case_folder("case_seed_1d0");
    assert_eq!(
        lines[0],
        format!(
            "{}, {}, {}, {}",
            folder.join("run.sh").display(),
            folder.display(),
            study.layout().out_folder().join("case_seed_1d0.out").display(),
            study.layout().err_folder().join("case_seed_1d0.err").display()
        )
    );

    let submit = fs::read_to_string(support.join(SUBMIT_FILE)).unwrap();
    assert!(submit.contains("MY.JobFlavour = \"longlunch\""));
    assert!(submit.contains("request_cpus = 1"));
    assert!(submit.contains(&format!("from {}", support.join(QUEUE_FILE).display())));
    assert!(!submit.contains("request_GPUs"));
    assert!(!submit.contains("__REPLACE_WITH_"));

    let main = fs::read_to_string(folder.join("run.sh")).unwrap();
    assert!(main.contains("SIMNAME=case_seed_1d0"));
    assert!(main.contains(&format!("TOUCHPATH={}", study.layout().touch_folder().display())));
    assert!(main.contains("export OMP_NUM_THREADS='4'"));
    assert!(main.contains("python3 sim.py"));
    assert!(main.contains("FINISHED_$SIMNAME"));

    // submission does not change the recorded status
    let state = study.store().load().unwrap();
    assert_eq!(state.count(SimStatus::NotStarted), 3);
}

#[test]
fn resubmission_does_not_stack_instructions() {
    let fixture = created_study("python3 sim.py\n", &[1]);
    let study = &fixture.study;

    for _ in 0..2 {
        HtcondorExecutor::load(config("true"), study)
            .unwrap()
            .execute()
            .unwrap();
    }

    let main = fs::read_to_string(study.layout().case_folder("case_seed_1d0").join("run.sh")).unwrap();
    assert_eq!(main.matches(script::INITIAL_MARKER).count(), 1);
    assert_eq!(main.matches(script::FINAL_MARKER).count(), 1);
}

#[test]
fn gpu_request_uses_gpu_template() {
    let fixture = created_study("true\n", &[1]);
    let study = &fixture.study;

    let config = HtcondorConfig {
        request_gpus: true,
        request_cpus: 4,
        ..config("true")
    };
    HtcondorExecutor::load(config, study)
        .unwrap()
        .execute()
        .unwrap();

    let submit = fs::read_to_string(study.layout().htcondor_folder().join(SUBMIT_FILE)).unwrap();
    assert!(submit.contains("request_GPUs = 1"));
    assert!(submit.contains("request_cpus = 4"));
}

#[test]
fn rejected_submission_is_an_error() {
    let fixture = created_study("true\n", &[1, 2]);
    let study = &fixture.study;

    let result = HtcondorExecutor::load(config("false"), study)
        .unwrap()
        .execute();

    assert!(matches!(
        result,
        Err(ExecutorError::SubmissionRejected { .. })
    ));
    assert_eq!(
        study.store().load().unwrap().count(SimStatus::NotStarted),
        2
    );
}

#[test]
fn test_run_submits_only_the_test_case() {
    let fixture = created_study("true\n", &[1, 2]);
    let study = &fixture.study;

    let config = HtcondorConfig {
        run_test: true,
        ..config("true")
    };
    let report = HtcondorExecutor::load(config, study)
        .unwrap()
        .execute()
        .unwrap();

    assert_eq!(report.submitted, 1);

    let support = study.layout().htcondor_folder();
    let queue = fs::read_to_string(support.join(QUEUE_FILE)).unwrap();
    assert_eq!(queue.lines().count(), 1);
    assert!(queue.starts_with(&study.layout().test_folder().join("run.sh").display().to_string()));

    let submit = fs::read_to_string(support.join(SUBMIT_FILE)).unwrap();
    assert!(submit.contains("MY.JobFlavour = \"espresso\""));
}

#[test]
fn unknown_flavour_is_rejected() {
    let fixture = created_study("true\n", &[1]);

    let config = HtcondorConfig {
        time_limit: "forever".to_owned(),
        ..HtcondorConfig::default()
    };

    assert!(matches!(
        HtcondorExecutor::load(config, &fixture.study),
        Err(ExecutorError::InvalidConfig {
            field: "time_limit",
            ..
        })
    ));
}
