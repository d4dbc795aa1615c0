use super::*;
use crate::{document::ConfigDocument, test_support::created_study};
use std::{fs, thread, time::Duration};

fn config(jobs: usize) -> LocalConfig {
    LocalConfig {
        n_concurrent_jobs: jobs,
        kill_grace_secs: 1,
        ..LocalConfig::default()
    }
}

#[test]
fn pool_bounds_running_cases() {
    let fixture = created_study("sleep 0.3\necho done\n", &[1, 2, 3, 4, 5]);
    let study = &fixture.study;

    let report = LocalExecutor::load(config(2), study)
        .unwrap()
        .execute()
        .unwrap();
    let state = study.store().load().unwrap();

    assert_eq!(report.finished, 5);
    assert_eq!(report.error, 0);
    assert!(report.peak_running >= 1 && report.peak_running <= 2);
    assert_eq!(state.count(SimStatus::Finished), 5);
    assert_eq!(state.count(SimStatus::Running), 0);

    for case in state.cases(SimStatus::Finished) {
        let out = study.layout().out_folder().join(format!("{case}.out"));
        assert_eq!(fs::read_to_string(out).unwrap(), "done\n");

        let document = ConfigDocument::load(&study.materializer().config_path(case)).unwrap();
        assert_eq!(document.status(), Some("finished"));
    }
    assert_eq!(fs::read_dir(study.layout().log_folder()).unwrap().count(), 1);
}

#[test]
fn failing_case_is_recorded_as_error() {
    let fixture = created_study(
        "if grep -q 'seed: 2' config.yaml; then echo broken >&2; exit 3; fi\n",
        &[1, 2, 3],
    );
    let study = &fixture.study;

    let report = LocalExecutor::load(config(3), study)
        .unwrap()
        .execute()
        .unwrap();
    let state = study.store().load().unwrap();

    assert_eq!(report.finished, 2);
    assert_eq!(report.error, 1);
    assert_eq!(state.cases(SimStatus::Error), ["case_seed_2d0".to_owned()]);
    assert_eq!(
        fs::read_to_string(study.layout().err_folder().join("case_seed_2d0.err")).unwrap(),
        "broken\n"
    );
}

#[test]
fn gpu_lanes_export_the_device() {
    let fixture = created_study("echo \"$CUDA_VISIBLE_DEVICES\" > gpu.txt\n", &[1, 2, 3, 4]);
    let study = &fixture.study;
    let executor_config = LocalConfig {
        gpu_available_list: vec![3, 7],
        ..config(8)
    };

    let report = LocalExecutor::load(executor_config, study)
        .unwrap()
        .execute()
        .unwrap();

    assert_eq!(report.finished, 4);
    assert!(report.peak_running <= 2);

    let mut devices = study
        .store()
        .load()
        .unwrap()
        .cases(SimStatus::Finished)
        .iter()
        .map(|case| fs::read_to_string(study.layout().case_folder(case).join("gpu.txt")).unwrap())
        .collect::<Vec<_>>();
    devices.sort();

    assert_eq!(devices, vec!["3\n", "3\n", "7\n", "7\n"]);
}

#[test]
fn interrupted_dispatch_leaves_cases_not_started() {
    let fixture = created_study("echo run\n", &[1, 2, 3]);
    let study = &fixture.study;
    let interrupt = Interrupt::new();
    interrupt.escalate();

    let report = LocalExecutor::load(config(2), study)
        .unwrap()
        .with_interrupt(interrupt)
        .execute()
        .unwrap();

    assert_eq!(report.skipped, 3);
    assert_eq!(report.peak_running, 0);
    assert_eq!(
        study.store().load().unwrap().count(SimStatus::NotStarted),
        3
    );
}

#[test]
fn second_interrupt_terminates_running_cases() {
    let fixture = created_study("sleep 30\n", &[1, 2]);
    let study = &fixture.study;
    let interrupt = Interrupt::new();
    let handle = interrupt.clone();

    let escalation = thread::spawn(move || {
        thread::sleep(Duration::from_millis(500));
        handle.escalate();
        handle.escalate();
    });

    let report = LocalExecutor::load(config(2), study)
        .unwrap()
        .with_interrupt(interrupt)
        .execute()
        .unwrap();
    escalation.join().unwrap();

    let state = study.store().load().unwrap();
    assert_eq!(report.interrupted, 2);
    assert_eq!(state.count(SimStatus::Interrupted), 2);
    assert_eq!(state.count(SimStatus::Running), 0);
}

#[test]
fn test_case_runs_without_touching_state() {
    let fixture = created_study("grep steps config.yaml\n", &[1, 2]);
    let study = &fixture.study;
    let executor_config = LocalConfig {
        run_test: true,
        ..config(1)
    };

    let report = LocalExecutor::load(executor_config, study)
        .unwrap()
        .execute()
        .unwrap();

    assert_eq!(report.finished, 1);
    assert_eq!(
        study.store().load().unwrap().count(SimStatus::NotStarted),
        2
    );
    assert_eq!(
        fs::read_to_string(study.layout().out_folder().join("test.out")).unwrap(),
        "  steps: 1\n"
    );
}

#[test]
fn invalid_configuration_is_rejected() {
    assert!(matches!(
        config(0).validate(),
        Err(ExecutorError::InvalidConfig {
            field: "n_concurrent_jobs",
            ..
        })
    ));

    let duplicated = LocalConfig {
        gpu_available_list: vec![0, 1, 0],
        ..config(1)
    };
    assert!(duplicated.validate().is_err());

    let parsed: LocalConfig = serde_yaml::from_str("n_concurrent_jobs: 3\n").unwrap();
    assert_eq!(parsed.interpreter, "bash");
    assert_eq!(parsed.kill_grace_secs, 10);
    assert!(serde_yaml::from_str::<LocalConfig>("n_jobs: 3\n").is_err());
}
