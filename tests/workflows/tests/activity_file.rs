use std::{fs, time::Duration};

use cyclebench_config::{ActivityFile, logging::init_test_tracing};
use cyclebench_core::{activity::RunState, scenario::Builder};
use cyclebench_workflows::ActivityCompleted;
use tests_workflows::run_in_process;

const ACTIVITIES: &str = r#"
scenario:
  duration_secs: 30
activities:
  - alias: reads
    driver: diag
    cycles: 0..300
    threads: 3
    cyclerate: 1000
    op:
      log: { level: debug, modulo: 100 }
  - alias: writes
    driver: diag
    cycles: 50
    cyclerate: 500
"#;

#[tokio::test(start_paused = true)]
async fn runs_activities_from_a_yaml_file() {
    init_test_tracing();
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("activities.yaml");
    fs::write(&path, ACTIVITIES).expect("write activity file");

    let file = ActivityFile::load_from_file(&path).expect("activity file should load");
    assert_eq!(file.activities.len(), 2);

    let mut scenario = Builder::from_activity_file(&file)
        .with_expectation(ActivityCompleted::new("reads").with_min_cycles(300))
        .with_expectation(ActivityCompleted::new("writes").with_min_cycles(50))
        .build()
        .expect("scenario should build");
    assert_eq!(scenario.duration(), Duration::from_secs(30));

    let handle = run_in_process(&mut scenario)
        .await
        .expect("finite activities should complete");

    let controller = handle.context().controller();
    for alias in ["reads", "writes"] {
        assert_eq!(controller.activity(alias).unwrap().state(), RunState::Finished);
    }
    assert_eq!(
        controller.metrics().value("reads.cycles.servicetime.count"),
        Some(300.0)
    );
}
