use std::sync::Arc;

use instrumentation_kit_lib::app::config::OrchestratorSettings;
use instrumentation_kit_lib::app::error::{OrchestratorArgsError, TestEventClientConnectError};
use instrumentation_kit_lib::app::events::{Description, Failure, RunResult, TestRunEvent};
use instrumentation_kit_lib::app::orchestrator::args::{
    ORCHESTRATOR_SERVICE_NAME, TEST_DISCOVERY_SERVICE_NAME, TEST_NOTIFICATION_SERVICE_NAME,
};
use instrumentation_kit_lib::app::orchestrator::collector::LegacyNotification;
use instrumentation_kit_lib::app::orchestrator::plan::InstrumentationPlan;
use instrumentation_kit_lib::app::orchestrator::{
    DiscoveryCollector, LegacyOrchestratorService, ProtocolVersion, RunEventCollector, RunnerArgs, ServiceRegistry,
    TestEventClient, TestStatus,
};
use instrumentation_kit_lib::app::services::usage::{RecordingUsageTracker, ORCHESTRATOR_USAGE};

fn suite() -> Description {
    Description::suite("all")
        .with_child(
            Description::suite("org.example.LoginTest")
                .with_child(Description::test("org.example.LoginTest", "accepts_valid_user"))
                .with_child(Description::test("org.example.LoginTest", "rejects_bad_password")),
        )
        .with_child(Description::suite("org.example.EmptyTest"))
}

fn connect(args: &[(&str, &str)], registry: &Arc<ServiceRegistry>) -> Result<TestEventClient, TestEventClientConnectError> {
    let args = RunnerArgs::parse(args.iter().copied()).expect("runner args");
    TestEventClient::connect(
        &args,
        registry,
        &OrchestratorSettings { connect_timeout_ms: 500 },
        &RecordingUsageTracker::new(),
    )
}

#[test]
fn v2_discovery_feeds_an_isolated_plan() {
    let registry = Arc::new(ServiceRegistry::new());
    let collector = Arc::new(DiscoveryCollector::new("login"));
    registry.publish(TEST_DISCOVERY_SERVICE_NAME, collector.clone());

    let client = connect(&[("testDiscoveryService", TEST_DISCOVERY_SERVICE_NAME)], &registry).expect("connect");
    assert_eq!(client.args().map(|args| args.version), Some(ProtocolVersion::V2));
    assert!(client.run_listener().is_none());
    let sent = client.discovery().expect("discovery").run(&suite()).expect("run");
    assert_eq!(sent, 2);
    assert!(collector.is_finished());

    let run_args = RunnerArgs::parse([("timeout_msec", "30000")]).expect("args");
    let plan = InstrumentationPlan::isolated(
        "org.example.test/androidx.test.runner.AndroidJUnitRunner",
        &collector.run_info().test_cases,
        &run_args,
    )
    .expect("plan");
    let ids: Vec<&str> = plan.steps.iter().map(|step| step.test_id.as_str()).collect();
    assert_eq!(
        ids,
        vec![
            "org.example.LoginTest#accepts_valid_user",
            "org.example.LoginTest#rejects_bad_password"
        ]
    );
}

#[test]
fn v2_run_events_arrive_decoded_and_in_order() {
    let registry = Arc::new(ServiceRegistry::new());
    let collector = Arc::new(RunEventCollector::new());
    registry.publish(TEST_NOTIFICATION_SERVICE_NAME, collector.clone());

    let client = connect(&[("testNotificationService", TEST_NOTIFICATION_SERVICE_NAME)], &registry).expect("connect");
    let mut listener = client.run_listener().expect("listener");
    let ok = Description::test("org.example.LoginTest", "accepts_valid_user");
    let bad = Description::test("org.example.LoginTest", "rejects_bad_password");
    let failure = Failure::new(bad.clone(), "expected error").with_exception("AssertionError", "at LoginTest");

    listener.test_run_started(&suite());
    listener.test_started(&ok);
    listener.test_finished(&ok);
    listener.test_started(&bad);
    listener.test_failure(&failure);
    listener.test_finished(&bad);
    listener.test_run_finished(&RunResult {
        run_count: 2,
        ignore_count: 0,
        run_time_ms: 120,
        failures: vec![failure],
    });

    let kinds: Vec<&str> = collector.events().iter().map(TestRunEvent::kind).collect();
    assert_eq!(
        kinds,
        vec![
            "TEST_RUN_STARTED",
            "TEST_STARTED",
            "TEST_FINISHED",
            "TEST_STARTED",
            "TEST_FAILURE",
            "TEST_FINISHED",
            "TEST_RUN_FINISHED"
        ]
    );
    let summary = collector.summary();
    assert_eq!(summary.count(TestStatus::Passed), 1);
    assert_eq!(
        summary.outcome("org.example.LoginTest#rejects_bad_password").map(|o| o.status),
        Some(TestStatus::Failed)
    );
    assert_eq!(summary.run_time_ms, Some(120));
    assert!(!summary.was_successful());
}

#[test]
fn v1_protocol_lists_and_reports() {
    let registry = Arc::new(ServiceRegistry::new());
    let service = Arc::new(LegacyOrchestratorService::new());
    registry.publish(ORCHESTRATOR_SERVICE_NAME, service.clone());

    let listing = connect(
        &[("orchestratorService", ORCHESTRATOR_SERVICE_NAME), ("listTestsForOrchestrator", "true")],
        &registry,
    )
    .expect("connect");
    assert_eq!(listing.args().map(|args| args.version), Some(ProtocolVersion::V1));
    listing.discovery().expect("discovery").run(&suite()).expect("listing");
    assert_eq!(
        service.added_tests(),
        vec![
            "org.example.LoginTest#accepts_valid_user".to_string(),
            "org.example.LoginTest#rejects_bad_password".to_string()
        ]
    );

    let running = connect(&[("orchestratorService", ORCHESTRATOR_SERVICE_NAME)], &registry).expect("connect");
    let mut listener = running.run_listener().expect("listener");
    let test = Description::test("org.example.LoginTest", "accepts_valid_user");
    listener.test_started(&test);
    listener.test_finished(&test);

    assert_eq!(
        service.notifications(),
        vec![
            LegacyNotification::TestStarted(test.clone()),
            LegacyNotification::TestFinished(test)
        ]
    );
    assert_eq!(service.summary().count(TestStatus::Passed), 1);
}

#[test]
fn contradictory_arguments_are_rejected_before_connecting() {
    let registry = Arc::new(ServiceRegistry::new());
    let err = connect(
        &[
            ("testDiscoveryService", TEST_DISCOVERY_SERVICE_NAME),
            ("testNotificationService", TEST_NOTIFICATION_SERVICE_NAME),
        ],
        &registry,
    )
    .err()
    .expect("conflict");
    assert!(matches!(
        err,
        TestEventClientConnectError::Args(OrchestratorArgsError::Conflict(_))
    ));
}

#[test]
fn missing_service_times_out() {
    let registry = Arc::new(ServiceRegistry::new());
    let usage = RecordingUsageTracker::new();
    let args = RunnerArgs::parse([("testNotificationService", "org.example/.Missing")]).expect("args");
    let err = TestEventClient::connect(
        &args,
        &registry,
        &OrchestratorSettings { connect_timeout_ms: 50 },
        &usage,
    )
    .err()
    .expect("timeout");
    assert!(err.to_string().contains("org.example/.Missing"));
    assert_eq!(usage.records()[0].usage, ORCHESTRATOR_USAGE);
}
