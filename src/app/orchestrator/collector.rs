use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::app::error::{ParcelError, TransportError};
use crate::app::events::{
    Bundle, Description, Failure, ParcelReader, Parcelable, RunResult, TestCaseInfo, TestDiscoveryEvent,
    TestRunEvent, TestRunInfo,
};

use super::connection::{TRANSACTION_ADD_TEST, TRANSACTION_SEND_EVENT, TRANSACTION_SEND_TEST_NOTIFICATION};
use super::listener::{KEY_DESCRIPTION, KEY_FAILURE, KEY_RESULT, KEY_TEST_EVENT};
use super::transport::RemoteService;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    Running,
    Passed,
    Failed,
    AssumptionFailed,
    Ignored,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TestOutcome {
    pub test_id: String,
    pub status: TestStatus,
    pub message: Option<String>,
}

/// What the orchestrator learned about one instrumentation run.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RunSummary {
    pub run_name: Option<String>,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub tests: Vec<TestOutcome>,
    pub reported_count: Option<i32>,
    pub reported_ignore_count: Option<i32>,
    pub reported_failures: usize,
    pub run_time_ms: Option<i64>,
}

impl Default for RunSummary {
    fn default() -> Self {
        Self {
            run_name: None,
            started_at: Utc::now().to_rfc3339(),
            finished_at: None,
            tests: Vec::new(),
            reported_count: None,
            reported_ignore_count: None,
            reported_failures: 0,
            run_time_ms: None,
        }
    }
}

impl RunSummary {
    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }

    pub fn count(&self, status: TestStatus) -> usize {
        self.tests.iter().filter(|test| test.status == status).count()
    }

    pub fn outcome(&self, test_id: &str) -> Option<&TestOutcome> {
        self.tests.iter().rev().find(|test| test.test_id == test_id)
    }

    /// Finished, no failed test, and no test left running.
    pub fn was_successful(&self) -> bool {
        self.is_finished()
            && self.reported_failures == 0
            && self
                .tests
                .iter()
                .all(|test| !matches!(test.status, TestStatus::Failed | TestStatus::Running))
    }

    fn run_started(&mut self, name: &str) {
        self.run_name = Some(name.to_string());
    }

    fn test_started(&mut self, test_id: String) {
        self.tests.push(TestOutcome {
            test_id,
            status: TestStatus::Running,
            message: None,
        });
    }

    fn running_mut(&mut self, test_id: &str) -> Option<&mut TestOutcome> {
        self.tests
            .iter_mut()
            .rev()
            .find(|test| test.test_id == test_id && test.status == TestStatus::Running)
    }

    fn latest_mut(&mut self, test_id: &str) -> Option<&mut TestOutcome> {
        self.tests.iter_mut().rev().find(|test| test.test_id == test_id)
    }

    fn test_failed(&mut self, test_id: String, status: TestStatus, message: Option<String>) {
        match self.latest_mut(&test_id) {
            Some(outcome) => {
                outcome.status = status;
                outcome.message = message;
            }
            None => self.tests.push(TestOutcome {
                test_id,
                status,
                message,
            }),
        }
    }

    fn test_finished(&mut self, test_id: &str) {
        match self.running_mut(test_id) {
            Some(outcome) => outcome.status = TestStatus::Passed,
            None => debug!(test = %test_id, "finish without a running test"),
        }
    }

    fn test_ignored(&mut self, test_id: String) {
        self.tests.push(TestOutcome {
            test_id,
            status: TestStatus::Ignored,
            message: None,
        });
    }

    fn run_finished(&mut self, count: i32, ignore_count: i32, run_time_ms: i64, failures: usize) {
        self.reported_count = Some(count);
        self.reported_ignore_count = Some(ignore_count);
        self.reported_failures = failures;
        self.run_time_ms = Some(run_time_ms);
        self.finished_at = Some(Utc::now().to_rfc3339());
        info!(
            run = ?self.run_name,
            count,
            ignored = ignore_count,
            failures,
            "test run finished"
        );
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn rejected(err: ParcelError) -> TransportError {
    TransportError::Rejected(err.to_string())
}

/// v2 run event service: decodes every [`TestRunEvent`] and folds it into a [`RunSummary`].
#[derive(Default)]
pub struct RunEventCollector {
    events: Mutex<Vec<TestRunEvent>>,
    summary: Mutex<RunSummary>,
}

impl RunEventCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TestRunEvent> {
        lock(&self.events).clone()
    }

    pub fn summary(&self) -> RunSummary {
        lock(&self.summary).clone()
    }

    fn apply(&self, event: &TestRunEvent) {
        let mut summary = lock(&self.summary);
        match event {
            TestRunEvent::TestRunStarted { test_case } => summary.run_started(&test_case.class_name),
            TestRunEvent::TestStarted { test_case } => summary.test_started(test_case.test_id()),
            TestRunEvent::TestFinished { test_case } => summary.test_finished(&test_case.test_id()),
            TestRunEvent::TestIgnored { test_case } => summary.test_ignored(test_case.test_id()),
            TestRunEvent::TestFailure { test_case, failure } => {
                summary.test_failed(test_case.test_id(), TestStatus::Failed, failure.failure_message.clone())
            }
            TestRunEvent::TestAssumptionFailure { test_case, failure } => summary.test_failed(
                test_case.test_id(),
                TestStatus::AssumptionFailed,
                failure.failure_message.clone(),
            ),
            TestRunEvent::TestRunFinished {
                count,
                ignore_count,
                run_time,
                failures,
            } => summary.run_finished(*count, *ignore_count, *run_time, failures.len()),
        }
    }
}

impl RemoteService for RunEventCollector {
    fn transact(&self, code: u32, payload: &[u8]) -> Result<Vec<u8>, TransportError> {
        if code != TRANSACTION_SEND_EVENT {
            return Err(TransportError::UnknownTransaction(code));
        }
        let event = TestRunEvent::from_parcel(payload).map_err(rejected)?;
        debug!(event = event.kind(), "received test run event");
        self.apply(&event);
        lock(&self.events).push(event);
        Ok(Vec::new())
    }
}

#[derive(Debug, Default)]
struct DiscoveryState {
    started: bool,
    finished: bool,
    tests: Vec<TestCaseInfo>,
    errors: Vec<String>,
}

/// v2 discovery service: collects the tests the instrumentation reports.
pub struct DiscoveryCollector {
    run_name: String,
    state: Mutex<DiscoveryState>,
}

impl DiscoveryCollector {
    pub fn new(run_name: impl Into<String>) -> Self {
        Self {
            run_name: run_name.into(),
            state: Mutex::new(DiscoveryState::default()),
        }
    }

    pub fn is_finished(&self) -> bool {
        lock(&self.state).finished
    }

    pub fn errors(&self) -> Vec<String> {
        lock(&self.state).errors.clone()
    }

    pub fn run_info(&self) -> TestRunInfo {
        TestRunInfo {
            test_run_name: self.run_name.clone(),
            test_cases: lock(&self.state).tests.clone(),
        }
    }
}

impl RemoteService for DiscoveryCollector {
    fn transact(&self, code: u32, payload: &[u8]) -> Result<Vec<u8>, TransportError> {
        if code != TRANSACTION_SEND_EVENT {
            return Err(TransportError::UnknownTransaction(code));
        }
        let event = TestDiscoveryEvent::from_parcel(payload).map_err(rejected)?;
        let mut state = lock(&self.state);
        match event {
            TestDiscoveryEvent::TestDiscoveryStarted => state.started = true,
            TestDiscoveryEvent::TestFound { test_case } => state.tests.push(test_case),
            TestDiscoveryEvent::TestDiscoveryFinished => {
                state.finished = true;
                info!(run = %self.run_name, tests = state.tests.len(), "test discovery finished");
            }
            TestDiscoveryEvent::TestDiscoveryError { error } => {
                let message = error.error_message.unwrap_or_else(|| error.stack_trace.clone());
                warn!(run = %self.run_name, error = %message, "test discovery error");
                state.errors.push(message);
            }
        }
        if !state.started {
            debug!(run = %self.run_name, "discovery event before discovery started");
        }
        Ok(Vec::new())
    }
}

/// Decoded v1 notification.
#[derive(Debug, Clone, PartialEq)]
pub enum LegacyNotification {
    RunStarted(Description),
    RunFinished(RunResult),
    TestStarted(Description),
    TestFinished(Description),
    TestFailure(Failure),
    TestAssumptionFailure(Failure),
    TestIgnored(Description),
}

impl LegacyNotification {
    pub fn from_bundle(bundle: &Bundle) -> Result<Self, ParcelError> {
        let kind = bundle
            .get_string(KEY_TEST_EVENT)
            .ok_or(ParcelError::UnexpectedNull("TestEvent"))?;
        let description = || -> Result<Description, ParcelError> {
            bundle
                .get_parcelable(KEY_DESCRIPTION)?
                .ok_or(ParcelError::UnexpectedNull("description"))
        };
        let failure = || -> Result<Failure, ParcelError> {
            bundle
                .get_parcelable(KEY_FAILURE)?
                .ok_or(ParcelError::UnexpectedNull("failure"))
        };
        Ok(match kind {
            "TEST_RUN_STARTED" => Self::RunStarted(description()?),
            "TEST_RUN_FINISHED" => Self::RunFinished(
                bundle
                    .get_parcelable(KEY_RESULT)?
                    .ok_or(ParcelError::UnexpectedNull("result"))?,
            ),
            "TEST_STARTED" => Self::TestStarted(description()?),
            "TEST_FINISHED" => Self::TestFinished(description()?),
            "TEST_FAILURE" => Self::TestFailure(failure()?),
            "TEST_ASSUMPTION_FAILURE" => Self::TestAssumptionFailure(failure()?),
            "TEST_IGNORED" => Self::TestIgnored(description()?),
            other => {
                return Err(ParcelError::UnknownDiscriminator {
                    kind: "TestEvent",
                    value: other.to_string(),
                })
            }
        })
    }
}

fn description_id(description: &Description) -> String {
    description.to_test_case().test_id()
}

/// v1 orchestrator service: accepts `addTest` registrations and notification bundles.
#[derive(Default)]
pub struct LegacyOrchestratorService {
    added: Mutex<Vec<String>>,
    notifications: Mutex<Vec<LegacyNotification>>,
    summary: Mutex<RunSummary>,
}

impl LegacyOrchestratorService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn added_tests(&self) -> Vec<String> {
        lock(&self.added).clone()
    }

    pub fn notifications(&self) -> Vec<LegacyNotification> {
        lock(&self.notifications).clone()
    }

    pub fn summary(&self) -> RunSummary {
        lock(&self.summary).clone()
    }

    fn apply(&self, notification: &LegacyNotification) {
        let mut summary = lock(&self.summary);
        match notification {
            LegacyNotification::RunStarted(description) => summary.run_started(&description.display_name),
            LegacyNotification::TestStarted(description) => summary.test_started(description_id(description)),
            LegacyNotification::TestFinished(description) => summary.test_finished(&description_id(description)),
            LegacyNotification::TestIgnored(description) => summary.test_ignored(description_id(description)),
            LegacyNotification::TestFailure(failure) => summary.test_failed(
                description_id(&failure.description),
                TestStatus::Failed,
                failure.message.clone(),
            ),
            LegacyNotification::TestAssumptionFailure(failure) => summary.test_failed(
                description_id(&failure.description),
                TestStatus::AssumptionFailed,
                failure.message.clone(),
            ),
            LegacyNotification::RunFinished(result) => summary.run_finished(
                result.run_count,
                result.ignore_count,
                result.run_time_ms,
                result.failure_count(),
            ),
        }
    }
}

impl RemoteService for LegacyOrchestratorService {
    fn transact(&self, code: u32, payload: &[u8]) -> Result<Vec<u8>, TransportError> {
        match code {
            TRANSACTION_ADD_TEST => {
                let test_id = ParcelReader::new(payload)
                    .read_string("test id")
                    .map_err(rejected)?;
                debug!(test = %test_id, "test added");
                lock(&self.added).push(test_id);
            }
            TRANSACTION_SEND_TEST_NOTIFICATION => {
                let bundle = Bundle::from_parcel(payload).map_err(rejected)?;
                let notification = LegacyNotification::from_bundle(&bundle).map_err(rejected)?;
                self.apply(&notification);
                lock(&self.notifications).push(notification);
            }
            other => return Err(TransportError::UnknownTransaction(other)),
        }
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::events::{ErrorInfo, FailureInfo, Parcel};

    fn case(method: &str) -> TestCaseInfo {
        TestCaseInfo::new("org.example.A", method)
    }

    fn send(collector: &RunEventCollector, event: TestRunEvent) {
        collector
            .transact(TRANSACTION_SEND_EVENT, &event.to_parcel())
            .expect("accepted");
    }

    #[test]
    fn run_collector_summarizes_outcomes() {
        let collector = RunEventCollector::new();
        send(&collector, TestRunEvent::TestRunStarted { test_case: TestCaseInfo::new("suite", "") });
        send(&collector, TestRunEvent::TestStarted { test_case: case("one") });
        send(&collector, TestRunEvent::TestFinished { test_case: case("one") });
        send(&collector, TestRunEvent::TestStarted { test_case: case("two") });
        let failure = FailureInfo {
            failure_message: Some("expected 1".to_string()),
            failure_type: Some("AssertionError".to_string()),
            stack_trace: "at A.two".to_string(),
            test_case: case("two"),
        };
        send(
            &collector,
            TestRunEvent::TestFailure {
                test_case: case("two"),
                failure: failure.clone(),
            },
        );
        send(&collector, TestRunEvent::TestFinished { test_case: case("two") });
        send(&collector, TestRunEvent::TestIgnored { test_case: case("three") });
        send(
            &collector,
            TestRunEvent::TestRunFinished {
                count: 2,
                ignore_count: 1,
                run_time: 40,
                failures: vec![failure],
            },
        );

        let summary = collector.summary();
        assert_eq!(summary.run_name.as_deref(), Some("suite"));
        assert_eq!(summary.count(TestStatus::Passed), 1);
        assert_eq!(summary.count(TestStatus::Failed), 1);
        assert_eq!(summary.count(TestStatus::Ignored), 1);
        assert_eq!(
            summary.outcome("org.example.A#two").and_then(|o| o.message.as_deref()),
            Some("expected 1")
        );
        assert_eq!(summary.reported_count, Some(2));
        assert!(summary.is_finished());
        assert!(!summary.was_successful());
        assert_eq!(collector.events().len(), 8);
    }

    #[test]
    fn run_collector_rejects_garbage_and_unknown_codes() {
        let collector = RunEventCollector::new();
        let mut parcel = Parcel::new();
        parcel.write_str("TEST_EXPLODED");
        assert!(matches!(
            collector.transact(TRANSACTION_SEND_EVENT, parcel.as_bytes()),
            Err(TransportError::Rejected(_))
        ));
        assert_eq!(
            collector.transact(99, &[]),
            Err(TransportError::UnknownTransaction(99))
        );
        assert!(collector.events().is_empty());
    }

    #[test]
    fn discovery_collector_gathers_tests_and_errors() {
        let collector = DiscoveryCollector::new("listing");
        for event in [
            TestDiscoveryEvent::TestDiscoveryStarted,
            TestDiscoveryEvent::TestFound { test_case: case("one") },
            TestDiscoveryEvent::TestDiscoveryError {
                error: ErrorInfo {
                    error_message: Some("class init failed".to_string()),
                    error_type: None,
                    stack_trace: String::new(),
                },
            },
            TestDiscoveryEvent::TestFound { test_case: case("two") },
            TestDiscoveryEvent::TestDiscoveryFinished,
        ] {
            collector
                .transact(TRANSACTION_SEND_EVENT, &event.to_parcel())
                .expect("accepted");
        }
        let info = collector.run_info();
        assert_eq!(info.test_run_name, "listing");
        assert_eq!(info.test_cases, vec![case("one"), case("two")]);
        assert_eq!(collector.errors(), vec!["class init failed".to_string()]);
        assert!(collector.is_finished());
    }

    #[test]
    fn legacy_service_decodes_bundles() {
        let service = LegacyOrchestratorService::new();
        let mut id = Parcel::new();
        id.write_str("org.example.A#one");
        service.transact(TRANSACTION_ADD_TEST, id.as_bytes()).expect("add");

        let test = Description::test("org.example.A", "one");
        let mut started = Bundle::new();
        started.put_string(KEY_TEST_EVENT, "TEST_STARTED");
        started.put_parcelable(KEY_DESCRIPTION, &test);
        service
            .transact(TRANSACTION_SEND_TEST_NOTIFICATION, &started.to_parcel())
            .expect("started");

        let mut unknown = Bundle::new();
        unknown.put_string(KEY_TEST_EVENT, "TEST_EXPLODED");
        assert!(matches!(
            service.transact(TRANSACTION_SEND_TEST_NOTIFICATION, &unknown.to_parcel()),
            Err(TransportError::Rejected(_))
        ));

        assert_eq!(service.added_tests(), vec!["org.example.A#one".to_string()]);
        assert_eq!(service.notifications(), vec![LegacyNotification::TestStarted(test)]);
        assert_eq!(service.summary().count(TestStatus::Running), 1);
    }

    #[test]
    fn legacy_failures_keep_their_message() {
        let service = LegacyOrchestratorService::new();
        let test = Description::test("org.example.A", "two");
        let notify = |kind: &str, key: &str, failure: Option<&Failure>| {
            let mut bundle = Bundle::new();
            bundle.put_string(KEY_TEST_EVENT, kind);
            match failure {
                Some(failure) => bundle.put_parcelable(key, failure),
                None => bundle.put_parcelable(key, &test),
            }
            service
                .transact(TRANSACTION_SEND_TEST_NOTIFICATION, &bundle.to_parcel())
                .expect("accepted");
        };
        let failure = Failure::new(test.clone(), "expected 1");
        notify("TEST_STARTED", KEY_DESCRIPTION, None);
        notify("TEST_FAILURE", KEY_FAILURE, Some(&failure));
        notify("TEST_FINISHED", KEY_DESCRIPTION, None);

        let summary = service.summary();
        let outcome = summary.outcome("org.example.A#two").expect("outcome");
        assert_eq!(outcome.status, TestStatus::Failed);
        assert_eq!(outcome.message.as_deref(), Some("expected 1"));
    }
}
