use std::sync::Arc;

use tracing::{debug, warn};

use crate::app::error::TestEventClientError;
use crate::app::events::{
    Bundle, Description, ErrorInfo, Failure, Parcelable, RunResult, TestDiscoveryEvent, TestRunEvent,
};

use super::connection::{TestDiscoveryEventSink, TestNotificationSink, TestRunEventSink};

/// v1 bundle keys.
pub const KEY_TEST_EVENT: &str = "TestEvent";
pub const KEY_DESCRIPTION: &str = "description";
pub const KEY_FAILURE: &str = "failure";
pub const KEY_RESULT: &str = "result";

/// Callbacks from the test runner, in the order tests execute.
pub trait RunListener: Send {
    fn test_run_started(&mut self, _description: &Description) {}
    fn test_run_finished(&mut self, _result: &RunResult) {}
    fn test_started(&mut self, _description: &Description) {}
    fn test_finished(&mut self, _description: &Description) {}
    fn test_failure(&mut self, _failure: &Failure) {}
    fn test_assumption_failure(&mut self, _failure: &Failure) {}
    fn test_ignored(&mut self, _description: &Description) {}
}

/// Forwards runner callbacks to a v2 orchestrator as [`TestRunEvent`]s.
///
/// Send failures are logged and counted; they never abort the run. A failure reported outside a
/// started test (for example from class setup) is wrapped in a synthetic start/finish pair so the
/// orchestrator sees a complete test.
pub struct TestRunEventListener {
    sink: Arc<dyn TestRunEventSink>,
    in_progress: Option<Description>,
    send_errors: usize,
}

impl TestRunEventListener {
    pub fn new(sink: Arc<dyn TestRunEventSink>) -> Self {
        Self {
            sink,
            in_progress: None,
            send_errors: 0,
        }
    }

    pub fn send_errors(&self) -> usize {
        self.send_errors
    }

    fn send(&mut self, event: TestRunEvent) {
        if let Err(err) = self.sink.send_run_event(&event) {
            self.send_errors += 1;
            warn!(event = event.kind(), error = %err, "unable to send test run event");
        }
    }

    fn is_running(&self, description: &Description) -> bool {
        self.in_progress.as_ref() == Some(description)
    }

    fn report_failure(&mut self, failure: &Failure, assumption: bool) {
        let description = &failure.description;
        let synthetic = !self.is_running(description);
        if synthetic {
            debug!(test = %description.display_name, "failure outside a started test");
            self.send(TestRunEvent::TestStarted {
                test_case: description.to_test_case(),
            });
        }
        let test_case = description.to_test_case();
        let failure_info = failure.to_failure_info();
        self.send(if assumption {
            TestRunEvent::TestAssumptionFailure {
                test_case,
                failure: failure_info,
            }
        } else {
            TestRunEvent::TestFailure {
                test_case,
                failure: failure_info,
            }
        });
        if synthetic {
            self.send(TestRunEvent::TestFinished {
                test_case: description.to_test_case(),
            });
        }
    }
}

impl RunListener for TestRunEventListener {
    fn test_run_started(&mut self, description: &Description) {
        self.send(TestRunEvent::TestRunStarted {
            test_case: description.to_test_case(),
        });
    }

    fn test_run_finished(&mut self, result: &RunResult) {
        self.send(TestRunEvent::TestRunFinished {
            count: result.run_count,
            ignore_count: result.ignore_count,
            run_time: result.run_time_ms,
            failures: result.failures.iter().map(Failure::to_failure_info).collect(),
        });
    }

    fn test_started(&mut self, description: &Description) {
        self.in_progress = Some(description.clone());
        self.send(TestRunEvent::TestStarted {
            test_case: description.to_test_case(),
        });
    }

    fn test_finished(&mut self, description: &Description) {
        if self.is_running(description) {
            self.in_progress = None;
        }
        self.send(TestRunEvent::TestFinished {
            test_case: description.to_test_case(),
        });
    }

    fn test_failure(&mut self, failure: &Failure) {
        self.report_failure(failure, false);
    }

    fn test_assumption_failure(&mut self, failure: &Failure) {
        self.report_failure(failure, true);
    }

    fn test_ignored(&mut self, description: &Description) {
        self.send(TestRunEvent::TestIgnored {
            test_case: description.to_test_case(),
        });
    }
}

/// Forwards runner callbacks to a v1 orchestrator as notification bundles.
pub struct OrchestratedInstrumentationListener {
    sink: Arc<dyn TestNotificationSink>,
    send_errors: usize,
}

impl OrchestratedInstrumentationListener {
    pub fn new(sink: Arc<dyn TestNotificationSink>) -> Self {
        Self { sink, send_errors: 0 }
    }

    pub fn send_errors(&self) -> usize {
        self.send_errors
    }

    fn notify(&mut self, event: &str, key: &str, payload: Vec<u8>) {
        let mut bundle = Bundle::new();
        bundle.put_string(KEY_TEST_EVENT, event);
        bundle.put_bytes(key, payload);
        if let Err(err) = self.sink.send_test_notification(&bundle) {
            self.send_errors += 1;
            warn!(event, error = %err, "unable to send test notification");
        }
    }
}

impl RunListener for OrchestratedInstrumentationListener {
    fn test_run_started(&mut self, description: &Description) {
        self.notify("TEST_RUN_STARTED", KEY_DESCRIPTION, description.to_parcel());
    }

    fn test_run_finished(&mut self, result: &RunResult) {
        self.notify("TEST_RUN_FINISHED", KEY_RESULT, result.to_parcel());
    }

    fn test_started(&mut self, description: &Description) {
        self.notify("TEST_STARTED", KEY_DESCRIPTION, description.to_parcel());
    }

    fn test_finished(&mut self, description: &Description) {
        self.notify("TEST_FINISHED", KEY_DESCRIPTION, description.to_parcel());
    }

    fn test_failure(&mut self, failure: &Failure) {
        self.notify("TEST_FAILURE", KEY_FAILURE, failure.to_parcel());
    }

    fn test_assumption_failure(&mut self, failure: &Failure) {
        self.notify("TEST_ASSUMPTION_FAILURE", KEY_FAILURE, failure.to_parcel());
    }

    fn test_ignored(&mut self, description: &Description) {
        self.notify("TEST_IGNORED", KEY_DESCRIPTION, description.to_parcel());
    }
}

/// Reports the tests of a runner description tree to the orchestrator without running them.
pub struct TestDiscovery {
    sink: Arc<dyn TestDiscoveryEventSink>,
}

impl TestDiscovery {
    pub fn new(sink: Arc<dyn TestDiscoveryEventSink>) -> Self {
        Self { sink }
    }

    /// Sends started, one event per test, then finished. Returns the number of tests sent.
    pub fn run(&self, root: &Description) -> Result<usize, TestEventClientError> {
        self.sink
            .send_discovery_event(&TestDiscoveryEvent::TestDiscoveryStarted)?;
        let sent = self.add_tests(root)?;
        self.sink
            .send_discovery_event(&TestDiscoveryEvent::TestDiscoveryFinished)?;
        Ok(sent)
    }

    /// Walks `description` depth-first and sends a `TEST_FOUND` for every leaf test. Suites,
    /// including empty ones, produce no event of their own.
    pub fn add_tests(&self, description: &Description) -> Result<usize, TestEventClientError> {
        if description.is_test() {
            self.sink.send_discovery_event(&TestDiscoveryEvent::TestFound {
                test_case: description.to_test_case(),
            })?;
            return Ok(1);
        }
        let mut sent = 0;
        for child in &description.children {
            sent += self.add_tests(child)?;
        }
        Ok(sent)
    }

    pub fn report_error(&self, message: &str, trace: &str) -> Result<(), TestEventClientError> {
        self.sink.send_discovery_event(&TestDiscoveryEvent::TestDiscoveryError {
            error: ErrorInfo {
                error_message: Some(message.to_string()),
                error_type: None,
                stack_trace: trace.to_string(),
            },
        })
    }
}
