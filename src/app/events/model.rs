use serde::{Deserialize, Serialize};

use crate::app::error::ParcelError;

use super::parcel::{Parcel, ParcelReader, Parcelable};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationValue {
    pub field_name: String,
    pub field_values: Vec<String>,
    pub value_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationInfo {
    pub name: String,
    pub values: Vec<AnnotationValue>,
}

impl AnnotationInfo {
    pub fn marker(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: Vec::new(),
        }
    }
}

/// One test method. `class_name` + `method_name` identify it within a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCaseInfo {
    pub class_name: String,
    pub method_name: String,
    pub method_annotations: Vec<AnnotationInfo>,
    pub class_annotations: Vec<AnnotationInfo>,
}

impl TestCaseInfo {
    pub fn new(class_name: impl Into<String>, method_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            method_name: method_name.into(),
            method_annotations: Vec::new(),
            class_annotations: Vec::new(),
        }
    }

    pub fn with_method_annotation(mut self, annotation: AnnotationInfo) -> Self {
        self.method_annotations.push(annotation);
        self
    }

    pub fn with_class_annotation(mut self, annotation: AnnotationInfo) -> Self {
        self.class_annotations.push(annotation);
        self
    }

    /// `class#method`, or just the class for suite-level descriptors.
    pub fn test_id(&self) -> String {
        if self.method_name.is_empty() {
            self.class_name.clone()
        } else {
            format!("{}#{}", self.class_name, self.method_name)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureInfo {
    pub failure_message: Option<String>,
    pub failure_type: Option<String>,
    pub stack_trace: String,
    pub test_case: TestCaseInfo,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub error_message: Option<String>,
    pub error_type: Option<String>,
    pub stack_trace: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestRunInfo {
    pub test_run_name: String,
    pub test_cases: Vec<TestCaseInfo>,
}

impl Parcelable for AnnotationValue {
    fn write_to(&self, parcel: &mut Parcel) {
        parcel.write_str(&self.field_name);
        parcel.write_str_list(&self.field_values);
        parcel.write_str(&self.value_type);
    }

    fn read_from(reader: &mut ParcelReader<'_>) -> Result<Self, ParcelError> {
        Ok(Self {
            field_name: reader.read_string("annotation field name")?,
            field_values: reader.read_str_list("annotation field values")?,
            value_type: reader.read_string("annotation value type")?,
        })
    }
}

impl Parcelable for AnnotationInfo {
    fn write_to(&self, parcel: &mut Parcel) {
        parcel.write_str(&self.name);
        parcel.write_list(&self.values);
    }

    fn read_from(reader: &mut ParcelReader<'_>) -> Result<Self, ParcelError> {
        Ok(Self {
            name: reader.read_string("annotation name")?,
            values: reader.read_list("annotation values")?,
        })
    }
}

impl Parcelable for TestCaseInfo {
    fn write_to(&self, parcel: &mut Parcel) {
        parcel.write_str(&self.class_name);
        parcel.write_str(&self.method_name);
        parcel.write_list(&self.method_annotations);
        parcel.write_list(&self.class_annotations);
    }

    fn read_from(reader: &mut ParcelReader<'_>) -> Result<Self, ParcelError> {
        Ok(Self {
            class_name: reader.read_string("class name")?,
            method_name: reader.read_string("method name")?,
            method_annotations: reader.read_list("method annotations")?,
            class_annotations: reader.read_list("class annotations")?,
        })
    }
}

impl Parcelable for FailureInfo {
    fn write_to(&self, parcel: &mut Parcel) {
        parcel.write_nullable_str(self.failure_message.as_deref());
        parcel.write_nullable_str(self.failure_type.as_deref());
        parcel.write_str(&self.stack_trace);
        parcel.write_parcelable(&self.test_case);
    }

    fn read_from(reader: &mut ParcelReader<'_>) -> Result<Self, ParcelError> {
        Ok(Self {
            failure_message: reader.read_nullable_string("failure message")?,
            failure_type: reader.read_nullable_string("failure type")?,
            stack_trace: reader.read_string("stack trace")?,
            test_case: reader.read_parcelable()?,
        })
    }
}

impl Parcelable for ErrorInfo {
    fn write_to(&self, parcel: &mut Parcel) {
        parcel.write_nullable_str(self.error_message.as_deref());
        parcel.write_nullable_str(self.error_type.as_deref());
        parcel.write_str(&self.stack_trace);
    }

    fn read_from(reader: &mut ParcelReader<'_>) -> Result<Self, ParcelError> {
        Ok(Self {
            error_message: reader.read_nullable_string("error message")?,
            error_type: reader.read_nullable_string("error type")?,
            stack_trace: reader.read_string("stack trace")?,
        })
    }
}

impl Parcelable for TestRunInfo {
    fn write_to(&self, parcel: &mut Parcel) {
        parcel.write_str(&self.test_run_name);
        parcel.write_list(&self.test_cases);
    }

    fn read_from(reader: &mut ParcelReader<'_>) -> Result<Self, ParcelError> {
        Ok(Self {
            test_run_name: reader.read_string("test run name")?,
            test_cases: reader.read_list("test cases")?,
        })
    }
}

/// Lifecycle events of a test run, as sent to the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TestRunEvent {
    TestRunStarted {
        test_case: TestCaseInfo,
    },
    TestStarted {
        test_case: TestCaseInfo,
    },
    TestFinished {
        test_case: TestCaseInfo,
    },
    TestFailure {
        test_case: TestCaseInfo,
        failure: FailureInfo,
    },
    TestAssumptionFailure {
        test_case: TestCaseInfo,
        failure: FailureInfo,
    },
    TestIgnored {
        test_case: TestCaseInfo,
    },
    TestRunFinished {
        count: i32,
        ignore_count: i32,
        run_time: i64,
        failures: Vec<FailureInfo>,
    },
}

impl TestRunEvent {
    pub const KINDS: [&'static str; 7] = [
        "TEST_RUN_STARTED",
        "TEST_STARTED",
        "TEST_FINISHED",
        "TEST_FAILURE",
        "TEST_ASSUMPTION_FAILURE",
        "TEST_IGNORED",
        "TEST_RUN_FINISHED",
    ];

    pub fn kind(&self) -> &'static str {
        match self {
            TestRunEvent::TestRunStarted { .. } => "TEST_RUN_STARTED",
            TestRunEvent::TestStarted { .. } => "TEST_STARTED",
            TestRunEvent::TestFinished { .. } => "TEST_FINISHED",
            TestRunEvent::TestFailure { .. } => "TEST_FAILURE",
            TestRunEvent::TestAssumptionFailure { .. } => "TEST_ASSUMPTION_FAILURE",
            TestRunEvent::TestIgnored { .. } => "TEST_IGNORED",
            TestRunEvent::TestRunFinished { .. } => "TEST_RUN_FINISHED",
        }
    }

    pub fn test_case(&self) -> Option<&TestCaseInfo> {
        match self {
            TestRunEvent::TestRunStarted { test_case }
            | TestRunEvent::TestStarted { test_case }
            | TestRunEvent::TestFinished { test_case }
            | TestRunEvent::TestFailure { test_case, .. }
            | TestRunEvent::TestAssumptionFailure { test_case, .. }
            | TestRunEvent::TestIgnored { test_case } => Some(test_case),
            TestRunEvent::TestRunFinished { .. } => None,
        }
    }

    pub fn failure_count(&self) -> usize {
        match self {
            TestRunEvent::TestRunFinished { failures, .. } => failures.len(),
            TestRunEvent::TestFailure { .. } | TestRunEvent::TestAssumptionFailure { .. } => 1,
            _ => 0,
        }
    }
}

impl Parcelable for TestRunEvent {
    fn write_to(&self, parcel: &mut Parcel) {
        parcel.write_str(self.kind());
        match self {
            TestRunEvent::TestRunStarted { test_case }
            | TestRunEvent::TestStarted { test_case }
            | TestRunEvent::TestFinished { test_case }
            | TestRunEvent::TestIgnored { test_case } => parcel.write_parcelable(test_case),
            TestRunEvent::TestFailure { test_case, failure }
            | TestRunEvent::TestAssumptionFailure { test_case, failure } => {
                parcel.write_parcelable(test_case);
                parcel.write_parcelable(failure);
            }
            TestRunEvent::TestRunFinished {
                count,
                ignore_count,
                run_time,
                failures,
            } => {
                parcel.write_i32(*count);
                parcel.write_i32(*ignore_count);
                parcel.write_i64(*run_time);
                parcel.write_list(failures);
            }
        }
    }

    fn read_from(reader: &mut ParcelReader<'_>) -> Result<Self, ParcelError> {
        let kind = reader.read_string("test run event type")?;
        let event = match kind.as_str() {
            "TEST_RUN_STARTED" => TestRunEvent::TestRunStarted {
                test_case: reader.read_parcelable()?,
            },
            "TEST_STARTED" => TestRunEvent::TestStarted {
                test_case: reader.read_parcelable()?,
            },
            "TEST_FINISHED" => TestRunEvent::TestFinished {
                test_case: reader.read_parcelable()?,
            },
            "TEST_FAILURE" => TestRunEvent::TestFailure {
                test_case: reader.read_parcelable()?,
                failure: reader.read_parcelable()?,
            },
            "TEST_ASSUMPTION_FAILURE" => TestRunEvent::TestAssumptionFailure {
                test_case: reader.read_parcelable()?,
                failure: reader.read_parcelable()?,
            },
            "TEST_IGNORED" => TestRunEvent::TestIgnored {
                test_case: reader.read_parcelable()?,
            },
            "TEST_RUN_FINISHED" => TestRunEvent::TestRunFinished {
                count: reader.read_i32("count")?,
                ignore_count: reader.read_i32("ignore count")?,
                run_time: reader.read_i64("run time")?,
                failures: reader.read_list("failures")?,
            },
            _ => {
                return Err(ParcelError::UnknownDiscriminator {
                    kind: "TestRunEvent",
                    value: kind,
                })
            }
        };
        Ok(event)
    }
}

/// Events emitted while listing the tests of an instrumentation without running them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TestDiscoveryEvent {
    TestDiscoveryStarted,
    TestFound { test_case: TestCaseInfo },
    TestDiscoveryFinished,
    TestDiscoveryError { error: ErrorInfo },
}

impl TestDiscoveryEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            TestDiscoveryEvent::TestDiscoveryStarted => "TEST_DISCOVERY_STARTED",
            TestDiscoveryEvent::TestFound { .. } => "TEST_FOUND",
            TestDiscoveryEvent::TestDiscoveryFinished => "TEST_DISCOVERY_FINISHED",
            TestDiscoveryEvent::TestDiscoveryError { .. } => "TEST_DISCOVERY_ERROR",
        }
    }
}

impl Parcelable for TestDiscoveryEvent {
    fn write_to(&self, parcel: &mut Parcel) {
        parcel.write_str(self.kind());
        match self {
            TestDiscoveryEvent::TestFound { test_case } => parcel.write_parcelable(test_case),
            TestDiscoveryEvent::TestDiscoveryError { error } => parcel.write_parcelable(error),
            TestDiscoveryEvent::TestDiscoveryStarted | TestDiscoveryEvent::TestDiscoveryFinished => {}
        }
    }

    fn read_from(reader: &mut ParcelReader<'_>) -> Result<Self, ParcelError> {
        let kind = reader.read_string("test discovery event type")?;
        let event = match kind.as_str() {
            "TEST_DISCOVERY_STARTED" => TestDiscoveryEvent::TestDiscoveryStarted,
            "TEST_FOUND" => TestDiscoveryEvent::TestFound {
                test_case: reader.read_parcelable()?,
            },
            "TEST_DISCOVERY_FINISHED" => TestDiscoveryEvent::TestDiscoveryFinished,
            "TEST_DISCOVERY_ERROR" => TestDiscoveryEvent::TestDiscoveryError {
                error: reader.read_parcelable()?,
            },
            _ => {
                return Err(ParcelError::UnknownDiscriminator {
                    kind: "TestDiscoveryEvent",
                    value: kind,
                })
            }
        };
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn annotated_case() -> TestCaseInfo {
        TestCaseInfo::new("org.example.ScenarioTest", "recreateCreatedActivity")
            .with_method_annotation(AnnotationInfo {
                name: "org.junit.Test".to_string(),
                values: vec![AnnotationValue {
                    field_name: "timeout".to_string(),
                    field_values: vec!["5000".to_string()],
                    value_type: "long".to_string(),
                }],
            })
            .with_class_annotation(AnnotationInfo::marker("org.example.LargeTest"))
    }

    fn failure(message: Option<&str>) -> FailureInfo {
        FailureInfo {
            failure_message: message.map(str::to_string),
            failure_type: Some("java.lang.AssertionError".to_string()),
            stack_trace: "java.lang.AssertionError: expected 1\n\tat ScenarioTest.java:42".to_string(),
            test_case: annotated_case(),
        }
    }

    #[test]
    fn every_run_event_variant_decodes_to_an_equal_value() {
        let case = annotated_case();
        let events = vec![
            TestRunEvent::TestRunStarted {
                test_case: TestCaseInfo::new("org.example.Suite", ""),
            },
            TestRunEvent::TestStarted {
                test_case: case.clone(),
            },
            TestRunEvent::TestFinished {
                test_case: case.clone(),
            },
            TestRunEvent::TestFailure {
                test_case: case.clone(),
                failure: failure(Some("expected 1")),
            },
            TestRunEvent::TestAssumptionFailure {
                test_case: case.clone(),
                failure: failure(None),
            },
            TestRunEvent::TestIgnored { test_case: case },
            TestRunEvent::TestRunFinished {
                count: 4,
                ignore_count: 1,
                run_time: 987_654_321_000,
                failures: vec![failure(Some("expected 1")), failure(None)],
            },
        ];
        let mut kinds = Vec::new();
        for event in events {
            kinds.push(event.kind());
            let decoded = TestRunEvent::from_parcel(&event.to_parcel()).expect("decode");
            assert_eq!(decoded, event);
        }
        assert_eq!(kinds, TestRunEvent::KINDS);
    }

    #[test]
    fn run_finished_exposes_failure_count_and_trace() {
        let event = TestRunEvent::TestRunFinished {
            count: 1,
            ignore_count: 2,
            run_time: 3,
            failures: vec![failure(Some("boom"))],
        };
        let decoded = TestRunEvent::from_parcel(&event.to_parcel()).expect("decode");
        assert_eq!(decoded.failure_count(), 1);
        match decoded {
            TestRunEvent::TestRunFinished {
                count,
                ignore_count,
                run_time,
                failures,
            } => {
                assert_eq!((count, ignore_count, run_time), (1, 2, 3));
                assert_eq!(failures[0].stack_trace, failure(None).stack_trace);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn unknown_discriminator_is_fatal() {
        let mut parcel = Parcel::new();
        parcel.write_str("TEST_EXPLODED");
        let err = TestRunEvent::from_parcel(parcel.as_bytes()).expect_err("unknown kind");
        assert_eq!(
            err,
            ParcelError::UnknownDiscriminator {
                kind: "TestRunEvent",
                value: "TEST_EXPLODED".to_string()
            }
        );
    }

    #[test]
    fn discovery_events_decode_to_equal_values() {
        let events = [
            TestDiscoveryEvent::TestDiscoveryStarted,
            TestDiscoveryEvent::TestFound {
                test_case: annotated_case(),
            },
            TestDiscoveryEvent::TestDiscoveryError {
                error: ErrorInfo {
                    error_message: Some("no runnable methods".to_string()),
                    error_type: None,
                    stack_trace: String::new(),
                },
            },
            TestDiscoveryEvent::TestDiscoveryFinished,
        ];
        for event in events {
            assert_eq!(
                TestDiscoveryEvent::from_parcel(&event.to_parcel()).expect("decode"),
                event
            );
        }
    }

    #[test]
    fn run_info_keeps_test_case_order() {
        let info = TestRunInfo {
            test_run_name: "org.example.Suite".to_string(),
            test_cases: vec![
                TestCaseInfo::new("org.example.A", "one"),
                TestCaseInfo::new("org.example.A", "two"),
            ],
        };
        assert_eq!(TestRunInfo::from_parcel(&info.to_parcel()).expect("decode"), info);
        assert_eq!(info.test_cases[1].test_id(), "org.example.A#two");
    }
}
