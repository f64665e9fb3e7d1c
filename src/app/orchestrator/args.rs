use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use tracing::warn;

use crate::app::error::OrchestratorArgsError;

pub const ORCHESTRATOR_SERVICE_ARG: &str = "orchestratorService";
pub const TEST_DISCOVERY_SERVICE_ARG: &str = "testDiscoveryService";
pub const TEST_NOTIFICATION_SERVICE_ARG: &str = "testNotificationService";
pub const LIST_TESTS_FOR_ORCHESTRATOR_ARG: &str = "listTestsForOrchestrator";
pub const TIMEOUT_MSEC_ARG: &str = "timeout_msec";
pub const CLASS_ARG: &str = "class";
pub const TARGET_INSTRUMENTATION_ARG: &str = "targetInstrumentation";
pub const CLEAR_PACKAGE_DATA_ARG: &str = "clearPackageData";

/// v1 combined orchestrator service.
pub const ORCHESTRATOR_SERVICE_NAME: &str = "androidx.test.orchestrator/.OrchestratorService";
/// v2 split services.
pub const TEST_DISCOVERY_SERVICE_NAME: &str = "androidx.test.orchestrator/.TestDiscoveryEventService";
pub const TEST_NOTIFICATION_SERVICE_NAME: &str = "androidx.test.orchestrator/.TestRunEventService";

/// Named runner arguments (`-e key value`) relevant to orchestration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunnerArgs {
    pub orchestrator_service: Option<String>,
    pub test_discovery_service: Option<String>,
    pub test_notification_service: Option<String>,
    pub list_tests_for_orchestrator: bool,
    pub timeout_msec: Option<u64>,
    pub class: Option<String>,
    pub target_instrumentation: Option<String>,
    pub clear_package_data: bool,
    /// Arguments this crate does not interpret, passed through to test runs.
    pub extra: BTreeMap<String, String>,
}

impl RunnerArgs {
    pub fn parse<I, K, V>(pairs: I) -> Result<Self, OrchestratorArgsError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut args = RunnerArgs::default();
        for (key, value) in pairs {
            let value = value.as_ref().trim();
            match key.as_ref() {
                ORCHESTRATOR_SERVICE_ARG => {
                    args.orchestrator_service = Some(required(ORCHESTRATOR_SERVICE_ARG, value)?)
                }
                TEST_DISCOVERY_SERVICE_ARG => {
                    args.test_discovery_service = Some(required(TEST_DISCOVERY_SERVICE_ARG, value)?)
                }
                TEST_NOTIFICATION_SERVICE_ARG => {
                    args.test_notification_service =
                        Some(required(TEST_NOTIFICATION_SERVICE_ARG, value)?)
                }
                LIST_TESTS_FOR_ORCHESTRATOR_ARG => {
                    args.list_tests_for_orchestrator = parse_bool(LIST_TESTS_FOR_ORCHESTRATOR_ARG, value)?
                }
                TIMEOUT_MSEC_ARG => {
                    let parsed = value.parse::<u64>().map_err(|_| OrchestratorArgsError::InvalidValue {
                        key: TIMEOUT_MSEC_ARG,
                        value: value.to_string(),
                    })?;
                    args.timeout_msec = Some(parsed);
                }
                CLASS_ARG => args.class = Some(required(CLASS_ARG, value)?),
                TARGET_INSTRUMENTATION_ARG => {
                    args.target_instrumentation = Some(required(TARGET_INSTRUMENTATION_ARG, value)?)
                }
                CLEAR_PACKAGE_DATA_ARG => {
                    args.clear_package_data = parse_bool(CLEAR_PACKAGE_DATA_ARG, value)?
                }
                other => {
                    args.extra.insert(other.to_string(), value.to_string());
                }
            }
        }
        Ok(args)
    }

    /// Parses `-e key value` triples as passed to `am instrument`. Other tokens are ignored.
    pub fn from_command_line(tokens: &[String]) -> Result<Self, OrchestratorArgsError> {
        let mut pairs = Vec::new();
        let mut index = 0;
        while index < tokens.len() {
            if tokens[index] == "-e" {
                let key = tokens
                    .get(index + 1)
                    .ok_or(OrchestratorArgsError::MissingValue("-e"))?;
                let value = tokens
                    .get(index + 2)
                    .ok_or_else(|| OrchestratorArgsError::Conflict(format!("-e {key} has no value")))?;
                pairs.push((key.as_str(), value.as_str()));
                index += 3;
            } else {
                index += 1;
            }
        }
        Self::parse(pairs)
    }
}

fn required(key: &'static str, value: &str) -> Result<String, OrchestratorArgsError> {
    if value.is_empty() {
        return Err(OrchestratorArgsError::MissingValue(key));
    }
    Ok(value.to_string())
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, OrchestratorArgsError> {
    match value.to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(OrchestratorArgsError::InvalidValue {
            key,
            value: value.to_string(),
        }),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProtocolVersion {
    V1,
    V2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EventMode {
    /// List the tests of the instrumentation without running them.
    Discovery,
    /// Report run events of tests being executed.
    RunEvents,
}

/// Resolved connection request: which protocol, which service, which stream of events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrchestratorArgs {
    pub version: ProtocolVersion,
    pub service: String,
    pub mode: EventMode,
}

impl OrchestratorArgs {
    /// Picks the protocol from the runner arguments, preferring v2 when a v2 service is named.
    ///
    /// Returns `Ok(None)` when no orchestrator is involved. Contradictory combinations are
    /// errors rather than a silent downgrade.
    pub fn resolve(args: &RunnerArgs) -> Result<Option<Self>, OrchestratorArgsError> {
        match (&args.test_discovery_service, &args.test_notification_service) {
            (Some(_), Some(_)) => Err(OrchestratorArgsError::Conflict(format!(
                "{TEST_DISCOVERY_SERVICE_ARG} and {TEST_NOTIFICATION_SERVICE_ARG} cannot be used together"
            ))),
            (Some(discovery), None) => {
                warn_if_v1_ignored(args);
                Ok(Some(Self {
                    version: ProtocolVersion::V2,
                    service: discovery.clone(),
                    mode: EventMode::Discovery,
                }))
            }
            (None, Some(notification)) => {
                if args.list_tests_for_orchestrator {
                    return Err(OrchestratorArgsError::Conflict(format!(
                        "{LIST_TESTS_FOR_ORCHESTRATOR_ARG} requires {TEST_DISCOVERY_SERVICE_ARG}, \
                         not {TEST_NOTIFICATION_SERVICE_ARG}"
                    )));
                }
                warn_if_v1_ignored(args);
                Ok(Some(Self {
                    version: ProtocolVersion::V2,
                    service: notification.clone(),
                    mode: EventMode::RunEvents,
                }))
            }
            (None, None) => match &args.orchestrator_service {
                Some(service) => Ok(Some(Self {
                    version: ProtocolVersion::V1,
                    service: service.clone(),
                    mode: if args.list_tests_for_orchestrator {
                        EventMode::Discovery
                    } else {
                        EventMode::RunEvents
                    },
                })),
                None if args.list_tests_for_orchestrator => Err(OrchestratorArgsError::Conflict(format!(
                    "{LIST_TESTS_FOR_ORCHESTRATOR_ARG} requires an orchestrator service"
                ))),
                None => Ok(None),
            },
        }
    }

    pub fn is_discovery(&self) -> bool {
        self.mode == EventMode::Discovery
    }
}

fn warn_if_v1_ignored(args: &RunnerArgs) {
    if let Some(service) = &args.orchestrator_service {
        warn!(service = %service, "v2 orchestrator service requested; ignoring {ORCHESTRATOR_SERVICE_ARG}");
    }
}

static SINGLE_METHOD: OnceLock<Option<Regex>> = OnceLock::new();

fn single_method_pattern() -> Option<&'static Regex> {
    SINGLE_METHOD
        .get_or_init(|| Regex::new(r"^[\w$]+(?:\.[\w$]+)*#[\w$]+$").ok())
        .as_ref()
}

/// Whether a `class` argument names exactly one test method (`pkg.Class#method`).
pub fn is_single_method_test(class_arg: Option<&str>) -> bool {
    match (class_arg, single_method_pattern()) {
        (Some(value), Some(pattern)) => pattern.is_match(value.trim()),
        _ => false,
    }
}
