use std::collections::BTreeMap;
use std::time::Duration;

use regex::Regex;
use serde::Serialize;
use tracing::{info, warn};

use crate::app::error::{AppError, OrchestratorArgsError};
use crate::app::events::TestCaseInfo;
use crate::app::services::shell::{CommandOutput, ShellCommand, ShellExecutor};

use super::args::{is_single_method_test, RunnerArgs, CLASS_ARG, TARGET_INSTRUMENTATION_ARG, TIMEOUT_MSEC_ARG};
use super::collector::{TestOutcome, TestStatus};

/// One isolated instrumentation invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanStep {
    pub test_id: String,
    pub clear_command: Option<ShellCommand>,
    pub command: ShellCommand,
}

/// Per-test `am instrument` invocations, each test in a fresh process.
#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentationPlan {
    pub instrumentation: String,
    pub steps: Vec<PlanStep>,
}

impl InstrumentationPlan {
    /// Plans one invocation per selected test.
    ///
    /// A single-method `class` argument selects exactly that test without consulting `discovered`;
    /// any other `class` value is a comma separated filter of classes or `class#method` ids.
    pub fn isolated(
        instrumentation: &str,
        discovered: &[TestCaseInfo],
        args: &RunnerArgs,
    ) -> Result<Self, OrchestratorArgsError> {
        let instrumentation = args
            .target_instrumentation
            .as_deref()
            .unwrap_or(instrumentation)
            .trim()
            .to_string();
        if instrumentation.is_empty() {
            return Err(OrchestratorArgsError::MissingValue(TARGET_INSTRUMENTATION_ARG));
        }
        let package = instrumentation
            .split('/')
            .next()
            .filter(|package| !package.is_empty())
            .ok_or_else(|| OrchestratorArgsError::InvalidValue {
                key: TARGET_INSTRUMENTATION_ARG,
                value: instrumentation.clone(),
            })?
            .to_string();

        let test_ids: Vec<String> = match args.class.as_deref() {
            Some(class) if is_single_method_test(Some(class)) => vec![class.trim().to_string()],
            Some(filter) => {
                let selectors: Vec<&str> = filter.split(',').map(str::trim).filter(|s| !s.is_empty()).collect();
                discovered
                    .iter()
                    .filter(|test| {
                        let id = test.test_id();
                        selectors
                            .iter()
                            .any(|selector| *selector == test.class_name || *selector == id)
                    })
                    .map(TestCaseInfo::test_id)
                    .collect()
            }
            None => discovered.iter().map(TestCaseInfo::test_id).collect(),
        };

        let steps = test_ids
            .into_iter()
            .map(|test_id| PlanStep {
                clear_command: args
                    .clear_package_data
                    .then(|| ShellCommand::new("pm").args(["clear", package.as_str()])),
                command: instrument_command(&instrumentation, &test_id, args),
                test_id,
            })
            .collect::<Vec<_>>();
        info!(instrumentation = %instrumentation, steps = steps.len(), "planned isolated test runs");
        Ok(Self { instrumentation, steps })
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

fn instrument_command(instrumentation: &str, test_id: &str, args: &RunnerArgs) -> ShellCommand {
    let mut command = ShellCommand::new("am").args(["instrument", "-w", "-r", "-e", CLASS_ARG, test_id]);
    if let Some(timeout) = args.timeout_msec {
        command = command.args(["-e".to_string(), TIMEOUT_MSEC_ARG.to_string(), timeout.to_string()]);
        // Leave the executor headroom past the per-test timeout.
        command = command.timeout(Duration::from_millis(timeout.saturating_mul(2)));
    }
    for (key, value) in &args.extra {
        command = command.args(["-e", key.as_str(), value.as_str()]);
    }
    command.arg(instrumentation)
}

/// One `INSTRUMENTATION_STATUS` block closed by its status code.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusBlock {
    pub values: BTreeMap<String, String>,
    pub code: i32,
}

impl StatusBlock {
    pub fn test_id(&self) -> Option<String> {
        let class = self.values.get("class")?;
        Some(match self.values.get("test") {
            Some(method) => format!("{class}#{method}"),
            None => class.clone(),
        })
    }
}

/// Parsed `am instrument -r` output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InstrumentationReport {
    pub statuses: Vec<StatusBlock>,
    pub result: BTreeMap<String, String>,
    pub code: Option<i32>,
}

impl InstrumentationReport {
    /// Final outcome per test, in start order. Tests without a closing status stay `Running`.
    pub fn outcomes(&self) -> Vec<TestOutcome> {
        let mut outcomes: Vec<TestOutcome> = Vec::new();
        for block in &self.statuses {
            let Some(test_id) = block.test_id() else {
                continue;
            };
            let status = match block.code {
                STATUS_START => TestStatus::Running,
                STATUS_OK => TestStatus::Passed,
                STATUS_IGNORED => TestStatus::Ignored,
                STATUS_ASSUMPTION_FAILURE => TestStatus::AssumptionFailed,
                _ => TestStatus::Failed,
            };
            let message = block.values.get("stack").cloned();
            let running = outcomes
                .iter()
                .rposition(|outcome| outcome.test_id == test_id && outcome.status == TestStatus::Running);
            match running {
                Some(index) => {
                    outcomes[index].status = status;
                    outcomes[index].message = message;
                }
                None => outcomes.push(TestOutcome {
                    test_id,
                    status,
                    message,
                }),
            }
        }
        outcomes
    }

    /// The process died before reporting a result code.
    pub fn crashed(&self) -> bool {
        self.code.is_none() || self.result.contains_key("shortMsg")
    }
}

pub const STATUS_START: i32 = 1;
pub const STATUS_OK: i32 = 0;
pub const STATUS_FAILURE: i32 = -2;
pub const STATUS_IGNORED: i32 = -3;
pub const STATUS_ASSUMPTION_FAILURE: i32 = -4;

pub struct InstrumentationOutputParser {
    re_status: Regex,
    re_status_code: Regex,
    re_result: Regex,
    re_code: Regex,
}

impl InstrumentationOutputParser {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            re_status: Regex::new(r"^INSTRUMENTATION_STATUS: ([^=]+)=(.*)$")?,
            re_status_code: Regex::new(r"^INSTRUMENTATION_STATUS_CODE: (-?\d+)")?,
            re_result: Regex::new(r"^INSTRUMENTATION_RESULT: ([^=]+)=(.*)$")?,
            re_code: Regex::new(r"^INSTRUMENTATION_CODE: (-?\d+)")?,
        })
    }

    pub fn parse(&self, output: &str) -> InstrumentationReport {
        let mut report = InstrumentationReport::default();
        let mut pending = BTreeMap::new();
        // Values such as `stack` span several lines; continuation lines append to the last key.
        let mut last_key: Option<String> = None;
        let mut in_result = false;

        for line in output.lines() {
            let line = line.trim_end_matches('\r');
            if let Some(caps) = self.re_status.captures(line) {
                let key = caps[1].to_string();
                pending.insert(key.clone(), caps[2].to_string());
                last_key = Some(key);
                in_result = false;
            } else if let Some(caps) = self.re_status_code.captures(line) {
                let code = caps[1].parse().unwrap_or(STATUS_FAILURE);
                report.statuses.push(StatusBlock {
                    values: std::mem::take(&mut pending),
                    code,
                });
                last_key = None;
            } else if let Some(caps) = self.re_result.captures(line) {
                let key = caps[1].to_string();
                report.result.insert(key.clone(), caps[2].to_string());
                last_key = Some(key);
                in_result = true;
            } else if let Some(caps) = self.re_code.captures(line) {
                report.code = caps[1].parse().ok();
                last_key = None;
            } else if let Some(key) = &last_key {
                let target = if in_result { &mut report.result } else { &mut pending };
                if let Some(value) = target.get_mut(key) {
                    value.push('\n');
                    value.push_str(line);
                }
            }
        }
        if !pending.is_empty() {
            warn!(keys = pending.len(), "instrumentation output ended inside a status block");
        }
        report
    }
}

/// Runs every step of `plan` in order and parses each invocation's output.
pub fn run_plan(
    executor: &ShellExecutor,
    parser: &InstrumentationOutputParser,
    plan: &InstrumentationPlan,
    trace_id: &str,
) -> Result<Vec<(String, InstrumentationReport)>, AppError> {
    let mut reports = Vec::with_capacity(plan.steps.len());
    for step in &plan.steps {
        if let Some(clear) = &step.clear_command {
            let output = executor.execute_sync(clear, trace_id)?;
            if !output.success() {
                warn!(test = %step.test_id, stderr = %output.stderr, trace_id = %trace_id, "clearing package data failed");
            }
        }
        let output: CommandOutput = executor.execute_sync(&step.command, trace_id)?;
        let report = parser.parse(&output.stdout);
        if report.crashed() {
            warn!(test = %step.test_id, trace_id = %trace_id, "instrumentation did not finish cleanly");
        }
        reports.push((step.test_id.clone(), report));
    }
    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::config::ShellSettings;

    const RUNNER: &str = "org.example.test/androidx.test.runner.AndroidJUnitRunner";

    fn discovered() -> Vec<TestCaseInfo> {
        vec![
            TestCaseInfo::new("org.example.A", "one"),
            TestCaseInfo::new("org.example.A", "two"),
            TestCaseInfo::new("org.example.B", "three"),
        ]
    }

    #[test]
    fn plans_one_step_per_discovered_test() {
        let args = RunnerArgs::parse([("timeout_msec", "1000"), ("clearPackageData", "true"), ("debug", "false")])
            .expect("args");
        let plan = InstrumentationPlan::isolated(RUNNER, &discovered(), &args).expect("plan");
        assert_eq!(plan.len(), 3);
        let step = &plan.steps[0];
        assert_eq!(step.test_id, "org.example.A#one");
        assert_eq!(
            step.command.args,
            vec![
                "instrument", "-w", "-r", "-e", "class", "org.example.A#one", "-e", "timeout_msec", "1000", "-e",
                "debug", "false", RUNNER
            ]
        );
        assert_eq!(step.command.timeout, Some(Duration::from_millis(2000)));
        assert_eq!(
            step.clear_command.as_ref().map(|c| c.args.clone()),
            Some(vec!["clear".to_string(), "org.example.test".to_string()])
        );
    }

    #[test]
    fn single_method_class_skips_discovery() {
        let args = RunnerArgs::parse([("class", "org.example.C#only")]).expect("args");
        let plan = InstrumentationPlan::isolated(RUNNER, &discovered(), &args).expect("plan");
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].test_id, "org.example.C#only");
        assert!(plan.steps[0].clear_command.is_none());
    }

    #[test]
    fn malformed_method_selector_does_not_bypass_discovery() {
        let args = RunnerArgs::parse([("class", "org.example.A#")]).expect("args");
        let plan = InstrumentationPlan::isolated(RUNNER, &discovered(), &args).expect("plan");
        assert!(plan.steps.is_empty());
    }

    #[test]
    fn class_filter_selects_classes_and_methods() {
        let args = RunnerArgs::parse([("class", "org.example.B,org.example.A#two")]).expect("args");
        let plan = InstrumentationPlan::isolated(RUNNER, &discovered(), &args).expect("plan");
        let ids: Vec<&str> = plan.steps.iter().map(|s| s.test_id.as_str()).collect();
        assert_eq!(ids, vec!["org.example.A#two", "org.example.B#three"]);
    }

    #[test]
    fn target_instrumentation_overrides_and_must_exist() {
        let args = RunnerArgs::parse([("targetInstrumentation", "org.other/.Runner")]).expect("args");
        let plan = InstrumentationPlan::isolated(RUNNER, &discovered(), &args).expect("plan");
        assert_eq!(plan.instrumentation, "org.other/.Runner");

        let err = InstrumentationPlan::isolated("", &discovered(), &RunnerArgs::default()).expect_err("missing");
        assert_eq!(err, OrchestratorArgsError::MissingValue(TARGET_INSTRUMENTATION_ARG));
    }

    const OUTPUT: &str = "INSTRUMENTATION_STATUS: class=org.example.A\n\
INSTRUMENTATION_STATUS: test=one\n\
INSTRUMENTATION_STATUS_CODE: 1\n\
INSTRUMENTATION_STATUS: class=org.example.A\n\
INSTRUMENTATION_STATUS: test=one\n\
INSTRUMENTATION_STATUS: stack=java.lang.AssertionError: boom\n\
\tat org.example.A.one(A.java:10)\n\
INSTRUMENTATION_STATUS_CODE: -2\n\
INSTRUMENTATION_STATUS: class=org.example.A\n\
INSTRUMENTATION_STATUS: test=two\n\
INSTRUMENTATION_STATUS_CODE: 1\n\
INSTRUMENTATION_STATUS: class=org.example.A\n\
INSTRUMENTATION_STATUS: test=two\n\
INSTRUMENTATION_STATUS_CODE: 0\n\
INSTRUMENTATION_RESULT: stream=\n\
Time: 0.5\n\
INSTRUMENTATION_CODE: -1\n";

    #[test]
    fn parses_status_blocks_and_multiline_values() {
        let parser = InstrumentationOutputParser::new().expect("regex");
        let report = parser.parse(OUTPUT);
        assert_eq!(report.statuses.len(), 4);
        assert_eq!(report.code, Some(-1));
        assert!(!report.crashed());
        assert_eq!(report.result.get("stream").map(String::as_str), Some("\nTime: 0.5"));

        let outcomes = report.outcomes();
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].status, TestStatus::Failed);
        assert!(outcomes[0]
            .message
            .as_deref()
            .is_some_and(|stack| stack.contains("A.java:10")));
        assert_eq!(outcomes[1].status, TestStatus::Passed);
    }

    #[test]
    fn truncated_output_is_a_crash() {
        let parser = InstrumentationOutputParser::new().expect("regex");
        let report = parser.parse("INSTRUMENTATION_STATUS: class=org.example.A\nINSTRUMENTATION_STATUS: test=one\nINSTRUMENTATION_STATUS_CODE: 1\n");
        assert!(report.crashed());
        assert_eq!(report.outcomes()[0].status, TestStatus::Running);
    }

    #[test]
    fn run_plan_executes_each_step() {
        let args = RunnerArgs::parse([("class", "org.example.A#one")]).expect("args");
        let mut plan = InstrumentationPlan::isolated(RUNNER, &[], &args).expect("plan");
        plan.steps[0].command = ShellCommand::new("printf")
            .arg("INSTRUMENTATION_STATUS: class=org.example.A\\nINSTRUMENTATION_STATUS: test=one\\nINSTRUMENTATION_STATUS_CODE: 0\\nINSTRUMENTATION_CODE: -1\\n");
        let executor = ShellExecutor::new(&ShellSettings::default());
        let parser = InstrumentationOutputParser::new().expect("regex");
        let reports = run_plan(&executor, &parser, &plan, "trace-plan").expect("run");
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].0, "org.example.A#one");
        assert_eq!(reports[0].1.outcomes()[0].status, TestStatus::Passed);
    }
}
