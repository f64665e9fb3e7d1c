use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use instrumentation_kit_lib::app::config::{backup_config_path, config_path, load_config_from_path};
use instrumentation_kit_lib::app::context::InstrumentationContext;
use instrumentation_kit_lib::app::events::{Description, Failure, RunResult};
use instrumentation_kit_lib::app::fixtures::{RecreationRecordingActivity, ResultActivity, WebFormActivity};
use instrumentation_kit_lib::app::host::{ActivityRegistry, RESULT_OK};
use instrumentation_kit_lib::app::lifecycle::LifecycleState;
use instrumentation_kit_lib::app::logging::init_logging;
use instrumentation_kit_lib::app::orchestrator::args::{
    ORCHESTRATOR_SERVICE_NAME, TEST_DISCOVERY_SERVICE_NAME, TEST_NOTIFICATION_SERVICE_NAME,
};
use instrumentation_kit_lib::app::orchestrator::plan::InstrumentationPlan;
use instrumentation_kit_lib::app::orchestrator::{
    DiscoveryCollector, LegacyOrchestratorService, RunEventCollector, RunListener, RunnerArgs, TestEventClient,
    TestStatus,
};
use instrumentation_kit_lib::app::scenario::ActivityScenario;
use instrumentation_kit_lib::app::services::shell::ShellCommand;
use instrumentation_kit_lib::app::services::usage::RecordingUsageTracker;
use instrumentation_kit_lib::app::web::{find_element, get_text, web_click, web_keys, Locator, WebInteraction};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct Args {
    out_dir: Option<PathBuf>,
    config: Option<PathBuf>,
    json: bool,
    skip_shell: bool,
}

#[derive(Serialize)]
struct SmokeSummary {
    tool: &'static str,
    status: &'static str,
    trace_id: String,
    config_path: String,
    out_dir: String,
    artifacts: HashMap<String, String>,
    checks: Vec<SmokeCheck>,
}

#[derive(Serialize)]
struct SmokeCheck {
    name: &'static str,
    status: &'static str, // pass|fail|warn|skip
    duration_ms: u128,
    artifacts: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

type CheckResult = Result<Vec<String>, (&'static str, String)>;

fn parse_args() -> Result<Args, String> {
    let mut out_dir: Option<PathBuf> = None;
    let mut config: Option<PathBuf> = None;
    let mut json = false;
    let mut skip_shell = false;

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--out" => {
                let value = it
                    .next()
                    .ok_or_else(|| "--out requires a value".to_string())?;
                out_dir = Some(PathBuf::from(value));
            }
            "--config" => {
                let value = it
                    .next()
                    .ok_or_else(|| "--config requires a value".to_string())?;
                config = Some(PathBuf::from(value));
            }
            "--json" => {
                json = true;
            }
            "--skip-shell" => {
                skip_shell = true;
            }
            "-h" | "--help" => {
                return Err(
                    "Usage: cargo run --bin smoke -- [--out DIR] [--config PATH] [--json] [--skip-shell]\n"
                        .to_string(),
                );
            }
            other => return Err(format!("Unknown arg: {other}")),
        }
    }

    Ok(Args {
        out_dir,
        config,
        json,
        skip_shell,
    })
}

fn ensure_dir(path: &Path) -> Result<(), String> {
    fs::create_dir_all(path)
        .map_err(|err| format!("Failed to create dir {}: {err}", path.display()))
}

fn write_artifact<T: Serialize>(
    artifacts: &mut HashMap<String, String>,
    out_dir: &Path,
    name: &str,
    value: &T,
) -> Result<String, (&'static str, String)> {
    let path = out_dir.join(format!("{name}.json"));
    let body = serde_json::to_string_pretty(value)
        .map_err(|err| ("ERR_SERIALIZE", format!("Failed to serialize {name}: {err}")))?;
    fs::write(&path, body).map_err(|err| ("ERR_IO", format!("Failed to write {name}: {err}")))?;
    let path = path.to_string_lossy().to_string();
    artifacts.insert(name.to_string(), path.clone());
    Ok(path)
}

fn run_check<F>(checks: &mut Vec<SmokeCheck>, name: &'static str, f: F) -> Result<(), ()>
where
    F: FnOnce() -> CheckResult,
{
    let start = Instant::now();
    match f() {
        Ok(artifacts) => {
            checks.push(SmokeCheck {
                name,
                status: "pass",
                duration_ms: start.elapsed().as_millis(),
                artifacts,
                error_code: None,
                error: None,
            });
            Ok(())
        }
        Err((code, err)) => {
            checks.push(SmokeCheck {
                name,
                status: "fail",
                duration_ms: start.elapsed().as_millis(),
                artifacts: vec![],
                error_code: Some(code),
                error: Some(err),
            });
            Err(())
        }
    }
}

fn run_warn<F>(checks: &mut Vec<SmokeCheck>, name: &'static str, f: F)
where
    F: FnOnce() -> CheckResult,
{
    let start = Instant::now();
    let (status, artifacts, error_code, error) = match f() {
        Ok(artifacts) => ("pass", artifacts, None, None),
        Err((code, err)) => ("warn", vec![], Some(code), Some(err)),
    };
    checks.push(SmokeCheck {
        name,
        status,
        duration_ms: start.elapsed().as_millis(),
        artifacts,
        error_code,
        error,
    });
}

fn ensure(condition: bool, code: &'static str, message: impl FnOnce() -> String) -> Result<(), (&'static str, String)> {
    if condition {
        Ok(())
    } else {
        Err((code, message()))
    }
}

fn sample_suite() -> Description {
    Description::suite("smoke")
        .with_child(
            Description::suite("org.example.SmokeTest")
                .with_child(Description::test("org.example.SmokeTest", "passes"))
                .with_child(Description::test("org.example.SmokeTest", "fails")),
        )
        .with_child(Description::test("org.example.OtherTest", "ignored"))
}

fn drive_sample_run(listener: &mut dyn RunListener) {
    let suite = sample_suite();
    let passes = Description::test("org.example.SmokeTest", "passes");
    let fails = Description::test("org.example.SmokeTest", "fails");
    let failure = Failure::new(fails.clone(), "expected true").with_exception("AssertionError", "at SmokeTest.fails");

    listener.test_run_started(&suite);
    listener.test_started(&passes);
    listener.test_finished(&passes);
    listener.test_started(&fails);
    listener.test_failure(&failure);
    listener.test_finished(&fails);
    listener.test_ignored(&Description::test("org.example.OtherTest", "ignored"));
    listener.test_run_finished(&RunResult {
        run_count: 2,
        ignore_count: 1,
        run_time_ms: 12,
        failures: vec![failure],
    });
}

fn main() {
    let args = match parse_args() {
        Ok(v) => v,
        Err(msg) => {
            eprintln!("{msg}");
            std::process::exit(2);
        }
    };

    let trace_id = Uuid::new_v4().to_string();

    let out_dir = args.out_dir.clone().unwrap_or_else(|| {
        let mut p = std::env::temp_dir();
        p.push(format!("instrumentation_kit_smoke_{trace_id}"));
        p
    });
    if let Err(err) = ensure_dir(&out_dir) {
        eprintln!("{err}");
        std::process::exit(1);
    }

    let mut artifacts: HashMap<String, String> = HashMap::new();
    let mut checks: Vec<SmokeCheck> = Vec::new();
    let mut status = "pass";

    let path = args.config.clone().unwrap_or_else(config_path);
    let mut config = match load_config_from_path(&path) {
        Ok(cfg) => cfg,
        Err(err) => {
            checks.push(SmokeCheck {
                name: "load_config",
                status: "fail",
                duration_ms: 0,
                artifacts: vec![],
                error_code: Some("ERR_CONFIG"),
                error: Some(format!("{err} (backup: {})", backup_config_path(&path).display())),
            });
            let summary = SmokeSummary {
                tool: "instrumentation_kit_smoke",
                status: "fail",
                trace_id,
                config_path: path.to_string_lossy().to_string(),
                out_dir: out_dir.to_string_lossy().to_string(),
                artifacts,
                checks,
            };
            println!(
                "{}",
                serde_json::to_string_pretty(&summary).unwrap_or_default()
            );
            std::process::exit(1);
        }
    };
    init_logging(&config.logging);
    // Keep smoke artifacts together with the summary.
    config.storage.root = out_dir.join("storage").to_string_lossy().to_string();

    let usage = Arc::new(RecordingUsageTracker::new());
    let registry = ActivityRegistry::new()
        .register::<RecreationRecordingActivity>()
        .register::<ResultActivity>()
        .register::<WebFormActivity>();
    let context = match InstrumentationContext::in_process(config.clone(), registry) {
        Ok(context) => context.with_usage_tracker(usage.clone()),
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(1);
        }
    };

    if run_check(&mut checks, "scenario_lifecycle", || {
        let scenario = ActivityScenario::<RecreationRecordingActivity>::launch(&context)
            .map_err(|err| ("ERR_LAUNCH", err.to_string()))?;
        for target in [
            LifecycleState::Created,
            LifecycleState::Started,
            LifecycleState::Resumed,
        ] {
            scenario
                .move_to_state(target)
                .map_err(|err| ("ERR_MOVE_TO_STATE", err.to_string()))?;
            let state = scenario.state().map_err(|err| ("ERR_STATE", err.to_string()))?;
            ensure(state == target, "ERR_STATE", || format!("expected {target:?}, got {state:?}"))?;
        }
        scenario.recreate().map_err(|err| ("ERR_RECREATE", err.to_string()))?;
        let recreations = scenario
            .with_activity(|activity| activity.number_of_recreations())
            .map_err(|err| ("ERR_ON_ACTIVITY", err.to_string()))?;
        ensure(recreations == 1, "ERR_RECREATE", || format!("recreated {recreations} times"))?;
        scenario.close().map_err(|err| ("ERR_CLOSE", err.to_string()))?;
        Ok(vec![])
    })
    .is_err()
    {
        status = "fail";
    }

    if run_check(&mut checks, "scenario_result", || {
        let scenario = ActivityScenario::<ResultActivity>::launch(&context)
            .map_err(|err| ("ERR_LAUNCH", err.to_string()))?;
        scenario
            .on_activity(|activity| activity.finish_with(RESULT_OK, "done"))
            .map_err(|err| ("ERR_ON_ACTIVITY", err.to_string()))?;
        let result = scenario.result().map_err(|err| ("ERR_RESULT", err.to_string()))?;
        ensure(
            result.result_code == RESULT_OK && result.data.get_string(ResultActivity::RESULT_KEY) == Some("done"),
            "ERR_RESULT",
            || format!("unexpected result {result:?}"),
        )?;
        scenario.close().map_err(|err| ("ERR_CLOSE", err.to_string()))?;
        Ok(vec![])
    })
    .is_err()
    {
        status = "fail";
    }

    if run_check(&mut checks, "web_form", || {
        let scenario = ActivityScenario::<WebFormActivity>::launch(&context)
            .map_err(|err| ("ERR_LAUNCH", err.to_string()))?;
        WebInteraction::on_web_view(&scenario)
            .with_element(find_element(Locator::Id, "name_input"))
            .and_then(|web| web.perform(web_keys("smoke")))
            .and_then(|web| web.with_element(find_element(Locator::Id, "submit")))
            .and_then(|web| web.perform(web_click()))
            .and_then(|web| web.with_element(find_element(Locator::Id, "greeting")))
            .and_then(|web| web.check(get_text(), |text: &String| text == "Hello, smoke"))
            .map_err(|err| ("ERR_WEB", err.to_string()))?;
        scenario.close().map_err(|err| ("ERR_CLOSE", err.to_string()))?;
        Ok(vec![])
    })
    .is_err()
    {
        status = "fail";
    }

    let services = Arc::clone(context.services());
    let mut discovered = Vec::new();

    if run_check(&mut checks, "orchestrator_v2_discovery", || {
        let collector = Arc::new(DiscoveryCollector::new("smoke"));
        services.publish(TEST_DISCOVERY_SERVICE_NAME, collector.clone());
        let runner_args = RunnerArgs::parse([("testDiscoveryService", TEST_DISCOVERY_SERVICE_NAME)])
            .map_err(|err| ("ERR_ARGS", err.to_string()))?;
        let client = TestEventClient::connect(&runner_args, &services, &config.orchestrator, usage.as_ref())
            .map_err(|err| ("ERR_CONNECT", err.to_string()))?;
        let discovery = client
            .discovery()
            .ok_or_else(|| ("ERR_CONNECT", "no discovery driver".to_string()))?;
        let sent = discovery
            .run(&sample_suite())
            .map_err(|err| ("ERR_DISCOVERY", err.to_string()))?;
        let info = collector.run_info();
        ensure(sent == 3 && info.test_cases.len() == 3, "ERR_DISCOVERY", || {
            format!("sent {sent}, collected {}", info.test_cases.len())
        })?;
        discovered = info.test_cases.clone();
        Ok(vec![write_artifact(&mut artifacts, &out_dir, "discovery", &info)?])
    })
    .is_err()
    {
        status = "fail";
    }

    if run_check(&mut checks, "orchestrator_v2_run", || {
        let collector = Arc::new(RunEventCollector::new());
        services.publish(TEST_NOTIFICATION_SERVICE_NAME, collector.clone());
        let runner_args = RunnerArgs::parse([("testNotificationService", TEST_NOTIFICATION_SERVICE_NAME)])
            .map_err(|err| ("ERR_ARGS", err.to_string()))?;
        let client = TestEventClient::connect(&runner_args, &services, &config.orchestrator, usage.as_ref())
            .map_err(|err| ("ERR_CONNECT", err.to_string()))?;
        let mut listener = client
            .run_listener()
            .ok_or_else(|| ("ERR_CONNECT", "no run listener".to_string()))?;
        drive_sample_run(listener.as_mut());
        let summary = collector.summary();
        ensure(
            summary.is_finished()
                && summary.count(TestStatus::Passed) == 1
                && summary.count(TestStatus::Failed) == 1
                && summary.count(TestStatus::Ignored) == 1,
            "ERR_RUN_SUMMARY",
            || format!("unexpected summary {summary:?}"),
        )?;
        Ok(vec![write_artifact(&mut artifacts, &out_dir, "run_summary_v2", &summary)?])
    })
    .is_err()
    {
        status = "fail";
    }

    if run_check(&mut checks, "orchestrator_v1", || {
        let service = Arc::new(LegacyOrchestratorService::new());
        services.publish(ORCHESTRATOR_SERVICE_NAME, service.clone());
        let listing = RunnerArgs::parse([
            ("orchestratorService", ORCHESTRATOR_SERVICE_NAME),
            ("listTestsForOrchestrator", "true"),
        ])
        .map_err(|err| ("ERR_ARGS", err.to_string()))?;
        let client = TestEventClient::connect(&listing, &services, &config.orchestrator, usage.as_ref())
            .map_err(|err| ("ERR_CONNECT", err.to_string()))?;
        client
            .discovery()
            .ok_or_else(|| ("ERR_CONNECT", "no discovery driver".to_string()))?
            .run(&sample_suite())
            .map_err(|err| ("ERR_DISCOVERY", err.to_string()))?;

        let running = RunnerArgs::parse([("orchestratorService", ORCHESTRATOR_SERVICE_NAME)])
            .map_err(|err| ("ERR_ARGS", err.to_string()))?;
        let client = TestEventClient::connect(&running, &services, &config.orchestrator, usage.as_ref())
            .map_err(|err| ("ERR_CONNECT", err.to_string()))?;
        let mut listener = client
            .run_listener()
            .ok_or_else(|| ("ERR_CONNECT", "no run listener".to_string()))?;
        drive_sample_run(listener.as_mut());

        let summary = service.summary();
        ensure(
            service.added_tests().len() == 3 && summary.is_finished() && summary.count(TestStatus::Failed) == 1,
            "ERR_RUN_SUMMARY",
            || format!("added {:?}, summary {summary:?}", service.added_tests()),
        )?;
        Ok(vec![write_artifact(&mut artifacts, &out_dir, "run_summary_v1", &summary)?])
    })
    .is_err()
    {
        status = "fail";
    }

    if run_check(&mut checks, "isolated_plan", || {
        let runner_args = RunnerArgs::parse([("timeout_msec", "60000"), ("clearPackageData", "true")])
            .map_err(|err| ("ERR_ARGS", err.to_string()))?;
        let plan = InstrumentationPlan::isolated(
            "org.example.test/androidx.test.runner.AndroidJUnitRunner",
            &discovered,
            &runner_args,
        )
        .map_err(|err| ("ERR_PLAN", err.to_string()))?;
        ensure(plan.len() == discovered.len(), "ERR_PLAN", || {
            format!("planned {} of {} tests", plan.len(), discovered.len())
        })?;
        let commands: BTreeMap<String, String> = plan
            .steps
            .iter()
            .map(|step| {
                (
                    step.test_id.clone(),
                    format!("{} {}", step.command.program, step.command.args.join(" ")),
                )
            })
            .collect();
        Ok(vec![write_artifact(&mut artifacts, &out_dir, "isolated_plan", &commands)?])
    })
    .is_err()
    {
        status = "fail";
    }

    if run_check(&mut checks, "storage", || {
        let storage = context.storage();
        let mut properties = BTreeMap::new();
        properties.insert("smoke_trace_id".to_string(), trace_id.clone());
        storage
            .add_output_properties(&properties)
            .map_err(|err| ("ERR_STORAGE", err.to_string()))?;
        let stored = storage
            .output_properties()
            .map_err(|err| ("ERR_STORAGE", err.to_string()))?;
        ensure(stored.get("smoke_trace_id") == Some(&trace_id), "ERR_STORAGE", || {
            "output property not persisted".to_string()
        })?;
        Ok(vec![storage.root().to_string_lossy().to_string()])
    })
    .is_err()
    {
        status = "fail";
    }

    if args.skip_shell {
        checks.push(SmokeCheck {
            name: "shell",
            status: "skip",
            duration_ms: 0,
            artifacts: vec![],
            error_code: None,
            error: None,
        });
    } else {
        run_warn(&mut checks, "shell", || {
            let command = ShellCommand::new("echo")
                .arg(&trace_id)
                .timeout(Duration::from_secs(5));
            let output = context
                .shell()
                .execute_sync(&command, &trace_id)
                .map_err(|err| ("WARN_SHELL", err.to_string()))?;
            ensure(output.success() && output.stdout.trim() == trace_id, "WARN_SHELL", || {
                format!("unexpected shell output: {}", output.stdout.trim())
            })?;
            Ok(vec![])
        });
    }

    let usages: Vec<String> = usage.records().into_iter().map(|record| record.usage).collect();
    let _ = write_artifact(&mut artifacts, &out_dir, "usage", &usages);
    context.shutdown();

    let summary = SmokeSummary {
        tool: "instrumentation_kit_smoke",
        status,
        trace_id: trace_id.clone(),
        config_path: path.to_string_lossy().to_string(),
        out_dir: out_dir.to_string_lossy().to_string(),
        artifacts,
        checks,
    };

    let output = if args.json {
        serde_json::to_string_pretty(&summary).unwrap_or_else(|_| "{}".to_string())
    } else {
        format!(
            "status: {}\ntrace_id: {}\nout: {}\n",
            summary.status, summary.trace_id, summary.out_dir
        )
    };

    println!("{output}");
    if summary.status != "pass" {
        std::process::exit(1);
    }
}

