use std::sync::Arc;
use std::thread;

use instrumentation_kit_lib::app::config::RunnerConfig;
use instrumentation_kit_lib::app::context::InstrumentationContext;
use instrumentation_kit_lib::app::error::ScenarioError;
use instrumentation_kit_lib::app::fixtures::{EmptyActivity, RecreationRecordingActivity};
use instrumentation_kit_lib::app::host::{ActivityRegistry, Intent};
use instrumentation_kit_lib::app::lifecycle::{LifecycleState, Stage};
use instrumentation_kit_lib::app::scenario::{ActivityScenario, ActivityScenarioRule, LazyActivityScenarioRule};

fn context() -> InstrumentationContext {
    let mut config = RunnerConfig::default();
    config.scenario.launch_timeout_ms = 5_000;
    config.scenario.transition_timeout_ms = 5_000;
    InstrumentationContext::in_process(
        config,
        ActivityRegistry::new()
            .register::<RecreationRecordingActivity>()
            .register::<EmptyActivity>(),
    )
    .expect("context")
}

#[test]
fn recreation_preserves_state_in_every_steady_state() {
    let ctx = context();
    for target in [LifecycleState::Created, LifecycleState::Started, LifecycleState::Resumed] {
        let scenario = ActivityScenario::<RecreationRecordingActivity>::launch(&ctx).expect("launch");
        scenario.move_to_state(target).expect("move");
        let before = scenario.activity_id().expect("instance");

        scenario.recreate().expect("recreate");

        assert_ne!(scenario.activity_id(), Some(before));
        assert_eq!(scenario.state().expect("state"), target);
        let recreations = scenario
            .with_activity(|activity| activity.number_of_recreations())
            .expect("on_activity");
        assert_eq!(recreations, 1, "after recreating in {target:?}");
        scenario.close().expect("close");
    }
}

#[test]
fn monitor_tracks_scenario_instances() {
    let ctx = context();
    let scenario = ActivityScenario::<EmptyActivity>::launch(&ctx).expect("launch");
    let resumed = ctx.monitor().activities_in_stage(Stage::Resumed);
    assert_eq!(resumed.len(), 1);
    assert_eq!(Some(resumed[0].id()), scenario.activity_id());

    scenario.move_to_state(LifecycleState::Created).expect("stop");
    assert!(ctx.monitor().activities_in_stage(Stage::Resumed).is_empty());
    assert_eq!(ctx.monitor().activities_in_stage(Stage::Stopped).len(), 1);

    // Stage queries are only answered on the main thread.
    let handle = Arc::clone(&resumed[0]);
    assert!(ctx.monitor().lifecycle_stage_of(&handle).is_err());
    let monitor = Arc::clone(ctx.monitor());
    let stage = ctx
        .looper()
        .run_on_main_sync(move || monitor.lifecycle_stage_of(&handle))
        .expect("main thread")
        .expect("tracked");
    assert_eq!(stage, Stage::Stopped);

    scenario.close().expect("close");
    assert_eq!(ctx.monitor().callback_count(), 0);
}

#[test]
fn destroyed_scenario_rejects_activity_access() {
    let ctx = context();
    let scenario = ActivityScenario::<EmptyActivity>::launch(&ctx).expect("launch");
    scenario.move_to_state(LifecycleState::Destroyed).expect("destroy");
    assert_eq!(scenario.state().expect("state"), LifecycleState::Destroyed);
    assert!(matches!(
        scenario.on_activity(|_| {}),
        Err(ScenarioError::ActivityDestroyed { .. })
    ));
    assert!(matches!(scenario.recreate(), Err(ScenarioError::ActivityDestroyed { .. })));
    scenario.close().expect("close");
}

#[test]
fn rule_wraps_a_test_body() {
    let ctx = context();
    let mut rule = ActivityScenarioRule::<RecreationRecordingActivity>::new(&ctx);
    let recreations = rule
        .apply(|scenario| {
            scenario.recreate().expect("recreate");
            scenario
                .with_activity(|activity| activity.number_of_recreations())
                .expect("on_activity")
        })
        .expect("rule");
    assert_eq!(recreations, 1);
    assert!(rule.scenario().is_err());
}

#[test]
fn lazy_rule_launches_with_custom_intent() {
    let ctx = context();
    let mut rule = LazyActivityScenarioRule::<EmptyActivity>::new(&ctx, false);
    rule.before().expect("before");
    assert!(!rule.is_launched());
    let intent = Intent::for_activity::<EmptyActivity>().with_extra("mode", "custom");
    rule.launch(Some(intent)).expect("launch");
    assert!(matches!(rule.launch(None), Err(ScenarioError::AlreadyLaunched { .. })));
    assert_eq!(
        rule.scenario().expect("scenario").state().expect("state"),
        LifecycleState::Resumed
    );
    rule.after().expect("after");
}

#[test]
fn concurrent_recreations_are_serialized() {
    let ctx = context();
    let scenario = Arc::new(ActivityScenario::<RecreationRecordingActivity>::launch(&ctx).expect("launch"));
    let workers: Vec<_> = (0..8)
        .map(|_| {
            let scenario = Arc::clone(&scenario);
            thread::spawn(move || {
                for _ in 0..2 {
                    scenario.recreate().expect("recreate");
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().expect("worker");
    }

    let recreations = scenario
        .with_activity(|activity| activity.number_of_recreations())
        .expect("on_activity");
    assert_eq!(recreations, 16);
    assert_eq!(scenario.state().expect("state"), LifecycleState::Resumed);
    assert_eq!(ctx.monitor().activities_in_stage(Stage::Resumed).len(), 1);
}
