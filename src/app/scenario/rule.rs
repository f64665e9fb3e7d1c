use std::panic::{self, AssertUnwindSafe};

use tracing::warn;

use crate::app::context::InstrumentationContext;
use crate::app::error::ScenarioError;
use crate::app::host::{activity_class_name, Activity, Intent};

use super::ActivityScenario;

/// Owns a scenario for the duration of one test: launched in `before`, closed in `after`.
pub struct ActivityScenarioRule<A: Activity> {
    context: InstrumentationContext,
    intent: Intent,
    scenario: Option<ActivityScenario<A>>,
}

impl<A: Activity> ActivityScenarioRule<A> {
    pub fn new(context: &InstrumentationContext) -> Self {
        Self::with_intent(context, Intent::for_activity::<A>())
    }

    pub fn with_intent(context: &InstrumentationContext, intent: Intent) -> Self {
        Self {
            context: context.clone(),
            intent,
            scenario: None,
        }
    }

    pub fn before(&mut self) -> Result<(), ScenarioError> {
        if self.scenario.is_some() {
            return Err(ScenarioError::AlreadyLaunched {
                class: activity_class_name::<A>(),
            });
        }
        self.scenario = Some(ActivityScenario::launch_with(&self.context, self.intent.clone())?);
        Ok(())
    }

    pub fn after(&mut self) -> Result<(), ScenarioError> {
        match self.scenario.take() {
            Some(scenario) => scenario.close(),
            None => Ok(()),
        }
    }

    pub fn scenario(&self) -> Result<&ActivityScenario<A>, ScenarioError> {
        self.scenario.as_ref().ok_or_else(|| ScenarioError::NotLaunched {
            class: activity_class_name::<A>(),
        })
    }

    /// Runs `body` between `before` and `after`. Teardown runs even if `body` panics; the panic
    /// is then resumed.
    pub fn apply<R>(&mut self, body: impl FnOnce(&ActivityScenario<A>) -> R) -> Result<R, ScenarioError> {
        self.before()?;
        let outcome = match self.scenario() {
            Ok(scenario) => panic::catch_unwind(AssertUnwindSafe(|| body(scenario))),
            Err(err) => return Err(err),
        };
        let teardown = self.after();
        match outcome {
            Ok(value) => teardown.map(|_| value),
            Err(payload) => {
                if let Err(err) = teardown {
                    warn!(error = %err, "teardown failed after test panic");
                }
                panic::resume_unwind(payload)
            }
        }
    }
}

/// Variant of [`ActivityScenarioRule`] that can defer or skip the launch.
///
/// With `launch_activity` unset nothing is launched in `before`; the first call to `scenario()`
/// launches with the default intent, or the test calls `launch` with its own intent. A test may
/// launch at most once.
pub struct LazyActivityScenarioRule<A: Activity> {
    context: InstrumentationContext,
    launch_activity: bool,
    default_intent: Intent,
    scenario: Option<ActivityScenario<A>>,
    launched: bool,
}

impl<A: Activity> LazyActivityScenarioRule<A> {
    pub fn new(context: &InstrumentationContext, launch_activity: bool) -> Self {
        Self::with_intent(context, launch_activity, Intent::for_activity::<A>())
    }

    pub fn with_intent(context: &InstrumentationContext, launch_activity: bool, intent: Intent) -> Self {
        Self {
            context: context.clone(),
            launch_activity,
            default_intent: intent,
            scenario: None,
            launched: false,
        }
    }

    pub fn before(&mut self) -> Result<(), ScenarioError> {
        if self.launch_activity {
            self.launch(None)?;
        }
        Ok(())
    }

    pub fn launch(&mut self, intent: Option<Intent>) -> Result<&ActivityScenario<A>, ScenarioError> {
        if self.launched {
            return Err(ScenarioError::AlreadyLaunched {
                class: activity_class_name::<A>(),
            });
        }
        self.launched = true;
        let intent = intent.unwrap_or_else(|| self.default_intent.clone());
        let scenario = ActivityScenario::launch_with(&self.context, intent)?;
        Ok(self.scenario.insert(scenario))
    }

    pub fn is_launched(&self) -> bool {
        self.launched
    }

    pub fn scenario(&mut self) -> Result<&ActivityScenario<A>, ScenarioError> {
        if !self.launched {
            return self.launch(None);
        }
        self.scenario.as_ref().ok_or_else(|| ScenarioError::NotLaunched {
            class: activity_class_name::<A>(),
        })
    }

    pub fn after(&mut self) -> Result<(), ScenarioError> {
        self.launched = false;
        match self.scenario.take() {
            Some(scenario) => scenario.close(),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::config::RunnerConfig;
    use crate::app::fixtures::{EmptyActivity, RecreationRecordingActivity};
    use crate::app::host::ActivityRegistry;
    use crate::app::lifecycle::{LifecycleState, Stage};

    fn context() -> InstrumentationContext {
        InstrumentationContext::in_process(
            RunnerConfig::default(),
            ActivityRegistry::new()
                .register::<EmptyActivity>()
                .register::<RecreationRecordingActivity>(),
        )
        .expect("context")
    }

    #[test]
    fn rule_launches_and_closes_around_body() {
        let ctx = context();
        let mut rule = ActivityScenarioRule::<RecreationRecordingActivity>::new(&ctx);
        let state = rule
            .apply(|scenario| {
                scenario.recreate().expect("recreate");
                scenario.state().expect("state")
            })
            .expect("apply");
        assert_eq!(state, LifecycleState::Resumed);
        assert!(matches!(rule.scenario(), Err(ScenarioError::NotLaunched { .. })));
        assert_eq!(ctx.monitor().callback_count(), 0);
        assert!(ctx.monitor().activities_in_stage(Stage::Resumed).is_empty());
    }

    #[test]
    fn rule_tears_down_when_body_panics() {
        let ctx = context();
        let mut rule = ActivityScenarioRule::<EmptyActivity>::new(&ctx);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let _ = rule.apply(|_| panic!("test body failed"));
        }));
        assert!(outcome.is_err());
        assert_eq!(ctx.monitor().callback_count(), 0);
    }

    #[test]
    fn lazy_rule_defers_launch_until_first_access() {
        let ctx = context();
        let mut rule = LazyActivityScenarioRule::<EmptyActivity>::new(&ctx, false);
        rule.before().expect("before");
        assert!(!rule.is_launched());
        assert_eq!(ctx.monitor().callback_count(), 0);

        let state = rule.scenario().expect("scenario").state().expect("state");
        assert_eq!(state, LifecycleState::Resumed);
        assert!(matches!(rule.launch(None), Err(ScenarioError::AlreadyLaunched { .. })));
        rule.after().expect("after");
        assert_eq!(ctx.monitor().callback_count(), 0);
    }

    #[test]
    fn lazy_rule_without_launch_closes_nothing() {
        let ctx = context();
        let mut rule = LazyActivityScenarioRule::<EmptyActivity>::new(&ctx, true);
        rule.before().expect("before");
        assert!(rule.is_launched());
        rule.after().expect("after");

        let mut idle = LazyActivityScenarioRule::<EmptyActivity>::new(&ctx, false);
        idle.before().expect("before");
        idle.after().expect("after");
        assert!(!idle.is_launched());
    }
}
