//! Test-thread handle driving one activity through its lifecycle.
//!
//! Every state change happens on the main looper; the calling thread blocks on a condition
//! variable that the scenario's lifecycle callback updates. The callback stores the observed
//! stage before notifying, and waiters re-check under the same lock, so a signal that fires
//! before the wait starts is never lost.

mod rule;

use std::any::type_name;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use std::time::Duration;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::app::config::ScenarioSettings;
use crate::app::context::InstrumentationContext;
use crate::app::error::{HostError, MainThreadError, ScenarioError};
use crate::app::host::{
    activity_class_name, downcast_activity, panic_message, simple_class_name, Activity, ActivityHandle, ActivityHost,
    ActivityId, ActivityResult, Intent, MainLooper,
};
use crate::app::lifecycle::{LifecycleCallback, LifecycleMonitor, LifecycleState, Stage};
use crate::app::services::usage::SCENARIO_USAGE;

pub use rule::{ActivityScenarioRule, LazyActivityScenarioRule};

/// Intent extra carrying the launch token that ties instances to their scenario.
pub const SCENARIO_TOKEN_EXTRA: &str = "instrumentation_kit.scenario.token";

const USAGE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Clone)]
struct Observed {
    handle: Arc<ActivityHandle>,
    stage: Stage,
}

/// Lifecycle state shared between the main thread (writer) and scenario waiters.
struct ScenarioShared {
    token: String,
    current: Mutex<Option<Observed>>,
    changed: Condvar,
}

impl ScenarioShared {
    fn new(token: String) -> Self {
        Self {
            token,
            current: Mutex::new(None),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Observed>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot(&self) -> Option<Observed> {
        self.lock().clone()
    }

    /// Blocks until `ready` holds for the observed instance, or `timeout` elapses.
    fn wait_until(
        &self,
        timeout: Duration,
        ready: impl Fn(&Observed) -> bool,
    ) -> Option<Observed> {
        let guard = self.lock();
        let (guard, _) = self
            .changed
            .wait_timeout_while(guard, timeout, |current| {
                !current.as_ref().is_some_and(|observed| ready(observed))
            })
            .unwrap_or_else(PoisonError::into_inner);
        guard.as_ref().filter(|observed| ready(observed)).cloned()
    }
}

impl LifecycleCallback for ScenarioShared {
    fn on_lifecycle_changed(&self, activity: &Arc<ActivityHandle>, stage: Stage) {
        if activity.intent().extras.get_string(SCENARIO_TOKEN_EXTRA) != Some(self.token.as_str()) {
            return;
        }
        let mut current = self.lock();
        // A new instance (initial launch or recreation) is adopted from its first stage.
        if stage == Stage::PreOnCreate || current.is_none() {
            *current = Some(Observed {
                handle: Arc::clone(activity),
                stage,
            });
        } else if let Some(observed) = current
            .as_mut()
            .filter(|observed| observed.handle.id() == activity.id())
        {
            observed.stage = stage;
        } else {
            // Late stages of an instance this scenario already replaced.
            return;
        }
        drop(current);
        self.changed.notify_all();
    }
}

/// Clears the operation owner when an operation ends, even by panic.
struct OperationGuard<'a> {
    _serial: MutexGuard<'a, ()>,
    owner: &'a Mutex<Option<ThreadId>>,
}

impl Drop for OperationGuard<'_> {
    fn drop(&mut self) {
        *self.owner.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

/// Launches an activity and drives it through lifecycle states on behalf of a test.
///
/// The handle stays valid across [`recreate`](Self::recreate): the scenario follows the new
/// instance. Operations are serialized; a call made from inside another operation (for example
/// from an [`on_activity`](Self::on_activity) body) fails with [`ScenarioError::Reentrant`].
pub struct ActivityScenario<A: Activity> {
    class_name: String,
    looper: Arc<MainLooper>,
    monitor: Arc<LifecycleMonitor>,
    host: Arc<dyn ActivityHost>,
    shared: Arc<ScenarioShared>,
    settings: ScenarioSettings,
    serial: Mutex<()>,
    owner: Mutex<Option<ThreadId>>,
    closed: AtomicBool,
    _activity: PhantomData<fn() -> A>,
}

impl<A: Activity> ActivityScenario<A> {
    pub fn launch(context: &InstrumentationContext) -> Result<Self, ScenarioError> {
        Self::launch_with(context, Intent::for_activity::<A>())
    }

    /// Starts the activity described by `intent` and blocks until it is RESUMED.
    pub fn launch_with(context: &InstrumentationContext, mut intent: Intent) -> Result<Self, ScenarioError> {
        let class_name = activity_class_name::<A>();
        match intent.component() {
            None => intent.component = Some(class_name.clone()),
            Some(component) if component != class_name => {
                return Err(ScenarioError::Launch {
                    class: class_name,
                    reason: format!("intent targets {component}"),
                });
            }
            Some(_) => {}
        }
        let token = Uuid::new_v4().to_string();
        intent.extras.put_string(SCENARIO_TOKEN_EXTRA, token.clone());
        context.usage().track_usage(SCENARIO_USAGE, USAGE_VERSION);

        let scenario = Self {
            class_name,
            looper: Arc::clone(context.looper()),
            monitor: Arc::clone(context.monitor()),
            host: Arc::clone(context.host()),
            shared: Arc::new(ScenarioShared::new(token)),
            settings: context.config().scenario.clone(),
            serial: Mutex::new(()),
            owner: Mutex::new(None),
            closed: AtomicBool::new(false),
            _activity: PhantomData,
        };
        scenario.monitor.add_lifecycle_callback(&scenario.callback());
        info!(scenario = %scenario.shared.token, activity = %scenario.simple_name(), "launching activity");

        if let Err(err) = scenario.start(intent) {
            scenario.abandon();
            return Err(err);
        }
        Ok(scenario)
    }

    fn start(&self, intent: Intent) -> Result<(), ScenarioError> {
        let host = Arc::clone(&self.host);
        let timeout = self.settings.launch_timeout();
        // A crash in the activity's own callbacks fails the launch instead of unwinding.
        let started = panic::catch_unwind(AssertUnwindSafe(|| {
            self.looper
                .run_on_main_sync_timeout(move || host.start_activity(&intent), timeout)
        }));
        match started {
            Ok(Ok(Ok(_))) => {}
            Ok(Ok(Err(err))) => return Err(self.launch_error(err.to_string())),
            Ok(Err(MainThreadError::Timeout(timeout))) => {
                return Err(self.launch_error(self.timeout_error(Stage::Resumed.as_str(), timeout).to_string()))
            }
            Ok(Err(err)) => return Err(self.launch_error(err.to_string())),
            Err(payload) => {
                return Err(self.launch_error(format!(
                    "activity crashed during launch: {}",
                    panic_message(payload.as_ref())
                )))
            }
        }
        let observed = self
            .shared
            .wait_until(self.settings.launch_timeout(), |observed| {
                matches!(observed.stage, Stage::Resumed | Stage::Destroyed)
            })
            .ok_or_else(|| {
                self.launch_error(format!(
                    "did not reach RESUMED within {:?}",
                    self.settings.launch_timeout()
                ))
            })?;
        if observed.stage == Stage::Destroyed {
            return Err(self.launch_error("finished before reaching RESUMED".to_string()));
        }
        Ok(())
    }

    fn launch_error(&self, reason: String) -> ScenarioError {
        ScenarioError::Launch {
            class: self.class_name.clone(),
            reason,
        }
    }

    /// Tears down after a failed launch; the scenario never reaches the caller.
    fn abandon(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(observed) = self.shared.snapshot() {
            if observed.stage != Stage::Destroyed {
                let host = Arc::clone(&self.host);
                let id = observed.handle.id();
                if let Err(err) = self.looper.post(move || {
                    if let Err(err) = host.finish(id) {
                        warn!(activity = %id, error = %err, "failed to finish abandoned activity");
                    }
                }) {
                    warn!(error = %err, "failed to post finish for abandoned activity");
                }
            }
        }
        self.monitor.remove_lifecycle_callback(&self.callback());
    }

    fn callback(&self) -> Arc<dyn LifecycleCallback> {
        self.shared.clone()
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    fn simple_name(&self) -> &str {
        simple_class_name(&self.class_name)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn begin(&self, operation: &'static str) -> Result<OperationGuard<'_>, ScenarioError> {
        let me = thread::current().id();
        {
            let owner = self.owner.lock().unwrap_or_else(PoisonError::into_inner);
            match *owner {
                Some(holder) if holder == me => return Err(ScenarioError::Reentrant { operation }),
                // The in-flight operation is waiting on this thread; blocking here would deadlock.
                Some(_) if self.looper.is_main_thread() => {
                    return Err(ScenarioError::Reentrant { operation })
                }
                _ => {}
            }
        }
        let serial = self.serial.lock().unwrap_or_else(PoisonError::into_inner);
        *self.owner.lock().unwrap_or_else(PoisonError::into_inner) = Some(me);
        let guard = OperationGuard {
            _serial: serial,
            owner: &self.owner,
        };
        if self.is_closed() {
            return Err(ScenarioError::Closed {
                class: self.class_name.clone(),
            });
        }
        Ok(guard)
    }

    fn timeout_error(&self, waiting_for: impl Into<String>, timeout: Duration) -> ScenarioError {
        ScenarioError::Timeout {
            class: self.class_name.clone(),
            waiting_for: waiting_for.into(),
            timeout,
        }
    }

    /// Waits until the current instance rests in a steady stage.
    fn settle(&self) -> Result<Observed, ScenarioError> {
        let timeout = self.settings.transition_timeout();
        self.shared
            .wait_until(timeout, |observed| observed.stage.is_steady())
            .ok_or_else(|| self.timeout_error("a steady state", timeout))
    }

    fn settle_alive(&self, operation: &'static str) -> Result<Observed, ScenarioError> {
        let observed = self.settle()?;
        if observed.stage == Stage::Destroyed {
            return Err(ScenarioError::ActivityDestroyed {
                class: self.class_name.clone(),
                operation,
            });
        }
        Ok(observed)
    }

    /// Runs `task` on the main thread, bounded by the transition timeout. A main thread that
    /// never picks the task up is reported as a timeout waiting for `waiting_for`.
    fn on_main<R>(&self, waiting_for: &str, task: impl FnOnce() -> R + Send + 'static) -> Result<R, ScenarioError>
    where
        R: Send + 'static,
    {
        self.looper
            .run_on_main_sync_timeout(task, self.settings.transition_timeout())
            .map_err(|err| match err {
                MainThreadError::Timeout(timeout) => self.timeout_error(waiting_for, timeout),
                other => ScenarioError::MainThread(other),
            })
    }

    fn run_on_host<R>(
        &self,
        waiting_for: &str,
        task: impl FnOnce(&dyn ActivityHost) -> Result<R, HostError> + Send + 'static,
    ) -> Result<R, ScenarioError>
    where
        R: Send + 'static,
    {
        let host = Arc::clone(&self.host);
        let outcome = self.on_main(waiting_for, move || task(host.as_ref()))?;
        Ok(outcome?)
    }

    /// Drives `handle` to `target` and waits for the monitor to confirm it.
    fn drive_to(&self, observed: &Observed, target: LifecycleState) -> Result<Observed, ScenarioError> {
        if observed.stage.is_steady() && observed.stage.steady_state() == target {
            return Ok(observed.clone());
        }
        let id = observed.handle.id();
        self.run_on_host(target.as_str(), move |host| host.move_to(id, target))?;
        let timeout = self.settings.transition_timeout();
        let reached = self
            .shared
            .wait_until(timeout, |current| {
                current.handle.id() == id
                    && current.stage.is_steady()
                    && (current.stage.steady_state() == target || current.stage == Stage::Destroyed)
            })
            .ok_or_else(|| self.timeout_error(target.as_str(), timeout))?;
        if reached.stage.steady_state() != target {
            return Err(ScenarioError::ActivityDestroyed {
                class: self.class_name.clone(),
                operation: "move_to_state",
            });
        }
        Ok(reached)
    }

    /// Moves the activity to `target` and blocks until it is there.
    ///
    /// Moving backwards stops or pauses the instance rather than recreating it. DESTROYED finishes
    /// the activity; the scenario stays open so `result()` can still be read.
    pub fn move_to_state(&self, target: LifecycleState) -> Result<(), ScenarioError> {
        let _guard = self.begin("move_to_state")?;
        if !target.is_valid_target() {
            return Err(ScenarioError::InvalidTargetState(target));
        }
        let observed = self.settle()?;
        if observed.stage == Stage::Destroyed {
            if target == LifecycleState::Destroyed {
                return Ok(());
            }
            return Err(ScenarioError::ActivityDestroyed {
                class: self.class_name.clone(),
                operation: "move_to_state",
            });
        }
        debug!(
            scenario = %self.shared.token,
            from = %observed.stage,
            to = %target,
            "moving scenario"
        );
        self.drive_to(&observed, target)?;
        Ok(())
    }

    /// Destroys the current instance and replaces it with a new one in the same state.
    ///
    /// The activity is brought to RESUMED first, recreated by the host, and the new instance is
    /// then moved back to the state the old one was in.
    pub fn recreate(&self) -> Result<(), ScenarioError> {
        let _guard = self.begin("recreate")?;
        let observed = self.settle_alive("recreate")?;
        let previous = observed.stage.steady_state();
        let resumed = self.drive_to(&observed, LifecycleState::Resumed)?;
        let old_id = resumed.handle.id();
        info!(scenario = %self.shared.token, activity = %resumed.handle, state = %previous, "recreating activity");

        self.run_on_host("RESUMED after recreation", move |host| host.recreate(old_id))?;
        let timeout = self.settings.transition_timeout();
        let fresh = self
            .shared
            .wait_until(timeout, |current| {
                current.handle.id() != old_id && matches!(current.stage, Stage::Resumed | Stage::Destroyed)
            })
            .ok_or_else(|| self.timeout_error("RESUMED after recreation", timeout))?;
        if fresh.stage == Stage::Destroyed {
            return Err(ScenarioError::ActivityDestroyed {
                class: self.class_name.clone(),
                operation: "recreate",
            });
        }
        self.drive_to(&fresh, previous)?;
        Ok(())
    }

    /// Runs `action` on the main thread with the current instance.
    ///
    /// A panic inside `action` unwinds out of this call with the original payload.
    pub fn on_activity(&self, action: impl FnOnce(&mut A) + Send + 'static) -> Result<(), ScenarioError> {
        self.with_activity(action)
    }

    /// Like [`on_activity`](Self::on_activity), returning the action's result.
    pub fn with_activity<R>(&self, action: impl FnOnce(&mut A) -> R + Send + 'static) -> Result<R, ScenarioError>
    where
        R: Send + 'static,
    {
        let _guard = self.begin("on_activity")?;
        let observed = self.settle_alive("on_activity")?;
        let handle = observed.handle;
        let waiting_for = format!("{} (on_activity)", observed.stage);
        let outcome = self.on_main(&waiting_for, move || {
            let mut component = handle.component();
            match downcast_activity::<A>(&mut **component) {
                Some(activity) => Ok(action(activity)),
                None => Err(ScenarioError::ActivityTypeMismatch {
                    expected: type_name::<A>(),
                    actual: handle.class_name().to_string(),
                }),
            }
        })?;
        outcome
    }

    /// Coarse state of the current instance once it has settled.
    pub fn state(&self) -> Result<LifecycleState, ScenarioError> {
        Ok(self.settle()?.stage.steady_state())
    }

    /// Last stage the monitor reported for the current instance.
    pub fn stage(&self) -> Option<Stage> {
        self.shared.snapshot().map(|observed| observed.stage)
    }

    /// Id of the instance the scenario currently follows. Changes on every recreation.
    pub fn activity_id(&self) -> Option<ActivityId> {
        self.shared.snapshot().map(|observed| observed.handle.id())
    }

    /// Blocks until the activity has finished and returns what it set with `set_result`.
    pub fn result(&self) -> Result<ActivityResult, ScenarioError> {
        let timeout = self.settings.transition_timeout();
        let finished = self
            .shared
            .wait_until(timeout, |observed| observed.stage == Stage::Destroyed)
            .ok_or_else(|| self.timeout_error("the activity to finish", timeout))?;
        Ok(finished.handle.result())
    }

    /// Finishes the activity and detaches from the monitor. Closing twice is a no-op.
    pub fn close(&self) -> Result<(), ScenarioError> {
        if self.is_closed() {
            return Ok(());
        }
        let guard = match self.begin("close") {
            Ok(guard) => guard,
            Err(ScenarioError::Closed { .. }) => return Ok(()),
            Err(err) => return Err(err),
        };
        let outcome = self.destroy_current();
        self.closed.store(true, Ordering::SeqCst);
        self.monitor.remove_lifecycle_callback(&self.callback());
        drop(guard);
        debug!(scenario = %self.shared.token, "scenario closed");
        outcome
    }

    fn destroy_current(&self) -> Result<(), ScenarioError> {
        let observed = self.settle()?;
        if observed.stage == Stage::Destroyed {
            return Ok(());
        }
        self.drive_to(&observed, LifecycleState::Destroyed)?;
        Ok(())
    }
}

impl<A: Activity> Drop for ActivityScenario<A> {
    fn drop(&mut self) {
        if self.is_closed() {
            return;
        }
        if let Err(err) = self.close() {
            warn!(activity = %self.class_name, error = %err, "failed to close scenario on drop");
        }
    }
}
