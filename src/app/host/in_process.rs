use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::{debug, info, warn};

use crate::app::error::HostError;
use crate::app::events::Bundle;
use crate::app::lifecycle::{LifecycleMonitor, LifecycleState, Stage};

use super::activity::{Activity, ActivityContext, ActivityHandle, ActivityId, FinishRequester};
use super::intent::{activity_class_name, Intent};
use super::looper::MainLooper;

/// Host runtime operations. Every method must be called on the main thread.
pub trait ActivityHost: Send + Sync {
    fn start_activity(&self, intent: &Intent) -> Result<ActivityId, HostError>;

    /// Drives the instance to the resting stage of `state` (STOPPED for CREATED, PAUSED for
    /// STARTED), passing through whatever intermediate stages the platform requires.
    fn move_to(&self, id: ActivityId, state: LifecycleState) -> Result<(), HostError>;

    /// Destroys the instance and creates a new one from the same intent and saved state.
    fn recreate(&self, id: ActivityId) -> Result<ActivityId, HostError>;

    fn finish(&self, id: ActivityId) -> Result<(), HostError>;
}

type ActivityFactory = Arc<dyn Fn() -> Box<dyn Activity> + Send + Sync>;

/// Activities the in-process host is able to instantiate, keyed by class name.
#[derive(Clone, Default)]
pub struct ActivityRegistry {
    factories: HashMap<String, ActivityFactory>,
}

impl ActivityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<A: Activity + Default>(mut self) -> Self {
        self.factories.insert(
            activity_class_name::<A>(),
            Arc::new(|| Box::new(A::default()) as Box<dyn Activity>),
        );
        self
    }

    pub fn register_with(
        mut self,
        class_name: impl Into<String>,
        factory: impl Fn() -> Box<dyn Activity> + Send + Sync + 'static,
    ) -> Self {
        self.factories.insert(class_name.into(), Arc::new(factory));
        self
    }

    pub fn contains(&self, class_name: &str) -> bool {
        self.factories.contains_key(class_name)
    }
}

struct Hosted {
    handle: Arc<ActivityHandle>,
    stage: Stage,
}

/// Host runtime that runs activities inside this process on the main looper.
pub struct InProcessHost {
    monitor: Arc<LifecycleMonitor>,
    looper: Arc<MainLooper>,
    registry: ActivityRegistry,
    hosted: Mutex<HashMap<ActivityId, Hosted>>,
    next_id: AtomicU64,
    this: Weak<InProcessHost>,
}

impl InProcessHost {
    pub fn new(
        monitor: Arc<LifecycleMonitor>,
        looper: Arc<MainLooper>,
        registry: ActivityRegistry,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            monitor,
            looper,
            registry,
            hosted: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            this: this.clone(),
        })
    }

    pub fn live_activity_count(&self) -> usize {
        self.hosted().len()
    }

    fn hosted(&self) -> MutexGuard<'_, HashMap<ActivityId, Hosted>> {
        self.hosted.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn finish_requester(&self) -> FinishRequester {
        let host = self.this.clone();
        let looper = Arc::clone(&self.looper);
        Arc::new(move |id| {
            let host = host.clone();
            let posted = looper.post(move || {
                if let Some(host) = host.upgrade() {
                    if let Err(err) = host.finish(id) {
                        warn!(activity = %id, error = %err, "finish request failed");
                    }
                }
            });
            if let Err(err) = posted {
                warn!(activity = %id, error = %err, "failed to post finish request");
            }
        })
    }

    fn instantiate(&self, intent: &Intent) -> Result<Arc<ActivityHandle>, HostError> {
        let component = intent.component().ok_or(HostError::MissingComponent)?;
        let factory = self
            .registry
            .factories
            .get(component)
            .ok_or_else(|| HostError::ActivityNotFound(component.to_string()))?;
        let id = ActivityId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let handle = Arc::new(ActivityHandle::new(id, intent.clone(), factory()));
        self.hosted().insert(
            id,
            Hosted {
                handle: Arc::clone(&handle),
                stage: Stage::PreOnCreate,
            },
        );
        Ok(handle)
    }

    fn lookup(&self, id: ActivityId) -> Result<(Arc<ActivityHandle>, Stage), HostError> {
        self.hosted()
            .get(&id)
            .map(|hosted| (Arc::clone(&hosted.handle), hosted.stage))
            .ok_or(HostError::UnknownInstance(id.0))
    }

    /// Runs the callback for `stage`, then reports it. PRE_ON_CREATE is reported before
    /// `on_create` runs, matching the platform's instrumentation hooks.
    fn enter(
        &self,
        handle: &Arc<ActivityHandle>,
        stage: Stage,
        saved_state: Option<&Bundle>,
    ) -> Result<(), HostError> {
        {
            let mut component = handle.component();
            match stage {
                Stage::PreOnCreate => {}
                Stage::Created => {
                    let context = ActivityContext::new(handle, self.finish_requester());
                    component.on_create(&context, saved_state);
                }
                Stage::Started => component.on_start(),
                Stage::Resumed => component.on_resume(),
                Stage::Paused => component.on_pause(),
                Stage::Stopped => component.on_stop(),
                Stage::Destroyed => component.on_destroy(),
            }
        }
        {
            let mut hosted = self.hosted();
            if stage == Stage::Destroyed {
                hosted.remove(&handle.id());
            } else if let Some(entry) = hosted.get_mut(&handle.id()) {
                entry.stage = stage;
            }
        }
        self.monitor.signal_lifecycle_change(handle, stage)?;
        Ok(())
    }

    fn drive(
        &self,
        handle: &Arc<ActivityHandle>,
        mut current: Stage,
        target: LifecycleState,
        saved_state: Option<&Bundle>,
    ) -> Result<Stage, HostError> {
        while let Some(next) = next_stage(current, target) {
            // A finish requested mid-launch wins over the remaining forward transitions.
            if handle.is_finishing() && target != LifecycleState::Destroyed {
                break;
            }
            self.enter(handle, next, saved_state)?;
            current = next;
        }
        Ok(current)
    }
}

impl ActivityHost for InProcessHost {
    fn start_activity(&self, intent: &Intent) -> Result<ActivityId, HostError> {
        let handle = self.instantiate(intent)?;
        info!(activity = %handle, "starting activity");
        self.enter(&handle, Stage::PreOnCreate, None)?;
        self.drive(&handle, Stage::PreOnCreate, LifecycleState::Resumed, None)?;
        Ok(handle.id())
    }

    fn move_to(&self, id: ActivityId, state: LifecycleState) -> Result<(), HostError> {
        let (handle, current) = self.lookup(id)?;
        debug!(activity = %handle, from = %current, to = %state, "moving activity");
        if state == LifecycleState::Destroyed {
            handle.mark_finishing();
        }
        self.drive(&handle, current, state, None)?;
        Ok(())
    }

    fn recreate(&self, id: ActivityId) -> Result<ActivityId, HostError> {
        let (old, current) = self.lookup(id)?;
        info!(activity = %old, "recreating activity");
        self.drive(&old, current, LifecycleState::Created, None)?;
        let mut saved_state = Bundle::new();
        old.component().on_save_instance_state(&mut saved_state);
        self.enter(&old, Stage::Destroyed, None)?;

        let fresh = self.instantiate(old.intent())?;
        self.enter(&fresh, Stage::PreOnCreate, None)?;
        self.drive(
            &fresh,
            Stage::PreOnCreate,
            LifecycleState::Resumed,
            Some(&saved_state),
        )?;
        Ok(fresh.id())
    }

    fn finish(&self, id: ActivityId) -> Result<(), HostError> {
        let (handle, current) = match self.lookup(id) {
            Ok(found) => found,
            // Already destroyed, e.g. a finish() racing a scenario close.
            Err(HostError::UnknownInstance(_)) => return Ok(()),
            Err(err) => return Err(err),
        };
        handle.mark_finishing();
        self.drive(&handle, current, LifecycleState::Destroyed, None)?;
        Ok(())
    }
}

/// Next platform stage on the way from `current` to the resting stage of `target`.
fn next_stage(current: Stage, target: LifecycleState) -> Option<Stage> {
    use Stage::*;
    match (target, current) {
        (_, Destroyed) | (LifecycleState::Initialized, _) => None,
        (LifecycleState::Destroyed, PreOnCreate | Created | Stopped) => Some(Destroyed),
        (LifecycleState::Destroyed, Started | Paused) => Some(Stopped),
        (LifecycleState::Destroyed, Resumed) => Some(Paused),
        (_, PreOnCreate) => Some(Created),
        (LifecycleState::Resumed, Created | Stopped) => Some(Started),
        (LifecycleState::Resumed, Started | Paused) => Some(Resumed),
        (LifecycleState::Resumed, Resumed) => None,
        (LifecycleState::Started, Created | Stopped) => Some(Started),
        (LifecycleState::Started, Started) => Some(Resumed),
        (LifecycleState::Started, Resumed) => Some(Paused),
        (LifecycleState::Started, Paused) => None,
        (LifecycleState::Created, Created) => Some(Started),
        (LifecycleState::Created, Started | Paused) => Some(Stopped),
        (LifecycleState::Created, Resumed) => Some(Paused),
        (LifecycleState::Created, Stopped) => None,
    }
}
