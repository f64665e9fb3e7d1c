use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::thread::{self, ThreadId};

use tracing::{debug, warn};

use crate::app::error::MonitorError;
use crate::app::host::{ActivityHandle, ActivityId};

use super::stage::Stage;

/// Receives every lifecycle transition of every activity in the process, on the main thread.
pub trait LifecycleCallback: Send + Sync {
    fn on_lifecycle_changed(&self, activity: &Arc<ActivityHandle>, stage: Stage);
}

struct TrackedActivity {
    handle: Weak<ActivityHandle>,
    stage: Stage,
}

#[derive(Default)]
struct Registry {
    activities: HashMap<ActivityId, TrackedActivity>,
    callbacks: Vec<Weak<dyn LifecycleCallback>>,
}

/// Process-wide map of live activities to their current stage.
///
/// Only the main thread writes; any thread may read. Activities and callbacks are held weakly so
/// neither destroyed instances nor abandoned observers accumulate.
pub struct LifecycleMonitor {
    main_thread: ThreadId,
    registry: RwLock<Registry>,
}

impl LifecycleMonitor {
    pub fn new(main_thread: ThreadId) -> Self {
        Self {
            main_thread,
            registry: RwLock::new(Registry::default()),
        }
    }

    pub fn add_lifecycle_callback(&self, callback: &Arc<dyn LifecycleCallback>) {
        let mut registry = self.write();
        registry.callbacks.retain(|existing| existing.strong_count() > 0);
        if !registry
            .callbacks
            .iter()
            .any(|existing| same_callback(existing, callback))
        {
            registry.callbacks.push(Arc::downgrade(callback));
        }
    }

    pub fn remove_lifecycle_callback(&self, callback: &Arc<dyn LifecycleCallback>) {
        let mut registry = self.write();
        registry
            .callbacks
            .retain(|existing| existing.strong_count() > 0 && !same_callback(existing, callback));
    }

    pub fn callback_count(&self) -> usize {
        self.read()
            .callbacks
            .iter()
            .filter(|callback| callback.strong_count() > 0)
            .count()
    }

    /// Records `stage` for `activity` and notifies callbacks in registration order.
    ///
    /// Callbacks run on a snapshot taken after the update, outside the lock, so they may add or
    /// remove callbacks (including themselves) without deadlocking.
    pub fn signal_lifecycle_change(
        &self,
        activity: &Arc<ActivityHandle>,
        stage: Stage,
    ) -> Result<(), MonitorError> {
        self.ensure_main_thread("signal_lifecycle_change")?;
        let callbacks = {
            let mut registry = self.write();
            registry
                .activities
                .retain(|_, tracked| tracked.handle.strong_count() > 0);
            match registry.activities.get_mut(&activity.id()) {
                Some(tracked) => {
                    if tracked.stage == Stage::Destroyed {
                        return Err(MonitorError::AfterDestroyed {
                            activity: activity.to_string(),
                            stage,
                        });
                    }
                    if !tracked.stage.can_transition_to(stage) {
                        warn!(
                            activity = %activity,
                            from = %tracked.stage,
                            to = %stage,
                            "unexpected lifecycle transition"
                        );
                    }
                    tracked.stage = stage;
                }
                None => {
                    registry.activities.insert(
                        activity.id(),
                        TrackedActivity {
                            handle: Arc::downgrade(activity),
                            stage,
                        },
                    );
                }
            }
            registry.callbacks.retain(|callback| callback.strong_count() > 0);
            registry
                .callbacks
                .iter()
                .filter_map(Weak::upgrade)
                .collect::<Vec<_>>()
        };

        debug!(activity = %activity, stage = %stage, callbacks = callbacks.len(), "lifecycle change");
        for callback in callbacks {
            callback.on_lifecycle_changed(activity, stage);
        }
        Ok(())
    }

    pub fn lifecycle_stage_of(&self, activity: &ActivityHandle) -> Result<Stage, MonitorError> {
        self.ensure_main_thread("lifecycle_stage_of")?;
        self.read()
            .activities
            .get(&activity.id())
            .map(|tracked| tracked.stage)
            .ok_or_else(|| MonitorError::UnknownActivity(activity.to_string()))
    }

    pub fn activities_in_stage(&self, stage: Stage) -> Vec<Arc<ActivityHandle>> {
        self.read()
            .activities
            .values()
            .filter(|tracked| tracked.stage == stage)
            .filter_map(|tracked| tracked.handle.upgrade())
            .collect()
    }

    pub fn is_main_thread(&self) -> bool {
        thread::current().id() == self.main_thread
    }

    fn ensure_main_thread(&self, operation: &'static str) -> Result<(), MonitorError> {
        if self.is_main_thread() {
            Ok(())
        } else {
            Err(MonitorError::NotMainThread { operation })
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Registry> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Registry> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn same_callback(existing: &Weak<dyn LifecycleCallback>, candidate: &Arc<dyn LifecycleCallback>) -> bool {
    std::ptr::addr_eq(existing.as_ptr(), Arc::as_ptr(candidate))
}
