use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde::{Deserialize, Serialize};

use crate::app::events::Bundle;

use super::intent::{simple_class_name, Intent};

pub const RESULT_OK: i32 = -1;
pub const RESULT_CANCELED: i32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActivityId(pub u64);

impl fmt::Display for ActivityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityResult {
    pub result_code: i32,
    pub data: Bundle,
}

impl Default for ActivityResult {
    fn default() -> Self {
        Self {
            result_code: RESULT_CANCELED,
            data: Bundle::new(),
        }
    }
}

pub trait AsAny {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A UI component whose lifecycle is driven by the host. Callbacks always run on the main thread.
pub trait Activity: AsAny + Send + 'static {
    fn on_create(&mut self, _context: &ActivityContext, _saved_state: Option<&Bundle>) {}
    fn on_start(&mut self) {}
    fn on_resume(&mut self) {}
    fn on_pause(&mut self) {}
    fn on_stop(&mut self) {}
    fn on_destroy(&mut self) {}
    fn on_save_instance_state(&mut self, _out_state: &mut Bundle) {}
}

pub(crate) fn downcast_activity<A: Activity>(component: &mut dyn Activity) -> Option<&mut A> {
    component.as_any_mut().downcast_mut::<A>()
}

pub struct ActivityHandle {
    id: ActivityId,
    class_name: String,
    intent: Intent,
    component: Mutex<Box<dyn Activity>>,
    finishing: AtomicBool,
    result: Mutex<ActivityResult>,
}

impl ActivityHandle {
    pub fn new(id: ActivityId, intent: Intent, component: Box<dyn Activity>) -> Self {
        Self {
            id,
            class_name: intent.component().unwrap_or_default().to_string(),
            intent,
            component: Mutex::new(component),
            finishing: AtomicBool::new(false),
            result: Mutex::new(ActivityResult::default()),
        }
    }

    pub fn id(&self) -> ActivityId {
        self.id
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn simple_name(&self) -> &str {
        simple_class_name(&self.class_name)
    }

    pub fn intent(&self) -> &Intent {
        &self.intent
    }

    pub fn is_finishing(&self) -> bool {
        self.finishing.load(Ordering::SeqCst)
    }

    pub fn result(&self) -> ActivityResult {
        self.result
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn mark_finishing(&self) {
        self.finishing.store(true, Ordering::SeqCst);
    }

    pub(crate) fn set_result(&self, result: ActivityResult) {
        *self.result.lock().unwrap_or_else(PoisonError::into_inner) = result;
    }

    /// Locks the component. Must only be used on the main thread.
    pub(crate) fn component(&self) -> MutexGuard<'_, Box<dyn Activity>> {
        self.component.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Display for ActivityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.simple_name(), self.id)
    }
}

impl fmt::Debug for ActivityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActivityHandle")
            .field("id", &self.id)
            .field("class_name", &self.class_name)
            .field("finishing", &self.is_finishing())
            .finish()
    }
}

pub type FinishRequester = Arc<dyn Fn(ActivityId) + Send + Sync>;

/// Handed to `Activity::on_create`; activities may keep a clone to finish themselves later.
#[derive(Clone)]
pub struct ActivityContext {
    activity: Weak<ActivityHandle>,
    request_finish: FinishRequester,
}

impl ActivityContext {
    pub fn new(activity: &Arc<ActivityHandle>, request_finish: FinishRequester) -> Self {
        Self {
            activity: Arc::downgrade(activity),
            request_finish,
        }
    }

    pub fn intent(&self) -> Option<Intent> {
        self.activity.upgrade().map(|handle| handle.intent().clone())
    }

    pub fn set_result(&self, result_code: i32, data: Bundle) {
        if let Some(handle) = self.activity.upgrade() {
            handle.set_result(ActivityResult { result_code, data });
        }
    }

    /// Marks the activity finishing; the host destroys it asynchronously on the main thread.
    pub fn finish(&self) {
        if let Some(handle) = self.activity.upgrade() {
            if !handle.is_finishing() {
                handle.mark_finishing();
                (self.request_finish)(handle.id());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Counter {
        value: u32,
    }

    impl Activity for Counter {}

    #[derive(Default)]
    struct Other;

    impl Activity for Other {}

    #[test]
    fn downcasts_to_concrete_activity() {
        let handle = ActivityHandle::new(
            ActivityId(1),
            Intent::for_activity::<Counter>(),
            Box::new(Counter::default()),
        );
        let mut component = handle.component();
        downcast_activity::<Counter>(&mut **component)
            .expect("counter")
            .value += 2;
        assert_eq!(downcast_activity::<Counter>(&mut **component).expect("counter").value, 2);
        assert!(downcast_activity::<Other>(&mut **component).is_none());
    }

    #[test]
    fn finish_requests_once_and_records_result() {
        let handle = Arc::new(ActivityHandle::new(
            ActivityId(9),
            Intent::for_activity::<Counter>(),
            Box::new(Counter::default()),
        ));
        let requests = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&requests);
        let context = ActivityContext::new(
            &handle,
            Arc::new(move |_id| {
                seen.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let mut data = Bundle::new();
        data.put_string("answer", "42");
        context.set_result(RESULT_OK, data.clone());
        context.finish();
        context.finish();

        assert_eq!(requests.load(Ordering::SeqCst), 1);
        assert!(handle.is_finishing());
        assert_eq!(
            handle.result(),
            ActivityResult {
                result_code: RESULT_OK,
                data
            }
        );
        assert_eq!(handle.to_string(), "Counter#9");
    }
}
