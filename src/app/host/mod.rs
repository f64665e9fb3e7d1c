mod activity;
mod in_process;
mod intent;
mod looper;

pub use activity::{
    Activity, ActivityContext, ActivityHandle, ActivityId, ActivityResult, AsAny, FinishRequester,
    RESULT_CANCELED, RESULT_OK,
};
pub(crate) use activity::downcast_activity;
pub use in_process::{ActivityHost, ActivityRegistry, InProcessHost};
pub use intent::{activity_class_name, simple_class_name, Intent};
pub use looper::{panic_message, MainLooper};
