mod monitor;
mod stage;

pub use monitor::{LifecycleCallback, LifecycleMonitor};
pub use stage::{LifecycleState, Stage};
