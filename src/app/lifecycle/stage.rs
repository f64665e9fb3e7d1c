use serde::{Deserialize, Serialize};
use std::fmt;

/// Fine-grained stage of a single activity instance as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    PreOnCreate,
    Created,
    Started,
    Resumed,
    Paused,
    Stopped,
    Destroyed,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::PreOnCreate => "PRE_ON_CREATE",
            Stage::Created => "CREATED",
            Stage::Started => "STARTED",
            Stage::Resumed => "RESUMED",
            Stage::Paused => "PAUSED",
            Stage::Stopped => "STOPPED",
            Stage::Destroyed => "DESTROYED",
        }
    }

    /// Stages an activity can rest in without the host driving it further.
    pub fn is_steady(&self) -> bool {
        matches!(
            self,
            Stage::Resumed | Stage::Paused | Stage::Stopped | Stage::Destroyed
        )
    }

    pub fn steady_state(&self) -> LifecycleState {
        match self {
            Stage::PreOnCreate => LifecycleState::Initialized,
            Stage::Created | Stage::Stopped => LifecycleState::Created,
            Stage::Started | Stage::Paused => LifecycleState::Started,
            Stage::Resumed => LifecycleState::Resumed,
            Stage::Destroyed => LifecycleState::Destroyed,
        }
    }

    /// Whether `next` may follow `self` for the same instance.
    pub fn can_transition_to(&self, next: Stage) -> bool {
        use Stage::*;
        match (self, next) {
            (Destroyed, _) => false,
            (_, Destroyed) => !matches!(self, Resumed | Paused | Started),
            (PreOnCreate, Created) => true,
            (Created, Started) | (Stopped, Started) => true,
            (Started, Resumed) | (Paused, Resumed) => true,
            (Started, Stopped) | (Paused, Stopped) => true,
            (Resumed, Paused) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse lifecycle state a scenario is driven to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
    Destroyed,
    Initialized,
    Created,
    Started,
    Resumed,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Destroyed => "DESTROYED",
            LifecycleState::Initialized => "INITIALIZED",
            LifecycleState::Created => "CREATED",
            LifecycleState::Started => "STARTED",
            LifecycleState::Resumed => "RESUMED",
        }
    }

    pub fn is_valid_target(&self) -> bool {
        !matches!(self, LifecycleState::Initialized)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
