use serde::Serialize;
use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::app::lifecycle::{LifecycleState, Stage};

#[derive(Debug, Clone, Serialize)]
pub struct AppError {
    pub error: String,
    pub code: String,
    pub trace_id: String,
}

impl AppError {
    pub fn new(code: impl Into<String>, message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self {
            error: message.into(),
            code: code.into(),
            trace_id: trace_id.into(),
        }
    }

    pub fn validation(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new("ERR_VALIDATION", message, trace_id)
    }

    pub fn dependency(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new("ERR_DEPENDENCY", message, trace_id)
    }

    pub fn system(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new("ERR_SYSTEM", message, trace_id)
    }

    pub fn timeout(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new("ERR_TIMEOUT", message, trace_id)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.error, self.code)
    }
}

impl std::error::Error for AppError {}

/// Failures of the activity scenario. Every variant is fatal to the calling test.
#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("failed to launch {class}: {reason}")]
    Launch { class: String, reason: String },

    #[error("scenario for {class} is already closed")]
    Closed { class: String },

    #[error("timed out after {timeout:?} waiting for {class} to reach {waiting_for}")]
    Timeout {
        class: String,
        waiting_for: String,
        timeout: Duration,
    },

    #[error("scenario for {class} has not been launched")]
    NotLaunched { class: String },

    #[error("scenario for {class} was already launched in this test")]
    AlreadyLaunched { class: String },

    #[error("reentrant call to {operation} while another scenario operation is in flight")]
    Reentrant { operation: &'static str },

    #[error("cannot {operation}: {class} has been destroyed already")]
    ActivityDestroyed {
        class: String,
        operation: &'static str,
    },

    #[error("invalid target state {0:?}; expected CREATED, STARTED, RESUMED or DESTROYED")]
    InvalidTargetState(LifecycleState),

    #[error("activity {actual} is not an instance of {expected}")]
    ActivityTypeMismatch {
        expected: &'static str,
        actual: String,
    },

    #[error(transparent)]
    MainThread(#[from] MainThreadError),

    #[error(transparent)]
    Host(#[from] HostError),
}

#[derive(Debug, Error)]
pub enum MainThreadError {
    #[error("main thread did not run the posted task within {0:?}")]
    Timeout(Duration),

    #[error("main looper has shut down")]
    Stopped,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MonitorError {
    #[error("{operation} must be called on the main thread")]
    NotMainThread { operation: &'static str },

    #[error("activity {0} is not tracked by the lifecycle monitor")]
    UnknownActivity(String),

    #[error("activity {activity} reported {stage:?} after DESTROYED")]
    AfterDestroyed { activity: String, stage: Stage },
}

#[derive(Debug, Error)]
pub enum HostError {
    #[error("no activity registered for component {0}")]
    ActivityNotFound(String),

    #[error("intent has no component")]
    MissingComponent,

    #[error("activity instance {0} is not alive")]
    UnknownInstance(u64),

    #[error(transparent)]
    Monitor(#[from] MonitorError),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParcelError {
    #[error("unknown {kind} discriminator: {value}")]
    UnknownDiscriminator { kind: &'static str, value: String },

    #[error("unknown bundle value tag {0}")]
    UnknownValueTag(i32),

    #[error("parcel truncated while reading {0}")]
    Truncated(&'static str),

    #[error("negative length {0} in parcel")]
    NegativeLength(i32),

    #[error("unexpected null {0}")]
    UnexpectedNull(&'static str),

    #[error("invalid utf-8 in parcel string")]
    InvalidUtf8,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("remote service {0} is not published")]
    ServiceNotFound(String),

    #[error("remote service died: {0}")]
    DeadObject(String),

    #[error("unknown transaction code {0}")]
    UnknownTransaction(u32),

    #[error("remote call rejected: {0}")]
    Rejected(String),
}

/// Reportable failures of the test event client. Callers may log and continue.
#[derive(Debug, Error)]
pub enum TestEventClientError {
    #[error("not connected to {0}")]
    NotConnected(String),

    #[error("timed out after {timeout:?} binding to {service}")]
    ConnectTimeout { service: String, timeout: Duration },

    #[error("failed to send {event} to {service}: {source}")]
    Transport {
        service: String,
        event: String,
        #[source]
        source: TransportError,
    },

    #[error(transparent)]
    Parcel(#[from] ParcelError),
}

/// Why the test event client could not be set up.
#[derive(Debug, Error)]
pub enum TestEventClientConnectError {
    #[error(transparent)]
    Args(#[from] OrchestratorArgsError),

    #[error(transparent)]
    Client(#[from] TestEventClientError),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OrchestratorArgsError {
    #[error("{0} requires a value")]
    MissingValue(&'static str),

    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },

    #[error("{0}")]
    Conflict(String),
}

#[derive(Debug, Error)]
pub enum WebError {
    #[error("atom failed with status {status}: {message}")]
    ScriptFailed { status: i32, message: String },

    #[error("no such element: {0}")]
    NoSuchElement(String),

    #[error("stale element reference; call reset() after recreating the activity")]
    StaleElement,

    #[error("no element selected; call with_element() first")]
    NoElement,

    #[error("malformed evaluation result: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("web content check failed: {0}")]
    CheckFailed(String),

    #[error(transparent)]
    Scenario(#[from] ScenarioError),
}
