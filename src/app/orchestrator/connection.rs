use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::app::config::OrchestratorSettings;
use crate::app::error::{TestEventClientConnectError, TestEventClientError};
use crate::app::events::{Bundle, Parcel, Parcelable, TestDiscoveryEvent, TestRunEvent};
use crate::app::services::usage::{UsageTracker, ORCHESTRATOR_USAGE};

use super::args::{EventMode, OrchestratorArgs, ProtocolVersion, RunnerArgs};
use super::listener::{OrchestratedInstrumentationListener, RunListener, TestDiscovery, TestRunEventListener};
use super::transport::{RemoteService, ServiceRegistry};

/// v1: register one discovered test id.
pub const TRANSACTION_ADD_TEST: u32 = 1;
/// v1: deliver a notification bundle.
pub const TRANSACTION_SEND_TEST_NOTIFICATION: u32 = 2;
/// v2: deliver one encoded event.
pub const TRANSACTION_SEND_EVENT: u32 = 1;

/// Receives discovery events. Implemented by both protocol generations.
pub trait TestDiscoveryEventSink: Send + Sync {
    fn send_discovery_event(&self, event: &TestDiscoveryEvent) -> Result<(), TestEventClientError>;
}

/// Receives run events of a v2 orchestrator.
pub trait TestRunEventSink: Send + Sync {
    fn send_run_event(&self, event: &TestRunEvent) -> Result<(), TestEventClientError>;
}

/// Receives v1 notification bundles.
pub trait TestNotificationSink: Send + Sync {
    fn send_test_notification(&self, notification: &Bundle) -> Result<(), TestEventClientError>;
}

/// Connection to one named orchestrator service.
pub struct TestEventServiceConnection {
    service_name: String,
    version: ProtocolVersion,
    registry: Arc<ServiceRegistry>,
    remote: RwLock<Option<Arc<dyn RemoteService>>>,
}

impl TestEventServiceConnection {
    pub fn new(service_name: impl Into<String>, version: ProtocolVersion, registry: Arc<ServiceRegistry>) -> Self {
        Self {
            service_name: service_name.into(),
            version,
            registry,
            remote: RwLock::new(None),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    /// Binds to the service, waiting up to `timeout` for it to be published.
    pub fn connect(&self, timeout: Duration) -> Result<(), TestEventClientError> {
        let remote = self.registry.wait_for(&self.service_name, timeout).ok_or_else(|| {
            TestEventClientError::ConnectTimeout {
                service: self.service_name.clone(),
                timeout,
            }
        })?;
        info!(service = %self.service_name, version = ?self.version, "connected to orchestrator");
        *self.remote.write().unwrap_or_else(PoisonError::into_inner) = Some(remote);
        Ok(())
    }

    pub fn disconnect(&self) {
        self.remote
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    pub fn is_connected(&self) -> bool {
        self.remote
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Sends one transaction. `event` only names the payload in errors and logs.
    pub fn send(&self, code: u32, event: &str, payload: &[u8]) -> Result<(), TestEventClientError> {
        let remote = self
            .remote
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| TestEventClientError::NotConnected(self.service_name.clone()))?;
        debug!(service = %self.service_name, event, bytes = payload.len(), "sending");
        remote
            .transact(code, payload)
            .map(|_| ())
            .map_err(|source| TestEventClientError::Transport {
                service: self.service_name.clone(),
                event: event.to_string(),
                source,
            })
    }

    /// v1: registers a discovered test by its `class#method` id.
    pub fn add_test(&self, test_id: &str) -> Result<(), TestEventClientError> {
        let mut parcel = Parcel::new();
        parcel.write_str(test_id);
        self.send(TRANSACTION_ADD_TEST, "addTest", parcel.as_bytes())
    }
}

impl TestDiscoveryEventSink for TestEventServiceConnection {
    fn send_discovery_event(&self, event: &TestDiscoveryEvent) -> Result<(), TestEventClientError> {
        match self.version {
            ProtocolVersion::V2 => self.send(TRANSACTION_SEND_EVENT, event.kind(), &event.to_parcel()),
            // v1 only learns about the tests themselves.
            ProtocolVersion::V1 => match event {
                TestDiscoveryEvent::TestFound { test_case } => self.add_test(&test_case.test_id()),
                TestDiscoveryEvent::TestDiscoveryError { error } => {
                    warn!(
                        service = %self.service_name,
                        error = ?error.error_message,
                        "test discovery error cannot be reported over v1"
                    );
                    Ok(())
                }
                TestDiscoveryEvent::TestDiscoveryStarted | TestDiscoveryEvent::TestDiscoveryFinished => Ok(()),
            },
        }
    }
}

impl TestRunEventSink for TestEventServiceConnection {
    fn send_run_event(&self, event: &TestRunEvent) -> Result<(), TestEventClientError> {
        self.send(TRANSACTION_SEND_EVENT, event.kind(), &event.to_parcel())
    }
}

impl TestNotificationSink for TestEventServiceConnection {
    fn send_test_notification(&self, notification: &Bundle) -> Result<(), TestEventClientError> {
        let event = notification
            .get_string(super::listener::KEY_TEST_EVENT)
            .unwrap_or("notification")
            .to_string();
        self.send(TRANSACTION_SEND_TEST_NOTIFICATION, &event, &notification.to_parcel())
    }
}

/// Entry point for the test process: resolves the runner arguments, connects to the chosen
/// service, and hands out the matching listener or discovery driver.
pub struct TestEventClient {
    args: Option<OrchestratorArgs>,
    connection: Option<Arc<TestEventServiceConnection>>,
}

impl TestEventClient {
    pub fn disabled() -> Self {
        Self {
            args: None,
            connection: None,
        }
    }

    pub fn connect(
        runner_args: &RunnerArgs,
        registry: &Arc<ServiceRegistry>,
        settings: &OrchestratorSettings,
        usage: &dyn UsageTracker,
    ) -> Result<Self, TestEventClientConnectError> {
        let Some(args) = OrchestratorArgs::resolve(runner_args)? else {
            return Ok(Self::disabled());
        };
        usage.track_usage(ORCHESTRATOR_USAGE, env!("CARGO_PKG_VERSION"));
        let connection = Arc::new(TestEventServiceConnection::new(
            args.service.clone(),
            args.version,
            Arc::clone(registry),
        ));
        connection.connect(settings.connect_timeout())?;
        Ok(Self {
            args: Some(args),
            connection: Some(connection),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.args.is_some()
    }

    pub fn args(&self) -> Option<&OrchestratorArgs> {
        self.args.as_ref()
    }

    pub fn connection(&self) -> Option<&Arc<TestEventServiceConnection>> {
        self.connection.as_ref()
    }

    /// Discovery driver when the orchestrator asked for a test listing.
    pub fn discovery(&self) -> Option<TestDiscovery> {
        let args = self.args.as_ref()?;
        let connection = self.connection.as_ref()?;
        if args.mode != EventMode::Discovery {
            return None;
        }
        Some(TestDiscovery::new(Arc::clone(connection) as Arc<dyn TestDiscoveryEventSink>))
    }

    /// Run listener forwarding events in the negotiated protocol.
    pub fn run_listener(&self) -> Option<Box<dyn RunListener>> {
        let args = self.args.as_ref()?;
        let connection = self.connection.as_ref()?;
        if args.mode != EventMode::RunEvents {
            return None;
        }
        Some(match args.version {
            ProtocolVersion::V2 => Box::new(TestRunEventListener::new(
                Arc::clone(connection) as Arc<dyn TestRunEventSink>
            )),
            ProtocolVersion::V1 => Box::new(OrchestratedInstrumentationListener::new(
                Arc::clone(connection) as Arc<dyn TestNotificationSink>,
            )),
        })
    }
}
