pub mod args;
pub mod collector;
pub mod connection;
pub mod listener;
pub mod plan;
pub mod transport;

pub use args::{is_single_method_test, EventMode, OrchestratorArgs, ProtocolVersion, RunnerArgs};
pub use collector::{DiscoveryCollector, LegacyOrchestratorService, RunEventCollector, RunSummary, TestStatus};
pub use connection::{TestEventClient, TestEventServiceConnection};
pub use listener::{OrchestratedInstrumentationListener, RunListener, TestDiscovery, TestRunEventListener};
pub use transport::{RemoteService, ServiceRegistry};
