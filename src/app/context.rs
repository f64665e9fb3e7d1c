use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::app::config::{validate_config, RunnerConfig};
use crate::app::error::AppError;
use crate::app::host::{ActivityHost, ActivityRegistry, InProcessHost, MainLooper};
use crate::app::lifecycle::LifecycleMonitor;
use crate::app::orchestrator::transport::ServiceRegistry;
use crate::app::services::shell::ShellExecutor;
use crate::app::services::storage::TestStorage;
use crate::app::services::usage::{NoOpUsageTracker, UsageTracker};

const MAIN_THREAD_NAME: &str = "instrumentation-main";

/// Everything a test needs from the instrumentation: the main looper, the lifecycle monitor, the
/// activity host, and the supporting services. Cheap to clone; clones share the same runtime.
#[derive(Clone)]
pub struct InstrumentationContext {
    config: Arc<RunnerConfig>,
    looper: Arc<MainLooper>,
    monitor: Arc<LifecycleMonitor>,
    host: Arc<dyn ActivityHost>,
    services: Arc<ServiceRegistry>,
    storage: Arc<TestStorage>,
    usage: Arc<dyn UsageTracker>,
}

impl InstrumentationContext {
    /// Starts a main looper and hosts the `registry` activities in this process.
    pub fn in_process(config: RunnerConfig, registry: ActivityRegistry) -> Result<Self, AppError> {
        let trace_id = Uuid::new_v4().to_string();
        let config = validate_config(config);
        let looper = Arc::new(
            MainLooper::start(MAIN_THREAD_NAME, config.scenario.main_thread_timeout()).map_err(|err| {
                AppError::system(format!("Failed to start main looper: {err}"), trace_id.clone())
            })?,
        );
        let monitor = Arc::new(LifecycleMonitor::new(looper.main_thread_id()));
        let host = InProcessHost::new(Arc::clone(&monitor), Arc::clone(&looper), registry);
        let storage = TestStorage::new(config.storage.resolved_root());
        info!(
            trace_id = %trace_id,
            storage = %storage.root().display(),
            "instrumentation context ready"
        );
        Ok(Self {
            config: Arc::new(config),
            looper,
            monitor,
            host,
            services: Arc::new(ServiceRegistry::new()),
            storage: Arc::new(storage),
            usage: Arc::new(NoOpUsageTracker),
        })
    }

    pub fn with_usage_tracker(mut self, usage: Arc<dyn UsageTracker>) -> Self {
        self.usage = usage;
        self
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn looper(&self) -> &Arc<MainLooper> {
        &self.looper
    }

    pub fn monitor(&self) -> &Arc<LifecycleMonitor> {
        &self.monitor
    }

    pub fn host(&self) -> &Arc<dyn ActivityHost> {
        &self.host
    }

    pub fn services(&self) -> &Arc<ServiceRegistry> {
        &self.services
    }

    pub fn storage(&self) -> &TestStorage {
        &self.storage
    }

    pub fn usage(&self) -> &dyn UsageTracker {
        self.usage.as_ref()
    }

    pub fn shell(&self) -> ShellExecutor {
        ShellExecutor::new(&self.config.shell)
    }

    /// Flushes usage records and stops the main looper. Scenarios still open afterwards fail
    /// their next operation.
    pub fn shutdown(&self) {
        self.usage.send_usages();
        self.looper.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::fixtures::EmptyActivity;
    use crate::app::scenario::ActivityScenario;
    use crate::app::services::usage::{RecordingUsageTracker, SCENARIO_USAGE};

    #[test]
    fn clones_share_one_runtime() {
        let context = InstrumentationContext::in_process(RunnerConfig::default(), ActivityRegistry::new())
            .expect("context");
        let clone = context.clone();
        assert!(Arc::ptr_eq(context.looper(), clone.looper()));
        assert!(Arc::ptr_eq(context.services(), clone.services()));
        assert!(!context.looper().is_main_thread());
    }

    #[test]
    fn invalid_timeouts_fall_back_to_defaults() {
        let mut config = RunnerConfig::default();
        config.scenario.main_thread_timeout_ms = 0;
        let context = InstrumentationContext::in_process(config, ActivityRegistry::new()).expect("context");
        assert_eq!(context.config().scenario.main_thread_timeout_ms, 10_000);
    }

    #[test]
    fn scenario_launch_is_tracked() {
        let usage = Arc::new(RecordingUsageTracker::new());
        let context = InstrumentationContext::in_process(
            RunnerConfig::default(),
            ActivityRegistry::new().register::<EmptyActivity>(),
        )
        .expect("context")
        .with_usage_tracker(usage.clone());
        let scenario = ActivityScenario::<EmptyActivity>::launch(&context).expect("launch");
        scenario.close().expect("close");
        assert_eq!(usage.records()[0].usage, SCENARIO_USAGE);
        context.shutdown();
        assert!(context.looper().idle_sync().is_err());
    }
}
