use std::collections::BTreeMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, info};

use crate::app::error::TransportError;

/// Remote end of a cross-process call: a transaction code plus an encoded payload in, a reply out.
pub trait RemoteService: Send + Sync {
    fn transact(&self, code: u32, payload: &[u8]) -> Result<Vec<u8>, TransportError>;
}

/// Name-keyed table of published services, standing in for the platform's binder lookup.
#[derive(Default)]
pub struct ServiceRegistry {
    services: Mutex<BTreeMap<String, Arc<dyn RemoteService>>>,
    published: Condvar,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Arc<dyn RemoteService>>> {
        self.services.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publishes `service` under `name`, replacing any previous binding.
    pub fn publish(&self, name: impl Into<String>, service: Arc<dyn RemoteService>) {
        let name = name.into();
        info!(service = %name, "publishing service");
        self.lock().insert(name, service);
        self.published.notify_all();
    }

    pub fn unpublish(&self, name: &str) -> bool {
        let removed = self.lock().remove(name).is_some();
        if removed {
            debug!(service = %name, "unpublished service");
        }
        removed
    }

    pub fn find(&self, name: &str) -> Option<Arc<dyn RemoteService>> {
        self.lock().get(name).cloned()
    }

    /// Blocks until `name` is published or `timeout` elapses.
    pub fn wait_for(&self, name: &str, timeout: Duration) -> Option<Arc<dyn RemoteService>> {
        let guard = self.lock();
        let (guard, _) = self
            .published
            .wait_timeout_while(guard, timeout, |services| !services.contains_key(name))
            .unwrap_or_else(PoisonError::into_inner);
        guard.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    struct Echo;

    impl RemoteService for Echo {
        fn transact(&self, code: u32, payload: &[u8]) -> Result<Vec<u8>, TransportError> {
            if code != 1 {
                return Err(TransportError::UnknownTransaction(code));
            }
            Ok(payload.to_vec())
        }
    }

    #[test]
    fn publish_find_unpublish() {
        let registry = ServiceRegistry::new();
        assert!(registry.find("echo").is_none());
        registry.publish("echo", Arc::new(Echo));
        let service = registry.find("echo").expect("published");
        assert_eq!(service.transact(1, b"ping").expect("reply"), b"ping".to_vec());
        assert_eq!(service.transact(7, b""), Err(TransportError::UnknownTransaction(7)));
        assert_eq!(registry.names(), vec!["echo".to_string()]);
        assert!(registry.unpublish("echo"));
        assert!(!registry.unpublish("echo"));
    }

    #[test]
    fn wait_for_sees_late_publication() {
        let registry = Arc::new(ServiceRegistry::new());
        let publisher = Arc::clone(&registry);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            publisher.publish("late", Arc::new(Echo));
        });
        assert!(registry.wait_for("late", Duration::from_secs(5)).is_some());
        handle.join().expect("publisher");
        assert!(registry.wait_for("never", Duration::from_millis(20)).is_none());
    }
}
