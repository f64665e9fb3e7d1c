use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Mutex, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use tracing::{debug, error};

use crate::app::error::MainThreadError;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// The host's main dispatch thread. Jobs run one at a time in posting order.
pub struct MainLooper {
    sender: Mutex<Option<Sender<Job>>>,
    join: Mutex<Option<JoinHandle<()>>>,
    thread_id: ThreadId,
    sync_timeout: Duration,
}

impl MainLooper {
    pub fn start(name: &str, sync_timeout: Duration) -> std::io::Result<Self> {
        let (sender, receiver) = mpsc::channel::<Job>();
        let join = thread::Builder::new().name(name.to_string()).spawn(move || {
            for job in receiver {
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
                    error!(error = %panic_message(payload.as_ref()), "main thread task panicked");
                }
            }
            debug!("main looper drained");
        })?;
        Ok(Self {
            thread_id: join.thread().id(),
            sender: Mutex::new(Some(sender)),
            join: Mutex::new(Some(join)),
            sync_timeout,
        })
    }

    pub fn main_thread_id(&self) -> ThreadId {
        self.thread_id
    }

    pub fn is_main_thread(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    pub fn post(&self, job: impl FnOnce() + Send + 'static) -> Result<(), MainThreadError> {
        let guard = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        let sender = guard.as_ref().ok_or(MainThreadError::Stopped)?;
        sender
            .send(Box::new(job))
            .map_err(|_| MainThreadError::Stopped)
    }

    pub fn run_on_main_sync<R, F>(&self, task: F) -> Result<R, MainThreadError>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        self.run_on_main_sync_timeout(task, self.sync_timeout)
    }

    /// Runs `task` on the main thread and waits for it. Called on the main thread it runs inline.
    ///
    /// A panic inside `task` is resumed on the calling thread with its original payload.
    pub fn run_on_main_sync_timeout<R, F>(&self, task: F, timeout: Duration) -> Result<R, MainThreadError>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        if self.is_main_thread() {
            return Ok(task());
        }
        let (tx, rx) = mpsc::sync_channel(1);
        self.post(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(task));
            let _ = tx.send(outcome);
        })?;
        match rx.recv_timeout(timeout) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(payload)) => panic::resume_unwind(payload),
            Err(RecvTimeoutError::Timeout) => Err(MainThreadError::Timeout(timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(MainThreadError::Stopped),
        }
    }

    /// Blocks until every job posted before this call has run.
    pub fn idle_sync(&self) -> Result<(), MainThreadError> {
        self.run_on_main_sync(|| ())
    }

    pub fn shutdown(&self) {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if self.is_main_thread() {
            return;
        }
        let join = self.join.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(join) = join {
            let _ = join.join();
        }
    }
}

impl Drop for MainLooper {
    fn drop(&mut self) {
        self.shutdown();
    }
}

pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
