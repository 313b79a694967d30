use std::future::Future;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use log::debug;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A set of tasks that succeed or fail together.
///
/// Every task shares one cancellation token. The first task to fail records
/// its error and cancels the token so its siblings stop early; [`TaskGroup::wait`]
/// joins everything and reports that first error. Dropping the group cancels
/// the token as well, so abandoning a request never leaves work running.
pub struct TaskGroup {
    token: CancellationToken,
    first_error: Arc<Mutex<Option<anyhow::Error>>>,
    handles: Vec<JoinHandle<()>>,
}

impl TaskGroup {
    /// Create a group whose token is a child of `parent`
    pub fn new(parent: &CancellationToken) -> Self {
        Self {
            token: parent.child_token(),
            first_error: Arc::new(Mutex::new(None)),
            handles: Vec::new(),
        }
    }

    /// Token shared by all tasks of this group
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Run an async task as part of the group
    pub fn spawn<F>(&mut self, name: &'static str, task: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let reporter = self.reporter(name);
        self.handles.push(tokio::spawn(async move {
            reporter.report(task.await);
        }));
    }

    /// Run a blocking closure on the blocking pool as part of the group
    pub fn spawn_blocking<F>(&mut self, name: &'static str, task: F)
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        let reporter = self.reporter(name);
        self.handles.push(tokio::task::spawn_blocking(move || {
            reporter.report(task());
        }));
    }

    /// Wait for every task and return the first error any of them hit
    pub async fn wait(mut self) -> Result<()> {
        for handle in self.handles.drain(..) {
            if let Err(join_err) = handle.await {
                let err = if join_err.is_panic() {
                    anyhow!("pipeline task panicked")
                } else {
                    anyhow!("pipeline task was cancelled")
                };
                record_first(&self.first_error, &self.token, err);
            }
        }

        let first = lock(&self.first_error).take();
        match first {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn reporter(&self, name: &'static str) -> Reporter {
        Reporter {
            name,
            token: self.token.clone(),
            first_error: Arc::clone(&self.first_error),
        }
    }
}

impl Drop for TaskGroup {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

struct Reporter {
    name: &'static str,
    token: CancellationToken,
    first_error: Arc<Mutex<Option<anyhow::Error>>>,
}

impl Reporter {
    fn report(self, result: Result<()>) {
        match result {
            Ok(()) => debug!("{} task finished", self.name),
            Err(err) => {
                debug!("{} task failed: {:#}", self.name, err);
                record_first(&self.first_error, &self.token, err);
            }
        }
    }
}

fn record_first(slot: &Mutex<Option<anyhow::Error>>, token: &CancellationToken, err: anyhow::Error) {
    let mut first = lock(slot);
    if first.is_none() {
        *first = Some(err);
    }
    drop(first);
    token.cancel();
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
