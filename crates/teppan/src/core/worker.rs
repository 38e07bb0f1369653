//! Module for handling the long-lived pipeline stage threads.

use std::thread::{self, JoinHandle};
use super::pill::Pill;
use crate::error::Result;

/// A handle for one pipeline stage running on its own OS thread.
///
/// Stages block on semaphores, condition variables and the executor, so they
/// get dedicated threads rather than tasks on a shared runtime. Stopping a
/// stage is cooperative: the owner signals it through the job queue or the
/// pipeline's quit flag, then calls [`StageHandle::join`].
///
/// # Example
///
/// ```ignore
/// let stage = StageHandle::spawn("collect", move || collect_loop(&shared))?;
/// shared.pipeline.quit();
/// stage.join();
/// ```
pub(crate) struct StageHandle {
    /// Stage name, also used as the thread name
    name: &'static str,

    /// Handle to the stage thread, `None` once joined
    handle: Option<JoinHandle<()>>,
}

impl StageHandle {
    /// Spawns `stage` on a named thread guarded by a [`Pill`].
    pub fn spawn<F>(name: &'static str, stage: F) -> Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = thread::Builder::new()
            .name(format!("teppan-{name}"))
            .spawn(move || {
                let _pill = Pill::new(name);
                stage();
                tracing::debug!(stage = name, "stage stopped");
            })?;
        Ok(Self { name, handle: Some(handle) })
    }

    /// Whether the stage thread has returned.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(|h| h.is_finished())
    }

    /// Waits for the stage thread to return. Idempotent.
    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!(stage = self.name, "stage thread panicked");
            }
        }
    }
}

impl Drop for StageHandle {
    /// Joins a stage that already stopped; a running one is detached.
    fn drop(&mut self) {
        if self.is_finished() {
            self.join();
        } else {
            tracing::warn!(stage = self.name, "detaching running stage");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    #[test]
    fn test_stage_runs_on_named_thread() {
        let mut stage = StageHandle::spawn("intake", || {
            assert_eq!(thread::current().name(), Some("teppan-intake"));
        }).unwrap();
        stage.join();
        assert!(stage.is_finished());
    }

    #[test]
    fn test_join_waits_for_cooperative_stop() {
        let running = Arc::new(AtomicBool::new(true));
        let stopped = Arc::new(AtomicBool::new(false));

        let mut stage = StageHandle::spawn("submit", {
            let running = running.clone();
            let stopped = stopped.clone();
            move || {
                while running.load(Ordering::SeqCst) {
                    thread::sleep(Duration::from_millis(5));
                }
                stopped.store(true, Ordering::SeqCst);
            }
        }).unwrap();

        assert!(!stage.is_finished());
        running.store(false, Ordering::SeqCst);
        stage.join();
        assert!(stopped.load(Ordering::SeqCst));
    }

    #[test]
    fn test_multiple_joins() {
        let mut stage = StageHandle::spawn("collect", || {}).unwrap();
        stage.join();
        stage.join();
        assert!(stage.is_finished());
    }
}
