//! Run lifecycle shared by every pipeline stage.
//!
//! One mutex guards a single [`RunState`] together with the first fatal
//! error, so flag combinations like "completed and failed" cannot exist.
//! Terminal transitions are first-wins.

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{debug, error};

use crate::error::ArchiveError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Completed,
    Failed,
    Aborted,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Completed | RunState::Failed | RunState::Aborted)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Idle => "idle",
            RunState::Running => "running",
            RunState::Completed => "completed",
            RunState::Failed => "failed",
            RunState::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
struct Inner {
    state: RunState,
    error: Option<ArchiveError>,
}

#[derive(Debug)]
pub struct Lifecycle {
    inner: Mutex<Inner>,
    changed: Condvar,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: RunState::Idle,
                error: None,
            }),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> RunState {
        self.lock().state
    }

    pub fn is_running(&self) -> bool {
        self.state() == RunState::Running
    }

    /// Moves `Idle` to `Running`. Returns the current state if the run had
    /// already left `Idle`.
    pub fn begin(&self) -> Result<(), RunState> {
        self.transition(|state| match state {
            RunState::Idle => Some(RunState::Running),
            _ => None,
        })
    }

    /// Marks the run as completed; ignored unless it is still running.
    pub fn complete(&self) -> bool {
        self.transition(|state| match state {
            RunState::Running => Some(RunState::Completed),
            _ => None,
        })
        .is_ok()
    }

    /// Records a fatal error. Only the first error of a running pipeline is
    /// kept; later ones are logged and dropped.
    pub fn fail(&self, err: ArchiveError) -> bool {
        let mut inner = self.lock();
        if inner.state != RunState::Running {
            debug!("ignoring error after run became {}: {}", inner.state, err);
            return false;
        }
        error!("{err}");
        inner.state = RunState::Failed;
        inner.error = Some(err);
        drop(inner);
        self.changed.notify_all();
        true
    }

    /// Requests a cooperative stop. Stages observe it at their next loop
    /// iteration; in-flight codec calls finish normally.
    pub fn abort(&self) -> bool {
        self.transition(|state| match state {
            RunState::Idle | RunState::Running => Some(RunState::Aborted),
            _ => None,
        })
        .is_ok()
    }

    pub fn take_error(&self) -> Option<ArchiveError> {
        self.lock().error.take()
    }

    /// Blocks until the run reaches a terminal state or `timeout` elapses.
    pub fn wait_terminal(&self, timeout: Duration) -> RunState {
        let inner = self.lock();
        let (inner, _) = self
            .changed
            .wait_timeout_while(inner, timeout, |inner| !inner.state.is_terminal())
            .unwrap_or_else(PoisonError::into_inner);
        inner.state
    }

    fn transition(&self, f: impl FnOnce(RunState) -> Option<RunState>) -> Result<(), RunState> {
        let mut inner = self.lock();
        match f(inner.state) {
            Some(next) => {
                inner.state = next;
                drop(inner);
                self.changed.notify_all();
                Ok(())
            }
            None => Err(inner.state),
        }
    }
}

/// Cloneable handle that can stop a run from another thread, such as a
/// Ctrl-C handler.
#[derive(Debug, Clone)]
pub struct AbortHandle(Arc<Lifecycle>);

impl AbortHandle {
    pub(crate) fn new(lifecycle: Arc<Lifecycle>) -> Self {
        Self(lifecycle)
    }

    pub fn abort(&self) -> bool {
        self.0.abort()
    }

    pub fn state(&self) -> RunState {
        self.0.state()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_happy_path() {
        let lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.state(), RunState::Idle);
        lifecycle.begin().unwrap();
        assert!(lifecycle.is_running());
        assert!(lifecycle.complete());
        assert_eq!(lifecycle.state(), RunState::Completed);
        assert_eq!(lifecycle.begin(), Err(RunState::Completed));
    }

    #[test]
    fn test_completion_and_failure_are_exclusive() {
        let lifecycle = Lifecycle::new();
        lifecycle.begin().unwrap();
        assert!(lifecycle.fail(ArchiveError::Unexpected("first".into())));
        assert!(!lifecycle.complete());
        assert!(!lifecycle.fail(ArchiveError::Unexpected("second".into())));
        assert_eq!(lifecycle.state(), RunState::Failed);

        let err = lifecycle.take_error().unwrap();
        assert!(err.to_string().contains("first"));
    }

    #[test]
    fn test_abort_wins_over_later_failure() {
        let lifecycle = Lifecycle::new();
        lifecycle.begin().unwrap();
        assert!(lifecycle.abort());
        assert!(!lifecycle.fail(ArchiveError::Unexpected("late".into())));
        assert!(!lifecycle.complete());
        assert_eq!(lifecycle.state(), RunState::Aborted);
        assert!(lifecycle.take_error().is_none());
    }

    #[test]
    fn test_abort_before_start() {
        let lifecycle = Lifecycle::new();
        assert!(lifecycle.abort());
        assert_eq!(lifecycle.begin(), Err(RunState::Aborted));
    }

    #[test]
    fn test_wait_terminal_wakes_on_abort() {
        let lifecycle = Arc::new(Lifecycle::new());
        lifecycle.begin().unwrap();
        let handle = AbortHandle::new(Arc::clone(&lifecycle));

        let waiter = {
            let lifecycle = Arc::clone(&lifecycle);
            thread::spawn(move || lifecycle.wait_terminal(Duration::from_secs(10)))
        };
        thread::sleep(Duration::from_millis(10));
        assert!(handle.abort());
        assert_eq!(waiter.join().unwrap(), RunState::Aborted);
    }
}
