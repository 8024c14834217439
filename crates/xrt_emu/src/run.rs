//! Handles for in-flight kernel invocations.
//!
//! Starting a kernel queues work on the device and returns a [`Run`]
//! immediately; the host thread keeps running while the device executes.
//! [`Run::wait`] is the synchronization point: it blocks until the run
//! reaches a terminal state and surfaces any device-side failure.

use std::sync::{Arc, Condvar, Mutex};

use crate::error::XrtResult;

/// Observable state of a run.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RunState {
    /// Queued or executing on the device.
    Running,
    /// Finished without error.
    Completed,
    /// Finished with a device-side error; [`Run::wait`] returns it.
    Error,
}

#[derive(Debug)]
enum Status {
    Running,
    Done(XrtResult<()>),
}

/// Shared between a [`Run`] and the device worker executing it.
#[derive(Debug)]
pub(crate) struct RunInner {
    status: Mutex<Status>,
    done: Condvar,
}

impl RunInner {
    pub(crate) fn finish(&self, result: XrtResult<()>) {
        let mut status = self
            .status
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *status = Status::Done(result);
        self.done.notify_all();
    }
}

/// One in-flight kernel invocation.
#[derive(Debug)]
pub struct Run {
    inner: Arc<RunInner>,
}

impl Run {
    pub(crate) fn new() -> (Run, Arc<RunInner>) {
        let inner = Arc::new(RunInner {
            status: Mutex::new(Status::Running),
            done: Condvar::new(),
        });
        (
            Run {
                inner: Arc::clone(&inner),
            },
            inner,
        )
    }

    /// Current state of the run, without blocking.
    pub fn state(&self) -> RunState {
        let status = self
            .inner
            .status
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match &*status {
            Status::Running => RunState::Running,
            Status::Done(Ok(())) => RunState::Completed,
            Status::Done(Err(_)) => RunState::Error,
        }
    }

    /// Block until the run reaches a terminal state.
    ///
    /// Returns the device-side error if the run failed. There is no timeout;
    /// the wait is bounded only by the device finishing the launch.
    pub fn wait(&self) -> XrtResult<()> {
        let mut status = self
            .inner
            .status
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        loop {
            match &*status {
                Status::Done(result) => return *result,
                Status::Running => {
                    status = self
                        .inner
                        .done
                        .wait(status)
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::XrtError;

    #[test]
    fn wait_returns_completion() {
        let (run, inner) = Run::new();
        assert_eq!(run.state(), RunState::Running);
        inner.finish(Ok(()));
        assert_eq!(run.wait(), Ok(()));
        assert_eq!(run.state(), RunState::Completed);
    }

    #[test]
    fn wait_surfaces_device_error() {
        let (run, inner) = Run::new();
        inner.finish(Err(XrtError::IllegalAddress));
        assert_eq!(run.wait(), Err(XrtError::IllegalAddress));
        assert_eq!(run.state(), RunState::Error);
    }

    #[test]
    fn wait_blocks_until_finish() {
        let (run, inner) = Run::new();
        let worker = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(20));
            inner.finish(Ok(()));
        });
        assert_eq!(run.wait(), Ok(()));
        worker.join().unwrap();
    }
}
