//! Executable units and deferred results
//!
//! The task queue stores `Box<dyn Executable>`: one method, no arguments, no
//! return value. Closures get a blanket impl. Tasks that produce a value are
//! wrapped together with the sending half of a one-slot channel, which acts
//! as a single-assignment result cell; the submitter keeps the receiving half
//! as a [`TaskHandle`].

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

use crate::core::TaskError;

/// A unit of work the worker pool can run
pub trait Executable: Send {
    fn execute(self: Box<Self>);
}

impl<F> Executable for F
where
    F: FnOnce() + Send,
{
    #[inline]
    fn execute(self: Box<Self>) {
        (*self)()
    }
}

/// What the task queue carries
pub type Task = Box<dyn Executable>;

/// Extract a readable message from a panic payload
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "<no message>".to_string()
    }
}

/// Wrap `f` so its outcome lands in the returned handle
///
/// A panic inside `f` resolves the handle to `TaskError::Panicked` and is
/// then re-raised so the worker boundary still sees and logs it.
pub(crate) fn with_result<F, R>(f: F) -> (Task, TaskHandle<R>)
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    let (tx, rx) = channel::bounded(1);

    let task: Task = Box::new(move || resolve(&tx, f));

    (task, TaskHandle { rx })
}

fn resolve<F, R>(tx: &Sender<Result<R, TaskError>>, f: F)
where
    F: FnOnce() -> R,
{
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => {
            // Submitter may have dropped the handle; nothing to do then
            let _ = tx.send(Ok(value));
        }
        Err(payload) => {
            let _ = tx.send(Err(TaskError::Panicked(panic_message(payload.as_ref()))));
            panic::resume_unwind(payload);
        }
    }
}

/// Deferred result of [`WorkerPool::submit`](crate::executor::WorkerPool::submit)
///
/// The result can be taken once. After that (or if the task was dropped
/// without running) every accessor reports [`TaskError::Abandoned`].
pub struct TaskHandle<R> {
    rx: Receiver<Result<R, TaskError>>,
}

impl<R> TaskHandle<R> {
    /// Block until the task finishes
    pub fn wait(self) -> Result<R, TaskError> {
        self.rx.recv().unwrap_or(Err(TaskError::Abandoned))
    }

    /// Block for at most `timeout`; `TaskError::Timeout` leaves the result
    /// obtainable later
    pub fn wait_timeout(&self, timeout: Duration) -> Result<R, TaskError> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(TaskError::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(TaskError::Abandoned),
        }
    }

    /// Poll without blocking; `None` while the task is pending
    pub fn try_take(&self) -> Option<Result<R, TaskError>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(TaskError::Abandoned)),
        }
    }

    /// True once a result is waiting to be taken
    pub fn is_ready(&self) -> bool {
        !self.rx.is_empty()
    }
}

impl<R> fmt::Debug for TaskHandle<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("ready", &self.is_ready())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closure_is_executable() {
        let (tx, rx) = channel::bounded(1);
        let task: Task = Box::new(move || tx.send(5).unwrap());
        task.execute();
        assert_eq!(rx.recv().unwrap(), 5);
    }

    #[test]
    fn test_with_result_resolves_value() {
        let (task, handle) = with_result(|| 2 + 2);
        assert!(!handle.is_ready());
        assert_eq!(handle.try_take(), None);

        task.execute();
        assert!(handle.is_ready());
        assert_eq!(handle.wait(), Ok(4));
    }

    #[test]
    fn test_with_result_reports_panic() {
        let (task, handle) = with_result(|| -> u32 { panic!("bad input") });

        let outer = panic::catch_unwind(AssertUnwindSafe(|| task.execute()));
        assert!(outer.is_err(), "panic must still reach the worker boundary");
        assert_eq!(
            handle.wait(),
            Err(TaskError::Panicked("bad input".to_string()))
        );
    }

    #[test]
    fn test_dropped_task_abandons_handle() {
        let (task, handle) = with_result(|| 1u8);
        drop(task);
        assert_eq!(handle.try_take(), Some(Err(TaskError::Abandoned)));
        assert_eq!(handle.wait(), Err(TaskError::Abandoned));
    }

    #[test]
    fn test_wait_timeout_pending() {
        let (task, handle) = with_result(|| "late");
        assert_eq!(
            handle.wait_timeout(Duration::from_millis(5)),
            Err(TaskError::Timeout)
        );

        task.execute();
        assert_eq!(handle.wait_timeout(Duration::from_millis(5)), Ok("late"));
    }

    #[test]
    fn test_panic_message_variants() {
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned"));
        let borrowed: Box<dyn Any + Send> = Box::new("static");
        let other: Box<dyn Any + Send> = Box::new(17u32);

        assert_eq!(panic_message(owned.as_ref()), "owned");
        assert_eq!(panic_message(borrowed.as_ref()), "static");
        assert_eq!(panic_message(other.as_ref()), "<no message>");
    }
}
