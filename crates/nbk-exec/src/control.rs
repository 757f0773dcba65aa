use std::cell::Cell;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::oneshot;
use tokio::task::JoinError;

use crate::error::ExecError;
use crate::store::UnitStore;
use crate::timeout::Timeout;

thread_local! {
    static IN_WORKER: Cell<bool> = const { Cell::new(false) };
}

/// Opaque handle to a value parked by [`ExecutionControl::submit`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResultKey(String);

impl ResultKey {
    fn fresh() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResultKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Failure raised by user code running on a worker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TaskFailure {
    Thrown { class_name: String, message: String },
    Unresolved { names: Vec<String> },
}

impl TaskFailure {
    pub fn thrown(class_name: impl Into<String>, message: impl Into<String>) -> Self {
        TaskFailure::Thrown { class_name: class_name.into(), message: message.into() }
    }
}

impl From<TaskFailure> for ExecError {
    fn from(failure: TaskFailure) -> Self {
        match failure {
            TaskFailure::Thrown { class_name, message } => ExecError::User { class_name, message },
            TaskFailure::Unresolved { names } => ExecError::Resolution { names },
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Cancel {
    Interrupt,
    Stop,
}

enum Outcome {
    Finished(Result<Result<String, TaskFailure>, JoinError>),
    TimedOut(Timeout),
    Cancelled(Cancel),
}

#[derive(Default)]
struct Running {
    stopped: bool,
    tasks: HashMap<u64, oneshot::Sender<Cancel>>,
}

/// Runs compiled units on a cached pool of worker threads.
///
/// The calling thread blocks until the unit finishes, the configured timeout
/// elapses, or the unit is cancelled by [`interrupt`](Self::interrupt) or
/// [`stop`](Self::stop). Cancelled and timed-out workers are abandoned, not
/// killed. Values are parked under a [`ResultKey`] and fetched once with
/// [`take_result`](Self::take_result).
pub struct ExecutionControl {
    runtime: Mutex<Option<Runtime>>,
    handle: Handle,
    running: Mutex<Running>,
    results: Mutex<HashMap<ResultKey, String>>,
    store: Arc<dyn UnitStore>,
    timeout: Option<Timeout>,
    next_task: AtomicU64,
}

impl fmt::Debug for ExecutionControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionControl")
            .field("timeout", &self.timeout)
            .field("running", &self.running.lock().unwrap().tasks.len())
            .field("results", &self.results.lock().unwrap().len())
            .finish()
    }
}

impl ExecutionControl {
    pub fn new(store: Arc<dyn UnitStore>, timeout: Option<Timeout>) -> Result<Self, ExecError> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("exec-worker")
            .enable_time()
            .build()?;
        let handle = runtime.handle().clone();
        Ok(Self {
            runtime: Mutex::new(Some(runtime)),
            handle,
            running: Mutex::new(Running::default()),
            results: Mutex::new(HashMap::new()),
            store,
            timeout,
            next_task: AtomicU64::new(0),
        })
    }

    pub fn timeout(&self) -> Option<Timeout> {
        self.timeout
    }

    pub fn store(&self) -> Arc<dyn UnitStore> {
        self.store.clone()
    }

    /// Declares a compiled artifact so workers can load it.
    pub fn define(&self, name: &str, artifact: Vec<u8>) {
        tracing::trace!(unit = name, bytes = artifact.len(), "define unit");
        self.store.store(name, artifact);
    }

    /// Removes a compiled artifact. Callers check that no live unit still refers to it.
    pub fn unload(&self, name: &str) -> bool {
        let removed = self.store.unload(name);
        tracing::debug!(unit = name, removed, "unload unit");
        removed
    }

    pub fn is_stopped(&self) -> bool {
        self.running.lock().unwrap().stopped
    }

    /// Runs `task` to completion and parks its value. A submission made from a
    /// worker thread runs inline on that worker.
    pub fn submit<F>(&self, task: F) -> Result<ResultKey, ExecError>
    where
        F: FnOnce() -> Result<String, TaskFailure> + Send + 'static,
    {
        if IN_WORKER.with(Cell::get) {
            let value = task()?;
            return Ok(self.park(value));
        }

        let (cancel_tx, cancel_rx) = oneshot::channel();
        let id = self.track(cancel_tx)?;

        let join = self.handle.spawn_blocking(move || {
            IN_WORKER.with(|flag| flag.set(true));
            task()
        });
        let timeout = self.timeout;

        let outcome = self.handle.block_on(async move {
            let finished = async move {
                match timeout {
                    Some(timeout) => match tokio::time::timeout(timeout.as_duration(), join).await {
                        Ok(result) => Outcome::Finished(result),
                        Err(_) => Outcome::TimedOut(timeout),
                    },
                    None => Outcome::Finished(join.await),
                }
            };
            tokio::select! {
                biased;
                reason = cancel_rx => Outcome::Cancelled(reason.unwrap_or(Cancel::Interrupt)),
                outcome = finished => outcome,
            }
        });
        self.untrack(id);

        match outcome {
            Outcome::Finished(Ok(Ok(value))) => Ok(self.park(value)),
            Outcome::Finished(Ok(Err(failure))) => Err(failure.into()),
            Outcome::Finished(Err(err)) if err.is_cancelled() => Err(ExecError::Stopped),
            Outcome::Finished(Err(err)) => Err(ExecError::User {
                class_name: "Panic".into(),
                message: panic_message(err),
            }),
            Outcome::TimedOut(timeout) => {
                tracing::warn!(duration = timeout.duration, unit = %timeout.unit, "execution timed out, abandoning worker");
                Err(ExecError::Timeout { duration: timeout.duration, unit: timeout.unit })
            }
            Outcome::Cancelled(Cancel::Interrupt) => Err(ExecError::Interrupted),
            Outcome::Cancelled(Cancel::Stop) => Err(ExecError::Stopped),
        }
    }

    /// Removes and returns the value parked under `key`.
    pub fn take_result(&self, key: &ResultKey) -> Result<String, ExecError> {
        self.results
            .lock()
            .unwrap()
            .remove(key)
            .ok_or_else(|| ExecError::MissingResult(key.clone()))
    }

    /// Cancels every running submission. Later submissions proceed normally.
    pub fn interrupt(&self) -> usize {
        let mut running = self.running.lock().unwrap();
        let count = running.tasks.len();
        for (_, cancel) in running.tasks.drain() {
            let _ = cancel.send(Cancel::Interrupt);
        }
        tracing::debug!(count, "interrupted running executions");
        count
    }

    /// Cancels everything and tears down the pool. Subsequent submissions fail with `Stopped`.
    pub fn stop(&self) {
        {
            let mut running = self.running.lock().unwrap();
            running.stopped = true;
            for (_, cancel) in running.tasks.drain() {
                let _ = cancel.send(Cancel::Stop);
            }
        }
        if let Some(runtime) = self.runtime.lock().unwrap().take() {
            runtime.shutdown_background();
            tracing::debug!("execution pool stopped");
        }
    }

    fn track(&self, cancel: oneshot::Sender<Cancel>) -> Result<u64, ExecError> {
        let mut running = self.running.lock().unwrap();
        if running.stopped {
            return Err(ExecError::Stopped);
        }
        let id = self.next_task.fetch_add(1, Ordering::Relaxed);
        running.tasks.insert(id, cancel);
        Ok(id)
    }

    fn untrack(&self, id: u64) {
        self.running.lock().unwrap().tasks.remove(&id);
    }

    fn park(&self, value: String) -> ResultKey {
        let key = ResultKey::fresh();
        self.results.lock().unwrap().insert(key.clone(), value);
        key
    }
}

impl Drop for ExecutionControl {
    fn drop(&mut self) {
        // dropping a runtime waits for blocking tasks; abandoned workers must not hold us
        if let Some(runtime) = self.runtime.get_mut().unwrap().take() {
            runtime.shutdown_background();
        }
    }
}

fn panic_message(err: JoinError) -> String {
    match err.try_into_panic() {
        Ok(payload) => {
            if let Some(text) = payload.downcast_ref::<&str>() {
                text.to_string()
            } else if let Some(text) = payload.downcast_ref::<String>() {
                text.clone()
            } else {
                "worker panicked".to_string()
            }
        }
        Err(err) => err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemUnitStore;
    use crate::timeout::TimeUnit;
    use std::thread;
    use std::time::{Duration, Instant};

    fn control(timeout: Option<Timeout>) -> Arc<ExecutionControl> {
        Arc::new(ExecutionControl::new(Arc::new(MemUnitStore::new()), timeout).unwrap())
    }

    #[test]
    fn result_is_taken_exactly_once() {
        let control = control(None);
        let key = control.submit(|| Ok("42".to_string())).unwrap();
        assert_eq!(control.take_result(&key).unwrap(), "42");
        assert!(matches!(control.take_result(&key), Err(ExecError::MissingResult(_))));
    }

    #[test]
    fn runs_on_named_worker_thread() {
        let control = control(None);
        let key = control
            .submit(|| Ok(thread::current().name().unwrap_or_default().to_string()))
            .unwrap();
        assert_eq!(control.take_result(&key).unwrap(), "exec-worker");
    }

    #[test]
    fn user_failure_is_classified() {
        let control = control(None);
        let err = control.submit(|| Err(TaskFailure::thrown("Failure", "boom"))).unwrap_err();
        assert!(matches!(err, ExecError::User { ref class_name, .. } if class_name == "Failure"));
    }

    #[test]
    fn panic_becomes_user_failure() {
        let control = control(None);
        let err = control.submit(|| panic!("kaboom")).unwrap_err();
        match err {
            ExecError::User { class_name, message } => {
                assert_eq!(class_name, "Panic");
                assert_eq!(message, "kaboom");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn timeout_reports_configured_duration() {
        let control = control(Some(Timeout::new(100, TimeUnit::Milliseconds)));
        let start = Instant::now();
        let err = control
            .submit(|| {
                thread::sleep(Duration::from_millis(2_000));
                Ok("late".into())
            })
            .unwrap_err();
        assert!(start.elapsed() < Duration::from_millis(1_500));
        assert!(matches!(err, ExecError::Timeout { duration: 100, unit: TimeUnit::Milliseconds }));
        // pool stays usable
        let key = control.submit(|| Ok("next".into())).unwrap();
        assert_eq!(control.take_result(&key).unwrap(), "next");
    }

    #[test]
    fn interrupt_cancels_running_submission() {
        let control = control(None);
        let waiter = {
            let control = control.clone();
            thread::spawn(move || {
                control.submit(|| {
                    thread::sleep(Duration::from_millis(3_000));
                    Ok("done".into())
                })
            })
        };
        let deadline = Instant::now() + Duration::from_secs(2);
        while control.interrupt() == 0 {
            assert!(Instant::now() < deadline, "submission never started");
            thread::sleep(Duration::from_millis(10));
        }
        assert!(matches!(waiter.join().unwrap(), Err(ExecError::Interrupted)));
        assert!(!control.is_stopped());
    }

    #[test]
    fn stop_rejects_later_submissions() {
        let control = control(None);
        let waiter = {
            let control = control.clone();
            thread::spawn(move || {
                control.submit(|| {
                    thread::sleep(Duration::from_millis(3_000));
                    Ok("done".into())
                })
            })
        };
        let deadline = Instant::now() + Duration::from_secs(2);
        while control.running.lock().unwrap().tasks.is_empty() {
            assert!(Instant::now() < deadline, "submission never started");
            thread::sleep(Duration::from_millis(10));
        }
        control.stop();
        assert!(matches!(waiter.join().unwrap(), Err(ExecError::Stopped)));
        assert!(matches!(control.submit(|| Ok("x".into())), Err(ExecError::Stopped)));
    }

    #[test]
    fn nested_submission_runs_inline() {
        let control = control(None);
        let inner = control.clone();
        let key = control
            .submit(move || {
                let nested = |err: ExecError| TaskFailure::thrown("Nested", err.to_string());
                let key = inner
                    .submit(|| Ok(thread::current().name().unwrap_or_default().to_string()))
                    .map_err(nested)?;
                inner.take_result(&key).map_err(nested)
            })
            .unwrap();
        assert_eq!(control.take_result(&key).unwrap(), "exec-worker");
    }

    #[test]
    fn define_and_unload_go_through_store() {
        let store = Arc::new(MemUnitStore::new());
        let control = ExecutionControl::new(store.clone(), None).unwrap();
        control.define("unit_1", vec![1, 2, 3]);
        assert!(store.contains("unit_1"));
        assert!(control.unload("unit_1"));
        assert!(!store.contains("unit_1"));
    }
}
