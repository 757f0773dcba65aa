//! A polling loop on a dedicated named thread.
//!
//! Each iteration runs the body once, then every action queued through
//! [`LoopHandle::do_next`] in FIFO order, then sleeps as the body's [`Tick`]
//! says. Errors from either go through the error handler chain; an error no
//! handler absorbs ends the loop and is returned from [`ChannelLoop::join`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle, Thread};
use std::time::Duration;

use anyhow::anyhow;
use tracing::{debug, error};

use crate::error::KernelError;

/// What the loop does after an iteration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tick {
    Immediately,
    After(Duration),
    Stop,
}

type Body = Box<dyn FnMut() -> anyhow::Result<Tick> + Send>;
type Action = Box<dyn FnOnce() -> anyhow::Result<()> + Send>;
type ErrorHandler = Box<dyn FnMut(anyhow::Error) -> anyhow::Result<Tick> + Send>;
type CloseHook = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct Shared {
    running: AtomicBool,
    queued: Mutex<VecDeque<Action>>,
    error_handlers: Mutex<Vec<ErrorHandler>>,
    on_close: Mutex<Vec<CloseHook>>,
    worker: Mutex<Option<Thread>>,
}

impl Shared {
    fn run_queued(&self) -> anyhow::Result<()> {
        loop {
            // pop before running so the action may queue more work
            let next = self.queued.lock().unwrap().pop_front();
            match next {
                Some(action) => action()?,
                None => return Ok(()),
            }
        }
    }

    /// Handlers run in registration order; each sees the error the previous one returned.
    fn handle_error(&self, mut err: anyhow::Error) -> anyhow::Result<Tick> {
        let mut handlers = self.error_handlers.lock().unwrap();
        for handler in handlers.iter_mut() {
            match handler(err) {
                Ok(tick) => return Ok(tick),
                Err(next) => err = next,
            }
        }
        Err(err)
    }

    fn close(&self) {
        let hooks: Vec<CloseHook> = self.on_close.lock().unwrap().drain(..).collect();
        for hook in hooks {
            hook();
        }
    }

    fn wake(&self) {
        if let Some(worker) = self.worker.lock().unwrap().as_ref() {
            worker.unpark();
        }
    }

    fn run(&self, body: &mut Body) -> anyhow::Result<()> {
        while self.running.load(Ordering::Acquire) {
            let tick = match body().and_then(|tick| self.run_queued().map(|()| tick)) {
                Ok(tick) => tick,
                Err(err) => self.handle_error(err)?,
            };
            match tick {
                Tick::Immediately => {}
                Tick::After(delay) => thread::park_timeout(delay),
                Tick::Stop => break,
            }
        }
        Ok(())
    }
}

/// Cloneable control surface of a [`ChannelLoop`], usable from any thread.
#[derive(Clone)]
pub struct LoopHandle {
    name: Arc<str>,
    shared: Arc<Shared>,
}

impl LoopHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queues `action` to run on the loop thread after the current body call.
    pub fn do_next(&self, action: impl FnOnce() -> anyhow::Result<()> + Send + 'static) {
        self.shared.queued.lock().unwrap().push_back(Box::new(action));
        self.shared.wake();
    }

    /// Stops the loop after its current iteration.
    pub fn shutdown(&self) {
        self.shared.running.store(false, Ordering::Release);
        self.shared.wake();
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }
}

pub struct ChannelLoop {
    handle: LoopHandle,
    body: Option<Body>,
    thread: Option<JoinHandle<anyhow::Result<()>>>,
}

impl ChannelLoop {
    pub fn new(name: impl Into<String>, body: impl FnMut() -> anyhow::Result<Tick> + Send + 'static) -> Self {
        let name: String = name.into();
        Self {
            handle: LoopHandle { name: name.into(), shared: Arc::new(Shared::default()) },
            body: Some(Box::new(body)),
            thread: None,
        }
    }

    pub fn handle(&self) -> LoopHandle {
        self.handle.clone()
    }

    pub fn name(&self) -> &str {
        self.handle.name()
    }

    /// Adds a handler after the existing ones. A handler absorbs the error by
    /// returning a [`Tick`], or passes it on by returning an error.
    pub fn on_error(&self, handler: impl FnMut(anyhow::Error) -> anyhow::Result<Tick> + Send + 'static) {
        self.handle.shared.error_handlers.lock().unwrap().push(Box::new(handler));
    }

    /// Runs once when the loop exits, after the hooks registered before it.
    pub fn on_close(&self, hook: impl FnOnce() + Send + 'static) {
        self.handle.shared.on_close.lock().unwrap().push(Box::new(hook));
    }

    pub fn do_next(&self, action: impl FnOnce() -> anyhow::Result<()> + Send + 'static) {
        self.handle.do_next(action);
    }

    pub fn start(&mut self) -> Result<(), KernelError> {
        let mut body = self
            .body
            .take()
            .ok_or_else(|| KernelError::AlreadyStarted(self.handle.name.to_string()))?;
        let shared = self.handle.shared.clone();
        let name = self.handle.name.clone();
        shared.running.store(true, Ordering::Release);

        let spawned = thread::Builder::new().name(name.to_string()).spawn(move || {
            debug!(channel_loop = %name, "loop started");
            let result = shared.run(&mut body);
            shared.running.store(false, Ordering::Release);
            if let Err(err) = &result {
                error!(channel_loop = %name, error = %err, "loop terminated by unhandled error");
            }
            shared.close();
            debug!(channel_loop = %name, "loop exited");
            result
        });
        let handle = match spawned {
            Ok(handle) => handle,
            Err(err) => {
                self.handle.shared.running.store(false, Ordering::Release);
                return Err(err.into());
            }
        };
        *self.handle.shared.worker.lock().unwrap() = Some(handle.thread().clone());
        self.thread = Some(handle);
        Ok(())
    }

    pub fn shutdown(&self) {
        self.handle.shutdown();
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_running()
    }

    /// Waits for the loop thread and returns the error that ended it, if any.
    /// Joining from the loop's own thread returns immediately.
    pub fn join(&mut self) -> anyhow::Result<()> {
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };
        if thread.thread().id() == thread::current().id() {
            self.thread = Some(thread);
            return Ok(());
        }
        thread
            .join()
            .map_err(|_| anyhow!("loop {} panicked", self.handle.name))?
    }
}
