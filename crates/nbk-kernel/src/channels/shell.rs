use std::sync::{Arc, Mutex};
use std::time::Duration;

use nbk_protocol::{ChannelKind, Codec};
use tracing::{debug, error, info, warn};

use super::{IoPubChannel, SharedSocket};
use crate::channel_loop::{ChannelLoop, LoopHandle, Tick};
use crate::dispatch::HandlerTable;
use crate::error::KernelError;
use crate::reply_env::ReplyEnv;
use crate::transport::Socket;

type ShutdownHook = Arc<dyn Fn() + Send + Sync>;

/// Everything a request channel needs to turn frames into handler calls.
#[derive(Clone)]
pub struct Dispatcher {
    codec: Codec,
    handlers: Arc<HandlerTable>,
    iopub: Arc<IoPubChannel>,
    on_shutdown: ShutdownHook,
}

impl Dispatcher {
    pub fn new(
        codec: Codec,
        handlers: Arc<HandlerTable>,
        iopub: Arc<IoPubChannel>,
        on_shutdown: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        Self { codec, handlers, iopub, on_shutdown: Arc::new(on_shutdown) }
    }

    /// Decodes one message and runs its handler inside a fresh [`ReplyEnv`].
    pub fn dispatch(&self, channel: ChannelKind, socket: &SharedSocket, frames: Vec<Vec<u8>>) {
        let request = match self.codec.decode(frames) {
            Ok(message) => message,
            Err(err) => {
                warn!(%channel, error = %err, "dropping undecodable message");
                return;
            }
        };
        let msg_type = request.header.msg_type.clone();
        let Some(handler) = self.handlers.get(&msg_type) else {
            warn!(%channel, %msg_type, "ignoring unsupported message type");
            return;
        };
        debug!(%channel, %msg_type, msg_id = %request.header.msg_id, "dispatching");

        let mut env = ReplyEnv::new(channel, socket.clone(), self.iopub.clone(), self.codec.clone(), request.clone());
        if let Err(err) = handler.handle(&mut env, &request) {
            error!(%channel, %msg_type, error = %err, "handler failed");
            if !env.is_answered() {
                env.reply_failure(&err);
            }
        }
        env.resolve_deferrals();

        if env.is_marked_for_shutdown() {
            info!(%channel, "shutdown requested");
            (self.on_shutdown)();
        }
    }
}

/// Routed request channel; serves both shell and control.
pub struct ShellChannel {
    kind: ChannelKind,
    socket: SharedSocket,
    interval: Duration,
    channel_loop: Option<ChannelLoop>,
}

impl ShellChannel {
    pub fn new(kind: ChannelKind, socket: Box<dyn Socket>, interval: Duration) -> Self {
        Self { kind, socket: Arc::new(Mutex::new(socket)), interval, channel_loop: None }
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    pub fn is_bound(&self) -> bool {
        self.channel_loop.as_ref().is_some_and(ChannelLoop::is_running)
    }

    pub fn bind(&mut self, address: &str, dispatcher: Dispatcher) -> Result<(), KernelError> {
        if self.is_bound() {
            return Err(KernelError::AlreadyBound(self.kind));
        }
        self.socket.lock().unwrap().bind(address).map_err(|err| KernelError::Bind {
            channel: self.kind,
            address: address.to_string(),
            reason: err.to_string(),
        })?;

        let kind = self.kind;
        let socket = self.socket.clone();
        let interval = self.interval;
        let mut channel_loop = ChannelLoop::new(format!("nbk-{kind}"), move || {
            let received = socket.lock().unwrap().try_recv()?;
            match received {
                Some(frames) => {
                    dispatcher.dispatch(kind, &socket, frames);
                    Ok(Tick::Immediately)
                }
                None => Ok(Tick::After(interval)),
            }
        });
        channel_loop.on_error(move |err| {
            warn!(channel = %kind, error = %err, "receive failed");
            Ok(Tick::After(interval))
        });
        let closing = self.socket.clone();
        channel_loop.on_close(move || {
            if let Err(err) = closing.lock().unwrap().close() {
                warn!(channel = %kind, error = %err, "failed to close socket");
            }
        });
        channel_loop.start()?;
        debug!(channel = %kind, address, "bound");
        self.channel_loop = Some(channel_loop);
        Ok(())
    }

    pub fn handle(&self) -> Option<LoopHandle> {
        self.channel_loop.as_ref().map(ChannelLoop::handle)
    }

    pub fn shutdown(&self) {
        if let Some(channel_loop) = &self.channel_loop {
            channel_loop.shutdown();
        }
    }

    pub fn join(&mut self) -> anyhow::Result<()> {
        match self.channel_loop.as_mut() {
            Some(channel_loop) => channel_loop.join(),
            None => Ok(()),
        }
    }
}
