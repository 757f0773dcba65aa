//! Binds the four kernel channels described by a connection file and owns
//! their lifetime.

use std::sync::{Arc, Condvar, Mutex};

use nbk_protocol::{ChannelKind, Codec, ConnectionInfo, MessageType};
use tracing::{info, warn};

use crate::channel_loop::LoopHandle;
use crate::channels::{Dispatcher, HeartbeatChannel, IoPubChannel, ShellChannel};
use crate::config::KernelConfig;
use crate::dispatch::{HandlerTable, ShellHandler};
use crate::error::KernelError;
use crate::transport::{SocketKind, Transport};

#[derive(Default)]
struct Lifecycle {
    closing: Mutex<bool>,
    closed: Condvar,
}

impl Lifecycle {
    fn request_close(&self) -> bool {
        let mut closing = self.closing.lock().unwrap();
        if std::mem::replace(&mut *closing, true) {
            return false;
        }
        self.closed.notify_all();
        true
    }

    fn wait(&self) {
        let mut closing = self.closing.lock().unwrap();
        while !*closing {
            closing = self.closed.wait(closing).unwrap();
        }
    }
}

pub struct KernelConnection {
    info: ConnectionInfo,
    codec: Codec,
    handlers: Arc<HandlerTable>,
    iopub: Arc<IoPubChannel>,
    heartbeat: Mutex<HeartbeatChannel>,
    shell: Mutex<ShellChannel>,
    control: Mutex<ShellChannel>,
    lifecycle: Arc<Lifecycle>,
}

impl KernelConnection {
    pub fn new(info: ConnectionInfo, transport: &dyn Transport, config: &KernelConfig) -> Result<Self, KernelError> {
        let codec = Codec::new(info.signer()?);
        let iopub = IoPubChannel::new(transport.socket(SocketKind::Pub)?, codec.clone());
        let heartbeat = HeartbeatChannel::new(transport.socket(SocketKind::Rep)?, config.heartbeat_interval);
        let shell = ShellChannel::new(ChannelKind::Shell, transport.socket(SocketKind::Router)?, config.poll_interval);
        let control =
            ShellChannel::new(ChannelKind::Control, transport.socket(SocketKind::Router)?, config.poll_interval);
        Ok(Self {
            info,
            codec,
            handlers: Arc::new(HandlerTable::new()),
            iopub: Arc::new(iopub),
            heartbeat: Mutex::new(heartbeat),
            shell: Mutex::new(shell),
            control: Mutex::new(control),
            lifecycle: Arc::new(Lifecycle::default()),
        })
    }

    pub fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    pub fn codec(&self) -> &Codec {
        &self.codec
    }

    pub fn iopub(&self) -> Arc<IoPubChannel> {
        self.iopub.clone()
    }

    pub fn handlers(&self) -> &Arc<HandlerTable> {
        &self.handlers
    }

    pub fn set_handler(&self, msg_type: MessageType, handler: impl ShellHandler + 'static) {
        self.handlers.set(msg_type, handler);
    }

    /// Binds iopub, heartbeat, shell and control, in that order.
    pub fn connect(&self) -> Result<(), KernelError> {
        self.iopub.bind(&self.info.address(ChannelKind::IOPub))?;
        self.heartbeat.lock().unwrap().bind(&self.info.address(ChannelKind::Heartbeat))?;

        let lifecycle = self.lifecycle.clone();
        let loops: Arc<Mutex<Vec<LoopHandle>>> = Arc::default();
        let to_stop = loops.clone();
        let dispatcher = Dispatcher::new(self.codec.clone(), self.handlers.clone(), self.iopub.clone(), move || {
            if lifecycle.request_close() {
                for handle in to_stop.lock().unwrap().iter() {
                    handle.shutdown();
                }
            }
        });

        for (kind, channel) in [(ChannelKind::Shell, &self.shell), (ChannelKind::Control, &self.control)] {
            let mut channel = channel.lock().unwrap();
            channel.bind(&self.info.address(kind), dispatcher.clone())?;
        }
        loops.lock().unwrap().extend(self.loop_handles());
        info!(ip = %self.info.ip, transport = %self.info.transport, "kernel connection established");
        Ok(())
    }

    fn loop_handles(&self) -> Vec<LoopHandle> {
        let mut handles = Vec::new();
        handles.extend(self.heartbeat.lock().unwrap().handle());
        handles.extend(self.shell.lock().unwrap().handle());
        handles.extend(self.control.lock().unwrap().handle());
        handles
    }

    /// Stops every channel loop. Safe to call from a handler thread.
    pub fn close(&self) {
        self.lifecycle.request_close();
        for handle in self.loop_handles() {
            handle.shutdown();
        }
    }

    pub fn is_closing(&self) -> bool {
        *self.lifecycle.closing.lock().unwrap()
    }

    /// Blocks until the connection is closed, then joins the loops and
    /// releases iopub. Returns the first loop failure.
    pub fn wait_until_close(&self) -> anyhow::Result<()> {
        self.lifecycle.wait();
        self.close();

        let mut first_error = None;
        let results = [
            self.heartbeat.lock().unwrap().join(),
            self.shell.lock().unwrap().join(),
            self.control.lock().unwrap().join(),
        ];
        for result in results {
            if let Err(err) = result {
                warn!(error = %err, "channel loop ended with an error");
                first_error.get_or_insert(err);
            }
        }
        if let Err(err) = self.iopub.close() {
            warn!(error = %err, "failed to close iopub");
        }
        info!("kernel connection closed");
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
