use std::sync::{Arc, Mutex};
use std::time::Duration;

use nbk_protocol::ChannelKind;
use tracing::{debug, warn};

use super::SharedSocket;
use crate::channel_loop::{ChannelLoop, LoopHandle, Tick};
use crate::error::KernelError;
use crate::transport::Socket;

/// Echoes every heartbeat payload back unchanged.
pub struct HeartbeatChannel {
    socket: SharedSocket,
    interval: Duration,
    channel_loop: Option<ChannelLoop>,
}

impl HeartbeatChannel {
    pub fn new(socket: Box<dyn Socket>, interval: Duration) -> Self {
        Self { socket: Arc::new(Mutex::new(socket)), interval, channel_loop: None }
    }

    pub fn is_bound(&self) -> bool {
        self.channel_loop.as_ref().is_some_and(ChannelLoop::is_running)
    }

    pub fn bind(&mut self, address: &str) -> Result<(), KernelError> {
        if self.is_bound() {
            return Err(KernelError::AlreadyBound(ChannelKind::Heartbeat));
        }
        self.socket.lock().unwrap().bind(address).map_err(|err| KernelError::Bind {
            channel: ChannelKind::Heartbeat,
            address: address.to_string(),
            reason: err.to_string(),
        })?;

        let socket = self.socket.clone();
        let interval = self.interval;
        let mut channel_loop = ChannelLoop::new("nbk-heartbeat", move || {
            let received = socket.lock().unwrap().try_recv();
            match received {
                Ok(Some(payload)) => {
                    if let Err(err) = socket.lock().unwrap().send(payload) {
                        warn!(error = %err, "heartbeat echo failed");
                    }
                    Ok(Tick::Immediately)
                }
                Ok(None) => Ok(Tick::After(interval)),
                Err(err) => {
                    warn!(error = %err, "heartbeat receive failed");
                    Ok(Tick::After(interval))
                }
            }
        });
        let closing = self.socket.clone();
        channel_loop.on_close(move || {
            if let Err(err) = closing.lock().unwrap().close() {
                warn!(error = %err, "failed to close heartbeat socket");
            }
        });
        channel_loop.start()?;
        debug!(address, "heartbeat bound");
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
