use tracing::debug;

use super::{Socket, SocketKind, Transport};
use crate::error::KernelError;

/// ZeroMQ-backed transport. One context is shared by every socket it creates.
pub struct ZmqTransport {
    context: zmq::Context,
}

impl Default for ZmqTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ZmqTransport {
    pub fn new() -> Self {
        Self { context: zmq::Context::new() }
    }
}

impl Transport for ZmqTransport {
    fn socket(&self, kind: SocketKind) -> Result<Box<dyn Socket>, KernelError> {
        let socket_type = match kind {
            SocketKind::Rep => zmq::REP,
            SocketKind::Router => zmq::ROUTER,
            SocketKind::Pub => zmq::PUB,
        };
        let socket = self.context.socket(socket_type)?;
        socket.set_linger(0)?;
        Ok(Box::new(ZmqSocket { socket, endpoint: None, closed: false }))
    }
}

struct ZmqSocket {
    socket: zmq::Socket,
    endpoint: Option<String>,
    closed: bool,
}

impl Socket for ZmqSocket {
    fn bind(&mut self, address: &str) -> Result<(), KernelError> {
        self.socket.bind(address).map_err(|e| KernelError::Transport(format!("bind {address}: {e}")))?;
        self.endpoint = Some(address.to_string());
        self.closed = false;
        debug!(address, "socket bound");
        Ok(())
    }

    fn try_recv(&mut self) -> Result<Option<Vec<Vec<u8>>>, KernelError> {
        if self.closed {
            return Ok(None);
        }
        match self.socket.recv_multipart(zmq::DONTWAIT) {
            Ok(frames) => Ok(Some(frames)),
            Err(zmq::Error::EAGAIN) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn send(&mut self, frames: Vec<Vec<u8>>) -> Result<(), KernelError> {
        if self.closed {
            return Err(KernelError::Transport("socket is closed".into()));
        }
        self.socket.send_multipart(frames, 0)?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), KernelError> {
        if std::mem::replace(&mut self.closed, true) {
            return Ok(());
        }
        if let Some(endpoint) = self.endpoint.take() {
            self.socket.unbind(&endpoint)?;
            debug!(address = %endpoint, "socket unbound");
        }
        Ok(())
    }
}
