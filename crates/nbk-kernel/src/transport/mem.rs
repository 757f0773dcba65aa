use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use super::{Socket, SocketKind, Transport};
use crate::error::KernelError;

type Frames = Vec<Vec<u8>>;

#[derive(Default)]
struct Endpoint {
    /// Peer to kernel.
    inbound: Mutex<VecDeque<Frames>>,
    /// Kernel to peer.
    outbound: Mutex<VecDeque<Frames>>,
}

/// In-process transport: each bound address is a pair of queues that a
/// [`MemPeer`] reads and writes from the client side.
#[derive(Clone, Default)]
pub struct MemTransport {
    endpoints: Arc<Mutex<HashMap<String, Arc<Endpoint>>>>,
}

impl fmt::Debug for MemTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let endpoints = self.endpoints.lock().unwrap();
        f.debug_struct("MemTransport").field("endpoints", &endpoints.len()).finish()
    }
}

impl MemTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_bound(&self, address: &str) -> bool {
        self.endpoints.lock().unwrap().contains_key(address)
    }

    /// Client handle for a bound address.
    pub fn connect(&self, address: &str) -> Option<MemPeer> {
        let endpoint = self.endpoints.lock().unwrap().get(address).cloned()?;
        Some(MemPeer { endpoint })
    }
}

impl Transport for MemTransport {
    fn socket(&self, kind: SocketKind) -> Result<Box<dyn Socket>, KernelError> {
        Ok(Box::new(MemSocket {
            transport: self.clone(),
            kind,
            address: None,
            endpoint: None,
        }))
    }
}

struct MemSocket {
    transport: MemTransport,
    kind: SocketKind,
    address: Option<String>,
    endpoint: Option<Arc<Endpoint>>,
}

impl Socket for MemSocket {
    fn bind(&mut self, address: &str) -> Result<(), KernelError> {
        let mut endpoints = self.transport.endpoints.lock().unwrap();
        if endpoints.contains_key(address) {
            return Err(KernelError::Transport(format!("address already in use: {address}")));
        }
        let endpoint = Arc::new(Endpoint::default());
        endpoints.insert(address.to_string(), endpoint.clone());
        self.address = Some(address.to_string());
        self.endpoint = Some(endpoint);
        Ok(())
    }

    fn try_recv(&mut self) -> Result<Option<Frames>, KernelError> {
        if self.kind == SocketKind::Pub {
            return Ok(None);
        }
        Ok(self
            .endpoint
            .as_ref()
            .and_then(|endpoint| endpoint.inbound.lock().unwrap().pop_front()))
    }

    fn send(&mut self, frames: Frames) -> Result<(), KernelError> {
        let endpoint = self
            .endpoint
            .as_ref()
            .ok_or_else(|| KernelError::Transport("socket is not bound".into()))?;
        endpoint.outbound.lock().unwrap().push_back(frames);
        Ok(())
    }

    fn close(&mut self) -> Result<(), KernelError> {
        if let Some(address) = self.address.take() {
            self.transport.endpoints.lock().unwrap().remove(&address);
        }
        self.endpoint = None;
        Ok(())
    }
}

/// Client end of a [`MemTransport`] address.
#[derive(Clone)]
pub struct MemPeer {
    endpoint: Arc<Endpoint>,
}

impl MemPeer {
    pub fn send(&self, frames: Frames) {
        self.endpoint.inbound.lock().unwrap().push_back(frames);
    }

    pub fn try_recv(&self) -> Option<Frames> {
        self.endpoint.outbound.lock().unwrap().pop_front()
    }

    /// Polls until a message arrives or `timeout` passes.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Frames> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(frames) = self.try_recv() {
                return Some(frames);
            }
            if Instant::now() >= deadline {
                return None;
            }
            thread::sleep(Duration::from_millis(2));
        }
    }

    pub fn drain(&self) -> Vec<Frames> {
        self.endpoint.outbound.lock().unwrap().drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_and_socket_exchange_frames() {
        let transport = MemTransport::new();
        let mut socket = transport.socket(SocketKind::Router).unwrap();
        socket.bind("mem://shell").unwrap();
        let peer = transport.connect("mem://shell").unwrap();

        peer.send(vec![b"id".to_vec(), b"payload".to_vec()]);
        let frames = socket.try_recv().unwrap().unwrap();
        assert_eq!(frames[1], b"payload");
        assert!(socket.try_recv().unwrap().is_none());

        socket.send(frames.clone()).unwrap();
        assert_eq!(peer.try_recv(), Some(frames));
    }

    #[test]
    fn address_cannot_be_bound_twice_until_closed() {
        let transport = MemTransport::new();
        let mut first = transport.socket(SocketKind::Rep).unwrap();
        let mut second = transport.socket(SocketKind::Rep).unwrap();
        first.bind("mem://hb").unwrap();
        assert!(second.bind("mem://hb").is_err());

        first.close().unwrap();
        assert!(!transport.is_bound("mem://hb"));
        second.bind("mem://hb").unwrap();
    }
}
