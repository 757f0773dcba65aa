//! Socket seam between the channels and the message-queue library.
//!
//! Channels only need a non-blocking receive, a send and a bind, so the
//! ZeroMQ binding and the in-memory test transport share one small trait.

mod mem;
mod zmq;

pub use self::mem::{MemPeer, MemTransport};
pub use self::zmq::ZmqTransport;

use crate::error::KernelError;

/// Socket pattern a channel binds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SocketKind {
    /// Request/reply, used by the heartbeat.
    Rep,
    /// Routed request/reply, used by shell and control.
    Router,
    /// Publish-only, used by iopub.
    Pub,
}

pub trait Socket: Send {
    fn bind(&mut self, address: &str) -> Result<(), KernelError>;

    /// Returns the next waiting multipart message without blocking.
    fn try_recv(&mut self) -> Result<Option<Vec<Vec<u8>>>, KernelError>;

    fn send(&mut self, frames: Vec<Vec<u8>>) -> Result<(), KernelError>;

    /// Releases the bound address. Further sends fail.
    fn close(&mut self) -> Result<(), KernelError>;
}

pub trait Transport: Send + Sync {
    fn socket(&self, kind: SocketKind) -> Result<Box<dyn Socket>, KernelError>;
}
