use nbk_exec::{EvalError, ExecError};
use nbk_protocol::{ChannelKind, ProtocolError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KernelError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("transport error: {0}")]
    Zmq(#[from] zmq::Error),
    #[error("failed to bind {channel} channel to {address}: {reason}")]
    Bind {
        channel: ChannelKind,
        address: String,
        reason: String,
    },
    #[error("{0} channel is already bound")]
    AlreadyBound(ChannelKind),
    #[error("{0} channel is not bound")]
    NotBound(ChannelKind),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("loop {0} already started")]
    AlreadyStarted(String),
    #[error("failed to spawn loop thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error(transparent)]
    Eval(#[from] EvalError),
    #[error(transparent)]
    Exec(#[from] ExecError),
    #[error("{0}")]
    Handler(String),
}

impl KernelError {
    /// Name shown as `ename` when the error is reported to a client.
    pub fn ename(&self) -> &str {
        match self {
            KernelError::Eval(err) => err.ename(),
            KernelError::Protocol(_) => "ProtocolError",
            KernelError::Handler(_) => "HandlerError",
            _ => "KernelError",
        }
    }
}
