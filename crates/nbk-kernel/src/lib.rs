//! Kernel side of the notebook protocol: channels bound over a pluggable
//! transport, the reply environment that frames every request with
//! busy/idle status, and the request handlers backed by `nbk-exec`.

pub mod channel_loop;
pub mod channels;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod kernel;
pub mod reply_env;
pub mod transport;

pub use channel_loop::{ChannelLoop, LoopHandle, Tick};
pub use config::KernelConfig;
pub use connection::KernelConnection;
pub use dispatch::{HandlerTable, ShellHandler};
pub use error::KernelError;
pub use kernel::Kernel;
pub use reply_env::{Publisher, ReplyEnv};
pub use transport::{MemPeer, MemTransport, Socket, SocketKind, Transport, ZmqTransport};
