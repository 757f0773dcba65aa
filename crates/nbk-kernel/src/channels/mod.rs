//! The kernel's sockets: heartbeat echo, iopub broadcast, and the routed
//! shell/control request channels.

mod heartbeat;
mod iopub;
mod shell;

use std::sync::{Arc, Mutex};

pub use heartbeat::HeartbeatChannel;
pub use iopub::IoPubChannel;
pub use shell::{Dispatcher, ShellChannel};

use crate::transport::Socket;

/// A socket shared between a loop thread and the replies it triggers.
pub type SharedSocket = Arc<Mutex<Box<dyn Socket>>>;
