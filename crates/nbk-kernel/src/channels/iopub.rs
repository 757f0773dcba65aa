use std::sync::Mutex;

use nbk_protocol::{ChannelKind, Codec, Message};
use tracing::{debug, trace};

use crate::error::KernelError;
use crate::transport::Socket;

struct Inner {
    socket: Box<dyn Socket>,
    bound: bool,
}

/// Publish-only channel. Runs no loop; any thread holding it may publish.
pub struct IoPubChannel {
    inner: Mutex<Inner>,
    codec: Codec,
}

impl IoPubChannel {
    pub fn new(socket: Box<dyn Socket>, codec: Codec) -> Self {
        Self { inner: Mutex::new(Inner { socket, bound: false }), codec }
    }

    pub fn bind(&self, address: &str) -> Result<(), KernelError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.bound {
            return Err(KernelError::AlreadyBound(ChannelKind::IOPub));
        }
        inner.socket.bind(address).map_err(|err| KernelError::Bind {
            channel: ChannelKind::IOPub,
            address: address.to_string(),
            reason: err.to_string(),
        })?;
        inner.bound = true;
        debug!(address, "iopub bound");
        Ok(())
    }

    pub fn is_bound(&self) -> bool {
        self.inner.lock().unwrap().bound
    }

    pub fn publish(&self, message: &Message) -> Result<(), KernelError> {
        let frames = self.codec.encode(message)?;
        let mut inner = self.inner.lock().unwrap();
        if !inner.bound {
            return Err(KernelError::NotBound(ChannelKind::IOPub));
        }
        trace!(msg_type = %message.header.msg_type, msg_id = %message.header.msg_id, "publish");
        inner.socket.send(frames)
    }

    pub fn close(&self) -> Result<(), KernelError> {
        let mut inner = self.inner.lock().unwrap();
        if !std::mem::replace(&mut inner.bound, false) {
            return Ok(());
        }
        inner.socket.close()
    }
}
