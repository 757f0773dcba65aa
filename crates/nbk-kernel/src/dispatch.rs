use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use nbk_protocol::{Message, MessageType};

use crate::error::KernelError;
use crate::reply_env::ReplyEnv;

/// Handles one request kind arriving on shell or control.
///
/// An error the handler returns without having answered the request is
/// turned into an error reply by the channel.
pub trait ShellHandler: Send + Sync {
    fn handle(&self, env: &mut ReplyEnv, request: &Message) -> Result<(), KernelError>;
}

impl<F> ShellHandler for F
where
    F: Fn(&mut ReplyEnv, &Message) -> Result<(), KernelError> + Send + Sync,
{
    fn handle(&self, env: &mut ReplyEnv, request: &Message) -> Result<(), KernelError> {
        self(env, request)
    }
}

/// Message type to handler map shared by the shell and control channels.
#[derive(Default)]
pub struct HandlerTable {
    handlers: RwLock<HashMap<MessageType, Arc<dyn ShellHandler>>>,
}

impl fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerTable").field("types", &self.types()).finish()
    }
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `handler` for `msg_type`, returning the one it replaces.
    pub fn set(
        &self,
        msg_type: MessageType,
        handler: impl ShellHandler + 'static,
    ) -> Option<Arc<dyn ShellHandler>> {
        self.handlers.write().unwrap().insert(msg_type, Arc::new(handler))
    }

    pub fn get(&self, msg_type: &MessageType) -> Option<Arc<dyn ShellHandler>> {
        self.handlers.read().unwrap().get(msg_type).cloned()
    }

    pub fn remove(&self, msg_type: &MessageType) -> Option<Arc<dyn ShellHandler>> {
        self.handlers.write().unwrap().remove(msg_type)
    }

    pub fn types(&self) -> Vec<MessageType> {
        let mut types: Vec<MessageType> = self.handlers.read().unwrap().keys().cloned().collect();
        types.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        types
    }
}
