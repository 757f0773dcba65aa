//! Per-request context handed to shell handlers.
//!
//! Creating the environment publishes `status: busy`. Replies either go out
//! immediately or are deferred; deferrals run in registration order when
//! [`ReplyEnv::resolve_deferrals`] is called, and `status: idle` follows the
//! last of them.

use std::collections::VecDeque;
use std::sync::Arc;

use nbk_protocol::content::{ErrorReply, Status};
use nbk_protocol::{ChannelKind, Codec, Content, Message, MessageType, ProtocolError};
use tracing::{trace, warn};

use crate::channels::{IoPubChannel, SharedSocket};
use crate::error::KernelError;

type Deferral = Box<dyn FnOnce(&mut ReplyEnv) -> Result<(), KernelError>>;

/// Broadcasts on iopub under a fixed parent request. Cheap to clone and
/// usable from worker threads while the request is still being handled.
#[derive(Clone)]
pub struct Publisher {
    iopub: Arc<IoPubChannel>,
    parent: Arc<Message>,
}

impl Publisher {
    pub fn publish<C: Content>(&self, content: &C) -> Result<(), KernelError> {
        let message = Message::typed_reply(&self.parent, content)?.with_identities(Vec::new());
        self.iopub.publish(&message)
    }
}

pub struct ReplyEnv {
    channel: ChannelKind,
    socket: SharedSocket,
    iopub: Arc<IoPubChannel>,
    codec: Codec,
    parent: Message,
    deferrals: VecDeque<Deferral>,
    busy: bool,
    idle_published: bool,
    answered: bool,
    shutdown: bool,
}

impl ReplyEnv {
    pub fn new(
        channel: ChannelKind,
        socket: SharedSocket,
        iopub: Arc<IoPubChannel>,
        codec: Codec,
        parent: Message,
    ) -> Self {
        let mut env = Self {
            channel,
            socket,
            iopub,
            codec,
            parent,
            deferrals: VecDeque::new(),
            busy: false,
            idle_published: false,
            answered: false,
            shutdown: false,
        };
        env.set_busy_defer_idle();
        env
    }

    /// The request being handled.
    pub fn parent(&self) -> &Message {
        &self.parent
    }

    pub fn channel(&self) -> ChannelKind {
        self.channel
    }

    /// Publishes busy unless already done; idle is published once deferrals resolve.
    pub fn set_busy_defer_idle(&mut self) {
        if std::mem::replace(&mut self.busy, true) {
            return;
        }
        if let Err(err) = self.publish(&Status::busy()) {
            warn!(channel = %self.channel, error = %err, "failed to publish busy status");
        }
    }

    /// Broadcasts `content` on iopub with the request as parent.
    pub fn publish<C: Content>(&self, content: &C) -> Result<(), KernelError> {
        let message = Message::typed_reply(&self.parent, content)?.with_identities(Vec::new());
        self.iopub.publish(&message)
    }

    pub fn publisher(&self) -> Publisher {
        Publisher { iopub: self.iopub.clone(), parent: Arc::new(self.parent.clone()) }
    }

    /// Sends `content` back on the request's channel now.
    pub fn reply<C: Content>(&mut self, content: &C) -> Result<(), KernelError> {
        let message = Message::typed_reply(&self.parent, content)?;
        self.send(message)
    }

    /// Sends an error reply of `reply_type`'s failure kind now.
    pub fn reply_error(&mut self, reply_type: MessageType, error: &ErrorReply) -> Result<(), KernelError> {
        let content = serde_json::to_value(error).map_err(ProtocolError::from)?;
        self.send(Message::reply_to(&self.parent, reply_type.error(), content))
    }

    fn send(&mut self, message: Message) -> Result<(), KernelError> {
        let frames = self.codec.encode(&message)?;
        trace!(channel = %self.channel, msg_type = %message.header.msg_type, frames = frames.len(), "sending reply");
        self.socket.lock().unwrap().send(frames)?;
        self.answered = true;
        Ok(())
    }

    pub fn defer(&mut self, action: impl FnOnce(&mut ReplyEnv) -> Result<(), KernelError> + 'static) {
        self.deferrals.push_back(Box::new(action));
    }

    /// Replies once every deferral registered before this one has run.
    pub fn defer_reply<C: Content + 'static>(&mut self, content: C) {
        self.answered = true;
        self.defer(move |env| env.reply(&content));
    }

    pub fn defer_reply_error(&mut self, reply_type: MessageType, error: ErrorReply) {
        self.answered = true;
        self.defer(move |env| env.reply_error(reply_type, &error));
    }

    /// True once a reply was sent or scheduled.
    pub fn is_answered(&self) -> bool {
        self.answered
    }

    /// Runs queued deferrals in order; a failing deferral is logged and the
    /// rest still run. The first call ends with the idle status.
    pub fn resolve_deferrals(&mut self) {
        while let Some(deferral) = self.deferrals.pop_front() {
            if let Err(err) = deferral(self) {
                warn!(channel = %self.channel, msg_type = %self.parent.header.msg_type, error = %err, "deferred action failed");
            }
        }
        if !self.idle_published {
            self.idle_published = true;
            if let Err(err) = self.publish(&Status::idle()) {
                warn!(channel = %self.channel, error = %err, "failed to publish idle status");
            }
        }
    }

    /// Answers the request with `err` and broadcasts it on iopub.
    pub fn reply_failure(&mut self, err: &KernelError) {
        let error = ErrorReply::new(err.ename(), err.to_string(), Vec::new());
        if let Err(publish_err) = self.publish(&error.published()) {
            warn!(channel = %self.channel, error = %publish_err, "failed to publish handler error");
        }
        let Some(reply_type) = self.parent.header.msg_type.reply_type() else {
            return;
        };
        if let Err(reply_err) = self.reply_error(reply_type, &error) {
            warn!(channel = %self.channel, error = %reply_err, "failed to send error reply");
        }
    }

    /// Asks the owning connection to close once this request is done.
    pub fn mark_for_shutdown(&mut self) {
        self.shutdown = true;
    }

    pub fn is_marked_for_shutdown(&self) -> bool {
        self.shutdown
    }
}
