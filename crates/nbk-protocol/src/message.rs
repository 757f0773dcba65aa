use std::fmt;

use chrono::{DateTime, FixedOffset, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::content::Content;
use crate::error::ProtocolError;

pub const PROTOCOL_VERSION: &str = "5.3";

/// Kind of a kernel message, named on the wire by its `msg_type` string.
///
/// `ErrorReply` wraps a reply kind and shares its wire name; the codec tells
/// the two apart by looking at `content.status`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum MessageType {
    ExecuteRequest,
    ExecuteReply,
    InspectRequest,
    InspectReply,
    CompleteRequest,
    CompleteReply,
    HistoryRequest,
    HistoryReply,
    IsCompleteRequest,
    IsCompleteReply,
    CommInfoRequest,
    CommInfoReply,
    KernelInfoRequest,
    KernelInfoReply,
    ShutdownRequest,
    ShutdownReply,
    InterruptRequest,
    InterruptReply,
    InputRequest,
    InputReply,
    Stream,
    DisplayData,
    UpdateDisplayData,
    ExecuteInput,
    ExecuteResult,
    Error,
    Status,
    ClearOutput,
    CommOpen,
    CommMsg,
    CommClose,
    ErrorReply(Box<MessageType>),
    Other(String),
}

impl MessageType {
    pub fn as_str(&self) -> &str {
        match self {
            MessageType::ExecuteRequest => "execute_request",
            MessageType::ExecuteReply => "execute_reply",
            MessageType::InspectRequest => "inspect_request",
            MessageType::InspectReply => "inspect_reply",
            MessageType::CompleteRequest => "complete_request",
            MessageType::CompleteReply => "complete_reply",
            MessageType::HistoryRequest => "history_request",
            MessageType::HistoryReply => "history_reply",
            MessageType::IsCompleteRequest => "is_complete_request",
            MessageType::IsCompleteReply => "is_complete_reply",
            MessageType::CommInfoRequest => "comm_info_request",
            MessageType::CommInfoReply => "comm_info_reply",
            MessageType::KernelInfoRequest => "kernel_info_request",
            MessageType::KernelInfoReply => "kernel_info_reply",
            MessageType::ShutdownRequest => "shutdown_request",
            MessageType::ShutdownReply => "shutdown_reply",
            MessageType::InterruptRequest => "interrupt_request",
            MessageType::InterruptReply => "interrupt_reply",
            MessageType::InputRequest => "input_request",
            MessageType::InputReply => "input_reply",
            MessageType::Stream => "stream",
            MessageType::DisplayData => "display_data",
            MessageType::UpdateDisplayData => "update_display_data",
            MessageType::ExecuteInput => "execute_input",
            MessageType::ExecuteResult => "execute_result",
            MessageType::Error => "error",
            MessageType::Status => "status",
            MessageType::ClearOutput => "clear_output",
            MessageType::CommOpen => "comm_open",
            MessageType::CommMsg => "comm_msg",
            MessageType::CommClose => "comm_close",
            MessageType::ErrorReply(inner) => inner.as_str(),
            MessageType::Other(name) => name,
        }
    }

    pub fn from_name(name: &str) -> Self {
        match name {
            "execute_request" => MessageType::ExecuteRequest,
            "execute_reply" => MessageType::ExecuteReply,
            "inspect_request" => MessageType::InspectRequest,
            "inspect_reply" => MessageType::InspectReply,
            "complete_request" => MessageType::CompleteRequest,
            "complete_reply" => MessageType::CompleteReply,
            "history_request" => MessageType::HistoryRequest,
            "history_reply" => MessageType::HistoryReply,
            "is_complete_request" => MessageType::IsCompleteRequest,
            "is_complete_reply" => MessageType::IsCompleteReply,
            "comm_info_request" => MessageType::CommInfoRequest,
            "comm_info_reply" => MessageType::CommInfoReply,
            "kernel_info_request" => MessageType::KernelInfoRequest,
            "kernel_info_reply" => MessageType::KernelInfoReply,
            "shutdown_request" => MessageType::ShutdownRequest,
            "shutdown_reply" => MessageType::ShutdownReply,
            "interrupt_request" => MessageType::InterruptRequest,
            "interrupt_reply" => MessageType::InterruptReply,
            "input_request" => MessageType::InputRequest,
            "input_reply" => MessageType::InputReply,
            "stream" => MessageType::Stream,
            "display_data" => MessageType::DisplayData,
            "update_display_data" => MessageType::UpdateDisplayData,
            "execute_input" => MessageType::ExecuteInput,
            "execute_result" => MessageType::ExecuteResult,
            "error" => MessageType::Error,
            "status" => MessageType::Status,
            "clear_output" => MessageType::ClearOutput,
            "comm_open" => MessageType::CommOpen,
            "comm_msg" => MessageType::CommMsg,
            "comm_close" => MessageType::CommClose,
            other => MessageType::Other(other.to_string()),
        }
    }

    /// The failure variant of this reply kind. Idempotent.
    pub fn error(&self) -> MessageType {
        match self {
            MessageType::ErrorReply(_) => self.clone(),
            other => MessageType::ErrorReply(Box::new(other.clone())),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, MessageType::ErrorReply(_))
    }

    /// True when `self` is the failure variant of `base`.
    pub fn is_error_for(&self, base: &MessageType) -> bool {
        matches!(self, MessageType::ErrorReply(inner) if inner.as_ref() == base)
    }

    /// Strips the failure wrapper, if any.
    pub fn base(&self) -> &MessageType {
        match self {
            MessageType::ErrorReply(inner) => inner.base(),
            other => other,
        }
    }

    pub fn is_reply(&self) -> bool {
        self.base().as_str().ends_with("_reply")
    }

    pub fn is_request(&self) -> bool {
        self.base().as_str().ends_with("_request")
    }

    /// Reply kind paired with a request kind (`foo_request` -> `foo_reply`).
    pub fn reply_type(&self) -> Option<MessageType> {
        let name = self.base().as_str();
        name.strip_suffix("_request")
            .map(|stem| MessageType::from_name(&format!("{stem}_reply")))
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_error() {
            write!(f, "{}(error)", self.as_str())
        } else {
            f.write_str(self.as_str())
        }
    }
}

impl From<&str> for MessageType {
    fn from(name: &str) -> Self {
        MessageType::from_name(name)
    }
}

impl Serialize for MessageType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for MessageType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(MessageType::from_name(&name))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Header {
    pub msg_id: String,
    pub username: String,
    pub session: String,
    /// ISO-8601 creation time, kept as received so re-encoding is lossless.
    pub date: String,
    pub msg_type: MessageType,
    pub version: String,
}

impl Header {
    pub fn new(msg_type: MessageType, session: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            msg_id: uuid::Uuid::new_v4().to_string(),
            username: username.into(),
            session: session.into(),
            date: now_iso8601(),
            msg_type,
            version: PROTOCOL_VERSION.to_string(),
        }
    }

    /// Fresh header for a message caused by `parent`, in the same session.
    pub fn child_of(parent: &Header, msg_type: MessageType) -> Self {
        Self::new(msg_type, parent.session.clone(), parent.username.clone())
    }

    pub fn timestamp(&self) -> Option<DateTime<FixedOffset>> {
        DateTime::parse_from_rfc3339(&self.date).ok()
    }
}

fn now_iso8601() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// A decoded kernel message. `identities` route replies back through ROUTER
/// sockets; `blobs` are the raw buffers trailing the content frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    pub identities: Vec<Vec<u8>>,
    pub header: Header,
    pub parent_header: Option<Header>,
    pub metadata: Map<String, Value>,
    pub content: Value,
    pub blobs: Vec<Vec<u8>>,
}

impl Message {
    pub fn new(header: Header, content: Value) -> Self {
        Self {
            identities: Vec::new(),
            header,
            parent_header: None,
            metadata: Map::new(),
            content,
            blobs: Vec::new(),
        }
    }

    /// Builds a message answering `parent`: same routing identities, parent
    /// header attached, new header in the parent's session.
    pub fn reply_to(parent: &Message, msg_type: MessageType, content: Value) -> Self {
        Self {
            identities: parent.identities.clone(),
            header: Header::child_of(&parent.header, msg_type),
            parent_header: Some(parent.header.clone()),
            metadata: Map::new(),
            content,
            blobs: Vec::new(),
        }
    }

    /// Like [`Message::reply_to`] but with typed content.
    pub fn typed_reply<C: Content>(parent: &Message, content: &C) -> Result<Self, ProtocolError> {
        let value = serde_json::to_value(content)?;
        Ok(Self::reply_to(parent, C::message_type(), value))
    }

    pub fn msg_type(&self) -> &MessageType {
        &self.header.msg_type
    }

    pub fn content_as<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        T::deserialize(&self.content).map_err(|source| ProtocolError::Content {
            msg_type: self.header.msg_type.to_string(),
            source,
        })
    }

    pub fn with_identities(mut self, identities: Vec<Vec<u8>>) -> Self {
        self.identities = identities;
        self
    }

    pub fn with_parent(mut self, parent: Header) -> Self {
        self.parent_header = Some(parent);
        self
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_blobs(mut self, blobs: Vec<Vec<u8>>) -> Self {
        self.blobs = blobs;
        self
    }
}
