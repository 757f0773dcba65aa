//! Typed payloads for the `content` frame of each message kind.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::message::MessageType;

/// A payload that knows which message kind carries it.
pub trait Content: Serialize {
    fn message_type() -> MessageType;
}

macro_rules! content_type {
    ($($ty:ty => $kind:ident),* $(,)?) => {
        $(
            impl Content for $ty {
                fn message_type() -> MessageType {
                    MessageType::$kind
                }
            }
        )*
    };
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyStatus {
    Ok,
    Error,
    Abort,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionState {
    Busy,
    Idle,
    Starting,
}

fn yes() -> bool {
    true
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub code: String,
    #[serde(default)]
    pub silent: bool,
    #[serde(default = "yes")]
    pub store_history: bool,
    #[serde(default)]
    pub user_expressions: Map<String, Value>,
    #[serde(default)]
    pub allow_stdin: bool,
    #[serde(default = "yes")]
    pub stop_on_error: bool,
}

impl ExecuteRequest {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            silent: false,
            store_history: true,
            user_expressions: Map::new(),
            allow_stdin: false,
            stop_on_error: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecuteReply {
    pub status: ReplyStatus,
    pub execution_count: u32,
    #[serde(default)]
    pub user_expressions: Map<String, Value>,
}

/// Failure body shared by every `*_reply` error variant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorReply {
    pub status: ReplyStatus,
    pub ename: String,
    pub evalue: String,
    pub traceback: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_count: Option<u32>,
}

impl ErrorReply {
    pub fn new(ename: impl Into<String>, evalue: impl Into<String>, traceback: Vec<String>) -> Self {
        Self {
            status: ReplyStatus::Error,
            ename: ename.into(),
            evalue: evalue.into(),
            traceback,
            execution_count: None,
        }
    }

    pub fn published(&self) -> ErrorContent {
        ErrorContent {
            ename: self.ename.clone(),
            evalue: self.evalue.clone(),
            traceback: self.traceback.clone(),
        }
    }
}

/// Body of the `error` publication on iopub.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorContent {
    pub ename: String,
    pub evalue: String,
    pub traceback: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InspectRequest {
    pub code: String,
    pub cursor_pos: usize,
    #[serde(default)]
    pub detail_level: u8,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InspectReply {
    pub status: ReplyStatus,
    pub found: bool,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompleteRequest {
    pub code: String,
    pub cursor_pos: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompleteReply {
    pub status: ReplyStatus,
    pub matches: Vec<String>,
    pub cursor_start: usize,
    pub cursor_end: usize,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryRequest {
    #[serde(default)]
    pub output: bool,
    #[serde(default)]
    pub raw: bool,
    #[serde(default)]
    pub hist_access_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<u32>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryReply {
    pub status: ReplyStatus,
    pub history: Vec<Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IsCompleteRequest {
    pub code: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IsCompleteStatus {
    Complete,
    Incomplete,
    Invalid,
    Unknown,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IsCompleteReply {
    pub status: IsCompleteStatus,
    /// Only present when `status` is `incomplete`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indent: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct KernelInfoRequest {}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LanguageInfo {
    pub name: String,
    pub version: String,
    pub mimetype: String,
    pub file_extension: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codemirror_mode: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HelpLink {
    pub text: String,
    pub url: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KernelInfoReply {
    pub status: ReplyStatus,
    pub protocol_version: String,
    pub implementation: String,
    pub implementation_version: String,
    pub language_info: LanguageInfo,
    pub banner: String,
    #[serde(default)]
    pub help_links: Vec<HelpLink>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ShutdownRequest {
    #[serde(default)]
    pub restart: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ShutdownReply {
    pub status: ReplyStatus,
    pub restart: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct InterruptRequest {}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InterruptReply {
    pub status: ReplyStatus,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CommInfoRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_name: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommInfoReply {
    pub status: ReplyStatus,
    pub comms: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommOpen {
    pub comm_id: String,
    pub target_name: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommMsg {
    pub comm_id: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommClose {
    pub comm_id: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Status {
    pub execution_state: ExecutionState,
}

impl Status {
    pub fn busy() -> Self {
        Self { execution_state: ExecutionState::Busy }
    }

    pub fn idle() -> Self {
        Self { execution_state: ExecutionState::Idle }
    }

    pub fn starting() -> Self {
        Self { execution_state: ExecutionState::Starting }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Stream {
    pub name: String,
    pub text: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecuteInput {
    pub code: String,
    pub execution_count: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecuteResult {
    pub execution_count: u32,
    pub data: Map<String, Value>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl ExecuteResult {
    pub fn text(execution_count: u32, text: impl Into<String>) -> Self {
        let mut data = Map::new();
        data.insert("text/plain".into(), Value::String(text.into()));
        Self { execution_count, data, metadata: Map::new() }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DisplayData {
    pub data: Map<String, Value>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub transient: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClearOutput {
    #[serde(default)]
    pub wait: bool,
}

content_type! {
    ExecuteRequest => ExecuteRequest,
    ExecuteReply => ExecuteReply,
    InspectRequest => InspectRequest,
    InspectReply => InspectReply,
    CompleteRequest => CompleteRequest,
    CompleteReply => CompleteReply,
    HistoryRequest => HistoryRequest,
    HistoryReply => HistoryReply,
    IsCompleteRequest => IsCompleteRequest,
    IsCompleteReply => IsCompleteReply,
    KernelInfoRequest => KernelInfoRequest,
    KernelInfoReply => KernelInfoReply,
    ShutdownRequest => ShutdownRequest,
    ShutdownReply => ShutdownReply,
    InterruptRequest => InterruptRequest,
    InterruptReply => InterruptReply,
    CommInfoRequest => CommInfoRequest,
    CommInfoReply => CommInfoReply,
    CommOpen => CommOpen,
    CommMsg => CommMsg,
    CommClose => CommClose,
    Status => Status,
    Stream => Stream,
    ExecuteInput => ExecuteInput,
    ExecuteResult => ExecuteResult,
    DisplayData => DisplayData,
    ClearOutput => ClearOutput,
    ErrorContent => Error,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn execute_request_defaults() {
        let req: ExecuteRequest = serde_json::from_value(json!({"code": "x"})).unwrap();
        assert!(!req.silent);
        assert!(req.store_history);
        assert!(req.stop_on_error);
    }

    #[test]
    fn is_complete_reply_omits_indent_unless_incomplete() {
        let complete = IsCompleteReply { status: IsCompleteStatus::Complete, indent: None };
        assert_eq!(serde_json::to_value(&complete).unwrap(), json!({"status": "complete"}));
        let incomplete = IsCompleteReply {
            status: IsCompleteStatus::Incomplete,
            indent: Some("  ".into()),
        };
        assert_eq!(
            serde_json::to_value(&incomplete).unwrap(),
            json!({"status": "incomplete", "indent": "  "})
        );
    }

    #[test]
    fn error_reply_carries_status_error() {
        let reply = ErrorReply::new("Failure", "boom", vec!["line".into()]);
        let value = serde_json::to_value(&reply).unwrap();
        assert_eq!(value["status"], "error");
        assert!(value.get("execution_count").is_none());
        assert_eq!(reply.published().evalue, "boom");
    }
}
