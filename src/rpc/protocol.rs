//! Wire protocol message types
//!
//! Defines the JSON message format shared by both transports.
//!
//! ```json
//! // Client -> Server
//! {"type": "rpc", "id": 4, "data": {"type": "EvaluateProperty", ...}}
//!
//! // Server -> Client
//! {"type": "rpc", "id": 4, "data": {"type": "success", "value": {...}}}
//! {"type": "rpc", "id": 5, "data": {"type": "failureMsg", "value": "..."}}
//! {"type": "asyncUpdate", "job": 2, "isFinalUpdate": false, "value": {...}}
//! {"type": "init", "version": {...}, "changeBufferTime": 600}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, SyncError};
use crate::locator::{NodeLocator, Property};

/// Push type carrying job and worker-status updates
pub const PUSH_ASYNC_UPDATE: &str = "asyncUpdate";
/// Push type sent once per session with server capabilities
pub const PUSH_INIT: &str = "init";
/// Push type raised when the server-side state changed underneath the client
pub const PUSH_REFRESH: &str = "refresh";

/// Client-to-server envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    Rpc { id: u64, data: Value },
}

/// Body of an `rpc` reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum RpcReply {
    Success(Value),
    FailureMsg(String),
}

impl RpcReply {
    pub fn into_result(self) -> Result<Value> {
        match self {
            Self::Success(value) => Ok(value),
            Self::FailureMsg(msg) => Err(SyncError::Remote(msg)),
        }
    }
}

/// Classification of an inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Reply to one of our calls
    Reply { id: u64, reply: RpcReply },
    /// Named server push; `body` is the whole envelope
    Push { kind: String, body: Value },
}

impl Inbound {
    pub fn parse(text: &str) -> Result<Self> {
        Self::from_value(serde_json::from_str(text)?)
    }

    pub fn from_value(value: Value) -> Result<Self> {
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| SyncError::protocol("message has no string 'type'"))?
            .to_string();

        if kind != "rpc" {
            return Ok(Self::Push { kind, body: value });
        }

        let id = value
            .get("id")
            .and_then(Value::as_u64)
            .ok_or_else(|| SyncError::protocol("rpc message without numeric 'id'"))?;
        let data = value
            .get("data")
            .cloned()
            .ok_or_else(|| SyncError::protocol(format!("rpc reply {} has no 'data'", id)))?;
        let reply: RpcReply = serde_json::from_value(data)?;
        Ok(Self::Reply { id, reply })
    }
}

// ============================================================================
// HTTP emulation
// ============================================================================

/// Payloads understood by the `PUT /wsput` endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WsPutRequest {
    #[serde(rename = "wsput:init")]
    Init { session: String },
    #[serde(rename = "wsput:tunnel")]
    Tunnel { session: String, request: Value },
    #[serde(rename = "wsput:longpoll")]
    LongPoll { session: String, etag: u64 },
}

/// Result of a long-poll call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum LongPollReply {
    /// Current change token
    Etag(u64),
    /// A queued push envelope
    Push(Value),
}

// ============================================================================
// Jobs
// ============================================================================

/// Push envelope for job and worker-status updates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AsyncRpcUpdate {
    pub job: u64,
    pub is_final_update: bool,
    pub value: AsyncRpcUpdateValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum AsyncRpcUpdateValue {
    Status(String),
    WorkerStackTrace(Vec<String>),
    WorkerStatuses(Vec<String>),
    WorkerTaskDone(TaskDone),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum TaskDone {
    Normal(Value),
    UnexpectedError(Vec<String>),
}

/// Contents of the `init` push
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitInfo {
    #[serde(default)]
    pub version: Option<Value>,
    /// Server-announced batching interval in milliseconds
    #[serde(default)]
    pub change_buffer_time: Option<u64>,
    #[serde(default)]
    pub worker_process_count: Option<u32>,
}

// ============================================================================
// Requests
// ============================================================================

/// Source text and parse options sent with every evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsingRequestData {
    pub pos_recovery: String,
    pub cache: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main_args: Option<Vec<String>>,
    pub tmp_suffix: String,
}

impl ParsingRequestData {
    /// Plain text with the server's default recovery and caching
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            pos_recovery: "FAIL".to_string(),
            cache: "FULL".to_string(),
            text: text.into(),
            main_args: None,
            tmp_suffix: ".tmp".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluatePropertyReq {
    pub src: ParsingRequestData,
    pub locator: NodeLocator,
    pub property: Property,
    pub capture_stdout: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_result_locator: Option<bool>,
}

/// Requests this client sends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    EvaluateProperty(EvaluatePropertyReq),
    #[serde(rename = "Concurrent:StopJob")]
    StopJob { job: u64 },
    #[serde(rename = "Concurrent:SubscribeToWorkerStatus")]
    SubscribeToWorkerStatus { job: u64 },
    #[serde(rename = "Concurrent:UnsubscribeFromWorkerStatus")]
    #[serde(rename_all = "camelCase")]
    UnsubscribeFromWorkerStatus { job: u64, subscriber_id: u64 },
}

impl Request {
    pub fn to_payload(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Reply to `EvaluateProperty` and other job-capable requests
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluatePropertyRes {
    pub response: PropertyEvaluation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PropertyEvaluation {
    /// Evaluated inline; `value` holds the result
    Sync { value: Value },
    /// Evaluation continues as a job; results arrive as pushes
    Job {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<u64>,
    },
}
