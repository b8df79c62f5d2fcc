//! Wire protocol types and validation for the activetime session ledger.
//!
//! This crate is shared by the ledger and its clients to prevent schema drift.
//! The ledger remains the authority on validation and state, but clients reuse
//! the same types to construct valid requests and decode acknowledgments.
//!
//! Transport: one JSON `Request` per connection terminated by `\n`, answered by
//! one JSON `Response` terminated by `\n`.

use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod frame;

pub use frame::{read_frame, write_frame, Frame, FrameError};

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_REQUEST_BYTES: usize = 1024 * 1024; // 1MB
pub const DATE_FORMAT: &str = "%Y-%m-%d";

const MAX_TEXT_FIELD_LEN: usize = 1024;
const MAX_EVENT_TYPE_LEN: usize = 128;

/// Opaque session identifier allocated by `start`.
pub type SessionId = i64;

pub mod codes {
    pub const PROTOCOL_MISMATCH: &str = "protocol_mismatch";
    pub const INVALID_JSON: &str = "invalid_json";
    pub const EMPTY_REQUEST: &str = "empty_request";
    pub const REQUEST_TOO_LARGE: &str = "request_too_large";
    pub const READ_TIMEOUT: &str = "read_timeout";
    pub const READ_ERROR: &str = "read_error";
    pub const INVALID_PARAMS: &str = "invalid_params";
    pub const VALIDATION_ERROR: &str = "validation_error";
    pub const INVALID_TRANSITION: &str = "invalid_transition";
    pub const NOT_FOUND: &str = "not_found";
    pub const STORAGE_ERROR: &str = "storage_error";
    pub const SERIALIZATION_ERROR: &str = "serialization_error";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum Method {
    GetHealth,
    Start,
    Heartbeat,
    Pause,
    Resume,
    Stop,
    GetLogs,
    GetSessionEvents,
    RecordEvent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Request {
    pub protocol_version: u32,
    pub method: Method,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
}

impl Request {
    pub fn new(method: Method, params: Option<Value>) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            method,
            id: None,
            params,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl Response {
    pub fn ok(id: Option<String>, data: Value) -> Self {
        Self {
            ok: true,
            id,
            data: Some(data),
            error: None,
        }
    }

    /// Plain acknowledgment. Carries no ledger state.
    pub fn ack(id: Option<String>) -> Self {
        Self::ok(id, serde_json::json!(Ack::default()))
    }

    pub fn error(id: Option<String>, code: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(ErrorInfo::new(code, message)),
        }
    }

    pub fn error_with_info(id: Option<String>, error: ErrorInfo) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(error),
        }
    }
}

/// Request payload validation, run by the ledger after decoding params.
pub trait Validate {
    fn validate(&self) -> Result<(), ErrorInfo> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StartParams {
    pub user_id: i64,
    #[serde(default)]
    pub task_id: Option<i64>,
    pub app_name: String,
    pub context_name: String,
    pub context_path: String,
}

impl Validate for StartParams {
    fn validate(&self) -> Result<(), ErrorInfo> {
        if self.user_id <= 0 {
            return Err(ErrorInfo::new(
                codes::VALIDATION_ERROR,
                "user_id is required",
            ));
        }
        if let Some(task_id) = self.task_id {
            if task_id <= 0 {
                return Err(ErrorInfo::new(
                    codes::VALIDATION_ERROR,
                    "task_id must be positive when present",
                ));
            }
        }
        require_string(&self.app_name, "app_name")?;
        limit_length(&self.app_name, "app_name", MAX_TEXT_FIELD_LEN)?;
        limit_length(&self.context_name, "context_name", MAX_TEXT_FIELD_LEN)?;
        limit_length(&self.context_path, "context_path", MAX_TEXT_FIELD_LEN)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionParams {
    pub session_id: SessionId,
}

impl Validate for SessionParams {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogsParams {
    pub user_id: i64,
    pub date: String,
}

impl LogsParams {
    pub fn day(&self) -> Result<NaiveDate, ErrorInfo> {
        NaiveDate::parse_from_str(&self.date, DATE_FORMAT).map_err(|_| {
            ErrorInfo::new(codes::VALIDATION_ERROR, "date must be formatted YYYY-MM-DD")
        })
    }
}

impl Validate for LogsParams {
    fn validate(&self) -> Result<(), ErrorInfo> {
        if self.user_id <= 0 {
            return Err(ErrorInfo::new(
                codes::VALIDATION_ERROR,
                "user_id is required",
            ));
        }
        self.day().map(|_| ())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecordEventParams {
    pub session_id: SessionId,
    pub event_type: String,
    #[serde(default)]
    pub event_data: Option<Value>,
}

impl Validate for RecordEventParams {
    fn validate(&self) -> Result<(), ErrorInfo> {
        require_string(&self.event_type, "event_type")?;
        limit_length(&self.event_type, "event_type", MAX_EVENT_TYPE_LEN)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartAck {
    pub session_id: SessionId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub ack: bool,
}

impl Default for Ack {
    fn default() -> Self {
        Self { ack: true }
    }
}

/// A finalized session as returned by `get_logs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionLog {
    pub id: SessionId,
    pub user_id: i64,
    pub task_id: Option<i64>,
    pub app_name: String,
    pub context_name: String,
    pub context_path: String,
    pub start_time: String,
    pub end_time: String,
    /// Active minutes, rounded to two decimals.
    pub duration: f64,
    /// Minutes excluded while paused.
    pub paused_duration: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub session_id: SessionId,
    pub timestamp: String,
    pub event_type: String,
    #[serde(default)]
    pub event_data: Option<Value>,
}

pub fn parse_params<T>(params: Option<Value>) -> Result<T, ErrorInfo>
where
    T: DeserializeOwned + Validate,
{
    let params = params.ok_or_else(|| ErrorInfo::new(codes::INVALID_PARAMS, "params are required"))?;
    if !params.is_object() {
        return Err(ErrorInfo::new(
            codes::INVALID_PARAMS,
            "params must be an object",
        ));
    }
    let parsed: T = serde_json::from_value(params).map_err(|err| {
        ErrorInfo::new(
            codes::INVALID_PARAMS,
            format!("params payload is invalid: {}", err),
        )
    })?;
    parsed.validate()?;
    Ok(parsed)
}

fn require_string(value: &str, field: &str) -> Result<(), ErrorInfo> {
    if value.trim().is_empty() {
        return Err(ErrorInfo::new(
            codes::VALIDATION_ERROR,
            format!("{} is required", field),
        ));
    }
    Ok(())
}

fn limit_length(value: &str, field: &str, max: usize) -> Result<(), ErrorInfo> {
    if value.len() > max {
        return Err(ErrorInfo::new(
            codes::VALIDATION_ERROR,
            format!("{} must be {} characters or fewer", field, max),
        ));
    }
    Ok(())
}
