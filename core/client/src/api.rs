//! Typed ledger calls over a [`Transport`].

use activetime_protocol::{
    ActivityEvent, LogsParams, Method, RecordEventParams, Request, SessionId, SessionLog,
    SessionParams, StartAck, StartParams, Validate, DATE_FORMAT,
};
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::ClientError;
use crate::transport::Transport;

pub struct LedgerApi {
    transport: Box<dyn Transport>,
    next_request: AtomicU64,
}

impl LedgerApi {
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            transport,
            next_request: AtomicU64::new(1),
        }
    }

    /// Validates locally before sending; the ledger validates again.
    pub fn start(&self, params: &StartParams) -> Result<SessionId, ClientError> {
        params
            .validate()
            .map_err(|err| ClientError::Validation(err.message))?;
        let ack: StartAck = self.call_decode(Method::Start, Some(encode(params)?))?;
        Ok(ack.session_id)
    }

    pub fn heartbeat(&self, session_id: SessionId) -> Result<(), ClientError> {
        self.call_session(Method::Heartbeat, session_id)
    }

    pub fn pause(&self, session_id: SessionId) -> Result<(), ClientError> {
        self.call_session(Method::Pause, session_id)
    }

    pub fn resume(&self, session_id: SessionId) -> Result<(), ClientError> {
        self.call_session(Method::Resume, session_id)
    }

    pub fn stop(&self, session_id: SessionId) -> Result<(), ClientError> {
        self.call_session(Method::Stop, session_id)
    }

    pub fn logs(&self, user_id: i64, day: NaiveDate) -> Result<Vec<SessionLog>, ClientError> {
        let params = LogsParams {
            user_id,
            date: day.format(DATE_FORMAT).to_string(),
        };
        self.call_decode(Method::GetLogs, Some(encode(&params)?))
    }

    pub fn session_events(&self, session_id: SessionId) -> Result<Vec<ActivityEvent>, ClientError> {
        self.call_decode(
            Method::GetSessionEvents,
            Some(encode(&SessionParams { session_id })?),
        )
    }

    pub fn record_event(&self, params: &RecordEventParams) -> Result<(), ClientError> {
        params
            .validate()
            .map_err(|err| ClientError::Validation(err.message))?;
        self.call(Method::RecordEvent, Some(encode(params)?))
            .map(|_| ())
    }

    pub fn health(&self) -> Result<Value, ClientError> {
        self.call(Method::GetHealth, None)
    }

    fn call_session(&self, method: Method, session_id: SessionId) -> Result<(), ClientError> {
        self.call(method, Some(encode(&SessionParams { session_id })?))
            .map(|_| ())
    }

    fn call_decode<T: DeserializeOwned>(
        &self,
        method: Method,
        params: Option<Value>,
    ) -> Result<T, ClientError> {
        let data = self.call(method, params)?;
        serde_json::from_value(data).map_err(|err| {
            ClientError::Protocol(format!("Unexpected {:?} response payload: {}", method, err))
        })
    }

    /// Sends one request and unwraps the envelope. Ledger errors become typed
    /// `ClientError`s; a mismatched correlation id is a protocol error.
    fn call(&self, method: Method, params: Option<Value>) -> Result<Value, ClientError> {
        let request_id = format!("req-{}", self.next_request.fetch_add(1, Ordering::Relaxed));
        let request = Request::new(method, params).with_id(request_id.clone());
        let response = self.transport.send(request)?;

        if let Some(id) = response.id.as_deref() {
            if id != request_id {
                return Err(ClientError::Protocol(format!(
                    "Response id {} does not match request {}",
                    id, request_id
                )));
            }
        }

        if !response.ok {
            return Err(match response.error {
                Some(info) => ClientError::from(info),
                None => ClientError::Protocol("Error response without details".to_string()),
            });
        }

        Ok(response.data.unwrap_or(Value::Null))
    }
}

fn encode<T: Serialize>(params: &T) -> Result<Value, ClientError> {
    serde_json::to_value(params)
        .map_err(|err| ClientError::Protocol(format!("Failed to encode params: {}", err)))
}
