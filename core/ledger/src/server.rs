//! TCP front end: one newline-terminated request per connection, one response.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use activetime_protocol::{
    codes, parse_params, read_frame, write_frame, ErrorInfo, FrameError, LogsParams, Method,
    RecordEventParams, Request, Response, SessionParams, StartAck, StartParams,
    MAX_REQUEST_BYTES, PROTOCOL_VERSION,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::LedgerError;
use crate::ledger::Ledger;

const READ_TIMEOUT_SECS: u64 = 2;

/// Accepts connections forever, one handler thread each.
pub fn serve(listener: TcpListener, ledger: Arc<Ledger>) {
    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let ledger = Arc::clone(&ledger);
                thread::spawn(move || handle_connection(stream, ledger));
            }
            Err(err) => {
                warn!(error = %err, "Failed to accept ledger connection");
            }
        }
    }
}

fn handle_connection(mut stream: TcpStream, ledger: Arc<Ledger>) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(READ_TIMEOUT_SECS)));
    let peer = stream.peer_addr().ok();

    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(err) => {
            warn!(peer = ?peer, code = %err.code, message = %err.message, "Failed to read request");
            let _ = write_response(&mut stream, Response::error_with_info(None, err));
            return;
        }
    };

    debug!(peer = ?peer, method = ?request.method, id = ?request.id, "Ledger request received");
    let response = handle_request(request, &ledger);
    if let Err(err) = write_response(&mut stream, response) {
        debug!(peer = ?peer, error = %err, "Failed to write response");
    }
}

/// Reads the first line of the stream as a request. Anything after the
/// newline is ignored.
pub fn read_request(stream: &mut impl Read) -> Result<Request, ErrorInfo> {
    let frame = read_frame(stream, MAX_REQUEST_BYTES).map_err(|err| match err {
        FrameError::TooLarge { .. } => {
            ErrorInfo::new(codes::REQUEST_TOO_LARGE, "request exceeded maximum size")
        }
        FrameError::TimedOut => ErrorInfo::new(codes::READ_TIMEOUT, "request timed out"),
        FrameError::Empty => ErrorInfo::new(codes::EMPTY_REQUEST, "request body was empty"),
        FrameError::Io(err) => {
            ErrorInfo::new(codes::READ_ERROR, format!("failed to read request: {}", err))
        }
    })?;
    if frame.trailing_data {
        warn!("Ignoring data after the request line");
    }

    serde_json::from_slice(&frame.line).map_err(|err| {
        ErrorInfo::new(
            codes::INVALID_JSON,
            format!("request was not valid JSON: {}", err),
        )
    })
}

pub fn handle_request(request: Request, ledger: &Ledger) -> Response {
    handle_request_at(request, ledger, Utc::now())
}

/// Dispatches one request with `now` as the server clock reading.
pub fn handle_request_at(request: Request, ledger: &Ledger, now: DateTime<Utc>) -> Response {
    if request.protocol_version != PROTOCOL_VERSION {
        return Response::error(
            request.id,
            codes::PROTOCOL_MISMATCH,
            "unsupported protocol version",
        );
    }

    let id = request.id;
    let params = request.params;
    match request.method {
        Method::GetHealth => Response::ok(
            id,
            serde_json::json!({
                "status": "ok",
                "pid": std::process::id(),
                "version": env!("CARGO_PKG_VERSION"),
                "protocol_version": PROTOCOL_VERSION,
            }),
        ),
        Method::Start => match parse_params::<StartParams>(params) {
            Ok(start) => data_response(
                id,
                ledger
                    .start(&start, now)
                    .map(|session_id| StartAck { session_id }),
            ),
            Err(err) => Response::error_with_info(id, err),
        },
        Method::Heartbeat => with_session(id, params, |session_id| {
            ledger.heartbeat(session_id, now).map(|_| ())
        }),
        Method::Pause => with_session(id, params, |session_id| {
            ledger.pause(session_id, now).map(|_| ())
        }),
        Method::Resume => with_session(id, params, |session_id| ledger.resume(session_id, now)),
        Method::Stop => with_session(id, params, |session_id| {
            ledger.stop(session_id, now).map(|_| ())
        }),
        Method::GetLogs => {
            let query = parse_params::<LogsParams>(params)
                .and_then(|logs| Ok((logs.user_id, logs.day()?)));
            match query {
                Ok((user_id, day)) => data_response(id, ledger.logs(user_id, day)),
                Err(err) => Response::error_with_info(id, err),
            }
        }
        Method::GetSessionEvents => match parse_params::<SessionParams>(params) {
            Ok(session) => data_response(id, ledger.session_events(session.session_id)),
            Err(err) => Response::error_with_info(id, err),
        },
        Method::RecordEvent => match parse_params::<RecordEventParams>(params) {
            Ok(event) => ack_response(id, ledger.record_event(&event, now)),
            Err(err) => Response::error_with_info(id, err),
        },
    }
}

fn with_session(
    id: Option<String>,
    params: Option<serde_json::Value>,
    op: impl FnOnce(i64) -> Result<(), LedgerError>,
) -> Response {
    match parse_params::<SessionParams>(params) {
        Ok(session) => ack_response(id, op(session.session_id)),
        Err(err) => Response::error_with_info(id, err),
    }
}

fn ack_response(id: Option<String>, result: Result<(), LedgerError>) -> Response {
    match result {
        Ok(()) => Response::ack(id),
        Err(err) => error_response(id, err),
    }
}

fn data_response<T: Serialize>(id: Option<String>, result: Result<T, LedgerError>) -> Response {
    match result {
        Ok(value) => match serde_json::to_value(value) {
            Ok(value) => Response::ok(id, value),
            Err(err) => Response::error(
                id,
                codes::SERIALIZATION_ERROR,
                format!("failed to serialize response: {}", err),
            ),
        },
        Err(err) => error_response(id, err),
    }
}

fn error_response(id: Option<String>, err: LedgerError) -> Response {
    match &err {
        LedgerError::Storage(message) => warn!(error = %message, "Ledger storage failure"),
        _ => debug!(code = err.code(), error = %err, "Ledger request rejected"),
    }
    Response::error_with_info(id, err.to_error_info())
}

fn write_response(stream: &mut impl Write, response: Response) -> std::io::Result<()> {
    write_frame(stream, &response)
}
