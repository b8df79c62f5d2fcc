//! Request/response transport to the ledger.
//!
//! One TCP connection per request: write the JSON request plus `\n`, read one
//! newline-terminated JSON response. Connect, read and write are all bounded
//! by the request timeout.

use activetime_protocol::{
    read_frame, write_frame, FrameError, Request, Response, MAX_REQUEST_BYTES,
};
use std::io::Read;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::error::ClientError;

pub trait Transport: Send {
    fn send(&self, request: Request) -> Result<Response, ClientError>;
}

pub struct TcpTransport {
    addr: String,
    timeout: Duration,
}

impl TcpTransport {
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
        }
    }

    fn connect(&self) -> Result<TcpStream, ClientError> {
        let candidates: Vec<SocketAddr> = self
            .addr
            .to_socket_addrs()
            .map_err(|err| {
                ClientError::connection(&self.addr, format!("invalid address: {}", err))
            })?
            .collect();

        let mut last_error = None;
        for candidate in candidates {
            match TcpStream::connect_timeout(&candidate, self.timeout) {
                Ok(stream) => return Ok(stream),
                Err(err) => last_error = Some(err),
            }
        }

        let message = last_error
            .map(|err| err.to_string())
            .unwrap_or_else(|| "address resolved to nothing".to_string());
        Err(ClientError::connection(&self.addr, message))
    }
}

impl Transport for TcpTransport {
    fn send(&self, request: Request) -> Result<Response, ClientError> {
        let mut stream = self.connect()?;
        let _ = stream.set_read_timeout(Some(self.timeout));
        let _ = stream.set_write_timeout(Some(self.timeout));

        write_frame(&mut stream, &request).map_err(|err| {
            ClientError::connection(&self.addr, format!("Failed to write request: {}", err))
        })?;

        read_response(&mut stream).map_err(|err| match err {
            ReadFailure::Io(message) => ClientError::connection(&self.addr, message),
            ReadFailure::Malformed(message) => ClientError::Protocol(message),
        })
    }
}

enum ReadFailure {
    Io(String),
    Malformed(String),
}

fn read_response(stream: &mut impl Read) -> Result<Response, ReadFailure> {
    let frame = read_frame(stream, MAX_REQUEST_BYTES).map_err(|err| match err {
        FrameError::TooLarge { .. } => {
            ReadFailure::Malformed("Response exceeded maximum size".to_string())
        }
        FrameError::TimedOut => {
            ReadFailure::Io("Timed out waiting for ledger response".to_string())
        }
        FrameError::Empty => {
            ReadFailure::Io("Ledger closed the connection without a response".to_string())
        }
        FrameError::Io(err) => ReadFailure::Io(format!("Failed to read response: {}", err)),
    })?;

    serde_json::from_slice(&frame.line)
        .map_err(|err| ReadFailure::Malformed(format!("Invalid response JSON: {}", err)))
}
