//! Newline framing shared by both ends of a connection.
//!
//! Each side writes exactly one JSON document followed by `\n`. Readers stop
//! at the first newline or end of stream, whichever comes first.

use serde::Serialize;
use std::io::{self, ErrorKind, Read, Write};

const READ_CHUNK_SIZE: usize = 4096;

/// The first line of a stream, without its newline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub line: Vec<u8>,
    /// Non-whitespace bytes followed the newline in the same read.
    pub trailing_data: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame exceeded {limit} bytes")]
    TooLarge { limit: usize },

    #[error("timed out waiting for data")]
    TimedOut,

    /// End of stream (or a blank line) before any payload.
    #[error("stream ended without a payload")]
    Empty,

    #[error(transparent)]
    Io(io::Error),
}

pub fn read_frame(stream: &mut impl Read, limit: usize) -> Result<Frame, FrameError> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    loop {
        let n = match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                return Err(FrameError::TimedOut);
            }
            Err(err) => return Err(FrameError::Io(err)),
        };
        buffer.extend_from_slice(&chunk[..n]);
        if buffer.len() > limit {
            return Err(FrameError::TooLarge { limit });
        }
        if chunk[..n].contains(&b'\n') {
            break;
        }
    }

    let (line, trailing_data) = match buffer.iter().position(|b| *b == b'\n') {
        Some(index) => {
            let trailing = buffer[index + 1..].iter().any(|b| !b.is_ascii_whitespace());
            buffer.truncate(index);
            (buffer, trailing)
        }
        None => (buffer, false),
    };

    if line.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(FrameError::Empty);
    }
    Ok(Frame {
        line,
        trailing_data,
    })
}

/// Serializes `value` as one line and flushes.
pub fn write_frame<T: Serialize>(stream: &mut impl Write, value: &T) -> io::Result<()> {
    let mut payload = serde_json::to_vec(value)?;
    payload.push(b'\n');
    stream.write_all(&payload)?;
    stream.flush()
}
