//! Host application boundary.
//!
//! A host integration forwards its UI callbacks (input, scene load, save,
//! quit) to [`HostEvents`]. The tracker handle is the only implementation;
//! callbacks just enqueue work and return immediately.

use std::io::BufRead;
use tracing::{debug, warn};

use crate::error::ClientError;
use crate::tracker::TrackerHandle;

pub trait HostEvents {
    /// Any user interaction that proves the user is present.
    fn on_activity_signal(&self);

    /// A document was opened or saved under a new name. An empty path is an
    /// unsaved document.
    fn on_context_opened(&self, path: &str);

    fn on_task_changed(&self, task_id: Option<i64>);

    /// Ends the current session without leaving the host.
    fn on_stop_requested(&self);

    fn on_host_exit(&self);
}

impl HostEvents for TrackerHandle {
    fn on_activity_signal(&self) {
        if !self.activity() {
            debug!("Activity dropped; tracker is shut down");
        }
    }

    fn on_context_opened(&self, path: &str) {
        if !self.open_context(path) {
            debug!(path, "Context change dropped; tracker is shut down");
        }
    }

    fn on_task_changed(&self, task_id: Option<i64>) {
        if !self.change_task(task_id) {
            debug!(task_id = ?task_id, "Task change dropped; tracker is shut down");
        }
    }

    fn on_stop_requested(&self) {
        self.stop_session();
    }

    fn on_host_exit(&self) {
        self.shutdown();
    }
}

/// One implementation per host application.
pub trait HostIntegration {
    fn app_name(&self) -> &str;

    /// Runs the host's event pump until the host exits, forwarding events.
    fn run(&mut self, events: &dyn HostEvents) -> Result<(), ClientError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostLine {
    Activity,
    Open(String),
    Task(Option<i64>),
    Stop,
    Exit,
}

/// Parses one line of the line protocol. Blank lines yield `Ok(None)`.
pub fn parse_line(line: &str) -> Result<Option<HostLine>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (command, rest) = match line.split_once(char::is_whitespace) {
        Some((command, rest)) => (command, rest.trim()),
        None => (line, ""),
    };

    let parsed = match command {
        "activity" => HostLine::Activity,
        "open" => HostLine::Open(rest.to_string()),
        "task" => match rest {
            "" | "none" => HostLine::Task(None),
            raw => {
                let task_id: i64 = raw
                    .parse()
                    .map_err(|_| format!("task id must be an integer or 'none': {}", raw))?;
                if task_id <= 0 {
                    return Err(format!("task id must be positive: {}", task_id));
                }
                HostLine::Task(Some(task_id))
            }
        },
        "stop" => HostLine::Stop,
        "exit" | "quit" => HostLine::Exit,
        other => return Err(format!("unknown command: {}", other)),
    };
    Ok(Some(parsed))
}

/// Host driven by text lines, one event per line:
/// `activity`, `open <path>`, `task <id|none>`, `stop`, `exit`.
/// End of input counts as host exit.
pub struct LineHost<R> {
    app_name: String,
    reader: R,
}

impl<R: BufRead> LineHost<R> {
    pub fn new(app_name: impl Into<String>, reader: R) -> Self {
        Self {
            app_name: app_name.into(),
            reader,
        }
    }
}

impl<R: BufRead> HostIntegration for LineHost<R> {
    fn app_name(&self) -> &str {
        &self.app_name
    }

    fn run(&mut self, events: &dyn HostEvents) -> Result<(), ClientError> {
        let mut line = String::new();
        loop {
            line.clear();
            let read = self.reader.read_line(&mut line).map_err(|err| {
                events.on_host_exit();
                ClientError::Protocol(format!("Failed to read host events: {}", err))
            })?;
            if read == 0 {
                break;
            }

            match parse_line(&line) {
                Ok(Some(HostLine::Activity)) => events.on_activity_signal(),
                Ok(Some(HostLine::Open(path))) => events.on_context_opened(&path),
                Ok(Some(HostLine::Task(task_id))) => events.on_task_changed(task_id),
                Ok(Some(HostLine::Stop)) => events.on_stop_requested(),
                Ok(Some(HostLine::Exit)) => break,
                Ok(None) => {}
                Err(err) => warn!(error = %err, "Ignoring host line"),
            }
        }
        events.on_host_exit();
        Ok(())
    }
}
