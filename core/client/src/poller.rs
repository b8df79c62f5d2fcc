//! Cancellable periodic idle tick, one thread per open session.

use activetime_protocol::SessionId;
use std::io;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

pub struct IdlePoller {
    session_id: SessionId,
    cancel_tx: Sender<()>,
    done_rx: Receiver<()>,
    handle: Option<JoinHandle<()>>,
}

impl IdlePoller {
    /// Calls `on_tick` every `interval` until cancelled. The loop also ends
    /// when `on_tick` returns `false` (its consumer is gone).
    pub fn spawn<F>(session_id: SessionId, interval: Duration, on_tick: F) -> io::Result<Self>
    where
        F: Fn(SessionId) -> bool + Send + 'static,
    {
        let (cancel_tx, cancel_rx) = mpsc::channel::<()>();
        let (done_tx, done_rx) = mpsc::channel::<()>();

        let handle = thread::Builder::new()
            .name(format!("idle-poller-{}", session_id))
            .spawn(move || {
                loop {
                    match cancel_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {
                            if !on_tick(session_id) {
                                break;
                            }
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                let _ = done_tx.send(());
            })?;

        debug!(session_id, interval_ms = interval.as_millis() as u64, "Idle poller started");
        Ok(Self {
            session_id,
            cancel_tx,
            done_rx,
            handle: Some(handle),
        })
    }

    /// Signals the poller and waits up to `wait` for it to acknowledge exit.
    /// Returns `false` when it did not; the thread is then detached.
    pub fn cancel(mut self, wait: Duration) -> bool {
        let _ = self.cancel_tx.send(());
        let exited = match self.done_rx.recv_timeout(wait) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
            Err(RecvTimeoutError::Timeout) => false,
        };

        if exited {
            if let Some(handle) = self.handle.take() {
                let _ = handle.join();
            }
            debug!(session_id = self.session_id, "Idle poller stopped");
        } else {
            self.handle.take();
            warn!(
                session_id = self.session_id,
                wait_ms = wait.as_millis() as u64,
                "Idle poller did not exit in time; detaching"
            );
        }
        exited
    }
}
