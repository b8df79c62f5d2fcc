//! Tracker worker.
//!
//! One thread owns the [`SessionClient`] and the idle poller. Host callbacks
//! and poller ticks only enqueue [`Command`]s, so ledger calls never run on
//! the host's UI context and every call for a session is serialized.

use activetime_protocol::SessionId;
use chrono::{DateTime, Utc};
use std::io;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::poller::IdlePoller;
use crate::session::{ContextInfo, SessionClient};

pub trait Clock: Send {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Activity,
    ContextOpened(ContextInfo),
    ChangeTask(Option<i64>),
    IdleTick(SessionId),
    StopSession,
    Shutdown,
}

#[derive(Debug, Clone, Copy)]
pub struct TrackerSettings {
    pub poll_interval: Duration,
    /// Upper bound on waiting for the poller to exit before `stop` is sent.
    pub stop_wait: Duration,
}

/// Cloneable sender side handed to host integrations.
#[derive(Debug, Clone)]
pub struct TrackerHandle {
    tx: Sender<Command>,
}

impl TrackerHandle {
    /// Returns `false` once the worker has shut down.
    pub fn send(&self, command: Command) -> bool {
        self.tx.send(command).is_ok()
    }

    pub fn activity(&self) -> bool {
        self.send(Command::Activity)
    }

    pub fn open_context(&self, path: &str) -> bool {
        self.send(Command::ContextOpened(ContextInfo::from_path(path)))
    }

    pub fn change_task(&self, task_id: Option<i64>) -> bool {
        self.send(Command::ChangeTask(task_id))
    }

    pub fn stop_session(&self) -> bool {
        self.send(Command::StopSession)
    }

    pub fn shutdown(&self) -> bool {
        self.send(Command::Shutdown)
    }
}

pub struct Tracker {
    handle: TrackerHandle,
    worker: Option<JoinHandle<()>>,
}

impl Tracker {
    pub fn spawn(
        client: SessionClient,
        settings: TrackerSettings,
        clock: Box<dyn Clock>,
    ) -> io::Result<Self> {
        let (tx, rx) = mpsc::channel();
        let worker = Worker {
            client,
            settings,
            clock,
            poller: None,
            tx: tx.clone(),
        };
        let join = thread::Builder::new()
            .name("activetime-tracker".to_string())
            .spawn(move || worker.run(rx))?;

        Ok(Self {
            handle: TrackerHandle { tx },
            worker: Some(join),
        })
    }

    pub fn handle(&self) -> TrackerHandle {
        self.handle.clone()
    }

    /// Stops any open session and waits for the worker to finish.
    pub fn shutdown(mut self) {
        self.handle.shutdown();
        self.join_worker();
    }

    /// Waits for the worker to finish after a host-initiated shutdown.
    pub fn wait(mut self) {
        self.join_worker();
    }

    fn join_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Tracker worker panicked");
            }
        }
    }
}

impl Drop for Tracker {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.handle.shutdown();
        }
    }
}

struct Worker {
    client: SessionClient,
    settings: TrackerSettings,
    clock: Box<dyn Clock>,
    poller: Option<IdlePoller>,
    tx: Sender<Command>,
}

impl Worker {
    fn run(mut self, rx: Receiver<Command>) {
        debug!("Tracker worker started");
        while let Ok(command) = rx.recv() {
            match command {
                Command::Activity => {
                    let now = self.clock.now();
                    self.client.record_activity(now);
                }
                Command::ContextOpened(context) => self.open(context),
                Command::ChangeTask(task_id) => self.change_task(task_id),
                Command::IdleTick(session_id) => self.idle_tick(session_id),
                Command::StopSession => self.stop_session(),
                Command::Shutdown => break,
            }
        }
        self.stop_session();
        debug!("Tracker worker stopped");
    }

    fn open(&mut self, context: ContextInfo) {
        self.stop_session();

        let now = self.clock.now();
        match self.client.start(context, now) {
            Ok(session_id) => self.spawn_poller(session_id),
            Err(err) => warn!(error = %err, "Failed to start tracking session"),
        }
    }

    fn spawn_poller(&mut self, session_id: SessionId) {
        let tx = self.tx.clone();
        match IdlePoller::spawn(session_id, self.settings.poll_interval, move |id| {
            tx.send(Command::IdleTick(id)).is_ok()
        }) {
            Ok(poller) => self.poller = Some(poller),
            Err(err) => warn!(session_id, error = %err, "Failed to spawn idle poller"),
        }
    }

    fn change_task(&mut self, task_id: Option<i64>) {
        info!(
            previous = ?self.client.identity().task_id,
            task_id = ?task_id,
            "Task changed"
        );
        if let Some(poller) = self.poller.take() {
            poller.cancel(self.settings.stop_wait);
        }

        let now = self.clock.now();
        match self.client.change_task(task_id, now) {
            Ok(Some(session_id)) => self.spawn_poller(session_id),
            Ok(None) => {}
            Err(err) => warn!(error = %err, "Failed to restart session for new task"),
        }
    }

    fn idle_tick(&mut self, session_id: SessionId) {
        if self.client.session_id() != Some(session_id) {
            debug!(session_id, "Ignoring idle tick for a closed session");
            return;
        }
        let now = self.clock.now();
        self.client.check_idle(now);
    }

    /// Cancels the poller first, then stops the session.
    fn stop_session(&mut self) {
        if let Some(poller) = self.poller.take() {
            poller.cancel(self.settings.stop_wait);
        }
        if self.client.session_id().is_none() {
            return;
        }
        if let Err(err) = self.client.stop() {
            warn!(error = %err, "Failed to stop tracking session");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::LedgerApi;
    use crate::session::Identity;
    use crate::test_support::{at, wait_until, ManualClock, RecordingTransport};
    use activetime_protocol::Method;

    fn spawn_tracker(
        transport: &RecordingTransport,
        clock: &ManualClock,
        poll_interval: Duration,
    ) -> Tracker {
        let client = SessionClient::new(
            LedgerApi::new(Box::new(transport.clone())),
            Identity {
                user_id: 7,
                task_id: None,
                app_name: "blender".to_string(),
            },
            Duration::from_secs(600),
            clock.now(),
        );
        let settings = TrackerSettings {
            poll_interval,
            stop_wait: Duration::from_secs(2),
        };
        Tracker::spawn(client, settings, Box::new(clock.clone())).expect("spawn tracker")
    }

    #[test]
    fn commands_are_processed_in_order() {
        let transport = RecordingTransport::new();
        let clock = ManualClock::new(at(0));
        let tracker = spawn_tracker(&transport, &clock, Duration::from_secs(3600));
        let handle = tracker.handle();

        assert!(handle.open_context("/projects/scene.blend"));
        assert!(handle.activity());
        assert!(handle.activity());
        tracker.shutdown();

        assert_eq!(
            transport.methods(),
            vec![Method::Start, Method::Heartbeat, Method::Heartbeat, Method::Stop]
        );
        assert_eq!(
            transport.requests()[0].params.as_ref().expect("params")["context_name"],
            "scene.blend"
        );
    }

    #[test]
    fn idle_poller_pauses_and_activity_resumes() {
        let transport = RecordingTransport::new();
        let clock = ManualClock::new(at(0));
        let tracker = spawn_tracker(&transport, &clock, Duration::from_millis(10));
        let handle = tracker.handle();

        handle.open_context("/projects/scene.blend");
        assert!(wait_until(Duration::from_secs(2), || {
            transport.methods().contains(&Method::Start)
        }));
        clock.set(at(11));
        assert!(
            wait_until(Duration::from_secs(5), || transport.methods().contains(&Method::Pause)),
            "expected an idle pause"
        );

        clock.set(at(20));
        handle.activity();
        tracker.shutdown();

        let methods = transport.methods();
        let pauses = methods.iter().filter(|m| **m == Method::Pause).count();
        assert_eq!(pauses, 1);
        assert_eq!(
            &methods[methods.len() - 3..],
            &[Method::Resume, Method::Heartbeat, Method::Stop]
        );
    }

    #[test]
    fn opening_new_context_replaces_session() {
        let transport = RecordingTransport::new();
        let clock = ManualClock::new(at(0));
        let tracker = spawn_tracker(&transport, &clock, Duration::from_secs(3600));
        let handle = tracker.handle();

        handle.open_context("/projects/a.blend");
        handle.open_context("");
        tracker.shutdown();

        assert_eq!(
            transport.methods(),
            vec![Method::Start, Method::Stop, Method::Start, Method::Stop]
        );
        let second_start = &transport.requests()[2];
        assert_eq!(
            second_start.params.as_ref().expect("params")["context_name"],
            "Unsaved Context"
        );
    }

    #[test]
    fn change_task_restarts_session_with_new_task() {
        let transport = RecordingTransport::new();
        let clock = ManualClock::new(at(0));
        let tracker = spawn_tracker(&transport, &clock, Duration::from_secs(3600));
        let handle = tracker.handle();

        handle.open_context("/projects/a.blend");
        handle.change_task(Some(14));
        tracker.shutdown();

        let starts: Vec<_> = transport
            .requests()
            .into_iter()
            .filter(|request| request.method == Method::Start)
            .collect();
        assert_eq!(starts.len(), 2);
        assert_eq!(starts[1].params.as_ref().expect("params")["task_id"], 14);
        assert_eq!(
            starts[1].params.as_ref().expect("params")["context_path"],
            "/projects/a.blend"
        );
    }

    #[test]
    fn change_task_without_session_applies_to_next_start() {
        let transport = RecordingTransport::new();
        let clock = ManualClock::new(at(0));
        let tracker = spawn_tracker(&transport, &clock, Duration::from_secs(3600));
        let handle = tracker.handle();

        handle.change_task(Some(21));
        handle.open_context("/projects/a.blend");
        tracker.shutdown();

        assert_eq!(transport.methods(), vec![Method::Start, Method::Stop]);
        assert_eq!(
            transport.requests()[0].params.as_ref().expect("params")["task_id"],
            21
        );
    }

    #[test]
    fn stale_idle_tick_is_ignored() {
        let transport = RecordingTransport::new();
        let clock = ManualClock::new(at(0));
        let tracker = spawn_tracker(&transport, &clock, Duration::from_secs(3600));
        let handle = tracker.handle();

        handle.open_context("/projects/a.blend");
        assert!(wait_until(Duration::from_secs(2), || {
            transport.methods().contains(&Method::Start)
        }));
        clock.set(at(30));
        handle.send(Command::IdleTick(9999));
        tracker.shutdown();

        assert!(!transport.methods().contains(&Method::Pause));
    }

    #[test]
    fn stop_session_keeps_worker_running() {
        let transport = RecordingTransport::new();
        let clock = ManualClock::new(at(0));
        let tracker = spawn_tracker(&transport, &clock, Duration::from_secs(3600));
        let handle = tracker.handle();

        handle.open_context("/projects/a.blend");
        handle.stop_session();
        handle.activity();
        handle.open_context("/projects/b.blend");
        tracker.shutdown();

        assert_eq!(
            transport.methods(),
            vec![Method::Start, Method::Stop, Method::Start, Method::Stop]
        );
    }

    #[test]
    fn failed_start_does_not_spawn_poller() {
        let transport = RecordingTransport::new();
        transport.fail(Method::Start);
        let clock = ManualClock::new(at(0));
        let tracker = spawn_tracker(&transport, &clock, Duration::from_millis(5));
        let handle = tracker.handle();

        handle.open_context("/projects/a.blend");
        clock.set(at(30));
        thread::sleep(Duration::from_millis(30));
        tracker.shutdown();

        assert_eq!(transport.methods(), vec![Method::Start]);
    }
}
