//! Session client: turns monitor signals and lifecycle requests into ledger
//! calls for at most one open session.
//!
//! All methods take `&mut self`; the tracker worker is the single owner, so
//! calls for a session are naturally serialized. The local view of the
//! session (`session_id`, `is_paused`) is for display only. The ledger is
//! authoritative.

use activetime_protocol::{SessionId, StartParams};
use chrono::{DateTime, Utc};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::api::LedgerApi;
use crate::error::ClientError;
use crate::monitor::ActivityMonitor;

pub const UNSAVED_CONTEXT_NAME: &str = "Unsaved Context";

/// The document or scene a session is attributed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextInfo {
    pub name: String,
    pub path: String,
}

impl ContextInfo {
    /// Names the context after the file name. An empty path is an unsaved
    /// document.
    pub fn from_path(path: &str) -> Self {
        let trimmed = path.trim();
        let name = if trimmed.is_empty() {
            UNSAVED_CONTEXT_NAME.to_string()
        } else {
            Path::new(trimmed)
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| trimmed.to_string())
        };
        Self {
            name,
            path: trimmed.to_string(),
        }
    }
}

/// Who the session is attributed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: i64,
    pub task_id: Option<i64>,
    pub app_name: String,
}

#[derive(Debug, Clone)]
struct OpenSession {
    id: SessionId,
    context: ContextInfo,
}

pub struct SessionClient {
    api: LedgerApi,
    identity: Identity,
    monitor: ActivityMonitor,
    session: Option<OpenSession>,
}

impl SessionClient {
    pub fn new(
        api: LedgerApi,
        identity: Identity,
        idle_timeout: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            api,
            identity,
            monitor: ActivityMonitor::new(idle_timeout, now),
            session: None,
        }
    }

    /// Opens a session for `context`, stopping any session already open.
    pub fn start(
        &mut self,
        context: ContextInfo,
        now: DateTime<Utc>,
    ) -> Result<SessionId, ClientError> {
        if self.session.is_some() {
            if let Err(err) = self.stop() {
                warn!(error = %err, "Failed to stop previous session before starting a new one");
            }
        }

        let params = StartParams {
            user_id: self.identity.user_id,
            task_id: self.identity.task_id,
            app_name: self.identity.app_name.clone(),
            context_name: context.name.clone(),
            context_path: context.path.clone(),
        };
        let session_id = self.api.start(&params)?;
        info!(
            session_id,
            context = %context.name,
            task_id = ?self.identity.task_id,
            "Tracking session started"
        );

        self.monitor.reset(now);
        self.session = Some(OpenSession {
            id: session_id,
            context,
        });
        Ok(session_id)
    }

    /// Activity signal from the host. Resumes first when believed paused,
    /// then heartbeats. Failures are logged, never retried.
    pub fn record_activity(&mut self, now: DateTime<Utc>) {
        let needs_resume = self.monitor.record_activity(now);
        let session_id = match self.session_id() {
            Some(id) => id,
            None => return,
        };

        if needs_resume {
            match self.api.resume(session_id) {
                Ok(()) => info!(session_id, "User active; session resumed"),
                Err(err) => warn!(session_id, error = %err, "Failed to resume session"),
            }
            self.monitor.mark_resumed();
        }

        if let Err(err) = self.api.heartbeat(session_id) {
            warn!(session_id, error = %err, "Heartbeat failed");
        }
    }

    /// One idle check. Sends at most one `pause` per idle period and returns
    /// whether it did. The pause belief is set even when the call fails.
    pub fn check_idle(&mut self, now: DateTime<Utc>) -> bool {
        let session_id = match self.session_id() {
            Some(id) => id,
            None => return false,
        };
        if !self.monitor.is_idle(now) {
            return false;
        }

        match self.api.pause(session_id) {
            Ok(()) => info!(
                session_id,
                idle_since = %self.monitor.last_active_at(),
                "User idle; session paused"
            ),
            Err(err) => warn!(
                session_id,
                error = %err,
                "Failed to pause session; local state may disagree with the ledger"
            ),
        }
        self.monitor.mark_paused();
        true
    }

    /// Stops the open session. Local state is cleared whatever the outcome.
    pub fn stop(&mut self) -> Result<(), ClientError> {
        let session = match self.session.take() {
            Some(session) => session,
            None => return Ok(()),
        };
        self.monitor.mark_resumed();

        self.api.stop(session.id)?;
        info!(
            session_id = session.id,
            context = %session.context.name,
            "Tracking session stopped"
        );
        Ok(())
    }

    pub fn set_task_id(&mut self, task_id: Option<i64>) {
        self.identity.task_id = task_id;
    }

    /// Stops the open session and starts a new one with `task_id` on the
    /// same context. Without an open session only the task is recorded.
    pub fn change_task(
        &mut self,
        task_id: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<Option<SessionId>, ClientError> {
        self.set_task_id(task_id);
        let context = match self.context() {
            Some(context) => context.clone(),
            None => {
                debug!(task_id = ?task_id, "Task recorded for the next session");
                return Ok(None);
            }
        };
        self.start(context, now).map(Some)
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.session.as_ref().map(|session| session.id)
    }

    pub fn is_paused(&self) -> bool {
        self.session.is_some() && self.monitor.believed_paused()
    }

    pub fn context(&self) -> Option<&ContextInfo> {
        self.session.as_ref().map(|session| &session.context)
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{at, RecordingTransport};
    use activetime_protocol::Method;

    fn client(transport: &RecordingTransport) -> SessionClient {
        SessionClient::new(
            LedgerApi::new(Box::new(transport.clone())),
            Identity {
                user_id: 7,
                task_id: Some(3),
                app_name: "maya".to_string(),
            },
            Duration::from_secs(600),
            at(0),
        )
    }

    #[test]
    fn context_name_comes_from_file_name() {
        let context = ContextInfo::from_path("/projects/show/shot_010.ma");
        assert_eq!(context.name, "shot_010.ma");
        assert_eq!(context.path, "/projects/show/shot_010.ma");

        let unsaved = ContextInfo::from_path("");
        assert_eq!(unsaved.name, UNSAVED_CONTEXT_NAME);
        assert_eq!(unsaved.path, "");
    }

    #[test]
    fn start_sends_identity_and_context() {
        let transport = RecordingTransport::new();
        let mut client = client(&transport);
        let id = client
            .start(ContextInfo::from_path("/projects/a.ma"), at(0))
            .expect("start");

        assert_eq!(client.session_id(), Some(id));
        let params = transport.requests()[0].params.clone().expect("params");
        assert_eq!(params["user_id"], 7);
        assert_eq!(params["task_id"], 3);
        assert_eq!(params["app_name"], "maya");
        assert_eq!(params["context_name"], "a.ma");
    }

    #[test]
    fn starting_again_stops_previous_session() {
        let transport = RecordingTransport::new();
        let mut client = client(&transport);
        let first = client
            .start(ContextInfo::from_path("/projects/a.ma"), at(0))
            .expect("start");
        let second = client
            .start(ContextInfo::from_path("/projects/b.ma"), at(5))
            .expect("start");

        assert_ne!(first, second);
        assert_eq!(
            transport.methods(),
            vec![Method::Start, Method::Stop, Method::Start]
        );
        assert_eq!(transport.session_ids_for(Method::Stop), vec![first]);
    }

    #[test]
    fn failed_start_leaves_no_session() {
        let transport = RecordingTransport::new();
        transport.fail(Method::Start);
        let mut client = client(&transport);

        let err = client
            .start(ContextInfo::from_path("/projects/a.ma"), at(0))
            .expect_err("connection failure");
        assert!(err.is_connection());
        assert_eq!(client.session_id(), None);
    }

    #[test]
    fn activity_without_session_sends_nothing() {
        let transport = RecordingTransport::new();
        let mut client = client(&transport);
        client.record_activity(at(1));
        assert!(!client.check_idle(at(30)));
        assert!(transport.requests().is_empty());
    }

    #[test]
    fn idle_then_activity_pauses_then_resumes_before_heartbeat() {
        let transport = RecordingTransport::new();
        let mut client = client(&transport);
        client
            .start(ContextInfo::from_path("/projects/a.ma"), at(0))
            .expect("start");

        client.record_activity(at(1));
        client.record_activity(at(2));
        assert!(!client.check_idle(at(12)));
        assert!(client.check_idle(at(13)));
        assert!(client.is_paused());
        assert!(!client.check_idle(at(14)));

        client.record_activity(at(20));
        assert!(!client.is_paused());

        assert_eq!(
            transport.methods(),
            vec![
                Method::Start,
                Method::Heartbeat,
                Method::Heartbeat,
                Method::Pause,
                Method::Resume,
                Method::Heartbeat,
            ]
        );
    }

    #[test]
    fn failed_pause_still_flips_belief() {
        let transport = RecordingTransport::new();
        transport.fail(Method::Pause);
        let mut client = client(&transport);
        client
            .start(ContextInfo::from_path("/projects/a.ma"), at(0))
            .expect("start");

        assert!(client.check_idle(at(11)));
        assert!(client.is_paused());

        client.record_activity(at(12));
        let methods = transport.methods();
        assert_eq!(&methods[methods.len() - 2..], &[Method::Resume, Method::Heartbeat]);
    }

    #[test]
    fn failed_resume_still_heartbeats() {
        let transport = RecordingTransport::new();
        transport.fail(Method::Resume);
        let mut client = client(&transport);
        client
            .start(ContextInfo::from_path("/projects/a.ma"), at(0))
            .expect("start");
        client.check_idle(at(11));

        client.record_activity(at(12));
        assert!(!client.is_paused());
        assert_eq!(transport.methods().last(), Some(&Method::Heartbeat));
    }

    #[test]
    fn stop_clears_local_state_even_on_failure() {
        let transport = RecordingTransport::new();
        transport.fail(Method::Stop);
        let mut client = client(&transport);
        client
            .start(ContextInfo::from_path("/projects/a.ma"), at(0))
            .expect("start");

        assert!(client.stop().is_err());
        assert_eq!(client.session_id(), None);
        assert!(client.stop().is_ok());
    }

    #[test]
    fn change_task_restarts_on_same_context() {
        let transport = RecordingTransport::new();
        let mut client = client(&transport);
        client
            .start(ContextInfo::from_path("/projects/a.ma"), at(0))
            .expect("start");

        let restarted = client.change_task(Some(9), at(5)).expect("change task");
        assert!(restarted.is_some());
        assert_eq!(client.context().map(|c| c.name.as_str()), Some("a.ma"));

        let last_start = transport
            .requests()
            .into_iter()
            .filter(|request| request.method == Method::Start)
            .last()
            .expect("start request");
        assert_eq!(last_start.params.expect("params")["task_id"], 9);
    }

    #[test]
    fn change_task_without_session_only_records_task() {
        let transport = RecordingTransport::new();
        let mut client = client(&transport);
        assert_eq!(client.change_task(None, at(0)).expect("change"), None);
        assert_eq!(client.identity().task_id, None);
        assert!(transport.requests().is_empty());
    }
}
