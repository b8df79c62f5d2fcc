//! activetime client: idle-aware session tracking against the ledger.
//!
//! Host applications report activity and context changes through
//! [`host::HostEvents`]. The [`tracker::Tracker`] worker turns those signals
//! into start/heartbeat/pause/resume/stop calls, pausing the session when no
//! activity has been seen for the configured idle timeout.

pub mod api;
pub mod config;
pub mod error;
pub mod host;
pub mod logging;
pub mod monitor;
pub mod poller;
pub mod session;
pub mod tracker;
pub mod transport;

pub use api::LedgerApi;
pub use config::ClientConfig;
pub use error::ClientError;
pub use session::{ContextInfo, Identity, SessionClient};
pub use tracker::{Tracker, TrackerHandle, TrackerSettings};
pub use transport::{TcpTransport, Transport};

#[cfg(test)]
pub(crate) mod test_support {
    use activetime_protocol::{ErrorInfo, Method, Request, Response, SessionId};
    use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::{Duration, Instant};

    use crate::error::ClientError;
    use crate::tracker::Clock;
    use crate::transport::Transport;

    pub fn at(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 30, 9, 0, 0)
            .single()
            .expect("base time")
            + ChronoDuration::minutes(minute)
    }

    pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    #[derive(Clone)]
    pub struct ManualClock(Arc<Mutex<DateTime<Utc>>>);

    impl ManualClock {
        pub fn new(now: DateTime<Utc>) -> Self {
            Self(Arc::new(Mutex::new(now)))
        }

        pub fn set(&self, now: DateTime<Utc>) {
            *self.0.lock().expect("clock lock") = now;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().expect("clock lock")
        }
    }

    type Responder = Arc<dyn Fn(&Request) -> Response + Send + Sync>;

    #[derive(Default)]
    struct Recorded {
        requests: Vec<Request>,
        next_session: SessionId,
        failing: Vec<Method>,
        rejections: Vec<(Method, ErrorInfo)>,
        responders: Vec<(Method, Responder)>,
    }

    /// In-memory ledger stand-in. Records every request; `start` allocates
    /// increasing ids and everything else is acknowledged unless scripted.
    #[derive(Clone, Default)]
    pub struct RecordingTransport {
        inner: Arc<Mutex<Recorded>>,
    }

    impl RecordingTransport {
        pub fn new() -> Self {
            Self::default()
        }

        /// Every call of `method` fails as if the ledger were unreachable.
        pub fn fail(&self, method: Method) {
            self.inner.lock().expect("transport lock").failing.push(method);
        }

        pub fn reject(&self, method: Method, error: ErrorInfo) {
            self.inner
                .lock()
                .expect("transport lock")
                .rejections
                .push((method, error));
        }

        pub fn respond_with(
            &self,
            method: Method,
            responder: impl Fn(&Request) -> Response + Send + Sync + 'static,
        ) {
            self.inner
                .lock()
                .expect("transport lock")
                .responders
                .push((method, Arc::new(responder)));
        }

        pub fn requests(&self) -> Vec<Request> {
            self.inner.lock().expect("transport lock").requests.clone()
        }

        pub fn methods(&self) -> Vec<Method> {
            self.requests()
                .iter()
                .map(|request| request.method)
                .collect()
        }

        pub fn session_ids_for(&self, method: Method) -> Vec<SessionId> {
            self.requests()
                .iter()
                .filter(|request| request.method == method)
                .filter_map(|request| request.params.as_ref()?.get("session_id")?.as_i64())
                .collect()
        }
    }

    impl Transport for RecordingTransport {
        fn send(&self, request: Request) -> Result<Response, ClientError> {
            let mut recorded = self.inner.lock().expect("transport lock");
            recorded.requests.push(request.clone());

            if recorded.failing.contains(&request.method) {
                return Err(ClientError::connection("fake", "connection refused"));
            }
            if let Some((_, error)) = recorded
                .rejections
                .iter()
                .find(|(method, _)| *method == request.method)
            {
                return Ok(Response::error_with_info(request.id.clone(), error.clone()));
            }
            if let Some((_, responder)) = recorded
                .responders
                .iter()
                .find(|(method, _)| *method == request.method)
            {
                return Ok(responder(&request));
            }

            Ok(match request.method {
                Method::Start => {
                    recorded.next_session += 1;
                    Response::ok(
                        request.id.clone(),
                        json!({"session_id": recorded.next_session}),
                    )
                }
                Method::GetHealth => Response::ok(request.id.clone(), json!({"status": "ok"})),
                Method::GetLogs | Method::GetSessionEvents => {
                    Response::ok(request.id.clone(), json!([]))
                }
                _ => Response::ack(request.id.clone()),
            })
        }
    }
}
