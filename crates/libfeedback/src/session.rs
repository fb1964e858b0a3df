use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use feedback_protocol::{
    CommandLog, Feedback, ImageAttachment, SessionId, SessionSnapshot, SessionStatus,
};

use crate::error::SessionError;
use crate::signal::CompletionSignal;

pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Fresh ids are drawn from 122 random bits, so a second attempt is already
/// astronomically unlikely; running out of attempts means the RNG is broken.
const MAX_ID_ATTEMPTS: usize = 8;

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Period of the background sweep that prunes expired sessions.
    pub cleanup_interval: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
        }
    }
}

/// Told about every session record the registry drops, whichever path dropped it.
pub trait SessionObserver: Send + Sync {
    fn sessions_removed(&self, session_ids: &[SessionId]);
}

/// How a wait on a session ended.
#[derive(Debug, Clone, PartialEq)]
pub enum WaitOutcome {
    Completed(Value),
    Failed(Option<String>),
    /// The session reached its deadline without an answer and is now `Timeout`.
    TimedOut,
    /// The caller's own window ran out first; the session is still live.
    Pending,
    NotFound,
}

impl WaitOutcome {
    fn from_terminal(snapshot: &SessionSnapshot) -> Option<Self> {
        match snapshot.status {
            SessionStatus::Completed => Some(WaitOutcome::Completed(
                snapshot.result.clone().unwrap_or(Value::Null),
            )),
            SessionStatus::Error => Some(WaitOutcome::Failed(snapshot.error_message.clone())),
            SessionStatus::Timeout => Some(WaitOutcome::TimedOut),
            _ => None,
        }
    }

    /// The completion result, if the session completed.
    pub fn into_result(self) -> Option<Value> {
        match self {
            WaitOutcome::Completed(result) => Some(result),
            _ => None,
        }
    }
}

/// A single feedback session record. Only ever touched under the registry lock.
struct Session {
    id: SessionId,
    project_directory: String,
    summary: String,
    status: SessionStatus,
    created_at_ms: u64,
    last_activity_ms: u64,
    timeout: Duration,
    deadline: Instant,
    feedback_text: String,
    command_logs: Vec<CommandLog>,
    images: Vec<ImageAttachment>,
    error_message: Option<String>,
    result: Option<Value>,
    signal: Arc<CompletionSignal>,
}

impl Session {
    fn is_past_deadline(&self, now: Instant) -> bool {
        now > self.deadline
    }

    /// Still live but already past its deadline.
    fn is_overdue(&self, now: Instant) -> bool {
        !self.status.is_terminal() && self.is_past_deadline(now)
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.status.is_terminal() || self.is_past_deadline(now)
    }

    fn touch(&mut self) {
        self.last_activity_ms = now_ms();
    }

    fn ensure_live(&self) -> Result<(), SessionError> {
        if self.status.is_terminal() {
            return Err(SessionError::AlreadyTerminal {
                session_id: self.id.clone(),
                status: self.status,
            });
        }
        Ok(())
    }

    fn to_snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.id.clone(),
            project_directory: self.project_directory.clone(),
            summary: self.summary.clone(),
            status: self.status,
            created_at_epoch_ms: self.created_at_ms,
            last_activity_epoch_ms: self.last_activity_ms,
            timeout_seconds: self.timeout.as_secs(),
            feedback_text: self.feedback_text.clone(),
            command_logs: self.command_logs.clone(),
            images: self.images.clone(),
            error_message: self.error_message.clone(),
            result: self.result.clone(),
        }
    }
}

struct Janitor {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct RegistryInner {
    sessions: Mutex<HashMap<SessionId, Session>>,
    janitor: Mutex<Option<Janitor>>,
    config: RegistryConfig,
    observer: Option<Arc<dyn SessionObserver>>,
}

impl Drop for RegistryInner {
    fn drop(&mut self) {
        let janitor = self
            .janitor
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(janitor) = janitor {
            janitor.cancel.cancel();
        }
    }
}

/// Owns every feedback session and enforces its lifecycle.
///
/// All reads and writes go through one mutex around the id → record map. The
/// lock is only held for the lookup or mutation itself and never across an
/// await point; [`wait_for_completion`](Self::wait_for_completion) clones the
/// session's signal out and suspends on that.
///
/// Cloning is cheap and yields a handle to the same registry.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

impl SessionRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self::build(config, None)
    }

    pub fn with_observer(config: RegistryConfig, observer: Arc<dyn SessionObserver>) -> Self {
        Self::build(config, Some(observer))
    }

    fn build(config: RegistryConfig, observer: Option<Arc<dyn SessionObserver>>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                sessions: Mutex::new(HashMap::new()),
                janitor: Mutex::new(None),
                config,
                observer,
            }),
        }
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<SessionId, Session>> {
        self.inner
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a new session in `Created` state and return its id.
    pub fn create_session(
        &self,
        project_directory: impl Into<String>,
        summary: impl Into<String>,
        timeout: Duration,
    ) -> Result<SessionId, SessionError> {
        if timeout < Duration::from_secs(1) {
            return Err(SessionError::InvalidTimeout);
        }

        let now = now_ms();
        let session_id = {
            let mut sessions = self.sessions();
            let session_id = (0..MAX_ID_ATTEMPTS)
                .map(|_| new_session_id())
                .find(|id| !sessions.contains_key(id))
                .ok_or_else(|| {
                    SessionError::Internal(format!(
                        "no unused session id after {MAX_ID_ATTEMPTS} attempts"
                    ))
                })?;

            sessions.insert(
                session_id.clone(),
                Session {
                    id: session_id.clone(),
                    project_directory: project_directory.into(),
                    summary: summary.into(),
                    status: SessionStatus::Created,
                    created_at_ms: now,
                    last_activity_ms: now,
                    timeout,
                    deadline: Instant::now() + timeout,
                    feedback_text: String::new(),
                    command_logs: Vec::new(),
                    images: Vec::new(),
                    error_message: None,
                    result: None,
                    signal: Arc::new(CompletionSignal::new()),
                },
            );
            session_id
        };

        info!(session_id = %session_id, timeout_secs = timeout.as_secs(), "session created");
        self.ensure_janitor();
        Ok(session_id)
    }

    /// Snapshot a session and mark it as recently active.
    ///
    /// A live session found past its deadline is dropped on the spot and
    /// reported as absent, unless someone is waiting on it: then it is moved to
    /// `Timeout` and its waiters are woken, so they see the timeout rather than
    /// a vanished session. Terminal sessions stay readable until the next sweep.
    pub fn get_session(&self, session_id: &str) -> Option<SessionSnapshot> {
        let now = Instant::now();
        let (snapshot, timed_out) = {
            let mut sessions = self.sessions();
            let session = sessions.get_mut(session_id)?;
            if session.is_overdue(now) && !session.signal.has_waiters() {
                sessions.remove(session_id);
                (None, None)
            } else {
                let timed_out = session.is_overdue(now).then(|| {
                    session.status = SessionStatus::Timeout;
                    Arc::clone(&session.signal)
                });
                session.touch();
                (Some(session.to_snapshot()), timed_out)
            }
        };

        if let Some(signal) = timed_out {
            signal.fire();
            info!(session_id = %session_id, "session timed out while being waited on");
        }
        if snapshot.is_none() {
            debug!(session_id = %session_id, "dropped overdue session on read");
            self.notify_removed(&[session_id.to_string()]);
        }
        snapshot
    }

    /// Set a non-terminal status, or end the session if `status` is terminal.
    /// Terminal sessions never change state again.
    pub fn update_status(
        &self,
        session_id: &str,
        status: SessionStatus,
    ) -> Result<(), SessionError> {
        if status.is_terminal() {
            return self.finish_with(session_id, status, |_| {});
        }

        let mut sessions = self.sessions();
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::SessionNotFound(session_id.to_string()))?;

        if let Err(e) = session.ensure_live() {
            warn!(session_id = %session_id, requested = %status, "rejected status change on terminal session");
            return Err(e);
        }

        session.status = status;
        session.touch();
        debug!(session_id = %session_id, status = %status, "session status updated");
        Ok(())
    }

    /// Record feedback. Text replaces, commands and images append.
    pub fn add_feedback(&self, session_id: &str, feedback: Feedback) -> Result<(), SessionError> {
        let mut sessions = self.sessions();
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::SessionNotFound(session_id.to_string()))?;
        session.ensure_live()?;

        let kind = feedback.kind();
        match feedback {
            Feedback::Text(text) => session.feedback_text = text,
            Feedback::Command(log) => session.command_logs.push(log),
            Feedback::Image(image) => session.images.push(image),
        }
        session.touch();

        debug!(session_id = %session_id, kind = ?kind, "feedback added");
        Ok(())
    }

    /// Complete the session with `result`. The first terminal transition wins.
    pub fn complete(&self, session_id: &str, result: Value) -> Result<(), SessionError> {
        self.finish_with(session_id, SessionStatus::Completed, |session| {
            session.result = Some(result);
        })
    }

    /// Fail the session with `message`. The first terminal transition wins.
    pub fn fail(&self, session_id: &str, message: impl Into<String>) -> Result<(), SessionError> {
        let message = message.into();
        self.finish_with(session_id, SessionStatus::Error, |session| {
            session.error_message = Some(message);
        })
    }

    fn finish_with(
        &self,
        session_id: &str,
        status: SessionStatus,
        apply: impl FnOnce(&mut Session),
    ) -> Result<(), SessionError> {
        let (signal, outcome) = {
            let mut sessions = self.sessions();
            let session = sessions
                .get_mut(session_id)
                .ok_or_else(|| SessionError::SessionNotFound(session_id.to_string()))?;

            let outcome = session.ensure_live();
            if outcome.is_ok() {
                session.status = status;
                apply(session);
                session.touch();
            }
            (Arc::clone(&session.signal), outcome)
        };

        // Late callers still wake waiters; the signal is set-once anyway.
        signal.fire();

        match &outcome {
            Ok(()) => info!(session_id = %session_id, status = %status, "session finished"),
            Err(e) => warn!(session_id = %session_id, requested = %status, error = %e, "ignored late terminal transition"),
        }
        outcome
    }

    /// Wait for the session to reach a terminal state.
    ///
    /// Finished sessions answer immediately. Otherwise the wait lasts for
    /// `timeout` (default: the session's own timeout) but never past the
    /// session deadline. Reaching the deadline moves the session to `Timeout`
    /// unless it finished concurrently; a shorter caller window just returns
    /// [`WaitOutcome::Pending`] and the caller may wait again.
    pub async fn wait_for_completion(
        &self,
        session_id: &str,
        timeout: Option<Duration>,
    ) -> WaitOutcome {
        let Some(snapshot) = self.get_session(session_id) else {
            return WaitOutcome::NotFound;
        };
        if let Some(outcome) = WaitOutcome::from_terminal(&snapshot) {
            return outcome;
        }

        let Some((signal, deadline, session_timeout)) = self.wait_handle(session_id) else {
            return WaitOutcome::NotFound;
        };

        let remaining = deadline.saturating_duration_since(Instant::now());
        let requested = timeout.unwrap_or(session_timeout);
        let reaches_deadline = requested >= remaining;

        debug!(session_id = %session_id, wait_ms = requested.min(remaining).as_millis() as u64, "waiting for completion");
        if signal.wait_timeout(requested.min(remaining)).await {
            return self.outcome(session_id);
        }

        if !reaches_deadline {
            debug!(session_id = %session_id, "wait window elapsed, session still live");
            return WaitOutcome::Pending;
        }

        if self
            .finish_with(session_id, SessionStatus::Timeout, |_| {})
            .is_ok()
        {
            info!(session_id = %session_id, "session timed out waiting for feedback");
        }
        WaitOutcome::TimedOut
    }

    fn wait_handle(
        &self,
        session_id: &str,
    ) -> Option<(Arc<CompletionSignal>, Instant, Duration)> {
        self.sessions().get(session_id).map(|session| {
            (
                Arc::clone(&session.signal),
                session.deadline,
                session.timeout,
            )
        })
    }

    fn outcome(&self, session_id: &str) -> WaitOutcome {
        self.sessions()
            .get(session_id)
            .map(|session| {
                WaitOutcome::from_terminal(&session.to_snapshot()).unwrap_or(WaitOutcome::Pending)
            })
            .unwrap_or(WaitOutcome::NotFound)
    }

    /// List sessions, oldest first.
    pub fn list_sessions(&self, include_expired: bool) -> Vec<SessionSnapshot> {
        let now = Instant::now();
        let mut snapshots: Vec<SessionSnapshot> = self
            .sessions()
            .values()
            .filter(|session| include_expired || !session.is_expired(now))
            .map(Session::to_snapshot)
            .collect();
        snapshots.sort_by(|a, b| {
            a.created_at_epoch_ms
                .cmp(&b.created_at_epoch_ms)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
        snapshots
    }

    /// Drop every session that is terminal or past its deadline.
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = Vec::new();
        self.sessions().retain(|id, session| {
            if session.is_expired(now) {
                removed.push(id.clone());
                false
            } else {
                true
            }
        });

        if !removed.is_empty() {
            info!(count = removed.len(), "cleaned up expired sessions");
            self.notify_removed(&removed);
        }
        removed.len()
    }

    /// Check if a session record is present, expired or not.
    pub fn session_exists(&self, session_id: &str) -> bool {
        self.sessions().contains_key(session_id)
    }

    pub fn len(&self) -> usize {
        self.sessions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop the janitor and drop every session. Waiters are not woken; their
    /// own timers end them.
    pub fn shutdown(&self) {
        if let Some(janitor) = self.janitor_slot().take() {
            janitor.cancel.cancel();
        }

        let removed: Vec<SessionId> = self.sessions().drain().map(|(id, _)| id).collect();
        self.notify_removed(&removed);
        info!(dropped = removed.len(), "session registry shut down");
    }

    pub fn janitor_running(&self) -> bool {
        self.janitor_slot()
            .as_ref()
            .is_some_and(|janitor| !janitor.handle.is_finished())
    }

    fn janitor_slot(&self) -> MutexGuard<'_, Option<Janitor>> {
        self.inner
            .janitor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Start the background sweep unless one is already running. Without a
    /// tokio runtime there is nothing to spawn on; lazy expiry on read and
    /// explicit [`cleanup_expired`](Self::cleanup_expired) calls still apply.
    fn ensure_janitor(&self) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!("no tokio runtime, janitor not started");
            return;
        };

        let mut slot = self.janitor_slot();
        if slot
            .as_ref()
            .is_some_and(|janitor| !janitor.handle.is_finished())
        {
            return;
        }

        let cancel = CancellationToken::new();
        let handle = runtime.spawn(run_janitor(
            Arc::downgrade(&self.inner),
            self.inner.config.cleanup_interval,
            cancel.clone(),
        ));
        *slot = Some(Janitor { cancel, handle });
        debug!(interval_secs = self.inner.config.cleanup_interval.as_secs(), "janitor started");
    }

    fn notify_removed(&self, session_ids: &[SessionId]) {
        if session_ids.is_empty() {
            return;
        }
        if let Some(observer) = &self.inner.observer {
            observer.sessions_removed(session_ids);
        }
    }
}

async fn run_janitor(inner: Weak<RegistryInner>, period: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let Some(inner) = inner.upgrade() else {
            break;
        };
        let registry = SessionRegistry { inner };
        match std::panic::catch_unwind(AssertUnwindSafe(|| registry.cleanup_expired())) {
            Ok(0) => {}
            Ok(removed) => debug!(removed, "janitor pass finished"),
            Err(_) => warn!("janitor cleanup pass panicked, continuing"),
        }
    }
    debug!("janitor stopped");
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn new_session_id() -> SessionId {
    format!("session_{}", uuid::Uuid::new_v4().simple())
}
