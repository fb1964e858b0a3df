use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, warn};

use feedback_protocol::{
    Feedback, FeedbackKind, FeedbackTicket, SessionId, SessionSnapshot, SessionStatus,
    StatusReport,
};

use crate::error::SessionError;
use crate::session::{RegistryConfig, SessionRegistry, WaitOutcome};
use crate::token::TokenStore;
use crate::url::{PublicAddress, UrlBinder};

pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub registry: RegistryConfig,
    pub address: PublicAddress,
    /// When off, sessions that never had a URL bound are reachable without a token.
    pub require_token: bool,
    pub default_timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            registry: RegistryConfig::default(),
            address: PublicAddress::default(),
            require_token: true,
            default_timeout: DEFAULT_SESSION_TIMEOUT,
        }
    }
}

/// Entry point for the transport layer: open a session, hand out its URL,
/// take feedback, and let the caller wait for the answer.
///
/// One instance is built at startup and shared; there is no global.
pub struct FeedbackService {
    registry: SessionRegistry,
    binder: UrlBinder,
    default_timeout: Duration,
}

impl FeedbackService {
    pub fn new(config: ServiceConfig) -> Self {
        let tokens = Arc::new(TokenStore::new(config.require_token));
        let registry = SessionRegistry::with_observer(config.registry, tokens.clone());
        if !config.require_token {
            warn!("token enforcement disabled: sessions without a bound url are open");
        }
        Self {
            registry,
            binder: UrlBinder::new(config.address, tokens),
            default_timeout: config.default_timeout,
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn binder(&self) -> &UrlBinder {
        &self.binder
    }

    fn timeout_from_secs(&self, timeout_seconds: Option<u64>) -> Result<Duration, SessionError> {
        match timeout_seconds {
            None => Ok(self.default_timeout),
            Some(0) => Err(SessionError::InvalidTimeout),
            Some(secs) => Ok(Duration::from_secs(secs)),
        }
    }

    pub fn create_session(
        &self,
        project_directory: &str,
        summary: &str,
        timeout_seconds: Option<u64>,
    ) -> Result<SessionId, SessionError> {
        let timeout = self.timeout_from_secs(timeout_seconds)?;
        self.registry
            .create_session(project_directory, summary, timeout)
    }

    /// Issue a new URL for an existing session. Any URL issued before stops working.
    pub fn bind_url(&self, session_id: &str) -> Result<String, SessionError> {
        let url = self.binder.bind(session_id);
        // Checked after issuing: a session pruned in between has already had
        // its tokens revoked, which would miss the one issued here.
        if self.registry.get_session(session_id).is_none() {
            self.binder.revoke(session_id);
            return Err(SessionError::SessionNotFound(session_id.to_string()));
        }
        Ok(url)
    }

    /// Open a session for the calling agent: create it, bind its URL and mark
    /// it active.
    pub fn request_feedback(
        &self,
        project_directory: &str,
        summary: &str,
        timeout_seconds: Option<u64>,
    ) -> Result<FeedbackTicket, SessionError> {
        let timeout = self.timeout_from_secs(timeout_seconds)?;
        let project_directory = resolve_project_directory(project_directory);
        let project_directory = project_directory.to_string_lossy().into_owned();

        let session_id = self
            .registry
            .create_session(project_directory.as_str(), summary, timeout)?;
        let url = self.bind_url(&session_id)?;
        self.registry
            .update_status(&session_id, SessionStatus::Active)?;

        info!(session_id = %session_id, project_directory = %project_directory, "feedback requested");
        Ok(FeedbackTicket {
            session_id,
            url,
            project_directory,
            summary: summary.to_string(),
            timeout: timeout.as_secs(),
            status: SessionStatus::Active,
        })
    }

    pub fn get_session(&self, session_id: &str) -> Option<SessionSnapshot> {
        self.registry.get_session(session_id)
    }

    pub fn get_status(&self, session_id: &str) -> StatusReport {
        match self.registry.get_session(session_id) {
            Some(snapshot) => StatusReport::from(&snapshot),
            None => StatusReport::not_found(),
        }
    }

    pub fn update_status(&self, session_id: &str, status: SessionStatus) -> bool {
        self.registry.update_status(session_id, status).is_ok()
    }

    pub fn submit_feedback(&self, session_id: &str, feedback: Feedback) -> bool {
        match self.registry.add_feedback(session_id, feedback) {
            Ok(()) => true,
            Err(e) => {
                debug!(session_id = %session_id, error = %e, "feedback rejected");
                false
            }
        }
    }

    /// Like [`submit_feedback`](Self::submit_feedback) for a loosely-typed payload.
    pub fn submit_feedback_parts(&self, session_id: &str, kind: FeedbackKind, payload: Value) -> bool {
        match Feedback::from_parts(kind, payload) {
            Ok(feedback) => self.submit_feedback(session_id, feedback),
            Err(e) => {
                debug!(session_id = %session_id, kind = ?kind, error = %e, "malformed feedback payload");
                false
            }
        }
    }

    pub fn finish(&self, session_id: &str, result: Value) -> bool {
        self.registry.complete(session_id, result).is_ok()
    }

    pub fn abort(&self, session_id: &str, message: &str) -> bool {
        self.registry.fail(session_id, message).is_ok()
    }

    /// Wait for the session's result. `None` on timeout, failure or unknown id.
    pub async fn await_result(&self, session_id: &str, timeout_seconds: Option<u64>) -> Option<Value> {
        self.await_outcome(session_id, timeout_seconds)
            .await
            .into_result()
    }

    pub async fn await_outcome(&self, session_id: &str, timeout_seconds: Option<u64>) -> WaitOutcome {
        self.registry
            .wait_for_completion(session_id, timeout_seconds.map(Duration::from_secs))
            .await
    }

    pub fn list_sessions(&self, include_expired: bool) -> Vec<SessionSnapshot> {
        self.registry.list_sessions(include_expired)
    }

    /// Gate for the human-facing handle of a session.
    pub fn authorize(&self, session_id: &str, token: Option<&str>) -> Result<(), SessionError> {
        if self.binder.authorize(session_id, token) {
            Ok(())
        } else {
            warn!(session_id = %session_id, "session access denied");
            Err(SessionError::AccessDenied(session_id.to_string()))
        }
    }

    pub fn base_url(&self) -> String {
        self.binder.base_url()
    }

    pub fn active_tokens(&self) -> usize {
        self.binder.active_tokens()
    }

    pub fn cleanup_expired(&self) -> usize {
        self.registry.cleanup_expired()
    }

    pub fn shutdown(&self) {
        self.registry.shutdown();
    }
}

/// Absolute form of the caller's directory, or the current directory when
/// the given one does not exist.
fn resolve_project_directory(dir: &str) -> PathBuf {
    let path = Path::new(dir);
    let path = if path.exists() {
        path.to_path_buf()
    } else {
        std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
    };
    std::path::absolute(&path).unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn service() -> FeedbackService {
        FeedbackService::new(ServiceConfig::default())
    }

    fn token_of(url: &str) -> &str {
        url.split("?token=").nth(1).expect("token query")
    }

    #[test]
    fn request_feedback_opens_active_session() {
        let svc = service();
        let ticket = svc.request_feedback(".", "refactored parser", Some(120)).unwrap();

        assert_eq!(ticket.status, SessionStatus::Active);
        assert_eq!(ticket.timeout, 120);
        assert!(Path::new(&ticket.project_directory).is_absolute());
        assert!(ticket.url.contains(&ticket.session_id));
        assert!(svc.authorize(&ticket.session_id, Some(token_of(&ticket.url))).is_ok());

        let report = svc.get_status(&ticket.session_id);
        assert!(report.exists);
        assert_eq!(report.status, "active");
    }

    #[test]
    fn missing_directory_falls_back_to_cwd() {
        let svc = service();
        let ticket = svc
            .request_feedback("/definitely/not/a/real/dir", "s", None)
            .unwrap();
        let cwd = std::env::current_dir().unwrap();
        assert_eq!(PathBuf::from(&ticket.project_directory), std::path::absolute(cwd).unwrap());
        assert_eq!(ticket.timeout, DEFAULT_SESSION_TIMEOUT.as_secs());
    }

    #[test]
    fn zero_timeout_is_invalid() {
        let svc = service();
        assert_eq!(
            svc.create_session(".", "s", Some(0)).unwrap_err(),
            SessionError::InvalidTimeout
        );
    }

    #[test]
    fn bind_url_requires_existing_session() {
        let svc = service();
        assert!(matches!(
            svc.bind_url("session_missing"),
            Err(SessionError::SessionNotFound(_))
        ));
    }

    #[test]
    fn bind_url_for_unknown_session_leaves_no_token() {
        let svc = service();
        assert!(svc.bind_url("session_missing").is_err());
        assert_eq!(svc.active_tokens(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn bind_url_on_overdue_session_leaves_no_token() {
        let svc = service();
        let id = svc.create_session(".", "s", Some(2)).unwrap();
        tokio::time::advance(Duration::from_secs(3)).await;

        assert!(matches!(
            svc.bind_url(&id),
            Err(SessionError::SessionNotFound(_))
        ));
        assert_eq!(svc.active_tokens(), 0);
        assert!(!svc.registry().session_exists(&id));
    }

    #[test]
    fn authorize_without_any_token_follows_config() {
        let strict = service();
        let id = strict.create_session(".", "s", None).unwrap();
        assert!(strict.authorize(&id, None).is_err());

        let open = FeedbackService::new(ServiceConfig {
            require_token: false,
            ..ServiceConfig::default()
        });
        let id = open.create_session(".", "s", None).unwrap();
        assert!(open.authorize(&id, None).is_ok());
    }

    #[test]
    fn submit_feedback_parts_coerces() {
        let svc = service();
        let id = svc.create_session(".", "s", None).unwrap();
        assert!(svc.submit_feedback_parts(&id, FeedbackKind::Command, json!("ls output")));
        assert!(svc.submit_feedback_parts(&id, FeedbackKind::Image, json!({"data": "aGk="})));
        assert!(!svc.submit_feedback_parts(&id, FeedbackKind::Image, json!({"size": "big"})));

        let snap = svc.get_session(&id).unwrap();
        assert_eq!(snap.command_logs[0].output, "ls output");
        assert_eq!(snap.images.len(), 1);
    }

    #[test]
    fn cleanup_revokes_tokens_of_pruned_sessions() {
        let svc = service();
        let ticket = svc.request_feedback(".", "s", None).unwrap();
        assert_eq!(svc.active_tokens(), 1);

        assert!(svc.finish(&ticket.session_id, json!("ok")));
        assert_eq!(svc.cleanup_expired(), 1);
        assert_eq!(svc.active_tokens(), 0);
        assert!(!svc.get_status(&ticket.session_id).exists);
    }

    #[test]
    fn shutdown_drops_everything() {
        let svc = service();
        svc.request_feedback(".", "a", None).unwrap();
        svc.request_feedback(".", "b", None).unwrap();

        svc.shutdown();
        assert!(svc.list_sessions(true).is_empty());
        assert_eq!(svc.active_tokens(), 0);
    }
}
