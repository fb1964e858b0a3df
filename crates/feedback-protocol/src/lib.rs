pub mod paths;
pub mod rpc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Unique identifier for a feedback session.
pub type SessionId = String;

/// Lifecycle state of a feedback session.
///
/// `Completed`, `Timeout` and `Error` are terminal: once a session reaches one of
/// them no further transition is accepted.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Created,
    Active,
    Waiting,
    Completed,
    Timeout,
    Error,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Timeout | SessionStatus::Error
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Created => "created",
            SessionStatus::Active => "active",
            SessionStatus::Waiting => "waiting",
            SessionStatus::Completed => "completed",
            SessionStatus::Timeout => "timeout",
            SessionStatus::Error => "error",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(SessionStatus::Created),
            "active" => Ok(SessionStatus::Active),
            "waiting" => Ok(SessionStatus::Waiting),
            "completed" => Ok(SessionStatus::Completed),
            "timeout" => Ok(SessionStatus::Timeout),
            "error" => Ok(SessionStatus::Error),
            other => Err(format!("unknown session status: {other}")),
        }
    }
}

/// One command execution reported by the human side.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandLog {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default)]
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp_epoch_ms: Option<u64>,
}

/// An image attached to feedback. `data` is carried opaquely (usually base64).
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageAttachment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// Discriminant of a [`Feedback`] item.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackKind {
    Text,
    Command,
    Image,
}

impl FromStr for FeedbackKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(FeedbackKind::Text),
            "command" => Ok(FeedbackKind::Command),
            "image" => Ok(FeedbackKind::Image),
            other => Err(format!("unknown feedback kind: {other}")),
        }
    }
}

/// A single piece of feedback submitted against a session.
///
/// Text replaces whatever text the session already holds; commands and images are
/// appended in submission order.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum Feedback {
    Text(String),
    Command(CommandLog),
    Image(ImageAttachment),
}

impl Feedback {
    pub fn kind(&self) -> FeedbackKind {
        match self {
            Feedback::Text(_) => FeedbackKind::Text,
            Feedback::Command(_) => FeedbackKind::Command,
            Feedback::Image(_) => FeedbackKind::Image,
        }
    }

    /// Build a feedback item from a kind and a loosely-typed payload.
    ///
    /// Objects are decoded into the structured record for the kind. Any other JSON
    /// value is coerced: text takes the string form, a command log takes it as its
    /// output and an image takes it as its data.
    pub fn from_parts(kind: FeedbackKind, payload: Value) -> Result<Self, serde_json::Error> {
        Ok(match kind {
            FeedbackKind::Text => Feedback::Text(value_to_text(payload)),
            FeedbackKind::Command => match payload {
                Value::Object(_) => Feedback::Command(serde_json::from_value(payload)?),
                other => Feedback::Command(CommandLog {
                    output: value_to_text(other),
                    ..CommandLog::default()
                }),
            },
            FeedbackKind::Image => match payload {
                Value::Object(_) => Feedback::Image(serde_json::from_value(payload)?),
                other => Feedback::Image(ImageAttachment {
                    data: value_to_text(other),
                    ..ImageAttachment::default()
                }),
            },
        })
    }
}

fn value_to_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Point-in-time copy of a session record.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub project_directory: String,
    pub summary: String,
    pub status: SessionStatus,
    pub created_at_epoch_ms: u64,
    pub last_activity_epoch_ms: u64,
    pub timeout_seconds: u64,
    pub feedback_text: String,
    pub command_logs: Vec<CommandLog>,
    pub images: Vec<ImageAttachment>,
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

/// Answer to a status query. Never an error: a missing session reports
/// `exists: false` with status `not_found`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub exists: bool,
    pub status: String,
    #[serde(flatten)]
    pub details: Option<StatusDetails>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StatusDetails {
    pub created_at_epoch_ms: u64,
    pub last_activity_epoch_ms: u64,
    pub project_directory: String,
    pub summary: String,
    pub timeout_seconds: u64,
    pub feedback_text: String,
    pub command_logs_count: usize,
    pub images_count: usize,
    pub error_message: Option<String>,
}

impl StatusReport {
    pub fn not_found() -> Self {
        Self {
            exists: false,
            status: "not_found".to_string(),
            details: None,
        }
    }
}

impl From<&SessionSnapshot> for StatusReport {
    fn from(snapshot: &SessionSnapshot) -> Self {
        Self {
            exists: true,
            status: snapshot.status.to_string(),
            details: Some(StatusDetails {
                created_at_epoch_ms: snapshot.created_at_epoch_ms,
                last_activity_epoch_ms: snapshot.last_activity_epoch_ms,
                project_directory: snapshot.project_directory.clone(),
                summary: snapshot.summary.clone(),
                timeout_seconds: snapshot.timeout_seconds,
                feedback_text: snapshot.feedback_text.clone(),
                command_logs_count: snapshot.command_logs.len(),
                images_count: snapshot.images.len(),
                error_message: snapshot.error_message.clone(),
            }),
        }
    }
}

/// Returned to the calling agent when a feedback session is opened.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FeedbackTicket {
    pub session_id: SessionId,
    pub url: String,
    pub project_directory: String,
    pub summary: String,
    pub timeout: u64,
    pub status: SessionStatus,
}

/// Body of `POST /session/{id}/submit`.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SubmitRequest {
    #[serde(default)]
    pub result: Value,
}

/// Body of `POST /session/{id}/cancel`.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CancelRequest {
    #[serde(default = "default_cancel_message")]
    pub message: String,
}

fn default_cancel_message() -> String {
    "cancelled by user".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_wire_format() {
        assert_eq!(
            serde_json::to_string(&SessionStatus::Timeout).unwrap(),
            "\"timeout\""
        );
        assert_eq!(
            "waiting".parse::<SessionStatus>().unwrap(),
            SessionStatus::Waiting
        );
        assert!("bogus".parse::<SessionStatus>().is_err());
    }

    #[test]
    fn terminal_states() {
        assert!(!SessionStatus::Created.is_terminal());
        assert!(!SessionStatus::Active.is_terminal());
        assert!(!SessionStatus::Waiting.is_terminal());
        assert!(SessionStatus::Completed.is_terminal());
        assert!(SessionStatus::Timeout.is_terminal());
        assert!(SessionStatus::Error.is_terminal());
    }

    #[test]
    fn feedback_tag_format() {
        let fb = Feedback::Text("looks good".to_string());
        let json = serde_json::to_value(&fb).unwrap();
        assert_eq!(json, json!({"kind": "text", "payload": "looks good"}));

        let parsed: Feedback = serde_json::from_value(json!({
            "kind": "command",
            "payload": {"command": "ls", "output": "a\nb", "exit_code": 0}
        }))
        .unwrap();
        match parsed {
            Feedback::Command(log) => {
                assert_eq!(log.command.as_deref(), Some("ls"));
                assert_eq!(log.exit_code, Some(0));
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn from_parts_coerces_non_objects() {
        let fb = Feedback::from_parts(FeedbackKind::Command, json!("plain output")).unwrap();
        assert_eq!(
            fb,
            Feedback::Command(CommandLog {
                output: "plain output".to_string(),
                ..CommandLog::default()
            })
        );

        let fb = Feedback::from_parts(FeedbackKind::Image, json!("aGVsbG8=")).unwrap();
        assert_eq!(fb.kind(), FeedbackKind::Image);

        let fb = Feedback::from_parts(FeedbackKind::Text, json!(42)).unwrap();
        assert_eq!(fb, Feedback::Text("42".to_string()));
    }

    #[test]
    fn from_parts_rejects_malformed_records() {
        let err = Feedback::from_parts(FeedbackKind::Command, json!({"exit_code": "zero"}));
        assert!(err.is_err());
    }

    #[test]
    fn missing_session_report() {
        let json = serde_json::to_value(StatusReport::not_found()).unwrap();
        assert_eq!(json, json!({"exists": false, "status": "not_found"}));
    }

    #[test]
    fn report_from_snapshot_counts_payload() {
        let snapshot = SessionSnapshot {
            session_id: "session_abc".to_string(),
            project_directory: "/work".to_string(),
            summary: "done".to_string(),
            status: SessionStatus::Active,
            created_at_epoch_ms: 1_700_000_000_000,
            last_activity_epoch_ms: 1_700_000_000_500,
            timeout_seconds: 600,
            feedback_text: "ok".to_string(),
            command_logs: vec![CommandLog::default(), CommandLog::default()],
            images: vec![ImageAttachment::default()],
            error_message: None,
            result: None,
        };
        let report = StatusReport::from(&snapshot);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["exists"], true);
        assert_eq!(json["status"], "active");
        assert_eq!(json["command_logs_count"], 2);
        assert_eq!(json["images_count"], 1);
    }

    #[test]
    fn cancel_request_default_message() {
        let req: CancelRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(req.message, "cancelled by user");
    }
}
