//! Management socket protocol
//!
//! Requests are `{"subject": ..., "data": ...}` envelopes. They are parsed
//! into the closed [`Command`] set; anything else is reported back as an
//! explicit unmatched-subject error instead of being ignored.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{PreferencesPatch, ServiceConfig};

pub const PROTOCOL_VERSION: u32 = 1;

/// Request envelope as it travels over the socket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRequest {
    pub subject: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl CommandRequest {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: impl Serialize) -> Self {
        self.data = Some(serde_json::to_value(data).unwrap_or(Value::Null));
        self
    }
}

/// Commands an observer can issue
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Protocol version handshake.
    Hello { protocol_version: u32 },
    /// Report the projected service configuration.
    GetHeadlessConfig,
    Start,
    Stop,
    /// Stop (when needed) and then start, as one transition.
    Restart,
    /// Merge and persist a preferences update.
    UpdateHeadlessConfig(PreferencesPatch),
    /// Switch the connection to a notification stream.
    Subscribe,
}

/// Subjects accepted on the command channel.
pub const SUBJECTS: &[&str] = &[
    "hello",
    "getHeadlessConfig",
    "start",
    "stop",
    "restart",
    "updateHeadlessConfig",
    "subscribe",
];

/// Why a request envelope could not be turned into a [`Command`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandParseError {
    UnmatchedSubject(String),
    InvalidData { subject: String, message: String },
}

impl CommandParseError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnmatchedSubject(_) => "unmatched_subject",
            Self::InvalidData { .. } => "invalid_data",
        }
    }
}

impl std::fmt::Display for CommandParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnmatchedSubject(subject) => write!(
                f,
                "not matched subject '{}'. Please pass one of [{}]",
                subject,
                SUBJECTS.join(", ")
            ),
            Self::InvalidData { subject, message } => {
                write!(f, "invalid data for '{}': {}", subject, message)
            }
        }
    }
}

impl std::error::Error for CommandParseError {}

#[derive(Deserialize)]
struct HelloData {
    protocol_version: u32,
}

impl Command {
    /// Parse a request envelope.
    ///
    /// Subjects are matched exactly; the `headless/` prefixed spellings used
    /// by older shells are accepted for `start` and `stop`.
    pub fn parse(request: &CommandRequest) -> Result<Self, CommandParseError> {
        let subject = request.subject.trim();
        match subject {
            "hello" => {
                let data: HelloData = decode_data(subject, request.data.clone())?;
                Ok(Self::Hello {
                    protocol_version: data.protocol_version,
                })
            }
            "getHeadlessConfig" => Ok(Self::GetHeadlessConfig),
            "start" | "headless/start" => Ok(Self::Start),
            "stop" | "headless/stop" => Ok(Self::Stop),
            "restart" | "headless/restart" => Ok(Self::Restart),
            "updateHeadlessConfig" => {
                let patch = decode_data(subject, request.data.clone())?;
                Ok(Self::UpdateHeadlessConfig(patch))
            }
            "subscribe" => Ok(Self::Subscribe),
            other => Err(CommandParseError::UnmatchedSubject(other.to_string())),
        }
    }

    pub fn subject(&self) -> &'static str {
        match self {
            Self::Hello { .. } => "hello",
            Self::GetHeadlessConfig => "getHeadlessConfig",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Restart => "restart",
            Self::UpdateHeadlessConfig(_) => "updateHeadlessConfig",
            Self::Subscribe => "subscribe",
        }
    }

    /// Encode this command as a request envelope.
    pub fn to_request(&self) -> CommandRequest {
        let request = CommandRequest::new(self.subject());
        match self {
            Self::Hello { protocol_version } => request.with_data(serde_json::json!({
                "protocol_version": protocol_version
            })),
            Self::UpdateHeadlessConfig(patch) => request.with_data(patch),
            _ => request,
        }
    }
}

fn decode_data<T: serde::de::DeserializeOwned>(
    subject: &str,
    data: Option<Value>,
) -> Result<T, CommandParseError> {
    let data = data.unwrap_or(Value::Null);
    serde_json::from_value(data).map_err(|e| CommandParseError::InvalidData {
        subject: subject.to_string(),
        message: e.to_string(),
    })
}

/// Error attached to failed responses and notifications
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub kind: String,
    pub message: String,
}

impl ErrorDetail {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.kind)
    }
}

/// Response on the command channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub status: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
}

impl Response {
    pub fn ok(data: impl Serialize) -> Self {
        Self {
            status: true,
            data: Some(serde_json::to_value(data).unwrap_or(Value::Null)),
            error: None,
        }
    }

    /// Successful response without a payload.
    pub fn done() -> Self {
        Self {
            status: true,
            data: None,
            error: None,
        }
    }

    pub fn failure(error: ErrorDetail) -> Self {
        Self {
            status: false,
            data: None,
            error: Some(error),
        }
    }

    /// Attach a payload, keeping status and error as they are.
    pub fn with_data(mut self, data: impl Serialize) -> Self {
        self.data = Some(serde_json::to_value(data).unwrap_or(Value::Null));
        self
    }

    pub fn is_ok(&self) -> bool {
        self.status
    }

    pub fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.message.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloResponse {
    pub protocol_version: u32,
    pub server_version: String,
    pub subjects: Vec<String>,
}

/// Subjects published on the notification channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationSubject {
    Starting,
    Started,
    Stopping,
    Stopped,
}

impl NotificationSubject {
    /// Begin-of-transition subject (as opposed to its terminal counterpart).
    pub fn is_begin(self) -> bool {
        matches!(self, Self::Starting | Self::Stopping)
    }
}

impl std::fmt::Display for NotificationSubject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Starting => write!(f, "starting"),
            Self::Started => write!(f, "started"),
            Self::Stopping => write!(f, "stopping"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Lifecycle notification sent to observers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub subject: NotificationSubject,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<bool>,
    pub data: ServiceConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
}

impl Notification {
    /// Begin notification (`starting` / `stopping`); carries no status.
    pub fn begin(subject: NotificationSubject, data: ServiceConfig) -> Self {
        Self {
            subject,
            status: None,
            data,
            error: None,
        }
    }

    /// Terminal notification (`started` / `stopped`).
    pub fn finished(
        subject: NotificationSubject,
        data: ServiceConfig,
        error: Option<ErrorDetail>,
    ) -> Self {
        Self {
            subject,
            status: Some(error.is_none()),
            data,
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AgentPreferences, Phase};

    fn request(json: &str) -> CommandRequest {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_parse_known_subjects() {
        assert_eq!(
            Command::parse(&request(r#"{"subject":"getHeadlessConfig"}"#)).unwrap(),
            Command::GetHeadlessConfig
        );
        assert_eq!(
            Command::parse(&request(r#"{"subject":"start"}"#)).unwrap(),
            Command::Start
        );
        assert_eq!(
            Command::parse(&request(r#"{"subject":"headless/stop"}"#)).unwrap(),
            Command::Stop
        );
        assert_eq!(
            Command::parse(&request(r#"{"subject":"restart"}"#)).unwrap(),
            Command::Restart
        );
    }

    #[test]
    fn test_parse_unmatched_subject_is_explicit_error() {
        let err = Command::parse(&request(r#"{"subject":"launchRockets"}"#)).unwrap_err();
        assert_eq!(
            err,
            CommandParseError::UnmatchedSubject("launchRockets".to_string())
        );
        assert_eq!(err.kind(), "unmatched_subject");
        assert!(err.to_string().contains("getHeadlessConfig"));
    }

    #[test]
    fn test_parse_update_requires_object_data() {
        let err = Command::parse(&request(
            r#"{"subject":"updateHeadlessConfig","data":"nope"}"#,
        ))
        .unwrap_err();
        assert!(matches!(err, CommandParseError::InvalidData { .. }));

        let cmd = Command::parse(&request(
            r#"{"subject":"updateHeadlessConfig","data":{"base_url":"https://x"}}"#,
        ))
        .unwrap();
        match cmd {
            Command::UpdateHeadlessConfig(patch) => {
                assert_eq!(patch.base_url.as_deref(), Some("https://x"))
            }
            other => panic!("expected update, got {other:?}"),
        }
    }

    #[test]
    fn test_hello_roundtrip() {
        let cmd = Command::Hello {
            protocol_version: PROTOCOL_VERSION,
        };
        let json = serde_json::to_string(&cmd.to_request()).unwrap();
        assert!(json.contains(r#""subject":"hello""#));
        let parsed = Command::parse(&serde_json::from_str(&json).unwrap()).unwrap();
        assert_eq!(parsed, cmd);
    }

    #[test]
    fn test_response_shapes() {
        let ok = Response::done();
        assert_eq!(serde_json::to_string(&ok).unwrap(), r#"{"status":true}"#);

        let failed = Response::failure(ErrorDetail::new("busy", "transition in progress"))
            .with_data(serde_json::json!({}));
        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["status"], false);
        assert_eq!(json["data"], serde_json::json!({}));
        assert_eq!(json["error"]["kind"], "busy");
        assert_eq!(failed.error_message(), Some("transition in progress"));
    }

    #[test]
    fn test_notification_status_follows_error() {
        let data = ServiceConfig::project(
            AgentPreferences::new("/tmp/agent"),
            Phase::StartFailed,
            8090,
            None,
        );
        let begin = Notification::begin(NotificationSubject::Starting, data.clone());
        assert_eq!(begin.status, None);

        let failed = Notification::finished(
            NotificationSubject::Started,
            data,
            Some(ErrorDetail::new("port_unavailable", "no port")),
        );
        assert_eq!(failed.status, Some(false));
        let json = serde_json::to_string(&failed).unwrap();
        assert!(json.contains(r#""subject":"started""#));
        assert!(json.contains(r#""status":false"#));
    }
}
