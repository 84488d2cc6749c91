use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

/// Failure category used for retry decisions and reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Validation,
    Authentication,
    Authorization,
    Client,
    Timeout,
    RateLimit,
    Network,
    Server,
    ServiceUnavailable,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "VALIDATION",
            ErrorKind::Authentication => "AUTHENTICATION",
            ErrorKind::Authorization => "AUTHORIZATION",
            ErrorKind::Client => "CLIENT",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::RateLimit => "RATE_LIMIT",
            ErrorKind::Network => "NETWORK",
            ErrorKind::Server => "SERVER",
            ErrorKind::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            ErrorKind::Unknown => "UNKNOWN",
        }
    }

    /// Whether another attempt could plausibly produce a different outcome
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::Server | ErrorKind::ServiceUnavailable | ErrorKind::RateLimit | ErrorKind::Network | ErrorKind::Timeout
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity drives reporting only, never control flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        };
        f.write_str(s)
    }
}

/// Scalar metadata attached to an error
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ContextValue {
    Str(String),
    Int(i64),
    UInt(u64),
    Float(f64),
    Bool(bool),
}

impl ContextValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ContextValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            ContextValue::UInt(v) => Some(*v),
            ContextValue::Int(v) if *v >= 0 => Some(*v as u64),
            _ => None,
        }
    }
}

impl fmt::Display for ContextValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextValue::Str(v) => f.write_str(v),
            ContextValue::Int(v) => write!(f, "{v}"),
            ContextValue::UInt(v) => write!(f, "{v}"),
            ContextValue::Float(v) => write!(f, "{v}"),
            ContextValue::Bool(v) => write!(f, "{v}"),
        }
    }
}

impl From<&str> for ContextValue {
    fn from(value: &str) -> Self {
        ContextValue::Str(value.to_string())
    }
}

impl From<String> for ContextValue {
    fn from(value: String) -> Self {
        ContextValue::Str(value)
    }
}

impl From<i64> for ContextValue {
    fn from(value: i64) -> Self {
        ContextValue::Int(value)
    }
}

impl From<u64> for ContextValue {
    fn from(value: u64) -> Self {
        ContextValue::UInt(value)
    }
}

impl From<u32> for ContextValue {
    fn from(value: u32) -> Self {
        ContextValue::UInt(u64::from(value))
    }
}

impl From<u16> for ContextValue {
    fn from(value: u16) -> Self {
        ContextValue::UInt(u64::from(value))
    }
}

impl From<f64> for ContextValue {
    fn from(value: f64) -> Self {
        ContextValue::Float(value)
    }
}

impl From<bool> for ContextValue {
    fn from(value: bool) -> Self {
        ContextValue::Bool(value)
    }
}

/// Metadata keyed by well-known names such as `requestId`, `status` or `url`
pub type ErrorContext = BTreeMap<String, ContextValue>;

/// Original error carried inside an [`AppError`]
pub type SharedError = Arc<dyn std::error::Error + Send + Sync>;

/// Classified failure produced anywhere in the request pipeline
///
/// Built once at the failure point. Accessors are read-only; the `with_*`
/// methods consume the value and are only meant for construction.
#[derive(Error, Debug, Clone, Serialize)]
#[error("{kind}: {message}")]
#[serde(rename_all = "camelCase")]
pub struct AppError {
    message: String,
    kind: ErrorKind,
    severity: Severity,
    context: ErrorContext,
    #[source]
    #[serde(skip)]
    source: Option<SharedError>,
}

impl AppError {
    pub fn new(message: impl Into<String>, kind: ErrorKind, severity: Severity) -> Self {
        Self { message: message.into(), kind, severity, context: ErrorContext::new(), source: None }
    }

    /// Build an error from an HTTP status using the classification table
    pub fn from_status(status: u16, message: impl Into<String>, context: ErrorContext) -> Self {
        let (kind, severity) = classify(status);
        let mut context = context;
        context.insert(keys::STATUS.to_string(), ContextValue::from(status));
        Self { message: message.into(), kind, severity, context, source: None }
    }

    pub fn with_context(mut self, key: &str, value: impl Into<ContextValue>) -> Self {
        self.context.insert(key.to_string(), value.into());
        self
    }

    pub fn with_contexts(mut self, context: &ErrorContext) -> Self {
        for (key, value) in context {
            self.context.entry(key.clone()).or_insert_with(|| value.clone());
        }
        self
    }

    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn context(&self) -> &ErrorContext {
        &self.context
    }

    pub fn context_value(&self, key: &str) -> Option<&ContextValue> {
        self.context.get(key)
    }

    /// HTTP status recorded for this failure, if any
    pub fn status(&self) -> Option<u16> {
        self.context.get(keys::STATUS).and_then(ContextValue::as_u64).and_then(|s| u16::try_from(s).ok())
    }

    pub fn request_id(&self) -> Option<&str> {
        self.context.get(keys::REQUEST_ID).and_then(ContextValue::as_str)
    }

    pub fn original(&self) -> Option<&SharedError> {
        self.source.as_ref()
    }

    pub fn is_retryable(&self) -> bool {
        is_retryable(self)
    }
}

/// Context keys shared by the breaker, retry executor and client
pub mod keys {
    pub const REQUEST_ID: &str = "requestId";
    pub const STATUS: &str = "status";
    pub const STATUS_TEXT: &str = "statusText";
    pub const URL: &str = "url";
    pub const METHOD: &str = "method";
    pub const CIRCUIT_BREAKER: &str = "circuitBreaker";
    pub const CIRCUIT_BREAKER_STATE: &str = "circuitBreakerState";
    pub const NEXT_ATTEMPT_TIME: &str = "nextAttemptTime";
    pub const TIMESTAMP: &str = "timestamp";
    pub const TIMEOUT_MS: &str = "timeoutMs";
}

/// Map an HTTP status code to a failure kind and severity
pub fn classify(status: u16) -> (ErrorKind, Severity) {
    match status {
        400 => (ErrorKind::Validation, Severity::Medium),
        401 => (ErrorKind::Authentication, Severity::High),
        403 => (ErrorKind::Authorization, Severity::High),
        404 => (ErrorKind::Client, Severity::Low),
        408 => (ErrorKind::Timeout, Severity::Medium),
        429 => (ErrorKind::RateLimit, Severity::Medium),
        503 => (ErrorKind::ServiceUnavailable, Severity::High),
        500..=599 => (ErrorKind::Server, Severity::High),
        _ => (ErrorKind::Client, Severity::Medium),
    }
}

/// Wrap an arbitrary error into an [`AppError`]
pub fn wrap<E>(error: E, kind: ErrorKind, severity: Severity, context: ErrorContext) -> AppError
where
    E: std::error::Error + Send + Sync + 'static,
{
    AppError { message: error.to_string(), kind, severity, context, source: Some(Arc::new(error)) }
}

pub fn is_retryable(error: &AppError) -> bool {
    error.kind.is_retryable()
}

/// Pick a human readable message out of an error response body
///
/// Backend services answer with `{"message": ..}`, `{"error": ..}` or
/// `{"detail": ..}`; anything else falls back to the status line.
pub fn message_from_body(status: u16, status_text: &str, body: &[u8]) -> String {
    if let Ok(serde_json::Value::Object(map)) = serde_json::from_slice::<serde_json::Value>(body) {
        for key in ["message", "error", "detail"] {
            match map.get(key) {
                Some(serde_json::Value::String(s)) if !s.is_empty() => return s.clone(),
                Some(serde_json::Value::Object(inner)) => {
                    if let Some(serde_json::Value::String(s)) = inner.get("message") {
                        return s.clone();
                    }
                }
                _ => {}
            }
        }
    }

    if status_text.is_empty() { format!("HTTP {status}") } else { format!("HTTP {status} {status_text}") }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_table() {
        let cases = [
            (400, ErrorKind::Validation, Severity::Medium),
            (401, ErrorKind::Authentication, Severity::High),
            (403, ErrorKind::Authorization, Severity::High),
            (404, ErrorKind::Client, Severity::Low),
            (408, ErrorKind::Timeout, Severity::Medium),
            (429, ErrorKind::RateLimit, Severity::Medium),
            (503, ErrorKind::ServiceUnavailable, Severity::High),
            (500, ErrorKind::Server, Severity::High),
        ];

        for (status, kind, severity) in cases {
            assert_eq!(classify(status), (kind, severity), "status {status}");
        }
    }

    #[test]
    fn test_classification_fallbacks() {
        assert_eq!(classify(502), (ErrorKind::Server, Severity::High));
        assert_eq!(classify(599), (ErrorKind::Server, Severity::High));
        assert_eq!(classify(409), (ErrorKind::Client, Severity::Medium));
        assert_eq!(classify(302), (ErrorKind::Client, Severity::Medium));
    }

    #[test]
    fn test_retryable_kinds() {
        for kind in [ErrorKind::Server, ErrorKind::ServiceUnavailable, ErrorKind::RateLimit, ErrorKind::Network, ErrorKind::Timeout] {
            assert!(kind.is_retryable(), "{kind} should retry");
        }
        for kind in [
            ErrorKind::Validation,
            ErrorKind::Authentication,
            ErrorKind::Authorization,
            ErrorKind::Client,
            ErrorKind::Unknown,
        ] {
            assert!(!kind.is_retryable(), "{kind} should not retry");
        }
    }

    #[test]
    fn test_from_status_records_status() {
        let err = AppError::from_status(429, "slow down", ErrorContext::new()).with_context(keys::REQUEST_ID, "req-1");

        assert_eq!(err.kind(), ErrorKind::RateLimit);
        assert_eq!(err.status(), Some(429));
        assert_eq!(err.request_id(), Some("req-1"));
        assert!(err.is_retryable());
        assert_eq!(err.to_string(), "RATE_LIMIT: slow down");
    }

    #[test]
    fn test_wrap_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = wrap(io, ErrorKind::Network, Severity::High, ErrorContext::new());

        assert_eq!(err.message(), "refused");
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.original().is_some());
    }

    #[test]
    fn test_with_contexts_keeps_existing_keys() {
        let mut extra = ErrorContext::new();
        extra.insert(keys::URL.to_string(), ContextValue::from("https://b"));
        extra.insert(keys::METHOD.to_string(), ContextValue::from("GET"));

        let err = AppError::new("x", ErrorKind::Unknown, Severity::Low).with_context(keys::URL, "https://a").with_contexts(&extra);

        assert_eq!(err.context_value(keys::URL), Some(&ContextValue::from("https://a")));
        assert_eq!(err.context_value(keys::METHOD), Some(&ContextValue::from("GET")));
    }

    #[test]
    fn test_message_from_body() {
        assert_eq!(message_from_body(400, "Bad Request", br#"{"message":"name required"}"#), "name required");
        assert_eq!(message_from_body(422, "", br#"{"detail":"bad field"}"#), "bad field");
        assert_eq!(message_from_body(500, "Internal Server Error", br#"{"error":{"message":"boom"}}"#), "boom");
        assert_eq!(message_from_body(502, "Bad Gateway", b"<html>"), "HTTP 502 Bad Gateway");
        assert_eq!(message_from_body(418, "", b""), "HTTP 418");
    }

    #[test]
    fn test_serializes_for_reporting() {
        let err = AppError::from_status(503, "down", ErrorContext::new());
        let json = serde_json::to_value(&err).unwrap();

        assert_eq!(json["kind"], "SERVICE_UNAVAILABLE");
        assert_eq!(json["severity"], "HIGH");
        assert_eq!(json["context"]["status"], 503);
    }
}
