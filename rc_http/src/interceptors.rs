use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::errors::AppError;
use crate::errors::Severity;
use crate::request::RequestDescriptor;
use crate::response::RawResponse;

pub type RequestInterceptor = Arc<dyn Fn(RequestDescriptor) -> RequestDescriptor + Send + Sync>;
pub type ResponseInterceptor = Arc<dyn Fn(RawResponse) -> RawResponse + Send + Sync>;
pub type ErrorInterceptor = Arc<dyn Fn(AppError) -> AppError + Send + Sync>;

/// Sink for fully classified errors
///
/// Called inline after a call fails, so implementations must return quickly
/// and hand any slow work off elsewhere.
pub trait ErrorReporter: Send + Sync {
    fn report(&self, error: &AppError);
}

/// Logs errors at a level matching their severity
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn report(&self, err: &AppError) {
        let request_id = err.request_id().unwrap_or("-");
        match err.severity() {
            Severity::Low => info!(request_id, kind = %err.kind(), context = ?err.context(), "{}", err.message()),
            Severity::Medium => warn!(request_id, kind = %err.kind(), context = ?err.context(), "{}", err.message()),
            Severity::High | Severity::Critical => {
                error!(request_id, kind = %err.kind(), severity = %err.severity(), context = ?err.context(), "{}", err.message())
            }
        }
    }
}

/// Forwards errors to an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelReporter {
    tx: mpsc::UnboundedSender<AppError>,
}

impl ChannelReporter {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<AppError>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ErrorReporter for ChannelReporter {
    fn report(&self, error: &AppError) {
        // Receiver gone means nobody is listening any more
        let _ = self.tx.send(error.clone());
    }
}

/// Hand an error to the reporter without letting it unwind into the caller
pub(crate) fn report_safely(reporter: &dyn ErrorReporter, error: &AppError) {
    if std::panic::catch_unwind(AssertUnwindSafe(|| reporter.report(error))).is_err() {
        warn!(request_id = error.request_id().unwrap_or("-"), "Error reporter panicked");
    }
}

/// Supplies bearer tokens for outbound calls
pub trait CredentialSource: Send + Sync {
    fn bearer_token(&self) -> Option<String>;
}

/// A fixed token
#[derive(Debug, Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl CredentialSource for StaticToken {
    fn bearer_token(&self) -> Option<String> {
        if self.0.is_empty() { None } else { Some(self.0.clone()) }
    }
}

/// Request interceptor adding `Authorization: Bearer ..` when the call has none
pub fn auth_interceptor(source: Arc<dyn CredentialSource>) -> RequestInterceptor {
    Arc::new(move |request: RequestDescriptor| {
        if request.has_header("Authorization") {
            return request;
        }
        match source.bearer_token() {
            Some(token) => request.header("Authorization", format!("Bearer {token}")),
            None => request,
        }
    })
}
