use std::collections::BTreeMap;

use reqwest::Method;
use serde_json::Value;

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::retry::RetryConfig;

pub const REQUEST_ID_HEADER: &str = "X-Request-ID";
pub const CONTENT_TYPE_HEADER: &str = "Content-Type";

/// Body of an outbound request
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Json(Value),
    Text(String),
    Bytes(Vec<u8>),
}

impl RequestBody {
    pub fn content_type(&self) -> &'static str {
        match self {
            RequestBody::Json(_) => "application/json",
            RequestBody::Text(_) => "text/plain; charset=utf-8",
            RequestBody::Bytes(_) => "application/octet-stream",
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            RequestBody::Json(value) => value.to_string().into_bytes(),
            RequestBody::Text(text) => text.into_bytes(),
            RequestBody::Bytes(bytes) => bytes,
        }
    }
}

/// How a single call is retried
#[derive(Debug, Clone, Default, PartialEq)]
pub enum RetryPolicy {
    /// Use the client's retry configuration
    #[default]
    Default,
    Custom(RetryConfig),
    /// Exactly one attempt
    Disabled,
}

/// Which circuit breaker, if any, guards a single call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum BreakerPolicy {
    /// Breaker named after the request host, using the client's configuration
    #[default]
    Default,
    /// Override the breaker name, its first-use configuration, or both
    Custom { name: Option<String>, config: Option<CircuitBreakerConfig> },
    Disabled,
}

/// Everything needed to issue one call
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    pub method: Method,
    pub url: String,
    pub body: Option<RequestBody>,
    pub headers: BTreeMap<String, String>,
    pub query: Vec<(String, String)>,
    /// Per-attempt deadline; the client default applies when unset. A guarding
    /// breaker's shorter deadline still wins.
    pub timeout_ms: Option<u64>,
    pub retry_policy: RetryPolicy,
    pub circuit_breaker_policy: BreakerPolicy,
    /// Skip the external error reporter for this call
    pub skip_error_handling: bool,
}

impl RequestDescriptor {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            body: None,
            headers: BTreeMap::new(),
            query: Vec::new(),
            timeout_ms: None,
            retry_policy: RetryPolicy::Default,
            circuit_breaker_policy: BreakerPolicy::Default,
            skip_error_handling: false,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn put(url: impl Into<String>) -> Self {
        Self::new(Method::PUT, url)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::DELETE, url)
    }

    pub fn patch(url: impl Into<String>) -> Self {
        Self::new(Method::PATCH, url)
    }

    /// Set a header, replacing any existing value regardless of case
    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.retain(|key, _| !key.eq_ignore_ascii_case(name));
        self.headers.insert(name.to_string(), value.into());
        self
    }

    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn json(mut self, value: Value) -> Self {
        self.body = Some(RequestBody::Json(value));
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.body = Some(RequestBody::Text(text.into()));
        self
    }

    pub fn bytes(mut self, bytes: Vec<u8>) -> Self {
        self.body = Some(RequestBody::Bytes(bytes));
        self
    }

    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn no_retry(self) -> Self {
        self.retry(RetryPolicy::Disabled)
    }

    pub fn circuit_breaker(mut self, policy: BreakerPolicy) -> Self {
        self.circuit_breaker_policy = policy;
        self
    }

    pub fn no_circuit_breaker(self) -> Self {
        self.circuit_breaker(BreakerPolicy::Disabled)
    }

    pub fn skip_error_handling(mut self) -> Self {
        self.skip_error_handling = true;
        self
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.header_value(name).is_some()
    }
}

pub(crate) fn find_header<'a>(headers: &'a BTreeMap<String, String>, name: &str) -> Option<&'a str> {
    headers.iter().find(|(key, _)| key.eq_ignore_ascii_case(name)).map(|(_, value)| value.as_str())
}

/// Combine default and per-call headers; per-call values win regardless of case
pub(crate) fn merge_headers(defaults: &BTreeMap<String, String>, per_call: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    let mut merged = per_call.clone();
    for (name, value) in defaults {
        if find_header(per_call, name).is_none() {
            merged.insert(name.clone(), value.clone());
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_builder_defaults() {
        let req = RequestDescriptor::get("/documents");

        assert_eq!(req.method, Method::GET);
        assert_eq!(req.url, "/documents");
        assert_eq!(req.retry_policy, RetryPolicy::Default);
        assert_eq!(req.circuit_breaker_policy, BreakerPolicy::Default);
        assert!(!req.skip_error_handling);
        assert!(req.body.is_none());
    }

    #[test]
    fn test_header_replaces_case_insensitively() {
        let req = RequestDescriptor::get("/x").header("accept", "text/plain").header("Accept", "application/json");

        assert_eq!(req.headers.len(), 1);
        assert_eq!(req.header_value("ACCEPT"), Some("application/json"));
    }

    #[test]
    fn test_merge_headers_per_call_wins() {
        let mut defaults = BTreeMap::new();
        defaults.insert("Accept".to_string(), "application/json".to_string());
        defaults.insert("X-Client".to_string(), "rc".to_string());
        let mut per_call = BTreeMap::new();
        per_call.insert("accept".to_string(), "text/csv".to_string());

        let merged = merge_headers(&defaults, &per_call);

        assert_eq!(merged.len(), 2);
        assert_eq!(find_header(&merged, "Accept"), Some("text/csv"));
        assert_eq!(find_header(&merged, "x-client"), Some("rc"));
    }

    #[test]
    fn test_body_encoding() {
        let body = RequestBody::Json(json!({"title": "Fire drill"}));
        assert_eq!(body.content_type(), "application/json");
        assert_eq!(body.into_bytes(), br#"{"title":"Fire drill"}"#.to_vec());

        assert_eq!(RequestBody::Text("hi".into()).into_bytes(), b"hi".to_vec());
    }

    #[test]
    fn test_policies() {
        let req = RequestDescriptor::post("/x").json(json!({})).no_retry().no_circuit_breaker().skip_error_handling().timeout_ms(5_000);

        assert_eq!(req.retry_policy, RetryPolicy::Disabled);
        assert_eq!(req.circuit_breaker_policy, BreakerPolicy::Disabled);
        assert!(req.skip_error_handling);
        assert_eq!(req.timeout_ms, Some(5_000));
    }
}
