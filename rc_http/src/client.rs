use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;
use uuid::Uuid;

use crate::circuit_breaker::CircuitBreaker;
use crate::circuit_breaker::CircuitBreakerConfig;
use crate::clock;
use crate::errors;
use crate::errors::AppError;
use crate::errors::ErrorContext;
use crate::errors::ErrorKind;
use crate::errors::Result;
use crate::errors::Severity;
use crate::errors::keys;
use crate::interceptors::ErrorInterceptor;
use crate::interceptors::ErrorReporter;
use crate::interceptors::RequestInterceptor;
use crate::interceptors::ResponseInterceptor;
use crate::interceptors::report_safely;
use crate::registry::CircuitBreakerRegistry;
use crate::request::BreakerPolicy;
use crate::request::CONTENT_TYPE_HEADER;
use crate::request::REQUEST_ID_HEADER;
use crate::request::RequestDescriptor;
use crate::request::RetryPolicy;
use crate::request::find_header;
use crate::request::merge_headers;
use crate::response::RawResponse;
use crate::response::ResponseBody;
use crate::response::ResponseEnvelope;
use crate::retry::RetryConfig;
use crate::retry::RetryExecutor;
use crate::transport::ReqwestTransport;
use crate::transport::Transport;
use crate::transport::TransportConfig;
use crate::transport::TransportError;
use crate::transport::TransportRequest;
use crate::transport::TransportResponse;

/// Configuration for [`ResilientClient`]
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Prefix for relative request URLs
    pub base_url: Option<String>,

    /// Headers sent with every request unless the call overrides them
    pub default_headers: BTreeMap<String, String>,

    /// Per-attempt deadline when the call does not set one
    ///
    /// The breaker's own `circuit_breaker.timeout_ms` also bounds every
    /// guarded attempt, so the effective deadline is the smaller of the two
    /// unless the breaker deadline is 0 or the call disables the breaker.
    pub timeout_ms: u64,

    pub retry: RetryConfig,

    pub circuit_breaker: CircuitBreakerConfig,

    pub transport: TransportConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let mut default_headers = BTreeMap::new();
        default_headers.insert("Accept".to_string(), "application/json".to_string());

        Self {
            base_url: None,
            default_headers,
            timeout_ms: 30_000,
            retry: RetryConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            transport: TransportConfig::default(),
        }
    }
}

/// Request after interceptors, header merging and URL resolution
struct PreparedCall {
    request: TransportRequest,
    timeout: Duration,
    retry: Option<RetryConfig>,
    breaker: Option<Arc<CircuitBreaker>>,
    context: ErrorContext,
}

/// HTTP client that runs every call through a circuit breaker and retries
///
/// Classified failures never escape: every call returns a
/// [`ResponseEnvelope`].
pub struct ResilientClient {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    breakers: Arc<CircuitBreakerRegistry>,
    retry: RetryExecutor,
    reporter: Option<Arc<dyn ErrorReporter>>,
    request_interceptors: Vec<RequestInterceptor>,
    response_interceptors: Vec<ResponseInterceptor>,
    error_interceptors: Vec<ErrorInterceptor>,
}

impl ResilientClient {
    /// Create a client with default configuration and its own registry
    pub fn new() -> std::result::Result<Self, TransportError> {
        Self::builder().build()
    }

    pub fn builder() -> ResilientClientBuilder {
        ResilientClientBuilder::default()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Breakers shared by this client, for stats and resets
    pub fn circuit_breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    pub fn add_request_interceptor<F>(&mut self, interceptor: F)
    where
        F: Fn(RequestDescriptor) -> RequestDescriptor + Send + Sync + 'static,
    {
        self.request_interceptors.push(Arc::new(interceptor));
    }

    pub fn add_response_interceptor<F>(&mut self, interceptor: F)
    where
        F: Fn(RawResponse) -> RawResponse + Send + Sync + 'static,
    {
        self.response_interceptors.push(Arc::new(interceptor));
    }

    pub fn add_error_interceptor<F>(&mut self, interceptor: F)
    where
        F: Fn(AppError) -> AppError + Send + Sync + 'static,
    {
        self.error_interceptors.push(Arc::new(interceptor));
    }

    pub async fn get<T: DeserializeOwned>(&self, url: &str) -> ResponseEnvelope<T> {
        self.request(RequestDescriptor::get(url)).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(&self, url: &str, body: &B) -> ResponseEnvelope<T> {
        self.request_with_body(RequestDescriptor::post(url), body).await
    }

    pub async fn put<T: DeserializeOwned, B: Serialize + ?Sized>(&self, url: &str, body: &B) -> ResponseEnvelope<T> {
        self.request_with_body(RequestDescriptor::put(url), body).await
    }

    pub async fn patch<T: DeserializeOwned, B: Serialize + ?Sized>(&self, url: &str, body: &B) -> ResponseEnvelope<T> {
        self.request_with_body(RequestDescriptor::patch(url), body).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, url: &str) -> ResponseEnvelope<T> {
        self.request(RequestDescriptor::delete(url)).await
    }

    /// Issue a call and decode a successful body into `T`
    pub async fn request<T: DeserializeOwned>(&self, descriptor: RequestDescriptor) -> ResponseEnvelope<T> {
        let skip_error_handling = descriptor.skip_error_handling;
        let ResponseEnvelope { data, status, status_text, headers, success, error } = self.request_raw(descriptor).await;
        if !success {
            return ResponseEnvelope { data: None, status, status_text, headers, success, error };
        }

        match data.unwrap_or(ResponseBody::Empty).decode::<T>() {
            Ok(value) => ResponseEnvelope::ok(value, status, status_text, headers),
            Err(err) => {
                let err = err.with_context(keys::STATUS, status).with_context(keys::STATUS_TEXT, status_text);
                self.fail(err, skip_error_handling)
            }
        }
    }

    /// Issue a call and return the parsed body without decoding it further
    pub async fn request_raw(&self, descriptor: RequestDescriptor) -> ResponseEnvelope<ResponseBody> {
        let descriptor = self.request_interceptors.iter().fold(descriptor, |request, interceptor| interceptor(request));
        let skip_error_handling = descriptor.skip_error_handling;

        let call = match self.prepare(descriptor) {
            Ok(call) => call,
            Err(err) => return self.fail(err, skip_error_handling),
        };

        let request_id = call.context.get(keys::REQUEST_ID).map(|v| v.to_string()).unwrap_or_default();
        debug!(request_id = %request_id, method = %call.request.method, url = %call.request.url, "Sending request");

        let response = match self.execute(&call).await {
            Ok(response) => response,
            Err(err) => {
                debug!(request_id = %request_id, kind = %err.kind(), "Request failed");
                return self.fail(err, skip_error_handling);
            }
        };

        let body = match ResponseBody::parse(response.header(CONTENT_TYPE_HEADER), &response.body) {
            Ok(body) => body,
            Err(err) => {
                let err = err
                    .with_contexts(&call.context)
                    .with_context(keys::STATUS, response.status)
                    .with_context(keys::STATUS_TEXT, response.status_text.as_str());
                return self.fail(err, skip_error_handling);
            }
        };

        debug!(request_id = %request_id, status = response.status, "Request succeeded");
        let raw = RawResponse { request_id, status: response.status, status_text: response.status_text, headers: response.headers, body };
        let raw = self.response_interceptors.iter().fold(raw, |response, interceptor| interceptor(response));
        ResponseEnvelope::from(raw)
    }

    async fn request_with_body<T, B>(&self, descriptor: RequestDescriptor, body: &B) -> ResponseEnvelope<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        match serde_json::to_value(body) {
            Ok(value) => self.request(descriptor.json(value)).await,
            Err(e) => {
                let err = errors::wrap(e, ErrorKind::Validation, Severity::Medium, ErrorContext::new())
                    .with_context(keys::METHOD, descriptor.method.as_str())
                    .with_context(keys::URL, descriptor.url.as_str());
                self.fail(err, descriptor.skip_error_handling)
            }
        }
    }

    fn prepare(&self, descriptor: RequestDescriptor) -> Result<PreparedCall> {
        let mut headers = merge_headers(&self.config.default_headers, &descriptor.headers);
        let request_id = match find_header(&headers, REQUEST_ID_HEADER) {
            Some(existing) => existing.to_string(),
            None => {
                let id = Uuid::new_v4().to_string();
                headers.insert(REQUEST_ID_HEADER.to_string(), id.clone());
                id
            }
        };

        let mut context = ErrorContext::new();
        context.insert(keys::REQUEST_ID.to_string(), request_id.into());
        context.insert(keys::METHOD.to_string(), descriptor.method.as_str().into());
        context.insert(keys::URL.to_string(), descriptor.url.as_str().into());

        let url = self.resolve_url(&descriptor.url).map_err(|err| err.with_contexts(&context))?;
        context.insert(keys::URL.to_string(), url.as_str().into());

        if let Some(body) = &descriptor.body {
            if find_header(&headers, CONTENT_TYPE_HEADER).is_none() {
                headers.insert(CONTENT_TYPE_HEADER.to_string(), body.content_type().to_string());
            }
        }

        let timeout_ms = descriptor.timeout_ms.unwrap_or(self.config.timeout_ms);
        context.insert(keys::TIMEOUT_MS.to_string(), timeout_ms.into());

        let retry = match descriptor.retry_policy {
            RetryPolicy::Default => Some(self.config.retry.clone()),
            RetryPolicy::Custom(config) => Some(config),
            RetryPolicy::Disabled => None,
        };

        let breaker = match &descriptor.circuit_breaker_policy {
            BreakerPolicy::Disabled => None,
            BreakerPolicy::Default => Some(self.breakers.get_breaker(&breaker_name(&url), Some(&self.config.circuit_breaker))),
            BreakerPolicy::Custom { name, config } => {
                let name = name.clone().unwrap_or_else(|| breaker_name(&url));
                Some(self.breakers.get_breaker(&name, Some(config.as_ref().unwrap_or(&self.config.circuit_breaker))))
            }
        };
        if let Some(breaker) = &breaker {
            context.insert(keys::CIRCUIT_BREAKER.to_string(), breaker.name().into());
        }

        let request = TransportRequest {
            method: descriptor.method,
            url: url.to_string(),
            headers,
            query: descriptor.query,
            body: descriptor.body.map(|body| body.into_bytes()),
        };

        Ok(PreparedCall { request, timeout: Duration::from_millis(timeout_ms), retry, breaker, context })
    }

    fn resolve_url(&self, raw: &str) -> Result<Url> {
        match Url::parse(raw) {
            Ok(url) => Ok(url),
            Err(url::ParseError::RelativeUrlWithoutBase) => match &self.config.base_url {
                Some(base) => {
                    let joined = format!("{}/{}", base.trim_end_matches('/'), raw.trim_start_matches('/'));
                    Url::parse(&joined).map_err(|e| errors::wrap(e, ErrorKind::Validation, Severity::Medium, ErrorContext::new()))
                }
                None => Err(AppError::new(format!("Relative URL '{raw}' without a configured base URL"), ErrorKind::Validation, Severity::Medium)),
            },
            Err(e) => Err(errors::wrap(e, ErrorKind::Validation, Severity::Medium, ErrorContext::new())),
        }
    }

    /// Retry outermost, breaker innermost
    async fn execute(&self, call: &PreparedCall) -> Result<TransportResponse> {
        match &call.retry {
            Some(config) => {
                let client = self;
                self.retry.retry(move || client.guarded_attempt(call), config, &call.context).await
            }
            None => self.guarded_attempt(call).await,
        }
    }

    async fn guarded_attempt(&self, call: &PreparedCall) -> Result<TransportResponse> {
        match &call.breaker {
            Some(breaker) => breaker.execute(|| self.attempt(call), &call.context).await,
            None => self.attempt(call).await,
        }
    }

    /// One network round trip under the per-attempt deadline
    async fn attempt(&self, call: &PreparedCall) -> Result<TransportResponse> {
        let response = match tokio::time::timeout(call.timeout, self.transport.send(call.request.clone())).await {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => return Err(translate_transport_error(err, &call.context)),
            Err(_) => {
                return Err(AppError::new(
                    format!("Request timed out after {}ms", call.timeout.as_millis()),
                    ErrorKind::Timeout,
                    Severity::Medium,
                )
                .with_contexts(&call.context)
                .with_context(keys::TIMESTAMP, clock::timestamp()));
            }
        };

        if response.is_success() {
            return Ok(response);
        }

        let message = errors::message_from_body(response.status, &response.status_text, &response.body);
        Err(AppError::from_status(response.status, message, call.context.clone())
            .with_context(keys::STATUS_TEXT, response.status_text.as_str())
            .with_context(keys::TIMESTAMP, clock::timestamp()))
    }

    fn fail<T>(&self, err: AppError, skip_error_handling: bool) -> ResponseEnvelope<T> {
        let err = self.error_interceptors.iter().fold(err, |err, interceptor| interceptor(err));
        if !skip_error_handling {
            if let Some(reporter) = &self.reporter {
                report_safely(reporter.as_ref(), &err);
            }
        }
        ResponseEnvelope::failed(err)
    }
}

impl std::fmt::Debug for ResilientClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientClient")
            .field("config", &self.config)
            .field("request_interceptors", &self.request_interceptors.len())
            .field("response_interceptors", &self.response_interceptors.len())
            .field("error_interceptors", &self.error_interceptors.len())
            .field("breakers", &self.breakers.len())
            .finish()
    }
}

/// Breakers are keyed by host name
fn breaker_name(url: &Url) -> String {
    url.host_str().unwrap_or("default").to_string()
}

/// Classify a failure raised before any HTTP status was received
fn translate_transport_error(err: TransportError, context: &ErrorContext) -> AppError {
    let (kind, severity) = match &err {
        TransportError::Timeout(_) => (ErrorKind::Timeout, Severity::Medium),
        TransportError::Network(_) => (ErrorKind::Network, Severity::High),
        TransportError::InvalidRequest(_) | TransportError::Other(_) => (ErrorKind::Unknown, Severity::Medium),
    };
    errors::wrap(err, kind, severity, context.clone()).with_context(keys::TIMESTAMP, clock::timestamp())
}

/// Builder for configuring a [`ResilientClient`]
#[derive(Default)]
pub struct ResilientClientBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn Transport>>,
    breakers: Option<Arc<CircuitBreakerRegistry>>,
    retry: Option<RetryExecutor>,
    reporter: Option<Arc<dyn ErrorReporter>>,
    request_interceptors: Vec<RequestInterceptor>,
}

impl ResilientClientBuilder {
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = Some(url.into());
        self
    }

    pub fn default_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.default_headers.insert(name.into(), value.into());
        self
    }

    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.config.timeout_ms = timeout_ms;
        self
    }

    pub fn retry_config(mut self, config: RetryConfig) -> Self {
        self.config.retry = config;
        self
    }

    pub fn circuit_breaker_config(mut self, config: CircuitBreakerConfig) -> Self {
        self.config.circuit_breaker = config;
        self
    }

    /// Use a custom transport instead of reqwest
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Share breakers with other clients
    pub fn registry(mut self, registry: Arc<CircuitBreakerRegistry>) -> Self {
        self.breakers = Some(registry);
        self
    }

    pub fn retry_executor(mut self, executor: RetryExecutor) -> Self {
        self.retry = Some(executor);
        self
    }

    pub fn reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub fn request_interceptor(mut self, interceptor: RequestInterceptor) -> Self {
        self.request_interceptors.push(interceptor);
        self
    }

    pub fn build(self) -> std::result::Result<ResilientClient, TransportError> {
        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::with_config(&self.config.transport)?),
        };
        let breakers = self.breakers.unwrap_or_else(|| Arc::new(CircuitBreakerRegistry::with_config(self.config.circuit_breaker.clone())));

        Ok(ResilientClient {
            config: self.config,
            transport,
            breakers,
            retry: self.retry.unwrap_or_default(),
            reporter: self.reporter,
            request_interceptors: self.request_interceptors,
            response_interceptors: Vec::new(),
            error_interceptors: Vec::new(),
        })
    }
}
