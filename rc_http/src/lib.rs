//! # rc_http
//!
//! Resilient HTTP client: per-host circuit breakers, bounded retries with
//! exponential backoff, interceptors and uniform response envelopes

pub mod circuit_breaker;
pub mod client;
pub mod clock;
pub mod errors;
pub mod interceptors;
pub mod registry;
pub mod request;
pub mod response;
pub mod retry;
pub mod transport;

pub use circuit_breaker::CircuitBreaker;
pub use circuit_breaker::CircuitBreakerConfig;
pub use circuit_breaker::CircuitBreakerStats;
pub use circuit_breaker::CircuitState;
pub use client::ClientConfig;
pub use client::ResilientClient;
pub use client::ResilientClientBuilder;
pub use errors::AppError;
pub use errors::ErrorContext;
pub use errors::ErrorKind;
pub use errors::Result;
pub use errors::Severity;
pub use interceptors::ErrorReporter;
pub use registry::CircuitBreakerRegistry;
pub use request::BreakerPolicy;
pub use request::RequestDescriptor;
pub use request::RetryPolicy;
pub use response::ResponseBody;
pub use response::ResponseEnvelope;
pub use retry::RetryConfig;
pub use retry::RetryExecutor;
pub use transport::ReqwestTransport;
pub use transport::Transport;
