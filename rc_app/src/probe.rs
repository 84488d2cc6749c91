use std::sync::Arc;

use rc_http::CircuitBreakerRegistry;
use rc_http::ErrorKind;
use rc_http::ResilientClient;
use rc_http::ResponseBody;
use rc_http::interceptors::StaticToken;
use rc_http::interceptors::TracingReporter;
use rc_http::interceptors::auth_interceptor;
use rc_http::transport::TransportError;
use serde::Serialize;
use tracing::info;
use tracing::warn;

use crate::config_loader::AppConfigFile;

/// Environment variable holding the bearer token sent with every probe
pub const API_TOKEN_ENV: &str = "RC_API_TOKEN";

/// Result of probing one URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeOutcome {
    pub url: String,
    pub success: bool,
    pub status: u16,
    pub kind: Option<ErrorKind>,
    pub message: Option<String>,
}

/// Build a client for probing, sharing `registry` with any other clients
pub fn build_client(config: &AppConfigFile, registry: Arc<CircuitBreakerRegistry>, token: Option<String>) -> Result<ResilientClient, TransportError> {
    let mut builder = ResilientClient::builder().config(config.client.clone()).registry(registry).reporter(Arc::new(TracingReporter));
    if let Some(token) = token {
        builder = builder.request_interceptor(auth_interceptor(Arc::new(StaticToken::new(token))));
    }
    builder.build()
}

/// GET every URL concurrently and collect outcomes in input order
pub async fn run(client: &ResilientClient, urls: &[String]) -> Vec<ProbeOutcome> {
    let calls = urls.iter().map(|url| async move {
        let envelope = client.request_raw(rc_http::RequestDescriptor::get(url.as_str())).await;
        let outcome = ProbeOutcome {
            url: url.clone(),
            success: envelope.success,
            status: envelope.status,
            kind: envelope.error_kind(),
            message: envelope.error.as_ref().map(|e| e.message().to_string()),
        };

        if outcome.success {
            let bytes = match &envelope.data {
                Some(ResponseBody::Text(text)) => text.len(),
                Some(ResponseBody::Json(value)) => value.to_string().len(),
                Some(ResponseBody::Empty) | None => 0,
            };
            info!(url = %outcome.url, status = outcome.status, bytes, "Probe succeeded");
        } else {
            warn!(url = %outcome.url, status = outcome.status, kind = ?outcome.kind, "Probe failed");
        }
        outcome
    });

    futures::future::join_all(calls).await
}

#[cfg(test)]
mod tests {
    use wiremock::Mock;
    use wiremock::MockServer;
    use wiremock::ResponseTemplate;
    use wiremock::matchers::header;
    use wiremock::matchers::method;
    use wiremock::matchers::path;

    use super::*;

    fn quick_config(base_url: String) -> AppConfigFile {
        let mut config = AppConfigFile::default();
        config.client.base_url = Some(base_url);
        config.client.retry = rc_http::RetryConfig::none();
        config
    }

    #[tokio::test]
    async fn test_probe_mixed_outcomes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ok"))
            .and(header("authorization", "Bearer probe-token"))
            .respond_with(ResponseTemplate::new(200).set_body_string("fine"))
            .mount(&server)
            .await;
        Mock::given(method("GET")).and(path("/gone")).respond_with(ResponseTemplate::new(410)).mount(&server).await;

        let registry = Arc::new(CircuitBreakerRegistry::new());
        let client = build_client(&quick_config(server.uri()), registry.clone(), Some("probe-token".into())).unwrap();

        let outcomes = run(&client, &["/ok".to_string(), "/gone".to_string()]).await;

        assert_eq!(outcomes.len(), 2);
        assert!(outcomes[0].success);
        assert_eq!(outcomes[0].status, 200);
        assert!(!outcomes[1].success);
        assert_eq!(outcomes[1].status, 410);
        assert_eq!(outcomes[1].kind, Some(ErrorKind::Client));

        let stats = registry.get_all_stats();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats.values().next().unwrap().requests, 2);
    }

    #[tokio::test]
    async fn test_probe_without_base_url() {
        let registry = Arc::new(CircuitBreakerRegistry::new());
        let client = build_client(&AppConfigFile::default(), registry.clone(), None).unwrap();

        let outcomes = run(&client, &["/relative".to_string()]).await;

        assert_eq!(outcomes[0].kind, Some(ErrorKind::Validation));
        assert!(registry.is_empty());
    }
}
