use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::debug;

use super::types::{GraphQLRequest, GraphQLResponse};
use crate::error::{GraphQLError, GraphQLResult};
use crate::models::{AuthType, Endpoint};

/// A single-attempt GraphQL transport. Retries and circuit breaking live above it.
#[async_trait]
pub trait GraphQLTransport: Send + Sync {
    /// Issue one request and classify the outcome.
    async fn send(&self, request: &GraphQLRequest) -> GraphQLResult<GraphQLResponse>;

    /// URL the transport posts to.
    fn url(&self) -> &str;
}

/// reqwest-backed transport for one endpoint
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    url: String,
    timeout_ms: u64,
}

impl HttpTransport {
    /// Create a transport with auth and static headers taken from the endpoint record
    pub fn new(endpoint: &Endpoint) -> GraphQLResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let mut pairs: Vec<(String, String)> = endpoint
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        pairs.extend(auth_headers(endpoint)?);

        for (name, value) in &pairs {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                GraphQLError::InvalidRequest {
                    message: format!("Invalid header name '{}': {}", name, e),
                }
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| GraphQLError::InvalidRequest {
                message: format!("Invalid value for header '{}': {}", name, e),
            })?;
            headers.insert(name, value);
        }

        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(endpoint.timeout_seconds.max(1)))
            .build()
            .map_err(GraphQLError::Http)?;

        Ok(Self {
            client,
            url: endpoint.url.clone(),
            timeout_ms: endpoint.timeout_seconds * 1000,
        })
    }
}

#[async_trait]
impl GraphQLTransport for HttpTransport {
    async fn send(&self, request: &GraphQLRequest) -> GraphQLResult<GraphQLResponse> {
        debug!(
            url = %self.url,
            operation = request.operation_name.as_deref().unwrap_or(""),
            "Posting GraphQL request"
        );

        let response = self
            .client
            .post(&self.url)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GraphQLError::Timeout {
                        timeout_ms: self.timeout_ms,
                    }
                } else if e.is_connect() {
                    GraphQLError::Network {
                        message: e.to_string(),
                    }
                } else {
                    GraphQLError::Http(e)
                }
            })?;

        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, error_body));
        }

        let body: GraphQLResponse =
            response
                .json()
                .await
                .map_err(|e| GraphQLError::InvalidResponse {
                    message: format!("Failed to parse response: {}", e),
                })?;

        if body.has_errors() {
            return Err(GraphQLError::Execution {
                errors: body.errors.unwrap_or_default(),
            });
        }

        Ok(body)
    }

    fn url(&self) -> &str {
        &self.url
    }
}

fn classify_status(status: StatusCode, message: String) -> GraphQLError {
    if status == StatusCode::UNAUTHORIZED {
        GraphQLError::Authentication { message }
    } else if status.is_server_error() {
        GraphQLError::Server {
            status: status.as_u16(),
            message,
        }
    } else {
        GraphQLError::Client {
            status: status.as_u16(),
            message,
        }
    }
}

/// Build authentication headers for an endpoint.
///
/// Missing settings for the configured scheme are reported as `InvalidRequest`
/// rather than silently sending an unauthenticated request.
pub fn auth_headers(endpoint: &Endpoint) -> GraphQLResult<Vec<(String, String)>> {
    let config = &endpoint.auth_config;
    let require = |key: &str| {
        config
            .get(key)
            .cloned()
            .ok_or_else(|| GraphQLError::InvalidRequest {
                message: format!(
                    "Endpoint {} uses {} auth but auth_config.{} is missing",
                    endpoint.id, endpoint.auth_type, key
                ),
            })
    };

    let headers = match endpoint.auth_type {
        AuthType::None => Vec::new(),
        AuthType::Bearer => vec![(
            AUTHORIZATION.as_str().to_string(),
            format!("Bearer {}", require("token")?),
        )],
        AuthType::OAuth2 => vec![(
            AUTHORIZATION.as_str().to_string(),
            format!("Bearer {}", require("access_token")?),
        )],
        AuthType::Basic => {
            let credentials = format!("{}:{}", require("username")?, require("password")?);
            vec![(
                AUTHORIZATION.as_str().to_string(),
                format!("Basic {}", STANDARD.encode(credentials)),
            )]
        }
        AuthType::ApiKey => {
            let header = config
                .get("header_name")
                .cloned()
                .unwrap_or_else(|| "X-API-Key".to_string());
            vec![(header, require("api_key")?)]
        }
    };

    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn endpoint_with(auth: AuthType, pairs: &[(&str, &str)]) -> Endpoint {
        let config: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Endpoint::new("test", "https://example.com/graphql").with_auth(auth, config)
    }

    #[test]
    fn test_no_auth_headers() {
        let headers = auth_headers(&endpoint_with(AuthType::None, &[])).unwrap();
        assert!(headers.is_empty());
    }

    #[test]
    fn test_bearer_header() {
        let headers = auth_headers(&endpoint_with(AuthType::Bearer, &[("token", "abc")])).unwrap();
        assert_eq!(
            headers,
            vec![("authorization".to_string(), "Bearer abc".to_string())]
        );
    }

    #[test]
    fn test_basic_header() {
        let headers = auth_headers(&endpoint_with(
            AuthType::Basic,
            &[("username", "user"), ("password", "pass")],
        ))
        .unwrap();
        // base64("user:pass")
        assert_eq!(headers[0].1, "Basic dXNlcjpwYXNz");
    }

    #[test]
    fn test_api_key_custom_header() {
        let headers = auth_headers(&endpoint_with(
            AuthType::ApiKey,
            &[("api_key", "k-1"), ("header_name", "X-Shopify-Access-Token")],
        ))
        .unwrap();
        assert_eq!(
            headers,
            vec![("X-Shopify-Access-Token".to_string(), "k-1".to_string())]
        );
    }

    #[test]
    fn test_api_key_default_header() {
        let headers =
            auth_headers(&endpoint_with(AuthType::ApiKey, &[("api_key", "k-1")])).unwrap();
        assert_eq!(headers[0].0, "X-API-Key");
    }

    #[test]
    fn test_missing_token_is_error() {
        let result = auth_headers(&endpoint_with(AuthType::Bearer, &[]));
        assert!(matches!(result, Err(GraphQLError::InvalidRequest { .. })));
    }

    #[test]
    fn test_classify_status() {
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, String::new()),
            GraphQLError::Authentication { .. }
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, String::new()),
            GraphQLError::Server { status: 502, .. }
        ));
        assert!(matches!(
            classify_status(StatusCode::FORBIDDEN, String::new()),
            GraphQLError::Client { status: 403, .. }
        ));
    }

    #[test]
    fn test_transport_creation() {
        let endpoint = Endpoint::new("test", "https://example.com/graphql")
            .with_header("X-Trace", "on");
        let transport = HttpTransport::new(&endpoint).unwrap();
        assert_eq!(transport.url(), "https://example.com/graphql");
    }
}
