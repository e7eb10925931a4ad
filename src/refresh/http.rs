//! OAuth 2.0 `refresh_token` grant over HTTP.

use super::{RefreshTransport, RenewRequest, TransportError};
use crate::credentials::Credentials;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde::Deserialize;
use std::collections::HashMap;

/// Lifetime assumed when the server omits `expires_in`
const DEFAULT_EXPIRES_IN: i64 = 3600;

/// OAuth token response (standard OAuth 2.0 + OIDC `id_token`)
#[derive(Deserialize, Debug)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    id_token: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    scope: Option<String>,
}

/// OAuth error response body
#[derive(Deserialize, Debug)]
struct ErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Refresh transport posting `grant_type=refresh_token` to a token endpoint.
#[derive(Clone)]
pub struct HttpRefreshTransport {
    client: reqwest::Client,
    token_url: String,
    client_id: String,
}

impl HttpRefreshTransport {
    /// # Arguments
    /// * `token_url` - OAuth token endpoint URL
    /// * `client_id` - OAuth client ID
    pub fn new(token_url: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), token_url, client_id)
    }

    /// Uses a preconfigured client (timeouts, proxies, TLS roots).
    pub fn with_client(
        client: reqwest::Client,
        token_url: impl Into<String>,
        client_id: impl Into<String>,
    ) -> Self {
        Self {
            client,
            token_url: token_url.into(),
            client_id: client_id.into(),
        }
    }

    fn form_data(&self, request: &RenewRequest) -> HashMap<String, String> {
        // Caller parameters first so the grant fields cannot be overridden
        let mut form = request.parameters.clone();
        form.insert("grant_type".to_string(), "refresh_token".to_string());
        form.insert("client_id".to_string(), self.client_id.clone());
        form.insert("refresh_token".to_string(), request.refresh_token.clone());
        if let Some(scope) = &request.scope {
            form.insert("scope".to_string(), scope.clone());
        }
        form
    }
}

#[async_trait]
impl RefreshTransport for HttpRefreshTransport {
    async fn renew(&self, request: RenewRequest) -> Result<Credentials, TransportError> {
        tracing::debug!(
            token_url = %self.token_url,
            has_scope = request.scope.is_some(),
            extra_parameters = request.parameters.len(),
            "Refreshing credentials"
        );

        let mut builder = self
            .client
            .post(&self.token_url)
            .header("Accept", "application/json")
            .form(&self.form_data(&request));
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_else(|e| {
                tracing::debug!(status = status.as_u16(), error = %e, "Failed to read rejection body");
                String::new()
            });
            let (error, description) = match serde_json::from_str::<ErrorResponse>(&body) {
                Ok(parsed) => (parsed.error, parsed.error_description),
                Err(_) => ("server_error".to_string(), (!body.is_empty()).then_some(body)),
            };
            tracing::warn!(status = status.as_u16(), error = %error, "Refresh rejected");
            return Err(TransportError::Rejected {
                status: status.as_u16(),
                error,
                description,
            });
        }

        let body = response.text().await?;
        let token_response: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| TransportError::InvalidResponse(e.to_string()))?;

        tracing::debug!(
            has_refresh_token = token_response.refresh_token.is_some(),
            expires_in = ?token_response.expires_in,
            "Refresh successful"
        );

        let expires_in = token_response.expires_in.unwrap_or(DEFAULT_EXPIRES_IN);
        let expires_at = Duration::try_seconds(expires_in)
            .and_then(|d| Utc::now().checked_add_signed(d))
            .ok_or_else(|| {
                TransportError::InvalidResponse(format!("expires_in out of range: {}", expires_in))
            })?;

        Ok(Credentials {
            id_token: token_response.id_token.unwrap_or_default(),
            access_token: token_response.access_token,
            token_type: token_response.token_type.unwrap_or_else(|| "Bearer".to_string()),
            refresh_token: token_response.refresh_token,
            expires_at,
            scope: token_response.scope,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn renew_request() -> RenewRequest {
        RenewRequest {
            refresh_token: "rt-123".to_string(),
            scope: Some("openid offline_access".to_string()),
            parameters: HashMap::from([("audience".to_string(), "api".to_string())]),
            headers: HashMap::from([("X-Tenant".to_string(), "acme".to_string())]),
        }
    }

    #[test]
    fn test_token_response_minimal() {
        let json = r#"{ "access_token": "token_12345" }"#;

        let response: TokenResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.access_token, "token_12345");
        assert_eq!(response.refresh_token, None);
        assert_eq!(response.expires_in, None);
        assert_eq!(response.id_token, None);
    }

    #[test]
    fn test_grant_fields_win_over_parameters() {
        let transport = HttpRefreshTransport::new("http://localhost/token", "client-1");
        let mut request = renew_request();
        request
            .parameters
            .insert("grant_type".to_string(), "password".to_string());

        let form = transport.form_data(&request);
        assert_eq!(form["grant_type"], "refresh_token");
        assert_eq!(form["audience"], "api");
        assert_eq!(form["scope"], "openid offline_access");
    }

    #[tokio::test]
    async fn test_renew_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/oauth/token")
            .match_header("x-tenant", "acme")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()),
                Matcher::UrlEncoded("refresh_token".into(), "rt-123".into()),
                Matcher::UrlEncoded("client_id".into(), "client-1".into()),
                Matcher::UrlEncoded("audience".into(), "api".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{
                    "access_token": "new-at",
                    "id_token": "new-id",
                    "token_type": "Bearer",
                    "expires_in": 7200,
                    "scope": "openid offline_access"
                }"#,
            )
            .create_async()
            .await;

        let transport =
            HttpRefreshTransport::new(format!("{}/oauth/token", server.url()), "client-1");
        let before = Utc::now();
        let creds = transport.renew(renew_request()).await.unwrap();

        mock.assert_async().await;
        assert_eq!(creds.access_token, "new-at");
        assert_eq!(creds.id_token, "new-id");
        assert_eq!(creds.refresh_token, None);
        assert_eq!(creds.scope.as_deref(), Some("openid offline_access"));
        assert!(creds.expires_at >= before + Duration::seconds(7200));
    }

    #[tokio::test]
    async fn test_renew_rejected() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/oauth/token")
            .with_status(400)
            .with_body(r#"{"error":"invalid_grant","error_description":"Unknown or invalid refresh token."}"#)
            .create_async()
            .await;

        let transport =
            HttpRefreshTransport::new(format!("{}/oauth/token", server.url()), "client-1");
        let err = transport.renew(renew_request()).await.unwrap_err();

        assert!(err.is_invalid_grant());
        match err {
            TransportError::Rejected {
                status,
                description,
                ..
            } => {
                assert_eq!(status, 400);
                assert_eq!(
                    description.as_deref(),
                    Some("Unknown or invalid refresh token.")
                );
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_renew_rejected_without_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/oauth/token")
            .with_status(503)
            .create_async()
            .await;

        let transport =
            HttpRefreshTransport::new(format!("{}/oauth/token", server.url()), "client-1");
        let err = transport.renew(renew_request()).await.unwrap_err();

        match err {
            TransportError::Rejected {
                status,
                error,
                description,
            } => {
                assert_eq!(status, 503);
                assert_eq!(error, "server_error");
                assert_eq!(description, None);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_renew_unparseable_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/oauth/token")
            .with_status(200)
            .with_body("<html>not json</html>")
            .create_async()
            .await;

        let transport =
            HttpRefreshTransport::new(format!("{}/oauth/token", server.url()), "client-1");
        let err = transport.renew(renew_request()).await.unwrap_err();

        assert!(matches!(err, TransportError::InvalidResponse(_)));
    }
}
