//! `reqwest`-backed transport.

use async_trait::async_trait;
use reqwest::Client;
use tessera_core::{
    AccessResult, ConfigError, ConnectionKey, Credentials, HttpRequest, HttpResponse, Method,
    Transport, TransportError,
};

/// HTTP(S) transport with a connection pool sized to the concurrency level.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
    base_url: String,
}

impl ReqwestTransport {
    pub fn new(key: &ConnectionKey) -> AccessResult<Self> {
        let mut builder = Client::builder()
            .timeout(key.request_timeout)
            .danger_accept_invalid_certs(key.insecure_skip_verify);
        if key.concurrency > 0 {
            builder = builder.pool_max_idle_per_host(key.concurrency);
        }
        let client = builder.build().map_err(|e| ConfigError::InvalidValue {
            field: "transport".to_string(),
            value: key.base_url.clone(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            client,
            base_url: key.base_url.clone(),
        })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
            Method::Put => self.client.put(&request.url),
            Method::Delete => self.client.delete(&request.url),
        };
        builder = match &request.credentials {
            Credentials::None => builder,
            Credentials::Basic { username, .. } => {
                builder.basic_auth(username, request.credentials.secret())
            }
            Credentials::Bearer(_) => {
                builder.bearer_auth(request.credentials.secret().unwrap_or_default())
            }
        };
        if let Some(body) = request.body {
            builder = builder
                .header("Content-Type", "application/json")
                .body(body);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::timeout(format!("HTTP request timed out: {}", e))
            } else {
                TransportError::new(format!("HTTP request failed: {}", e))
            }
        })?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::new(format!("Failed to read response body: {}", e)))?;
        Ok(HttpResponse::new(status, body.to_vec()))
    }
}

impl std::fmt::Debug for ReqwestTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReqwestTransport")
            .field("base_url", &self.base_url)
            .finish()
    }
}
