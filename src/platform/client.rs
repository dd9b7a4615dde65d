use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::{
    error::{ReconcileError, Result},
    platform::auth::AuthProvider,
};

/// The one network seam the engine depends on: POST a JSON body to a
/// listing path and get the decoded JSON response back.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ListingApi: Send + Sync {
    async fn post(&self, path: &str, body: Map<String, Value>) -> Result<Value>;
}

/// HTTP client for the booking platform's `WebApi` listing endpoints.
#[derive(Clone)]
pub struct PlatformClient {
    http: reqwest::Client,
    base_url: String,
    auth: Arc<dyn AuthProvider>,
}

impl PlatformClient {
    pub fn new(base_url: &str, auth: Arc<dyn AuthProvider>, connect_timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

#[async_trait]
impl ListingApi for PlatformClient {
    async fn post(&self, path: &str, mut body: Map<String, Value>) -> Result<Value> {
        let token = self.auth.current_token().await?;
        body.insert("token".to_string(), Value::String(token));

        let url = self.url(path);
        debug!("POST {}", url);

        let response = self.http.post(&url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ReconcileError::Status(status.as_u16()));
        }

        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| {
            ReconcileError::MalformedBody(format!("{} returned invalid JSON: {}", path, e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::auth::StaticToken;

    #[test]
    fn test_url_joining() {
        let client = PlatformClient::new(
            "https://platform.example/",
            Arc::new(StaticToken::new("t")),
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(
            client.url("/WebApi/getListAdminHype.aspx"),
            "https://platform.example/WebApi/getListAdminHype.aspx"
        );
    }
}
