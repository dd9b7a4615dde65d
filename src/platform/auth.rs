use async_trait::async_trait;
use serde::Deserialize;
use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::error::{ReconcileError, Result};

/// Source of the platform token. The engine only reads it; refreshing is the
/// caller's business.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn current_token(&self) -> Result<String>;
}

/// A fixed token, e.g. from configuration or tests.
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl AuthProvider for StaticToken {
    async fn current_token(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

/// A token shared by every in-flight request, replaceable at run time.
///
/// Refreshes are single-flight: callers pass the generation they observed
/// when their request was rejected, and only the first caller for a given
/// generation runs the refresh. Everyone else waits on the lock and then
/// reuses the fresh token.
pub struct TokenCell {
    token: RwLock<String>,
    generation: AtomicU64,
    refresh_lock: Mutex<()>,
}

impl TokenCell {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: RwLock::new(token.into()),
            generation: AtomicU64::new(0),
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Replace the token via `reload` unless another caller already did so
    /// since `observed_generation`. Returns the generation now in effect.
    pub async fn refresh_with<F, Fut>(&self, observed_generation: u64, reload: F) -> Result<u64>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String>>,
    {
        let _guard = self.refresh_lock.lock().await;

        let current = self.generation();
        if current != observed_generation {
            debug!(
                "Token already refreshed (generation {} -> {}), reusing it",
                observed_generation, current
            );
            return Ok(current);
        }

        let fresh = reload().await?;
        if fresh.trim().is_empty() {
            return Err(ReconcileError::Auth("token source returned an empty token".to_string()));
        }

        *self.token.write().await = fresh;
        let next = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        info!("Token reloaded (generation {})", next);
        Ok(next)
    }
}

#[async_trait]
impl AuthProvider for TokenCell {
    async fn current_token(&self) -> Result<String> {
        Ok(self.token.read().await.clone())
    }
}

#[derive(Debug, Deserialize)]
struct TokenFile {
    token: String,
    #[serde(rename = "lastUpdate", default)]
    last_update: Option<String>,
    #[serde(rename = "expiresAt", default)]
    expires_at: Option<String>,
}

/// Read the token file maintained by the external refresher.
pub async fn load_token_file(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref();
    let raw = tokio::fs::read_to_string(path).await?;
    let file: TokenFile = serde_json::from_str(&raw)?;
    debug!(
        "Loaded token from {} (last update: {}, expires: {})",
        path.display(),
        file.last_update.as_deref().unwrap_or("unknown"),
        file.expires_at.as_deref().unwrap_or("unknown")
    );
    Ok(file.token)
}
