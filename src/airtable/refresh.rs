//! Per-tenant single-flight token refresh.
//!
//! Callers that find an expired token queue on the tenant's lock. The first one
//! through refreshes and persists; the rest re-read the store and adopt the token it
//! wrote instead of spending the refresh token a second time.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::{AirtableError, AirtableOAuth};
use crate::models::ThirdPartyConnection;
use crate::repositories::CredentialStore;

pub struct TokenRefresher {
    oauth: Arc<AirtableOAuth>,
    store: Arc<dyn CredentialStore>,
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl TokenRefresher {
    pub fn new(oauth: Arc<AirtableOAuth>, store: Arc<dyn CredentialStore>) -> Self {
        Self {
            oauth,
            store,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Returns a connection whose token is usable now, refreshing at most once per
    /// tenant across concurrent callers.
    #[instrument(skip_all, fields(tenant_id = %connection.tenant_id))]
    pub async fn ensure_fresh(
        &self,
        connection: &ThirdPartyConnection,
    ) -> Result<ThirdPartyConnection, AirtableError> {
        let tenant_id = connection.tenant_id;
        let lock = self.lock_for(tenant_id).await;
        let outcome = {
            let _guard = lock.lock().await;
            self.refresh_locked(tenant_id).await
        };
        self.release(tenant_id, lock).await;
        outcome
    }

    async fn refresh_locked(&self, tenant_id: Uuid) -> Result<ThirdPartyConnection, AirtableError> {
        let current = self
            .store
            .get(tenant_id)
            .await?
            .ok_or(AirtableError::NotFound)?;

        if !current.needs_refresh_at(Utc::now()) {
            debug!("Adopting token refreshed by a concurrent caller");
            return Ok(current);
        }

        self.oauth.refresh(&current).await
    }

    async fn lock_for(&self, tenant_id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(locks.entry(tenant_id).or_default())
    }

    /// Drops the tenant's entry once no other caller holds or waits on it.
    async fn release(&self, tenant_id: Uuid, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().await;
        // One reference in the map, one here
        if Arc::strong_count(&lock) == 2 {
            locks.remove(&tenant_id);
        }
    }

    #[cfg(test)]
    async fn tracked_tenants(&self) -> usize {
        self.locks.lock().await.len()
    }
}
