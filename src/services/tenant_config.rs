use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::db::queries;
use crate::errors::BookingError;
use crate::models::TenantConfig;
use crate::services::backend::SqliteBackend;

/// Where per-organization configuration lives. `Ok(None)` means the
/// organization has not configured anything.
#[async_trait]
pub trait TenantConfigSource: Send + Sync {
    async fn load(&self, organization_id: &str) -> anyhow::Result<Option<TenantConfig>>;
}

#[async_trait]
impl TenantConfigSource for SqliteBackend {
    async fn load(&self, organization_id: &str) -> anyhow::Result<Option<TenantConfig>> {
        let conn = self.connection();
        let settings = {
            let db = conn.lock().unwrap();
            queries::get_organization_settings(&db, organization_id)?
        };
        match settings {
            Some(json) if !json.trim().is_empty() => Ok(Some(TenantConfig::from_json(&json)?)),
            _ => Ok(None),
        }
    }
}

impl SqliteBackend {
    /// Returns false when the organization does not exist.
    pub fn save_tenant_config(&self, organization_id: &str, config: &TenantConfig) -> Result<bool, BookingError> {
        let json = serde_json::to_string(config)
            .map_err(|e| BookingError::ValidationFailed(e.to_string()))?;
        let conn = self.connection();
        let db = conn.lock().unwrap();
        Ok(queries::save_organization_settings(&db, organization_id, &json)?)
    }
}

/// Process-wide configuration cache keyed by organization. Entries live
/// until `invalidate` is called for their organization.
pub struct TenantConfigCache {
    source: Arc<dyn TenantConfigSource>,
    entries: RwLock<HashMap<String, Arc<TenantConfig>>>,
}

impl TenantConfigCache {
    pub fn new(source: Arc<dyn TenantConfigSource>) -> Self {
        Self {
            source,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, organization_id: &str) -> Arc<TenantConfig> {
        let cached = self.entries.read().unwrap().get(organization_id).cloned();
        if let Some(config) = cached {
            return config;
        }

        let config = match self.source.load(organization_id).await {
            Ok(Some(config)) => Arc::new(config),
            Ok(None) => {
                tracing::debug!(organization_id, "no tenant config stored, using defaults");
                Arc::new(TenantConfig::default())
            }
            Err(e) => {
                // Not cached, so the next turn tries the source again.
                tracing::warn!(organization_id, error = %e, "failed to load tenant config, using defaults");
                return Arc::new(TenantConfig::default());
            }
        };

        self.entries
            .write()
            .unwrap()
            .insert(organization_id.to_string(), Arc::clone(&config));
        config
    }

    pub fn invalidate(&self, organization_id: &str) {
        if self.entries.write().unwrap().remove(organization_id).is_some() {
            tracing::info!(organization_id, "tenant config invalidated");
        }
    }
}
