use crate::tracking::{GlobalCodeProvider, SiteCodeLookup};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Global key holding the module config record.
pub const GLOBAL_SETTINGS_KEY: &str = "googleanalytics";
/// Field of the global record, and the site-scoped key, holding a tracking code.
pub const CODE_FIELD: &str = "googleanalytics_code";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("settings io failed for {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("settings json invalid: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown site id {0}")]
    UnknownSite(u64),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Site {
    pub id: u64,
    pub slug: String,
    #[serde(default)]
    pub title: String,
}

/// Two-tier key-value settings plus the site registry they are scoped by.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SettingsData {
    #[serde(default)]
    pub sites: Vec<Site>,
    #[serde(default)]
    pub global: Map<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub site: BTreeMap<u64, Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at_ms: Option<i64>,
}

impl SettingsData {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.global.get(name)
    }

    pub fn set(&mut self, name: &str, value: Value) {
        self.global.insert(name.to_string(), value);
    }

    pub fn delete(&mut self, name: &str) -> Option<Value> {
        self.global.remove(name)
    }

    pub fn site_get(&self, site_id: u64, name: &str) -> Option<&Value> {
        self.site.get(&site_id).and_then(|scoped| scoped.get(name))
    }

    pub fn site_set(&mut self, site_id: u64, name: &str, value: Value) -> Result<(), SettingsError> {
        if self.site_by_id(site_id).is_none() {
            return Err(SettingsError::UnknownSite(site_id));
        }
        self.site
            .entry(site_id)
            .or_default()
            .insert(name.to_string(), value);
        Ok(())
    }

    pub fn site_delete(&mut self, site_id: u64, name: &str) -> Option<Value> {
        let scoped = self.site.get_mut(&site_id)?;
        let removed = scoped.remove(name);
        if scoped.is_empty() {
            self.site.remove(&site_id);
        }
        removed
    }

    pub fn site_by_slug(&self, slug: &str) -> Option<&Site> {
        self.sites.iter().find(|site| site.slug == slug)
    }

    pub fn site_by_id(&self, id: u64) -> Option<&Site> {
        self.sites.iter().find(|site| site.id == id)
    }

    /// Site-scoped tracking code as stored, empty when unset.
    pub fn site_tracking_code(&self, site_id: u64) -> String {
        self.site_get(site_id, CODE_FIELD)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    }

    /// Global config record, or an empty record when missing or malformed.
    pub fn global_record(&self) -> Map<String, Value> {
        match self.get(GLOBAL_SETTINGS_KEY) {
            Some(Value::Object(record)) => record.clone(),
            Some(other) => {
                warn!(key = GLOBAL_SETTINGS_KEY, value = %other, "global settings record is not an object");
                Map::new()
            }
            None => Map::new(),
        }
    }
}

impl SiteCodeLookup for SettingsData {
    fn site_code(&self, slug: &str) -> Option<String> {
        let site = self.site_by_slug(slug)?;
        self.site_get(site.id, CODE_FIELD)
            .and_then(Value::as_str)
            .map(|s| s.to_string())
    }
}

impl GlobalCodeProvider for SettingsData {
    fn global_code(&self) -> Option<String> {
        self.global_record()
            .get(CODE_FIELD)
            .and_then(Value::as_str)
            .map(|s| s.to_string())
    }
}

/// A settings change applied under the store's write lock.
pub type SettingsMutation =
    Box<dyn FnOnce(&mut SettingsData) -> Result<(), SettingsError> + Send>;

#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn load(&self) -> Result<SettingsData, SettingsError>;
    /// Load, mutate and persist as one step; concurrent updates serialize.
    async fn update(&self, mutate: SettingsMutation) -> Result<SettingsData, SettingsError>;
}

/// Apply `mutate` to the stored settings, stamping the write time.
pub async fn update_settings<F>(
    store: &dyn SettingsStore,
    mutate: F,
) -> Result<SettingsData, SettingsError>
where
    F: FnOnce(&mut SettingsData) -> Result<(), SettingsError> + Send + 'static,
{
    store
        .update(Box::new(move |data: &mut SettingsData| {
            mutate(data)?;
            data.updated_at_ms = Some(chrono::Utc::now().timestamp_millis());
            Ok(())
        }))
        .await
}

/// Replace the site registry with the configured sites, if any were configured
/// and they differ from the stored registry.
pub async fn seed_sites(store: &dyn SettingsStore, sites: &[Site]) -> Result<(), SettingsError> {
    if sites.is_empty() || store.load().await?.sites == sites {
        return Ok(());
    }
    let sites = sites.to_vec();
    let data = update_settings(store, move |data| {
        data.sites = sites;
        let known: Vec<u64> = data.sites.iter().map(|s| s.id).collect();
        // Settings of sites that left the registry are dropped.
        data.site.retain(|id, _| known.contains(id));
        Ok(())
    })
    .await?;
    info!(count = data.sites.len(), "seeded site registry");
    Ok(())
}

#[derive(Default)]
pub struct InMemorySettingsStore {
    data: RwLock<SettingsData>,
}

impl InMemorySettingsStore {
    pub fn new(data: SettingsData) -> Self {
        Self {
            data: RwLock::new(data),
        }
    }
}

#[async_trait]
impl SettingsStore for InMemorySettingsStore {
    async fn load(&self) -> Result<SettingsData, SettingsError> {
        Ok(self.data.read().await.clone())
    }

    async fn update(&self, mutate: SettingsMutation) -> Result<SettingsData, SettingsError> {
        let mut guard = self.data.write().await;
        let mut next = guard.clone();
        mutate(&mut next)?;
        *guard = next.clone();
        Ok(next)
    }
}

/// JSON-file backed settings. A missing file reads as empty settings.
pub struct FsSettingsStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FsSettingsStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    fn io_err(&self, source: std::io::Error) -> SettingsError {
        SettingsError::Io {
            path: self.path.clone(),
            source,
        }
    }

    async fn read(&self) -> Result<SettingsData, SettingsError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "settings file missing; using empty settings");
                Ok(SettingsData::default())
            }
            Err(err) => Err(self.io_err(err)),
        }
    }

    /// Callers hold `write_lock`.
    async fn write(&self, data: &SettingsData) -> Result<(), SettingsError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.io_err(e))?;
        }
        let body = serde_json::to_vec_pretty(data)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body)
            .await
            .map_err(|e| self.io_err(e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| self.io_err(e))?;
        Ok(())
    }
}

#[async_trait]
impl SettingsStore for FsSettingsStore {
    async fn load(&self) -> Result<SettingsData, SettingsError> {
        self.read().await
    }

    async fn update(&self, mutate: SettingsMutation) -> Result<SettingsData, SettingsError> {
        let _guard = self.write_lock.lock().await;
        let mut data = self.read().await?;
        mutate(&mut data)?;
        self.write(&data).await?;
        Ok(data)
    }
}
