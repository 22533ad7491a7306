use crate::settings::{
    CODE_FIELD, GLOBAL_SETTINGS_KEY, SettingsData, SettingsError, SettingsStore, update_settings,
};
use serde_json::{Map, Value, json};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsProcess {
    Install,
    Uninstall,
}

/// Global settings the module owns, with their install-time values.
pub fn default_settings() -> Map<String, Value> {
    let mut defaults = Map::new();
    defaults.insert(GLOBAL_SETTINGS_KEY.to_string(), json!({ CODE_FIELD: "" }));
    defaults
}

pub fn manage_settings(data: &mut SettingsData, process: SettingsProcess) {
    for (name, value) in default_settings() {
        match process {
            SettingsProcess::Install => data.set(&name, value),
            SettingsProcess::Uninstall => {
                data.delete(&name);
            }
        }
    }
}

pub async fn install(store: &dyn SettingsStore) -> Result<SettingsData, SettingsError> {
    let data = update_settings(store, |data| {
        manage_settings(data, SettingsProcess::Install);
        Ok(())
    })
    .await?;
    info!("installed analytics module settings");
    Ok(data)
}

/// Removes the global defaults and the tracking code of every known site.
pub async fn uninstall(store: &dyn SettingsStore) -> Result<SettingsData, SettingsError> {
    let data = update_settings(store, |data| {
        manage_settings(data, SettingsProcess::Uninstall);
        let ids: Vec<u64> = data.sites.iter().map(|site| site.id).collect();
        for id in ids {
            data.site_delete(id, CODE_FIELD);
        }
        Ok(())
    })
    .await?;
    info!(sites = data.sites.len(), "uninstalled analytics module settings");
    Ok(data)
}
