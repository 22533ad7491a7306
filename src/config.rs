use crate::settings::Site;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Account allowed to open an admin session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminUser {
    pub user_id: String,
    pub token: String,
}

/// Runtime configuration for the page host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub settings_path: PathBuf,
    pub page_root: PathBuf,
    pub enable_cors: bool,
    pub session_ttl: Duration,
    #[serde(default)]
    pub sites: Vec<Site>,
    #[serde(default)]
    pub admins: Vec<AdminUser>,
}

/// Optional TOML overrides; every field left out keeps the env value.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub bind_addr: Option<SocketAddr>,
    pub settings_path: Option<PathBuf>,
    pub page_root: Option<PathBuf>,
    pub enable_cors: Option<bool>,
    pub session_ttl_secs: Option<u64>,
    pub sites: Option<Vec<Site>>,
    pub admins: Option<Vec<AdminUser>>,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let bind_addr: SocketAddr = std::env::var("BIND_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
            .parse()
            .context("failed to parse BIND_ADDR")?;

        let settings_path = PathBuf::from(
            std::env::var("SETTINGS_PATH").unwrap_or_else(|_| "settings.json".to_string()),
        );
        let page_root =
            PathBuf::from(std::env::var("PAGE_ROOT").unwrap_or_else(|_| "pages".to_string()));

        let enable_cors = std::env::var("ENABLE_CORS")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let session_ttl = std::env::var("SESSION_TTL_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(0));

        let sites = match std::env::var("SITES_JSON") {
            Ok(raw) => serde_json::from_str::<Vec<Site>>(&raw).context("failed to parse SITES_JSON")?,
            Err(_) => Vec::new(),
        };

        let admins = match std::env::var("ADMIN_USERS_JSON") {
            Ok(raw) => serde_json::from_str::<Vec<AdminUser>>(&raw)
                .context("failed to parse ADMIN_USERS_JSON")?,
            Err(_) => Vec::new(),
        };

        Ok(Self {
            bind_addr,
            settings_path,
            page_root,
            enable_cors,
            session_ttl,
            sites,
            admins,
        })
    }

    /// Env configuration, overridden by the TOML file at `path` when given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = Self::from_env()?;
        if let Some(path) = path {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading config file {}", path.display()))?;
            let file: FileConfig = toml::from_str(&raw)
                .with_context(|| format!("parsing config file {}", path.display()))?;
            config.apply(file);
        }
        Ok(config)
    }

    pub fn apply(&mut self, file: FileConfig) {
        if let Some(addr) = file.bind_addr {
            self.bind_addr = addr;
        }
        if let Some(path) = file.settings_path {
            self.settings_path = path;
        }
        if let Some(root) = file.page_root {
            self.page_root = root;
        }
        if let Some(cors) = file.enable_cors {
            self.enable_cors = cors;
        }
        if let Some(secs) = file.session_ttl_secs {
            self.session_ttl = Duration::from_secs(secs);
        }
        if let Some(sites) = file.sites {
            self.sites = sites;
        }
        if let Some(admins) = file.admins {
            self.admins = admins;
        }
    }

    /// True when `user_id` is a configured admin and `token` is theirs.
    /// No admins configured means nobody can log in.
    pub fn admin_allowed(&self, user_id: &str, token: &str) -> bool {
        let user_id = user_id.trim();
        !token.is_empty()
            && self
                .admins
                .iter()
                .any(|admin| admin.user_id == user_id && admin.token == token)
    }
}
