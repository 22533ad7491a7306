mod api;
mod auth;
mod config;
mod forms;
mod inject;
mod lifecycle;
mod routing;
mod server;
mod session;
mod settings;
mod tracking;

use crate::config::AppConfig;
use crate::routing::FsPageSource;
use crate::server::AppState;
use crate::session::InMemorySessionManager;
use crate::settings::{FsSettingsStore, InMemorySettingsStore, SettingsStore, seed_sites};
use crate::tracking::{PageRenderContext, TrackingCodeResolver};
use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "site-gtag", version, about = "Serve pages with a Google Analytics snippet")]
struct Cli {
    /// TOML file overriding environment configuration.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Start from the settings file but never write it back.
    #[arg(long, global = true)]
    in_memory: bool,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the page server (default).
    Serve,
    /// Seed the module's default settings.
    Install,
    /// Remove the module's global and per-site settings.
    Uninstall,
    /// Print the snippet a visitor of `site` would receive.
    Resolve {
        #[arg(long)]
        site: Option<String>,
        #[arg(long)]
        authenticated: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref())?;
    let file_store = FsSettingsStore::new(config.settings_path.clone());
    let store: Arc<dyn SettingsStore> = if cli.in_memory {
        Arc::new(InMemorySettingsStore::new(file_store.load().await?))
    } else {
        Arc::new(file_store)
    };

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            seed_registry(store.as_ref(), &config).await?;
            serve(config, store).await
        }
        Command::Install => {
            seed_registry(store.as_ref(), &config).await?;
            lifecycle::install(store.as_ref()).await?;
            Ok(())
        }
        Command::Uninstall => {
            seed_registry(store.as_ref(), &config).await?;
            lifecycle::uninstall(store.as_ref()).await?;
            Ok(())
        }
        Command::Resolve {
            site,
            authenticated,
        } => {
            // Read-only: the configured registry is used without being stored.
            let mut settings = store.load().await?;
            if !config.sites.is_empty() {
                settings.sites = config.sites.clone();
            }
            let ctx = PageRenderContext {
                is_authenticated: authenticated,
                current_site_slug: site,
            };
            let decision = TrackingCodeResolver::new(&settings, &settings).resolve(&ctx);
            if let Some(snippet) = decision.snippet() {
                print!("{snippet}");
            }
            Ok(())
        }
    }
}

async fn seed_registry(store: &dyn SettingsStore, config: &AppConfig) -> anyhow::Result<()> {
    seed_sites(store, &config.sites)
        .await
        .context("seeding site registry")
}

async fn serve(config: AppConfig, store: Arc<dyn SettingsStore>) -> anyhow::Result<()> {
    let pages = Arc::new(FsPageSource::new(config.page_root.clone()));
    let session_manager = Arc::new(InMemorySessionManager::new(config.session_ttl));
    let addr = config.bind_addr;
    if config.admins.is_empty() {
        tracing::warn!("no admin users configured; admin routes are unreachable");
    }
    let state = AppState::new(config, store, pages, session_manager);
    tracing::info!(%addr, "starting site-gtag server");
    server::run(addr, state).await
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init();
}
