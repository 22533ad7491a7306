use crate::config::AppConfig;
use crate::routing::{PageSource, site_slug_from_path};
use crate::session::{SessionInfo, SessionManager, session_cookie};
use crate::settings::SettingsStore;
use crate::tracking::PageRenderContext;
use crate::{api, auth};
use axum::Router;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub settings: Arc<dyn SettingsStore>,
    pub pages: Arc<dyn PageSource>,
    pub session_manager: Arc<dyn SessionManager>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        settings: Arc<dyn SettingsStore>,
        pages: Arc<dyn PageSource>,
        session_manager: Arc<dyn SessionManager>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            settings,
            pages,
            session_manager,
        }
    }

    pub async fn session(&self, headers: &HeaderMap) -> anyhow::Result<Option<SessionInfo>> {
        Ok(self
            .session_manager
            .validate(session_cookie(headers))
            .await?)
    }

    /// Render context for a page request. A failed session lookup counts as
    /// authenticated so that no snippet is emitted.
    pub async fn page_context(&self, path: &str, headers: &HeaderMap) -> PageRenderContext {
        let is_authenticated = match self.session(headers).await {
            Ok(session) => session.is_some(),
            Err(err) => {
                warn!(?err, "session lookup failed; suppressing tracking");
                true
            }
        };
        PageRenderContext {
            is_authenticated,
            current_site_slug: site_slug_from_path(path),
        }
    }

    /// Admin routes require a live session.
    pub async fn require_session(&self, headers: &HeaderMap) -> Result<SessionInfo, Response> {
        match self.session(headers).await {
            Ok(Some(session)) => Ok(session),
            Ok(None) => Err((StatusCode::UNAUTHORIZED, "login required").into_response()),
            Err(err) => Err((StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()),
        }
    }
}

pub fn router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/", get(api::serve_page))
        .route("/s/{site_slug}", get(api::serve_page))
        .route("/s/{site_slug}/{*rest}", get(api::serve_page))
        .route("/api/tracking", get(api::get_tracking_decision))
        .route(
            "/admin/module/googleanalytics/configure",
            get(api::get_config_form).post(api::post_config_form),
        )
        .route(
            "/admin/module/googleanalytics/install",
            post(api::post_install),
        )
        .route(
            "/admin/module/googleanalytics/uninstall",
            post(api::post_uninstall),
        )
        .route(
            "/admin/site/s/{site_slug}/settings",
            get(api::get_site_settings).post(api::post_site_settings),
        )
        .route("/login", post(auth::login))
        .route("/logout", get(auth::logout));

    if state.config.enable_cors {
        router = router.layer(CorsLayer::permissive());
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}

pub async fn run(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(?err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
