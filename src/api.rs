use crate::forms::{ConfigForm, FormError, SiteSettingsFieldset};
use crate::inject::render_page;
use crate::lifecycle;
use crate::routing::load_page_or_layout;
use crate::server::AppState;
use crate::settings::{CODE_FIELD, GLOBAL_SETTINGS_KEY, update_settings};
use crate::tracking::{PageRenderContext, TrackingCodeResolver};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::{Form, Json};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use tracing::{error, info, warn};

const CONFIGURE_PATH: &str = "/admin/module/googleanalytics/configure";

pub async fn serve_page(State(state): State<AppState>, uri: Uri, headers: HeaderMap) -> Response {
    let path = uri.path();
    let html = match load_page_or_layout(state.pages.as_ref(), path).await {
        Ok(html) => html,
        Err(err) => {
            error!(%path, ?err, "failed to load page");
            return (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response();
        }
    };
    let ctx = state.page_context(path, &headers).await;
    match state.settings.load().await {
        Ok(settings) => Html(render_page(html, &ctx, &settings)).into_response(),
        Err(err) => {
            warn!(%path, ?err, "settings unavailable; rendering without tracking");
            Html(html).into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TrackingQuery {
    pub site: Option<String>,
}

/// Tracking decision the requester would get on a page of `site`.
pub async fn get_tracking_decision(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<TrackingQuery>,
) -> Response {
    let ctx = PageRenderContext {
        current_site_slug: query.site,
        ..state.page_context("/", &headers).await
    };
    match state.settings.load().await {
        Ok(settings) => {
            let decision = TrackingCodeResolver::new(&settings, &settings).resolve(&ctx);
            Json(json!({
                "context": ctx,
                "result": decision,
            }))
            .into_response()
        }
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}

pub async fn get_config_form(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(resp) = state.require_session(&headers).await {
        return resp;
    }
    match state.settings.load().await {
        Ok(settings) => {
            Html(ConfigForm::render(&settings.global_record(), CONFIGURE_PATH, &[])).into_response()
        }
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}

pub async fn post_config_form(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(params): Form<HashMap<String, String>>,
) -> Response {
    let session = match state.require_session(&headers).await {
        Ok(session) => session,
        Err(resp) => return resp,
    };
    let record = match ConfigForm::handle(&params) {
        Ok(record) => record,
        Err(FormError::Invalid(messages)) => {
            let current = params
                .get(CODE_FIELD)
                .map(|code| {
                    let mut record = serde_json::Map::new();
                    record.insert(CODE_FIELD.to_string(), Value::String(code.clone()));
                    record
                })
                .unwrap_or_default();
            return (
                StatusCode::UNPROCESSABLE_ENTITY,
                Html(ConfigForm::render(&current, CONFIGURE_PATH, &messages)),
            )
                .into_response();
        }
    };
    let result = update_settings(state.settings.as_ref(), move |data| {
        data.set(GLOBAL_SETTINGS_KEY, Value::Object(record));
        Ok(())
    })
    .await;
    match result {
        Ok(_) => {
            info!(user = %session.user_id, "updated global tracking code");
            Redirect::to(CONFIGURE_PATH).into_response()
        }
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}

pub async fn get_site_settings(
    State(state): State<AppState>,
    Path(site_slug): Path<String>,
    headers: HeaderMap,
) -> Response {
    if let Err(resp) = state.require_session(&headers).await {
        return resp;
    }
    let settings = match state.settings.load().await {
        Ok(settings) => settings,
        Err(err) => return (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    };
    let Some(site) = settings.site_by_slug(&site_slug) else {
        return (StatusCode::NOT_FOUND, "unknown site").into_response();
    };
    let current = settings.site_tracking_code(site.id);
    let action = format!("/admin/site/s/{}/settings", site.slug);
    Html(SiteSettingsFieldset::render(site, &current, &action)).into_response()
}

pub async fn post_site_settings(
    State(state): State<AppState>,
    Path(site_slug): Path<String>,
    headers: HeaderMap,
    Form(params): Form<HashMap<String, String>>,
) -> Response {
    let session = match state.require_session(&headers).await {
        Ok(session) => session,
        Err(resp) => return resp,
    };
    let site = match state.settings.load().await {
        Ok(settings) => match settings.site_by_slug(&site_slug) {
            Some(site) => site.clone(),
            None => return (StatusCode::NOT_FOUND, "unknown site").into_response(),
        },
        Err(err) => return (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    };
    let code = SiteSettingsFieldset::filter(&params);
    let site_id = site.id;
    let result = update_settings(state.settings.as_ref(), move |data| {
        data.site_set(site_id, CODE_FIELD, Value::String(code))
    })
    .await;
    match result {
        Ok(_) => {
            info!(user = %session.user_id, site = %site.slug, "updated site tracking code");
            Redirect::to(&format!("/admin/site/s/{}/settings", site.slug)).into_response()
        }
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}

pub async fn post_install(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(resp) = state.require_session(&headers).await {
        return resp;
    }
    match lifecycle::install(state.settings.as_ref()).await {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}

pub async fn post_uninstall(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(resp) = state.require_session(&headers).await {
        return resp;
    }
    match lifecycle::uninstall(state.settings.as_ref()).await {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::routing::FsPageSource;
    use crate::server::router;
    use crate::session::{InMemorySessionManager, SessionManager};
    use crate::settings::{InMemorySettingsStore, SettingsData, SettingsStore, Site};
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, header};
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    struct Harness {
        state: AppState,
        sessions: Arc<InMemorySessionManager>,
        settings: Arc<InMemorySettingsStore>,
    }

    fn harness(global: &str, blog: Option<&str>) -> Harness {
        let mut data = SettingsData {
            sites: vec![Site {
                id: 1,
                slug: "blog".into(),
                title: "Blog".into(),
            }],
            ..Default::default()
        };
        data.set(GLOBAL_SETTINGS_KEY, json!({ CODE_FIELD: global }));
        if let Some(code) = blog {
            data.site_set(1, CODE_FIELD, json!(code)).unwrap();
        }
        let settings = Arc::new(InMemorySettingsStore::new(data));
        let sessions = Arc::new(InMemorySessionManager::new(Duration::ZERO));
        let config = AppConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            settings_path: PathBuf::from("unused.json"),
            page_root: PathBuf::from("/nonexistent-pages"),
            enable_cors: false,
            session_ttl: Duration::ZERO,
            sites: vec![],
            admins: vec![],
        };
        let state = AppState::new(
            config,
            settings.clone(),
            Arc::new(FsPageSource::new(PathBuf::from("/nonexistent-pages"))),
            sessions.clone(),
        );
        Harness {
            state,
            sessions,
            settings,
        }
    }

    async fn get(state: &AppState, uri: &str, cookie: Option<&str>) -> (StatusCode, String) {
        let mut req = Request::builder().uri(uri);
        if let Some(id) = cookie {
            req = req.header(header::COOKIE, format!("site_session_id={id}"));
        }
        let resp = router(state.clone())
            .oneshot(req.body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    async fn post_form(state: &AppState, uri: &str, cookie: Option<&str>, body: &str) -> StatusCode {
        let mut req = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
        if let Some(id) = cookie {
            req = req.header(header::COOKIE, format!("site_session_id={id}"));
        }
        router(state.clone())
            .oneshot(req.body(Body::from(body.to_string())).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn anonymous_page_without_site_match_uses_global_code() {
        let h = harness("G-AAA", None);
        let (status, body) = get(&h.state, "/s/unknown/page", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.matches("G-AAA").count(), 2);
    }

    #[tokio::test]
    async fn disabled_site_page_has_no_snippet() {
        let h = harness("G-AAA", Some("-"));
        let (status, body) = get(&h.state, "/s/blog", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(!body.contains("googletagmanager"));
    }

    #[tokio::test]
    async fn logged_in_visitor_has_no_snippet() {
        let h = harness("G-AAA", None);
        let session = h.sessions.issue("editor").await.unwrap();
        let (_, body) = get(&h.state, "/", Some(&session.session_id)).await;
        assert!(!body.contains("G-AAA"));
        let (_, anonymous) = get(&h.state, "/", None).await;
        assert!(anonymous.contains("G-AAA"));
    }

    #[tokio::test]
    async fn site_code_overrides_global_on_page() {
        let h = harness("UA-123", Some("G-XYZ"));
        let (_, body) = get(&h.state, "/s/blog/items", None).await;
        assert!(body.contains("gtag('config', 'G-XYZ');"));
        assert!(!body.contains("UA-123"));
    }

    #[tokio::test]
    async fn tracking_endpoint_reports_decision() {
        let h = harness("UA-123", None);
        let (status, body) = get(&h.state, "/api/tracking?site=blog", None).await;
        assert_eq!(status, StatusCode::OK);
        let json: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["result"], json!({"decision": "emit", "code": "UA-123"}));
    }

    #[tokio::test]
    async fn admin_routes_require_login() {
        let h = harness("", None);
        let (status, _) = get(&h.state, CONFIGURE_PATH, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let status = post_form(
            &h.state,
            CONFIGURE_PATH,
            None,
            "googleanalytics_code=G-EVIL",
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let stored = h.settings.load().await.unwrap();
        assert_eq!(stored.get(GLOBAL_SETTINGS_KEY), Some(&json!({ CODE_FIELD: "" })));
    }

    #[tokio::test]
    async fn config_form_updates_global_code() {
        let h = harness("", None);
        let session = h.sessions.issue("admin").await.unwrap();
        let status = post_form(
            &h.state,
            CONFIGURE_PATH,
            Some(&session.session_id),
            "googleanalytics_code=G-NEW",
        )
        .await;
        assert_eq!(status, StatusCode::SEE_OTHER);
        let (_, form) = get(&h.state, CONFIGURE_PATH, Some(&session.session_id)).await;
        assert!(form.contains("value=\"G-NEW\""));

        let status = post_form(&h.state, CONFIGURE_PATH, Some(&session.session_id), "").await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn site_settings_form_writes_site_code() {
        let h = harness("UA-123", None);
        let session = h.sessions.issue("admin").await.unwrap();
        let status = post_form(
            &h.state,
            "/admin/site/s/blog/settings",
            Some(&session.session_id),
            "libnamic_googleanalytics%5Bgoogleanalytics_code%5D=-",
        )
        .await;
        assert_eq!(status, StatusCode::SEE_OTHER);
        let (_, body) = get(&h.state, "/s/blog", None).await;
        assert!(!body.contains("UA-123"));

        let (status, _) = get(
            &h.state,
            "/admin/site/s/shop/settings",
            Some(&session.session_id),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn uninstall_then_install_resets_codes() {
        let h = harness("UA-123", Some("G-XYZ"));
        let session = h.sessions.issue("admin").await.unwrap();
        let uri = "/admin/module/googleanalytics/uninstall";
        assert_eq!(
            post_form(&h.state, uri, Some(&session.session_id), "").await,
            StatusCode::NO_CONTENT
        );
        let data = h.settings.load().await.unwrap();
        assert!(data.get(GLOBAL_SETTINGS_KEY).is_none());
        assert!(data.site_get(1, CODE_FIELD).is_none());

        let uri = "/admin/module/googleanalytics/install";
        assert_eq!(
            post_form(&h.state, uri, Some(&session.session_id), "").await,
            StatusCode::NO_CONTENT
        );
        let (_, body) = get(&h.state, "/", None).await;
        assert!(!body.contains("googletagmanager"));
    }
}
