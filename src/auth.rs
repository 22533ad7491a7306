use crate::server::AppState;
use crate::session::{expired_session_cookie, make_session_cookie, session_cookie};
use axum::Form;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Redirect, Response};
use serde::Deserialize;
use tracing::warn;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub user_id: String,
    #[serde(default)]
    pub token: String,
}

/// Opens an admin session for a configured admin presenting their token.
pub async fn login(State(state): State<AppState>, Form(body): Form<LoginRequest>) -> Response {
    if body.user_id.trim().is_empty() {
        return (StatusCode::BAD_REQUEST, "user id required").into_response();
    }
    if !state.config.admin_allowed(&body.user_id, &body.token) {
        warn!(user = %body.user_id.trim(), "rejected login");
        return (StatusCode::UNAUTHORIZED, "invalid credentials").into_response();
    }
    match state.session_manager.issue(&body.user_id).await {
        Ok(session) => {
            let cookie = make_session_cookie(&session.session_id, state.config.session_ttl);
            let mut response = Redirect::to("/").into_response();
            match HeaderValue::from_str(&cookie) {
                Ok(value) => {
                    response.headers_mut().insert(header::SET_COOKIE, value);
                    response
                }
                Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
            }
        }
        Err(err) => (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
    }
}

pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let mut response = Redirect::to("/").into_response();
    if let Some(session_id) = session_cookie(&headers) {
        state.session_manager.revoke(&session_id).await;
        if let Ok(value) = HeaderValue::from_str(&expired_session_cookie()) {
            response.headers_mut().insert(header::SET_COOKIE, value);
        }
    }
    response
}
