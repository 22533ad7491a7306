use async_trait::async_trait;
use axum::http::{HeaderMap, header};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};

pub const SESSION_COOKIE: &str = "site_session_id";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid user id")]
    InvalidUser,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub user_id: String,
    pub issued_at_ms: i64,
}

/// Authentication-state lookup for the render path and the admin surface.
#[async_trait]
pub trait SessionManager: Send + Sync {
    async fn validate(&self, token: Option<String>) -> Result<Option<SessionInfo>, SessionError>;
    async fn issue(&self, user_id: &str) -> Result<SessionInfo, SessionError>;
    async fn revoke(&self, token: &str);
}

pub struct InMemorySessionManager {
    ttl: Duration,
    sessions: RwLock<HashMap<String, SessionInfo>>,
}

impl InMemorySessionManager {
    /// A zero `ttl` keeps sessions until logout.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    fn expired(&self, session: &SessionInfo, now_ms: i64) -> bool {
        let ttl_ms = i64::try_from(self.ttl.as_millis()).unwrap_or(i64::MAX);
        !self.ttl.is_zero() && now_ms.saturating_sub(session.issued_at_ms) >= ttl_ms
    }
}

#[async_trait]
impl SessionManager for InMemorySessionManager {
    async fn validate(&self, token: Option<String>) -> Result<Option<SessionInfo>, SessionError> {
        let Some(token) = token else {
            return Ok(None);
        };
        let now_ms = chrono::Utc::now().timestamp_millis();
        let session = self.sessions.read().await.get(&token).cloned();
        match session {
            Some(session) if self.expired(&session, now_ms) => {
                debug!(session_id = %token, "session expired");
                self.sessions.write().await.remove(&token);
                Ok(None)
            }
            Some(session) => {
                debug!(session_id = %token, user = %session.user_id, "validated session");
                Ok(Some(session))
            }
            None => Ok(None),
        }
    }

    async fn issue(&self, user_id: &str) -> Result<SessionInfo, SessionError> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(SessionError::InvalidUser);
        }
        let session = SessionInfo {
            session_id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            issued_at_ms: chrono::Utc::now().timestamp_millis(),
        };
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, existing| !self.expired(existing, session.issued_at_ms));
        if sessions.len() < before {
            debug!(pruned = before - sessions.len(), "dropped expired sessions");
        }
        sessions.insert(session.session_id.clone(), session.clone());
        drop(sessions);
        info!(session_id = %session.session_id, user = %session.user_id, "issued session");
        Ok(session)
    }

    async fn revoke(&self, token: &str) {
        if self.sessions.write().await.remove(token).is_some() {
            info!(session_id = %token, "revoked session");
        }
    }
}

pub fn session_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|cookies| cookies.split(';'))
        .map(|c| c.trim())
        .find_map(|c| c.strip_prefix(&format!("{SESSION_COOKIE}=")).map(|s| s.to_string()))
        .filter(|s| !s.is_empty())
}

pub fn make_session_cookie(session_id: &str, ttl: Duration) -> String {
    let mut cookie = format!("{SESSION_COOKIE}={session_id}; Path=/; HttpOnly; SameSite=Lax");
    if !ttl.is_zero() {
        cookie.push_str(&format!("; Max-Age={}", ttl.as_secs()));
    }
    cookie
}

pub fn expired_session_cookie() -> String {
    format!(
        "{SESSION_COOKIE}=; Path=/; Expires=Thu, 01 Jan 1970 00:00:00 GMT; HttpOnly; SameSite=Lax"
    )
}
