//! Admin authentication: password sign-in, cookie sessions, and the gate in
//! front of the admin console.
//!
//! Sign-in and sign-out are announced on a broadcast channel so long-lived
//! admin streams can close as soon as their session ends.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db;
use crate::errors::{AppError, Result};

pub const SESSION_COOKIE: &str = "admin_session";
pub const LOGIN_PATH: &str = "/admin/login";

const EVENTS_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub token: String,
    pub email: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    SignedIn { email: String },
    SignedOut { token: String },
}

pub fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

/// Shared-secret check that takes the same time wherever the first mismatch is.
pub fn token_matches(presented: Option<&str>, expected: &str) -> bool {
    presented.is_some_and(|token| constant_time_eq::constant_time_eq(token.as_bytes(), expected.as_bytes()))
}

#[derive(Debug, Clone)]
pub struct Auth {
    pool: SqlitePool,
    events: broadcast::Sender<AuthEvent>,
    ttl: Duration,
}

impl Auth {
    pub fn new(pool: SqlitePool, ttl_secs: i64) -> Self {
        let (events, _) = broadcast::channel(EVENTS_CAPACITY);
        Self {
            pool,
            events,
            ttl: Duration::seconds(ttl_secs),
        }
    }

    /// Create or reset the admin account with the given password.
    pub async fn ensure_admin(&self, email: &str, password: &str) -> Result<()> {
        let salt = Uuid::new_v4().simple().to_string();
        db::upsert_admin(&self.pool, email, &salt, &hash_password(&salt, password)).await?;
        info!("Admin account {email} is ready");
        Ok(())
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session> {
        let email = email.trim();
        let Some((salt, hash)) = db::get_admin_credentials(&self.pool, email).await? else {
            warn!("Sign-in attempt for unknown account {email}");
            return Err(AppError::Unauthorized("Invalid login credentials".to_string()));
        };
        if !constant_time_eq::constant_time_eq(hash_password(&salt, password).as_bytes(), hash.as_bytes()) {
            warn!("Wrong password for {email}");
            return Err(AppError::Unauthorized("Invalid login credentials".to_string()));
        }

        let session = Session {
            token: Uuid::new_v4().to_string(),
            email: email.to_string(),
            expires_at: Utc::now() + self.ttl,
        };
        db::insert_session(&self.pool, &session.token, &session.email, session.expires_at).await?;

        info!("Admin {email} signed in");
        let _ = self.events.send(AuthEvent::SignedIn {
            email: session.email.clone(),
        });
        Ok(session)
    }

    /// The live session for `token`; expired sessions are removed.
    pub async fn session(&self, token: &str) -> Result<Option<Session>> {
        let Some((email, expires_at)) = db::get_session(&self.pool, token).await? else {
            return Ok(None);
        };
        if expires_at <= Utc::now() {
            db::delete_session(&self.pool, token).await?;
            debug!("Session for {email} expired");
            return Ok(None);
        }
        Ok(Some(Session {
            token: token.to_string(),
            email,
            expires_at,
        }))
    }

    pub async fn sign_out(&self, token: &str) -> Result<()> {
        if db::delete_session(&self.pool, token).await? {
            info!("Admin session signed out");
            let _ = self.events.send(AuthEvent::SignedOut {
                token: token.to_string(),
            });
        }
        Ok(())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    /// Resolves once `session` is signed out or expires.
    pub async fn session_ended(&self, session: &Session) {
        let mut rx = self.subscribe();
        let until_expiry = (session.expires_at - Utc::now())
            .to_std()
            .unwrap_or_default();
        let expiry = tokio::time::sleep(until_expiry);
        tokio::pin!(expiry);

        loop {
            tokio::select! {
                _ = &mut expiry => return,
                event = rx.recv() => match event {
                    Ok(AuthEvent::SignedOut { token }) if token == session.token => return,
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        // A sign-out may have been skipped; ask the store.
                        if !matches!(self.session(&session.token).await, Ok(Some(_))) {
                            return;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                },
            }
        }
    }

    pub async fn purge_expired(&self) -> Result<u64> {
        db::delete_expired_sessions(&self.pool, Utc::now()).await
    }
}

// ─────────────────────────────────────────────────────────
// Cookies and the gate
// ─────────────────────────────────────────────────────────

pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
}

pub fn session_cookie(session: &Session) -> String {
    let max_age = (session.expires_at - Utc::now()).num_seconds().max(0);
    format!("{SESSION_COOKIE}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age}", session.token)
}

pub fn cleared_session_cookie() -> String {
    format!("{SESSION_COOKIE}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0")
}

/// Lets the request through only with a live admin session, which is then
/// available to handlers as an `Extension<Session>`. Everyone else is sent to
/// the login page.
pub async fn require_admin(State(auth): State<Auth>, mut request: Request, next: Next) -> Response {
    let Some(token) = cookie_value(request.headers(), SESSION_COOKIE) else {
        return Redirect::to(LOGIN_PATH).into_response();
    };
    match auth.session(&token).await {
        Ok(Some(session)) => {
            request.extensions_mut().insert(session);
            next.run(request).await
        }
        Ok(None) => Redirect::to(LOGIN_PATH).into_response(),
        Err(e) => e.into_response(),
    }
}
