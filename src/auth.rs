//! Admin session gate.
//!
//! Credentials are compared in plaintext against the `adminUsers` store; the
//! session is three local-storage keys checked against a fixed 24h TTL on
//! every read. Failed logins are rate-limited per storage (one "browser"),
//! not per account.

use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::Serialize;
use std::sync::Mutex;
use thiserror::Error;
use tracing::{info, warn};

use crate::models::{AdminUser, AuthPayload, CurrentUser};
use crate::storage::{Storage, StorageError};
use crate::store::{RecordStore, StoreError};
use crate::validation::sanitize;

pub const AUTH_TOKEN_KEY: &str = "authToken";
pub const CURRENT_USER_KEY: &str = "currentUser";
pub const LOGIN_TIME_KEY: &str = "loginTime";
pub const LOGIN_ATTEMPTS_KEY: &str = "loginAttempts";

pub const SESSION_TTL_MS: i64 = 24 * 60 * 60 * 1000;
pub const ATTEMPT_WINDOW_MS: i64 = 15 * 60 * 1000;
pub const MAX_FAILED_ATTEMPTS: usize = 5;
const SECURITY_LOG_CAP: usize = 200;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Too many failed login attempts, try again in {retry_after_secs} seconds")]
    RateLimited { retry_after_secs: i64 },

    #[error("invalid or expired token")]
    Token(#[from] jsonwebtoken::errors::Error),

    #[error("no active admin session for this token")]
    SessionEnded,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventKind {
    LoginSuccess,
    LoginFailed,
    RateLimited,
    SessionExpired,
    Logout,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SecurityEvent {
    pub kind: SecurityEventKind,
    pub email: Option<String>,
    pub at: DateTime<Utc>,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub token: String,
    pub user: CurrentUser,
    pub login_time: DateTime<Utc>,
}

/// Which admin page sections should be shown.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SectionVisibility {
    pub login_form: bool,
    pub admin_content: bool,
}

pub struct AuthGate {
    storage: Storage,
    secret: String,
    security_log: Mutex<Vec<SecurityEvent>>,
}

impl AuthGate {
    pub fn new(storage: Storage, secret: &str) -> Self {
        Self {
            storage,
            secret: secret.to_string(),
            security_log: Mutex::new(vec![]),
        }
    }

    /// Create the default admin when no admin users exist. Returns whether one was added.
    pub fn seed_default_admin(&self, email: &str, password: &str) -> Result<bool, AuthError> {
        let mut users = RecordStore::<AdminUser>::open(self.storage.clone())?;
        if !users.is_empty() {
            return Ok(false);
        }
        users.add(AdminUser {
            email: email.trim().to_lowercase(),
            password: password.to_string(),
            name: "Administrator".to_string(),
            role: "admin".to_string(),
            active: true,
            ..Default::default()
        })?;
        info!(email, "seeded default admin user");
        Ok(true)
    }

    pub fn login(&self, email: &str, password: &str, now: DateTime<Utc>) -> Result<Session, AuthError> {
        let email = sanitize(email).to_lowercase();
        let password = sanitize(password);

        let attempts = self.recent_attempts(now);
        if attempts.len() >= MAX_FAILED_ATTEMPTS {
            let oldest = attempts.iter().copied().min().unwrap_or(now.timestamp_millis());
            let retry_after_ms = oldest + ATTEMPT_WINDOW_MS - now.timestamp_millis();
            self.log(SecurityEventKind::RateLimited, Some(&email), now);
            warn!(email = %email, attempts = attempts.len(), "login rate limited");
            return Err(AuthError::RateLimited {
                retry_after_secs: (retry_after_ms / 1000).max(1),
            });
        }

        let users = RecordStore::<AdminUser>::open(self.storage.clone())?;
        let user = users
            .all()
            .iter()
            .find(|u| u.active && u.email.to_lowercase() == email && u.password == password)
            .cloned();

        let Some(user) = user else {
            let mut attempts = attempts;
            attempts.push(now.timestamp_millis());
            self.storage.set_json(LOGIN_ATTEMPTS_KEY, &attempts)?;
            self.log(SecurityEventKind::LoginFailed, Some(&email), now);
            warn!(email = %email, attempts = attempts.len(), "failed admin login");
            return Err(AuthError::InvalidCredentials);
        };

        let token = self.create_jwt(&user.email, now)?;
        let current = CurrentUser::from(&user);
        self.storage.set_json(AUTH_TOKEN_KEY, &token)?;
        self.storage.set_json(CURRENT_USER_KEY, &current)?;
        self.storage.set_json(LOGIN_TIME_KEY, &now.timestamp_millis())?;
        self.storage.remove_item(LOGIN_ATTEMPTS_KEY)?;
        self.log(SecurityEventKind::LoginSuccess, Some(&email), now);
        info!(email = %email, "admin logged in");

        Ok(Session {
            token,
            user: current,
            login_time: now,
        })
    }

    /// True while `now - loginTime < 24h`. Expired sessions are cleared.
    pub fn check_auth(&self, now: DateTime<Utc>) -> bool {
        let token: Option<String> = self.storage.get_json(AUTH_TOKEN_KEY).ok().flatten();
        let login_time: Option<i64> = self.storage.get_json(LOGIN_TIME_KEY).ok().flatten();
        let (Some(_), Some(login_time)) = (token, login_time) else {
            return false;
        };

        if now.timestamp_millis() - login_time < SESSION_TTL_MS {
            return true;
        }

        let email = self.stored_user().map(|u| u.email);
        if let Err(e) = self.clear_session() {
            warn!(error = %e, "failed to clear expired session");
        }
        self.log(SecurityEventKind::SessionExpired, email.as_deref(), now);
        info!("admin session expired");
        false
    }

    pub fn current_user(&self, now: DateTime<Utc>) -> Option<CurrentUser> {
        if !self.check_auth(now) {
            return None;
        }
        self.stored_user()
    }

    pub fn login_time(&self) -> Option<DateTime<Utc>> {
        let millis: i64 = self.storage.get_json(LOGIN_TIME_KEY).ok().flatten()?;
        Utc.timestamp_millis_opt(millis).single()
    }

    pub fn visibility(&self, now: DateTime<Utc>) -> SectionVisibility {
        let authed = self.check_auth(now);
        SectionVisibility {
            login_form: !authed,
            admin_content: authed,
        }
    }

    pub fn logout(&self, now: DateTime<Utc>) -> Result<(), AuthError> {
        let email = self.stored_user().map(|u| u.email);
        self.clear_session()?;
        self.log(SecurityEventKind::Logout, email.as_deref(), now);
        Ok(())
    }

    /// Failed-attempt timestamps still inside the rolling window.
    pub fn recent_attempts(&self, now: DateTime<Utc>) -> Vec<i64> {
        let attempts: Vec<i64> = self
            .storage
            .get_json(LOGIN_ATTEMPTS_KEY)
            .ok()
            .flatten()
            .unwrap_or_default();
        let cutoff = now.timestamp_millis() - ATTEMPT_WINDOW_MS;
        attempts.into_iter().filter(|t| *t > cutoff).collect()
    }

    pub fn security_log(&self) -> Vec<SecurityEvent> {
        self.security_log
            .lock()
            .map(|log| log.clone())
            .unwrap_or_default()
    }

    pub fn create_jwt(&self, email: &str, now: DateTime<Utc>) -> Result<String, AuthError> {
        let expiration = (now.timestamp_millis() + SESSION_TTL_MS) / 1000;
        let claims = AuthPayload {
            sub: email.to_owned(),
            exp: expiration as usize,
        };
        Ok(encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )?)
    }

    pub fn verify_token(&self, token: &str) -> Result<AuthPayload, AuthError> {
        let token_data = decode::<AuthPayload>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::new(Algorithm::HS256),
        )?;
        Ok(token_data.claims)
    }

    /// Accept `token` only while it is the live session's token: a valid
    /// signature, an unexpired session, and the value stored at login.
    pub fn authorize(&self, token: &str, now: DateTime<Utc>) -> Result<AuthPayload, AuthError> {
        let claims = self.verify_token(token)?;
        if !self.check_auth(now) {
            return Err(AuthError::SessionEnded);
        }
        let stored: Option<String> = self.storage.get_json(AUTH_TOKEN_KEY)?;
        if stored.as_deref() != Some(token) {
            return Err(AuthError::SessionEnded);
        }
        Ok(claims)
    }

    fn stored_user(&self) -> Option<CurrentUser> {
        self.storage.get_json(CURRENT_USER_KEY).ok().flatten()
    }

    fn clear_session(&self) -> Result<(), StorageError> {
        self.storage.remove_item(AUTH_TOKEN_KEY)?;
        self.storage.remove_item(CURRENT_USER_KEY)?;
        self.storage.remove_item(LOGIN_TIME_KEY)?;
        Ok(())
    }

    fn log(&self, kind: SecurityEventKind, email: Option<&str>, at: DateTime<Utc>) {
        if let Ok(mut log) = self.security_log.lock() {
            log.push(SecurityEvent {
                kind,
                email: email.map(str::to_string),
                at,
            });
            if log.len() > SECURITY_LOG_CAP {
                let overflow = log.len() - SECURITY_LOG_CAP;
                log.drain(..overflow);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn gate() -> AuthGate {
        let gate = AuthGate::new(Storage::temporary().unwrap(), "test-secret");
        gate.seed_default_admin("admin@infetech.com", "admin123").unwrap();
        gate
    }

    #[test]
    fn test_seed_only_when_empty() {
        let gate = gate();
        assert!(!gate.seed_default_admin("other@x.com", "pw").unwrap());
    }

    #[test]
    fn test_login_writes_session_keys() {
        let gate = gate();
        let now = Utc::now();
        let session = gate.login("  ADMIN@infetech.com ", "admin123", now).unwrap();

        assert_eq!(session.user.email, "admin@infetech.com");
        assert!(gate.check_auth(now));
        assert_eq!(gate.current_user(now).unwrap().role, "admin");
        assert_eq!(
            gate.login_time().unwrap().timestamp_millis(),
            now.timestamp_millis()
        );
        assert_eq!(gate.verify_token(&session.token).unwrap().sub, "admin@infetech.com");
    }

    #[test]
    fn test_wrong_password_rejected() {
        let gate = gate();
        let result = gate.login("admin@infetech.com", "nope", Utc::now());
        assert!(matches!(result, Err(AuthError::InvalidCredentials)));
        assert!(!gate.check_auth(Utc::now()));
    }

    #[test]
    fn test_session_ttl() {
        let gate = gate();
        let now = Utc::now();

        gate.login("admin@infetech.com", "admin123", now - Duration::hours(1)).unwrap();
        assert!(gate.check_auth(now));
        assert_eq!(
            gate.visibility(now),
            SectionVisibility {
                login_form: false,
                admin_content: true
            }
        );

        gate.login("admin@infetech.com", "admin123", now - Duration::hours(25)).unwrap();
        assert!(!gate.check_auth(now));
        assert!(gate.visibility(now).login_form);
        // Expired session keys are cleared
        assert!(gate.login_time().is_none());
        assert!(gate
            .security_log()
            .iter()
            .any(|e| e.kind == SecurityEventKind::SessionExpired));
    }

    #[test]
    fn test_rate_limit_after_five_failures_in_window() {
        let gate = gate();
        let start = Utc::now();

        for i in 0..5 {
            let at = start + Duration::seconds(i);
            assert!(matches!(
                gate.login("admin@infetech.com", "bad", at),
                Err(AuthError::InvalidCredentials)
            ));
        }
        // Correct password is still refused while the window is full
        assert!(matches!(
            gate.login("admin@infetech.com", "admin123", start + Duration::minutes(1)),
            Err(AuthError::RateLimited { .. })
        ));
        // After the window rolls past the failures the login goes through
        assert!(gate
            .login("admin@infetech.com", "admin123", start + Duration::minutes(16))
            .is_ok());
        assert!(gate.recent_attempts(start + Duration::minutes(16)).is_empty());
    }

    #[test]
    fn test_logout_clears_session() {
        let gate = gate();
        let now = Utc::now();
        gate.login("admin@infetech.com", "admin123", now).unwrap();
        gate.logout(now).unwrap();
        assert!(!gate.check_auth(now));
        assert!(gate.current_user(now).is_none());
    }

    #[test]
    fn test_authorize_follows_the_session() {
        let gate = gate();
        let now = Utc::now();
        let first = gate.login("admin@infetech.com", "admin123", now).unwrap();
        assert_eq!(gate.authorize(&first.token, now).unwrap().sub, "admin@infetech.com");

        // A newer login replaces the stored token
        let second = gate
            .login("admin@infetech.com", "admin123", now + Duration::seconds(2))
            .unwrap();
        assert!(matches!(gate.authorize(&first.token, now), Err(AuthError::SessionEnded)));
        assert!(gate.authorize(&second.token, now).is_ok());

        gate.logout(now).unwrap();
        assert!(matches!(gate.authorize(&second.token, now), Err(AuthError::SessionEnded)));
    }

    #[test]
    fn test_token_from_other_secret_rejected() {
        let gate = gate();
        let other = AuthGate::new(Storage::temporary().unwrap(), "other-secret");
        let token = other.create_jwt("admin@infetech.com", Utc::now()).unwrap();
        assert!(matches!(gate.verify_token(&token), Err(AuthError::Token(_))));
    }
}
