//! Session-based access control in front of the prediction service.
//!
//! A session is `Authenticated` from the moment the credential collaborator
//! opens it until it is closed (logout) or its expiry passes; any other token
//! is `Anonymous` and rejected.

use crate::types::prediction::UserRef;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;
use thiserror::Error;
use tracing::{debug, error, info};

/// Opaque session token presented with every request
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(pub String);

impl SessionToken {
    /// Fresh random token
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Only a prefix, tokens are bearer credentials
        let prefix: String = self.0.chars().take(8).collect();
        write!(f, "{}…", prefix)
    }
}

/// Rejection by the access gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("login required")]
pub struct Unauthorized;

/// Session lifecycle notifications from the credential collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    /// A user logged in
    Opened {
        token: SessionToken,
        user: UserRef,
        expires_at: DateTime<Utc>,
    },
    /// A user logged out
    Closed { token: SessionToken },
}

#[derive(Debug, Clone)]
struct SessionGrant {
    user: UserRef,
    expires_at: DateTime<Utc>,
}

/// Tracks authenticated sessions and authorizes requests against them
pub struct AccessGate {
    sessions: RwLock<HashMap<SessionToken, SessionGrant>>,
    ttl: Duration,
}

impl AccessGate {
    /// Create a gate whose self-issued sessions last `ttl`
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Open a session for an already-authenticated user
    pub fn open(&self, user: UserRef) -> SessionToken {
        let token = SessionToken::generate();
        self.admit(token.clone(), user, Utc::now() + self.ttl);
        token
    }

    /// Record a session opened elsewhere
    pub fn admit(&self, token: SessionToken, user: UserRef, expires_at: DateTime<Utc>) {
        debug!(session = %token, user = %user, expires_at = %expires_at, "Session opened");
        match self.sessions.write() {
            Ok(mut sessions) => {
                sessions.insert(token, SessionGrant { user, expires_at });
            }
            Err(_) => {
                error!(session = %token, user = %user, "Session table poisoned; grant dropped")
            }
        }
    }

    /// End a session; returns whether it existed
    pub fn close(&self, token: &SessionToken) -> bool {
        let removed = match self.sessions.write() {
            Ok(mut sessions) => sessions.remove(token).is_some(),
            Err(_) => {
                // authorize rejects every token while the table is poisoned
                error!(session = %token, "Session table poisoned; close not recorded");
                false
            }
        };
        debug!(session = %token, removed = removed, "Session closed");
        removed
    }

    /// Apply a lifecycle notification
    pub fn apply(&self, event: SessionEvent) {
        match event {
            SessionEvent::Opened {
                token,
                user,
                expires_at,
            } => self.admit(token, user, expires_at),
            SessionEvent::Closed { token } => {
                self.close(&token);
            }
        }
    }

    /// Resolve the user behind a session, or reject it
    pub fn authorize(&self, token: &SessionToken) -> Result<UserRef, Unauthorized> {
        self.authorize_at(token, Utc::now())
    }

    fn authorize_at(
        &self,
        token: &SessionToken,
        now: DateTime<Utc>,
    ) -> Result<UserRef, Unauthorized> {
        let sessions = self.sessions.read().map_err(|_| Unauthorized)?;
        match sessions.get(token) {
            Some(grant) if grant.expires_at > now => Ok(grant.user),
            Some(_) => {
                debug!(session = %token, "Session expired");
                Err(Unauthorized)
            }
            None => Err(Unauthorized),
        }
    }

    /// Drop expired sessions; returns how many were removed
    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(Utc::now())
    }

    fn purge_expired_at(&self, now: DateTime<Utc>) -> usize {
        let Ok(mut sessions) = self.sessions.write() else {
            return 0;
        };
        let before = sessions.len();
        sessions.retain(|_, grant| grant.expires_at > now);
        let purged = before - sessions.len();
        if purged > 0 {
            info!(purged = purged, remaining = sessions.len(), "Expired sessions purged");
        }
        purged
    }

    /// Number of tracked sessions, expired ones included until purged
    pub fn session_count(&self) -> usize {
        self.sessions.read().map(|s| s.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_open_then_authorize() {
        let gate = AccessGate::new(Duration::hours(1));
        let token = gate.open(UserRef(11));

        assert_eq!(gate.authorize(&token), Ok(UserRef(11)));
    }

    #[test]
    fn test_unknown_token_is_rejected() {
        let gate = AccessGate::new(Duration::hours(1));
        gate.open(UserRef(11));

        assert_eq!(
            gate.authorize(&SessionToken("not-a-session".to_string())),
            Err(Unauthorized)
        );
    }

    #[test]
    fn test_logout_returns_to_anonymous() {
        let gate = AccessGate::new(Duration::hours(1));
        let token = gate.open(UserRef(4));

        assert!(gate.close(&token));
        assert_eq!(gate.authorize(&token), Err(Unauthorized));
        assert!(!gate.close(&token));
    }

    #[test]
    fn test_expiry() {
        let gate = AccessGate::new(Duration::minutes(30));
        let token = gate.open(UserRef(4));
        let later = Utc::now() + Duration::minutes(31);

        assert_eq!(gate.authorize_at(&token, later), Err(Unauthorized));
        assert_eq!(gate.purge_expired_at(later), 1);
        assert_eq!(gate.session_count(), 0);
    }

    #[test]
    fn test_session_events() {
        let gate = AccessGate::new(Duration::hours(1));
        let json = r#"{"event":"opened","token":"abc-123","user":42,"expires_at":"2999-01-01T00:00:00Z"}"#;
        let event: SessionEvent = serde_json::from_str(json).unwrap();
        gate.apply(event);

        let token = SessionToken("abc-123".to_string());
        assert_eq!(gate.authorize(&token), Ok(UserRef(42)));

        gate.apply(SessionEvent::Closed {
            token: token.clone(),
        });
        assert_eq!(gate.authorize(&token), Err(Unauthorized));
    }

    #[test]
    fn test_poisoned_gate_rejects_everything() {
        let gate = Arc::new(AccessGate::new(Duration::hours(1)));
        let token = gate.open(UserRef(3));

        let holder = gate.clone();
        let _ = std::thread::spawn(move || {
            let _sessions = holder.sessions.write().unwrap();
            panic!("session holder panicked");
        })
        .join();

        assert_eq!(gate.authorize(&token), Err(Unauthorized));
        assert!(!gate.close(&token));

        let late = SessionToken::generate();
        gate.admit(late.clone(), UserRef(4), Utc::now() + Duration::hours(1));
        assert_eq!(gate.authorize(&late), Err(Unauthorized));
    }

    #[test]
    fn test_already_expired_grant_is_rejected() {
        let gate = AccessGate::new(Duration::hours(1));
        let token = SessionToken::generate();
        gate.admit(token.clone(), UserRef(5), Utc::now() - Duration::seconds(1));

        assert_eq!(gate.authorize(&token), Err(Unauthorized));
    }
}
