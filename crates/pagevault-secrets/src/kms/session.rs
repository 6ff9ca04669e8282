//! KMS session state shared between the client and the renewal task

use crate::error::KmsError;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// A KMS client token. Never printed.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Expose the token for an outbound request header
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionToken([REDACTED])")
    }
}

/// An authenticated session with the KMS
#[derive(Debug, Clone)]
pub struct Session {
    token: SessionToken,
    lease: Option<Duration>,
    renewable: bool,
    obtained_at: Instant,
}

impl Session {
    /// `lease` is `None` for tokens that report no TTL
    pub fn new(token: SessionToken, lease: Option<Duration>, renewable: bool) -> Self {
        Self {
            token,
            lease,
            renewable,
            obtained_at: Instant::now(),
        }
    }

    pub fn token(&self) -> &SessionToken {
        &self.token
    }

    pub fn lease(&self) -> Option<Duration> {
        self.lease
    }

    pub fn renewable(&self) -> bool {
        self.renewable
    }

    pub fn expires_at(&self) -> Option<Instant> {
        self.lease.map(|lease| self.obtained_at + lease)
    }

    /// Time left on the lease, measured from when the session was obtained
    pub fn remaining(&self) -> Option<Duration> {
        self.expires_at()
            .map(|at| at.saturating_duration_since(Instant::now()))
    }
}

/// Point-in-time view of the session for status reporting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub authenticated: bool,
    pub renewable: bool,
    pub remaining: Option<Duration>,
    pub degraded: bool,
}

/// Shared handle to the current session.
///
/// Every outbound request reads the token through this handle while the
/// renewal task swaps it, so access goes through an async `RwLock`.
#[derive(Debug, Clone, Default)]
pub struct SessionHandle {
    inner: Arc<RwLock<Option<Session>>>,
    degraded: Arc<AtomicBool>,
}

impl SessionHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current session
    pub async fn install(&self, session: Session) {
        *self.inner.write().await = Some(session);
        self.degraded.store(false, Ordering::SeqCst);
    }

    /// Drop the current session, e.g. on shutdown
    pub async fn clear(&self) {
        *self.inner.write().await = None;
    }

    pub async fn current(&self) -> Option<Session> {
        self.inner.read().await.clone()
    }

    /// Token for the next request, or `Auth` if no session is established
    pub async fn token(&self) -> Result<SessionToken, KmsError> {
        self.inner
            .read()
            .await
            .as_ref()
            .map(|s| s.token.clone())
            .ok_or_else(|| KmsError::Auth("no KMS session established".to_string()))
    }

    pub fn mark_degraded(&self) {
        self.degraded.store(true, Ordering::SeqCst);
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    pub async fn status(&self) -> SessionStatus {
        let guard = self.inner.read().await;
        SessionStatus {
            authenticated: guard.is_some(),
            renewable: guard.as_ref().is_some_and(|s| s.renewable),
            remaining: guard.as_ref().and_then(Session::remaining),
            degraded: self.is_degraded(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_token_requires_session() {
        let handle = SessionHandle::new();
        assert!(matches!(handle.token().await, Err(KmsError::Auth(_))));

        handle
            .install(Session::new(SessionToken::new("s.abc"), None, true))
            .await;
        assert_eq!(handle.token().await.unwrap().expose(), "s.abc");

        handle.clear().await;
        assert!(handle.token().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_remaining_lease_counts_down() {
        let session = Session::new(
            SessionToken::new("s.abc"),
            Some(Duration::from_secs(60)),
            true,
        );
        assert_eq!(session.remaining(), Some(Duration::from_secs(60)));

        tokio::time::advance(Duration::from_secs(45)).await;
        assert_eq!(session.remaining(), Some(Duration::from_secs(15)));

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(session.remaining(), Some(Duration::ZERO));
    }

    #[tokio::test]
    async fn test_install_clears_degraded() {
        let handle = SessionHandle::new();
        handle.mark_degraded();
        assert!(handle.status().await.degraded);

        handle
            .install(Session::new(SessionToken::new("s.new"), None, false))
            .await;
        let status = handle.status().await;
        assert!(!status.degraded);
        assert!(status.authenticated);
        assert!(!status.renewable);
        assert_eq!(status.remaining, None);
    }

    #[test]
    fn test_token_debug_is_redacted() {
        let token = SessionToken::new("s.supersecret");
        assert!(!format!("{:?}", token).contains("supersecret"));
    }
}
