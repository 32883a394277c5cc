//! Password authentication and the in-memory session.
//!
//! Provides sign-up, sign-in, session lifecycle, lockout tracking and
//! session-change notifications. The local store keeps bcrypt hashes in
//! `profiles`; the hosted store hands passwords to its auth service. The
//! active session is kept in memory. Controllers never read the
//! session themselves: callers resolve a [`SessionContext`] with
//! [`AuthState::require_context`] and pass it explicitly.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::error::{CajaError, Result};
use crate::models::Profile;
use crate::store::{AuthenticatedUser, CajaStore};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const MAX_FAILED_ATTEMPTS: u32 = 5;
const LOCKOUT_MINUTES: i64 = 15;
const SESSION_INACTIVITY_MINUTES: i64 = 30;
const SESSION_MAX_DURATION_HOURS: i64 = 12;
const MIN_PASSWORD_LEN: usize = 6;
const EVENT_CHANNEL_CAPACITY: usize = 16;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Identity handed to every controller call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionContext {
    pub user_id: String,
    pub nombre_completo: String,
}

/// The signed-in session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub session_id: String,
    pub user: Profile,
    pub login_time: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    /// Expired on inactivity or on max duration.
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
            || now - self.last_activity > Duration::minutes(SESSION_INACTIVITY_MINUTES)
    }

    pub fn context(&self) -> SessionContext {
        SessionContext {
            user_id: self.user.id.clone(),
            nombre_completo: self.user.nombre_completo.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    SignedIn(SessionContext),
    SignedOut,
    Expired,
}

struct LockoutEntry {
    attempts: u32,
    last_attempt: DateTime<Utc>,
}

/// Receives [`AuthEvent`]s until dropped or unsubscribed.
pub struct AuthSubscription {
    rx: broadcast::Receiver<AuthEvent>,
}

impl AuthSubscription {
    /// Wait for the next event. Returns `None` once the auth state is gone.
    pub async fn recv(&mut self) -> Option<AuthEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "auth subscriber lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking poll for a pending event.
    pub fn try_recv(&mut self) -> Option<AuthEvent> {
        self.rx.try_recv().ok()
    }

    pub fn unsubscribe(self) {
        debug!("auth subscription released");
    }
}

/// Managed state for authentication.
pub struct AuthState {
    current: Mutex<Option<Session>>,
    lockout: Mutex<LockoutEntry>,
    events: broadcast::Sender<AuthEvent>,
    hash_cost: u32,
}

impl Default for AuthState {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthState {
    pub fn new() -> Self {
        Self::with_hash_cost(bcrypt::DEFAULT_COST)
    }

    pub fn with_hash_cost(hash_cost: u32) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            current: Mutex::new(None),
            lockout: Mutex::new(LockoutEntry {
                attempts: 0,
                last_attempt: Utc::now(),
            }),
            events,
            hash_cost,
        }
    }

    // -- Subscriptions --------------------------------------------------------

    pub fn subscribe(&self) -> AuthSubscription {
        AuthSubscription {
            rx: self.events.subscribe(),
        }
    }

    fn emit(&self, event: AuthEvent) {
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }

    // -- Sign up / in / out ---------------------------------------------------

    /// Register a new profile with a bcrypt-hashed password.
    pub async fn sign_up<S: CajaStore>(
        &self,
        store: &S,
        email: &str,
        password: Zeroizing<String>,
        nombre_completo: &str,
    ) -> Result<Profile> {
        let email = email.trim().to_lowercase();
        let nombre_completo = nombre_completo.trim();
        if !email.contains('@') {
            return Err(CajaError::validation("invalid email"));
        }
        if nombre_completo.is_empty() {
            return Err(CajaError::validation("nombre_completo required"));
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(CajaError::validation(format!(
                "password must have at least {MIN_PASSWORD_LEN} characters"
            )));
        }

        if let Some(profile) = store
            .password_sign_up(&email, password.as_str(), nombre_completo)
            .await?
        {
            info!(user_id = %profile.id, "profile registered with auth service");
            return Ok(profile);
        }

        let hash = bcrypt::hash(password.as_str(), self.hash_cost)
            .map_err(|e| CajaError::auth(format!("hash password: {e}")))?;
        let profile = Profile {
            id: Uuid::new_v4().to_string(),
            email,
            nombre_completo: nombre_completo.to_string(),
            rol: "cajero".to_string(),
        };
        store.insert_profile(&profile, &hash).await?;
        info!(user_id = %profile.id, "profile registered");
        Ok(profile)
    }

    /// Verify credentials and start a session.
    ///
    /// Stores with their own auth service verify the password themselves;
    /// otherwise the bcrypt hash in `profiles` is checked here.
    pub async fn sign_in<S: CajaStore>(
        &self,
        store: &S,
        email: &str,
        password: Zeroizing<String>,
    ) -> Result<SessionContext> {
        check_lockout(&lock(&self.lockout))?;

        let email = email.trim();
        let verified = match store.password_sign_in(email, password.as_str()).await {
            Ok(Some(user)) => Some(user),
            Ok(None) => verify_local(store, email, &password).await?,
            Err(CajaError::Auth(reason)) => {
                debug!(%reason, "auth service rejected sign-in");
                None
            }
            Err(e) => return Err(e),
        };

        let Some(user) = verified else {
            record_failure(&mut lock(&self.lockout));
            return Err(CajaError::auth("invalid credentials"));
        };

        reset_lockout(&mut lock(&self.lockout));
        Ok(self.begin_session(user))
    }

    /// Install `user` as the current session and announce it. The session
    /// never outlives the auth service's access token.
    pub(crate) fn begin_session(&self, user: AuthenticatedUser) -> SessionContext {
        let now = Utc::now();
        let mut expires_at = now + Duration::hours(SESSION_MAX_DURATION_HOURS);
        if let Some(limit) = user.access_expires_at {
            expires_at = expires_at.min(limit);
        }
        let session = Session {
            session_id: Uuid::new_v4().to_string(),
            user: user.profile,
            login_time: now,
            last_activity: now,
            expires_at,
        };
        let ctx = session.context();
        *lock(&self.current) = Some(session);

        info!(user_id = %ctx.user_id, "signed in");
        self.emit(AuthEvent::SignedIn(ctx.clone()));
        ctx
    }

    pub fn sign_out(&self) {
        let previous = lock(&self.current).take();
        if let Some(session) = previous {
            info!(user_id = %session.user.id, "signed out");
            self.emit(AuthEvent::SignedOut);
        }
    }

    // -- Session access -------------------------------------------------------

    /// The current session, touching its activity timestamp. Expired
    /// sessions are cleared and reported as `None`.
    pub fn get_session(&self) -> Option<Session> {
        let now = Utc::now();
        let mut current = lock(&self.current);
        let expired = matches!(current.as_ref(), Some(s) if s.is_expired(now));
        if expired {
            if let Some(session) = current.take() {
                info!(user_id = %session.user.id, "session expired");
            }
            drop(current);
            self.emit(AuthEvent::Expired);
            return None;
        }
        current.as_mut().map(|session| {
            session.last_activity = now;
            session.clone()
        })
    }

    pub fn get_current_user(&self) -> Option<Profile> {
        self.get_session().map(|s| s.user)
    }

    /// Resolve the explicit context for a controller call.
    pub fn require_context(&self) -> Result<SessionContext> {
        self.get_session()
            .map(|s| s.context())
            .ok_or_else(|| CajaError::auth("no session"))
    }

    #[cfg(test)]
    fn backdate_activity(&self, minutes: i64) {
        if let Some(session) = lock(&self.current).as_mut() {
            session.last_activity -= Duration::minutes(minutes);
        }
    }
}

/// Profile of the signed-in user (dashboard header).
pub async fn load_profile<S: CajaStore>(store: &S, ctx: &SessionContext) -> Result<Profile> {
    store
        .get_profile(&ctx.user_id)
        .await?
        .ok_or_else(|| CajaError::not_found(format!("profile {}", ctx.user_id)))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Lock recovering from poisoning; the guarded data stays consistent
/// because every critical section is a single assignment.
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn verify_local<S: CajaStore>(
    store: &S,
    email: &str,
    password: &Zeroizing<String>,
) -> Result<Option<AuthenticatedUser>> {
    let creds = store.find_credentials_by_email(email).await?;
    Ok(creds
        .filter(|c| bcrypt::verify(password.as_str(), &c.password_hash).unwrap_or(false))
        .map(|c| AuthenticatedUser {
            profile: c.profile,
            access_expires_at: None,
        }))
}

fn check_lockout(lockout: &LockoutEntry) -> Result<()> {
    if lockout.attempts >= MAX_FAILED_ATTEMPTS {
        let elapsed = Utc::now() - lockout.last_attempt;
        if elapsed < Duration::minutes(LOCKOUT_MINUTES) {
            let remaining = LOCKOUT_MINUTES - elapsed.num_minutes();
            return Err(CajaError::auth(format!(
                "Too many failed attempts. Try again in {remaining} minute(s)."
            )));
        }
    }
    Ok(())
}

fn record_failure(lockout: &mut LockoutEntry) {
    lockout.attempts += 1;
    lockout.last_attempt = Utc::now();
    warn!(attempts = lockout.attempts, "failed sign-in attempt");
}

fn reset_lockout(lockout: &mut LockoutEntry) {
    lockout.attempts = 0;
    lockout.last_attempt = Utc::now();
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DbState;

    fn pw(s: &str) -> Zeroizing<String> {
        Zeroizing::new(s.to_string())
    }

    async fn registered() -> (DbState, AuthState, Profile) {
        let db = DbState::open_in_memory().unwrap();
        let auth = AuthState::with_hash_cost(4);
        let profile = auth
            .sign_up(&db, "Ana@Caja.test", pw("secreto1"), "Ana Pérez")
            .await
            .unwrap();
        (db, auth, profile)
    }

    #[tokio::test]
    async fn test_sign_in_creates_session_and_context() {
        let (db, auth, profile) = registered().await;
        assert!(auth.get_session().is_none());
        assert!(matches!(auth.require_context(), Err(CajaError::Auth(_))));

        let ctx = auth
            .sign_in(&db, "ana@caja.test", pw("secreto1"))
            .await
            .unwrap();
        assert_eq!(ctx.user_id, profile.id);
        assert_eq!(auth.get_current_user().unwrap().email, "ana@caja.test");
        assert_eq!(auth.require_context().unwrap(), ctx);

        let loaded = load_profile(&db, &ctx).await.unwrap();
        assert_eq!(loaded.nombre_completo, "Ana Pérez");
    }

    #[tokio::test]
    async fn test_wrong_password_is_auth_error_and_locks_out() {
        let (db, auth, _) = registered().await;
        for _ in 0..MAX_FAILED_ATTEMPTS {
            let err = auth
                .sign_in(&db, "ana@caja.test", pw("incorrecta"))
                .await
                .unwrap_err();
            assert!(matches!(err, CajaError::Auth(_)));
        }
        // Correct password is refused while locked out.
        let err = auth
            .sign_in(&db, "ana@caja.test", pw("secreto1"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Too many failed attempts"));
    }

    #[tokio::test]
    async fn test_sign_up_validation() {
        let db = DbState::open_in_memory().unwrap();
        let auth = AuthState::with_hash_cost(4);
        let err = auth
            .sign_up(&db, "sin-arroba", pw("secreto1"), "X")
            .await
            .unwrap_err();
        assert!(matches!(err, CajaError::Validation(_)));
        let err = auth
            .sign_up(&db, "a@b.c", pw("123"), "X")
            .await
            .unwrap_err();
        assert!(matches!(err, CajaError::Validation(_)));
    }

    #[tokio::test]
    async fn test_subscription_sees_lifecycle_events() {
        let (db, auth, _) = registered().await;
        let mut sub = auth.subscribe();

        let ctx = auth
            .sign_in(&db, "ana@caja.test", pw("secreto1"))
            .await
            .unwrap();
        assert_eq!(sub.recv().await, Some(AuthEvent::SignedIn(ctx)));

        auth.sign_out();
        assert_eq!(sub.recv().await, Some(AuthEvent::SignedOut));
        assert!(auth.get_session().is_none());

        sub.unsubscribe();
        // Emitting with no subscribers must not panic.
        auth.sign_out();
    }

    #[tokio::test]
    async fn test_inactive_session_expires() {
        let (db, auth, _) = registered().await;
        let mut sub = auth.subscribe();
        auth.sign_in(&db, "ana@caja.test", pw("secreto1"))
            .await
            .unwrap();
        let _ = sub.try_recv();

        auth.backdate_activity(SESSION_INACTIVITY_MINUTES + 1);
        assert!(auth.get_session().is_none());
        assert_eq!(sub.try_recv(), Some(AuthEvent::Expired));
        assert!(matches!(auth.require_context(), Err(CajaError::Auth(_))));
    }

    #[tokio::test]
    async fn test_session_never_outlives_service_token() {
        let auth = AuthState::with_hash_cost(4);
        let mut sub = auth.subscribe();
        let token_expiry = Utc::now() + Duration::minutes(60);
        let ctx = auth.begin_session(AuthenticatedUser {
            profile: Profile {
                id: "u-hosted".into(),
                email: "ana@caja.test".into(),
                nombre_completo: "Ana Pérez".into(),
                rol: "cajero".into(),
            },
            access_expires_at: Some(token_expiry),
        });
        assert_eq!(ctx.user_id, "u-hosted");
        assert_eq!(sub.try_recv(), Some(AuthEvent::SignedIn(ctx)));
        assert_eq!(auth.get_session().unwrap().expires_at, token_expiry);
    }
}
