use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use axum::http::HeaderMap;
use axum::http::header::COOKIE;
use tracing::debug;
use uuid::Uuid;

use super::identity::UserIdentity;

pub(crate) const SESSION_COOKIE: &str = "pagesearch_session";

#[derive(Debug, Clone, Default)]
pub(crate) struct SessionData {
    pub(crate) user: Option<UserIdentity>,
    pub(crate) identity_token: Option<String>,
    pub(crate) flashes: Vec<String>,
}

const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(12 * 60 * 60);

struct StoredSession {
    data: SessionData,
    last_seen: Instant,
}

impl StoredSession {
    fn new(data: SessionData, now: Instant) -> Self {
        Self {
            data,
            last_seen: now,
        }
    }
}

/// Server-side sessions keyed by an opaque cookie value. Sessions idle for
/// longer than `idle_timeout` are swept on access; anonymous sessions are
/// dropped once their flashes have been read.
pub(crate) struct SessionStore {
    sessions: Mutex<HashMap<String, StoredSession>>,
    idle_timeout: Duration,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(DEFAULT_IDLE_TIMEOUT)
    }
}

impl SessionStore {
    pub(crate) fn new(idle_timeout: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            idle_timeout,
        }
    }

    /// Locks the map with expired sessions already removed.
    fn lock_live(&self, now: Instant) -> MutexGuard<'_, HashMap<String, StoredSession>> {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        let before = sessions.len();
        sessions.retain(|_, stored| now.duration_since(stored.last_seen) < self.idle_timeout);
        let expired = before - sessions.len();
        if expired > 0 {
            debug!(expired, remaining = sessions.len(), "expired idle sessions");
        }
        sessions
    }

    pub(crate) fn get(&self, session_id: &str) -> Option<SessionData> {
        let now = Instant::now();
        let mut sessions = self.lock_live(now);
        let stored = sessions.get_mut(session_id)?;
        stored.last_seen = now;
        Some(stored.data.clone())
    }

    /// Starts an authenticated session under a fresh id; pending flashes of
    /// the previous session are carried over and the old id is dropped.
    pub(crate) fn sign_in(
        &self,
        previous_id: Option<&str>,
        user: UserIdentity,
        identity_token: String,
    ) -> String {
        let now = Instant::now();
        let mut sessions = self.lock_live(now);
        let flashes = previous_id
            .and_then(|id| sessions.remove(id))
            .map(|stored| stored.data.flashes)
            .unwrap_or_default();

        let session_id = new_session_id();
        sessions.insert(
            session_id.clone(),
            StoredSession::new(
                SessionData {
                    user: Some(user),
                    identity_token: Some(identity_token),
                    flashes,
                },
                now,
            ),
        );
        session_id
    }

    pub(crate) fn sign_out(&self, session_id: &str) {
        self.lock_live(Instant::now()).remove(session_id);
    }

    /// Queues a message for the next page render, creating an anonymous
    /// session when there is none. Returns the id to keep in the cookie.
    pub(crate) fn push_flash(&self, session_id: Option<&str>, message: impl Into<String>) -> String {
        let now = Instant::now();
        let mut sessions = self.lock_live(now);
        let session_id = match session_id {
            Some(id) if sessions.contains_key(id) => id.to_string(),
            _ => new_session_id(),
        };
        let stored = sessions
            .entry(session_id.clone())
            .or_insert_with(|| StoredSession::new(SessionData::default(), now));
        stored.last_seen = now;
        stored.data.flashes.push(message.into());
        session_id
    }

    pub(crate) fn take_flashes(&self, session_id: &str) -> Vec<String> {
        let mut sessions = self.lock_live(Instant::now());
        let Some(stored) = sessions.get_mut(session_id) else {
            return Vec::new();
        };
        let flashes = std::mem::take(&mut stored.data.flashes);
        if stored.data.user.is_none() {
            sessions.remove(session_id);
        }
        flashes
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.lock_live(Instant::now()).len()
    }
}

fn new_session_id() -> String {
    Uuid::new_v4().simple().to_string()
}

pub(crate) fn session_id_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub(crate) fn session_cookie(session_id: &str) -> String {
    format!("{SESSION_COOKIE}={session_id}; Path=/; HttpOnly; SameSite=Lax")
}

pub(crate) fn expired_session_cookie() -> String {
    format!("{SESSION_COOKIE}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0")
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn ada() -> UserIdentity {
        UserIdentity {
            id: "u1".to_string(),
            username: "ada".to_string(),
            email: None,
            name: None,
        }
    }

    #[test]
    fn flashes_are_delivered_once() {
        let store = SessionStore::default();
        let id = store.push_flash(None, "Registration successful! Please login.");
        let same = store.push_flash(Some(&id), "second");

        assert_eq!(id, same);
        assert_eq!(
            store.take_flashes(&id),
            vec!["Registration successful! Please login.", "second"]
        );
        assert!(store.take_flashes(&id).is_empty());
    }

    #[test]
    fn unknown_session_id_gets_a_fresh_session() {
        let store = SessionStore::default();
        let id = store.push_flash(Some("forged"), "hello");
        assert_ne!(id, "forged");
        assert!(store.get("forged").is_none());
    }

    #[test]
    fn sign_in_rotates_id_and_keeps_flashes() {
        let store = SessionStore::default();
        let anonymous = store.push_flash(None, "welcome back");

        let signed_in = store.sign_in(Some(&anonymous), ada(), "tok".to_string());

        assert_ne!(signed_in, anonymous);
        assert!(store.get(&anonymous).is_none());
        let data = store.get(&signed_in).expect("session");
        assert_eq!(data.user, Some(ada()));
        assert_eq!(data.identity_token.as_deref(), Some("tok"));
        assert_eq!(data.flashes, vec!["welcome back"]);

        store.sign_out(&signed_in);
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn anonymous_sessions_are_dropped_once_flashes_are_read() {
        let store = SessionStore::default();
        for _ in 0..100 {
            let id = store.push_flash(None, "Registration successful! Please login.");
            assert_eq!(store.take_flashes(&id).len(), 1);
        }
        assert_eq!(store.len(), 0);

        let signed_in = store.sign_in(None, ada(), "tok".to_string());
        store.push_flash(Some(&signed_in), "hello");
        assert_eq!(store.take_flashes(&signed_in), vec!["hello"]);
        assert!(store.get(&signed_in).is_some());
    }

    #[test]
    fn idle_sessions_expire() {
        let store = SessionStore::new(Duration::ZERO);
        let id = store.sign_in(None, ada(), "tok".to_string());
        assert!(store.get(&id).is_none());
        assert_eq!(store.len(), 0);

        let store = SessionStore::new(Duration::from_secs(3600));
        let id = store.sign_in(None, ada(), "tok".to_string());
        assert!(store.get(&id).is_some());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn reads_session_cookie_among_others() {
        let mut headers = HeaderMap::new();
        headers.append(COOKIE, HeaderValue::from_static("theme=dark; pagesearch_session=abc123"));
        assert_eq!(session_id_from_headers(&headers).as_deref(), Some("abc123"));

        let mut headers = HeaderMap::new();
        headers.append(COOKIE, HeaderValue::from_static("pagesearch_session="));
        assert_eq!(session_id_from_headers(&headers), None);
        assert_eq!(session_id_from_headers(&HeaderMap::new()), None);
    }
}
