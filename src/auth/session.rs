//! Server-side sessions with a rolling expiry.
//!
//! The cookie carries only the session id and is signed with a key derived
//! from the session secret.

use std::time::{Duration, Instant};

use axum::http::HeaderMap;
use axum_extra::extract::cookie::{Cookie, Key, SameSite, SignedCookieJar};
use dashmap::DashMap;
use rand::RngCore;
use sha2::{Digest, Sha512};
use uuid::Uuid;

use crate::config::SessionConfig;

#[derive(Debug, Clone, Copy)]
struct Session {
    user_id: Uuid,
    expires_at: Instant,
}

pub struct SessionStore {
    sessions: DashMap<String, Session>,
    key: Key,
    cookie_name: String,
    max_age: Duration,
    secure: bool,
}

impl SessionStore {
    pub fn new(secret: &str, config: &SessionConfig, secure: bool) -> Self {
        Self {
            sessions: DashMap::new(),
            key: Key::from(Sha512::digest(secret.as_bytes()).as_slice()),
            cookie_name: config.cookie_name.clone(),
            max_age: Duration::from_secs(config.max_age_secs),
            secure,
        }
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    /// Start a session; expired ones are purged first.
    pub fn create(&self, user_id: Uuid, now: Instant) -> String {
        self.purge_expired(now);
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        let id = hex::encode(bytes);
        self.sessions.insert(
            id.clone(),
            Session {
                user_id,
                expires_at: now + self.max_age,
            },
        );
        id
    }

    /// Extend a live session; expired ones are dropped.
    pub fn touch(&self, id: &str, now: Instant) -> Option<Uuid> {
        let user_id = {
            let mut session = self.sessions.get_mut(id)?;
            if now < session.expires_at {
                session.expires_at = now + self.max_age;
                Some(session.user_id)
            } else {
                None
            }
        };
        if user_id.is_none() {
            self.sessions.remove(id);
        }
        user_id
    }

    pub fn destroy(&self, id: &str) {
        self.sessions.remove(id);
    }

    pub fn purge_expired(&self, now: Instant) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, s| now < s.expires_at);
        before.saturating_sub(self.sessions.len())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Session id from a verified cookie, renewing the session.
    pub fn resolve(&self, headers: &HeaderMap, now: Instant) -> Option<String> {
        let jar = SignedCookieJar::from_headers(headers, self.key.clone());
        let id = jar.get(&self.cookie_name)?.value().to_string();
        self.touch(&id, now).map(|_| id)
    }

    /// Signed jar holding the cookie for `id`.
    pub fn cookie_jar(&self, id: &str) -> SignedCookieJar {
        let cookie = Cookie::build((self.cookie_name.clone(), id.to_string()))
            .path("/")
            .http_only(true)
            .secure(self.secure)
            .same_site(SameSite::Strict)
            .max_age(time::Duration::seconds(self.max_age.as_secs() as i64))
            .build();
        SignedCookieJar::new(self.key.clone()).add(cookie)
    }

    /// Cookie that clears the session on the client.
    pub fn removal_cookie(&self) -> Cookie<'static> {
        Cookie::build((self.cookie_name.clone(), ""))
            .path("/")
            .http_only(true)
            .secure(self.secure)
            .same_site(SameSite::Strict)
            .max_age(time::Duration::ZERO)
            .build()
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("cookie_name", &self.cookie_name)
            .field("sessions", &self.sessions.len())
            .finish_non_exhaustive()
    }
}
