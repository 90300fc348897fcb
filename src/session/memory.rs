//! In-memory session store with signed session cookies.
//!
//! # Responsibilities
//! - Decode base64 signing keys at construction
//! - Sign session ids with HMAC-SHA256 and verify incoming cookies
//! - Keep saved session values server-side until they expire
//! - Sweep expired sessions on a background ticker
//!
//! # Design Decisions
//! - The first key signs, every key verifies (allows key rotation)
//! - A missing, tampered or expired cookie yields a fresh session, not an error
//! - Concurrent requests never share a session object; they share the
//!   record map, which is a concurrent hash map

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::http::header::{COOKIE, SET_COOKIE};
use axum::http::HeaderValue;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use dashmap::DashMap;
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::http::{RequestParts, ResponseWriter};
use crate::session::{BoxError, Session, SessionError, SessionStore};

type HmacSha256 = Hmac<Sha256>;

const DEFAULT_MAX_AGE: Duration = Duration::from_secs(30 * 24 * 60 * 60);
const MIN_CLEANUP_INTERVAL: Duration = Duration::from_millis(1);

/// Error type for building a session store.
#[derive(Debug, Error)]
pub enum SessionStoreError {
    #[error("at least one key required for sessions")]
    NoKeys,

    #[error("could not decode key for session: {0}")]
    KeyDecode(#[from] base64::DecodeError),

    #[error("session keys must not be empty")]
    EmptyKey,
}

#[derive(Debug, Clone)]
struct Record {
    values: HashMap<String, Value>,
    expires_at: Instant,
}

#[derive(Debug)]
struct StoreInner {
    cookie_name: String,
    keys: Vec<Vec<u8>>,
    max_age: Duration,
    records: DashMap<String, Record>,
    cleanup: CancellationToken,
    closed: AtomicBool,
}

impl StoreInner {
    /// Sign with the first key. Keys are non-empty by construction.
    fn sign(&self, id: &str) -> Result<String, hmac::digest::InvalidLength> {
        let mut mac = HmacSha256::new_from_slice(&self.keys[0])?;
        mac.update(id.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        Ok(format!("{id}.{signature}"))
    }

    /// Return the session id if the cookie value carries a valid signature.
    fn verify(&self, cookie_value: &str) -> Option<String> {
        let (id, signature) = cookie_value.rsplit_once('.')?;
        let signature = URL_SAFE_NO_PAD.decode(signature).ok()?;

        self.keys.iter().find_map(|key| {
            let mut mac = HmacSha256::new_from_slice(key).ok()?;
            mac.update(id.as_bytes());
            mac.verify_slice(&signature).ok().map(|_| id.to_string())
        })
    }

    fn cookie_value<'a>(&self, request: &'a RequestParts) -> Option<&'a str> {
        request
            .headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == self.cookie_name)
            .map(|(_, value)| value)
    }

    fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.records.len();
        self.records.retain(|_, record| record.expires_at > now);
        before.saturating_sub(self.records.len())
    }
}

/// Cookie-keyed session store keeping values in process memory.
#[derive(Debug, Clone)]
pub struct MemorySessionStore {
    inner: Arc<StoreInner>,
}

impl MemorySessionStore {
    /// Create a store. At least one base64 encoded key is required.
    pub fn new<K: AsRef<str>>(
        cookie_name: impl Into<String>,
        keys: &[K],
    ) -> Result<Self, SessionStoreError> {
        Self::build(cookie_name.into(), keys, DEFAULT_MAX_AGE)
    }

    /// Create a store from the `[session]` configuration section.
    pub fn from_config(config: &SessionConfig) -> Result<Self, SessionStoreError> {
        Self::build(config.cookie_name.clone(), &config.keys, config.max_age())
    }

    fn build<K: AsRef<str>>(
        cookie_name: String,
        keys: &[K],
        max_age: Duration,
    ) -> Result<Self, SessionStoreError> {
        if keys.is_empty() {
            return Err(SessionStoreError::NoKeys);
        }

        let mut decoded = Vec::with_capacity(keys.len());
        for key in keys {
            let bytes = STANDARD.decode(key.as_ref())?;
            if bytes.is_empty() {
                return Err(SessionStoreError::EmptyKey);
            }
            decoded.push(bytes);
        }

        Ok(Self {
            inner: Arc::new(StoreInner {
                cookie_name,
                keys: decoded,
                max_age,
                records: DashMap::new(),
                cleanup: CancellationToken::new(),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Start sweeping expired sessions every `interval` until shutdown.
    pub fn start_cleanup(&self, interval: Duration) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        // Zero periods are rejected by tokio
        let interval = interval.max(MIN_CLEANUP_INTERVAL);
        tokio::spawn(async move {
            tracing::debug!(interval = ?interval, "Session cleanup starting");
            let mut ticker = time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = inner.sweep();
                        if removed > 0 {
                            tracing::debug!(removed, "Expired sessions removed");
                        }
                    }
                    _ = inner.cleanup.cancelled() => {
                        tracing::debug!("Session cleanup stopped");
                        break;
                    }
                }
            }
        })
    }

    /// Number of saved, not yet swept sessions.
    pub fn len(&self) -> usize {
        self.inner.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.records.is_empty()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, request: &RequestParts) -> Result<Box<dyn Session>, BoxError> {
        let existing = self
            .inner
            .cookie_value(request)
            .and_then(|value| self.inner.verify(value))
            .and_then(|id| {
                let record = self.inner.records.get(&id)?;
                let live = record.expires_at > Instant::now();
                let values = record.values.clone();
                drop(record);
                live.then_some((id, values))
            });

        let session = match existing {
            Some((id, values)) => MemorySession {
                store: Arc::clone(&self.inner),
                id,
                values,
                is_new: false,
            },
            None => MemorySession {
                store: Arc::clone(&self.inner),
                id: Uuid::new_v4().simple().to_string(),
                values: HashMap::new(),
                is_new: true,
            },
        };
        Ok(Box::new(session))
    }

    fn shutdown(&self) {
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            self.inner.cleanup.cancel();
            tracing::info!(sessions = self.inner.records.len(), "Session store shut down");
        }
    }
}

/// Session handed out by [`MemorySessionStore`].
#[derive(Debug)]
pub struct MemorySession {
    store: Arc<StoreInner>,
    id: String,
    values: HashMap<String, Value>,
    is_new: bool,
}

impl MemorySession {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether the request carried no valid session cookie.
    pub fn is_new(&self) -> bool {
        self.is_new
    }
}

#[async_trait]
impl Session for MemorySession {
    fn set_value(&mut self, key: &str, value: Value) {
        self.values.insert(key.to_string(), value);
    }

    fn get_value(&self, key: &str) -> Option<Value> {
        self.values.get(key).cloned()
    }

    async fn save(&mut self, _: &RequestParts, writer: &ResponseWriter) -> Result<(), SessionError> {
        if self.store.closed.load(Ordering::SeqCst) {
            return Err(SessionError::msg("session store is shut down"));
        }

        let signed = self
            .store
            .sign(&self.id)
            .map_err(|e| SessionError::new("unable to sign session id", e.to_string()))?;
        let cookie = format!(
            "{}={}; Path=/; Max-Age={}; HttpOnly; SameSite=Lax",
            self.store.cookie_name,
            signed,
            self.store.max_age.as_secs()
        );
        let cookie = HeaderValue::from_str(&cookie)
            .map_err(|e| SessionError::new("unable to encode session cookie", e))?;
        let expires_at = Instant::now()
            .checked_add(self.store.max_age)
            .ok_or_else(|| SessionError::msg("session max age is out of range"))?;

        self.store.records.insert(
            self.id.clone(),
            Record {
                values: self.values.clone(),
                expires_at,
            },
        );
        writer.append_header(SET_COOKIE, cookie);
        self.is_new = false;
        Ok(())
    }
}
