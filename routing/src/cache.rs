//! Fingerprint-keyed response cache with a fixed TTL.
//!
//! The fingerprint covers model, messages, temperature, and max_tokens —
//! the fields that change what a backend would answer. Tool declarations
//! and the streaming flag are excluded: streaming requests never consult
//! the cache at all, and tool passthrough does not alter cached text.
//!
//! Entries are evicted lazily when a lookup finds them expired. Nothing
//! sweeps the map in the background.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;

use crate::types::{ChatRequest, ChatResponse};

/// Default entry lifetime.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Deterministic fingerprint of the answer-relevant request fields.
/// Temperature is folded in as its bit pattern so equality is exact.
pub fn fingerprint(request: &ChatRequest) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(request.model.as_bytes());
    hasher.update(&[0x1f]);
    for message in &request.messages {
        hasher.update(message.role.to_string().as_bytes());
        hasher.update(&[0x1e]);
        hasher.update(message.content.as_bytes());
        hasher.update(&[0x1f]);
    }
    hasher.update(&request.temperature.to_bits().to_le_bytes());
    hasher.update(&request.max_tokens.to_le_bytes());
    hasher.finalize().to_hex().to_string()
}

struct CacheEntry {
    response: ChatResponse,
    inserted_at: Instant,
}

/// Shared response cache. Interior mutability behind one mutex; the lock
/// is never held across an await point.
pub struct ResponseCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl ResponseCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    pub fn with_default_ttl() -> Self {
        Self::new(DEFAULT_TTL)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Look up a fingerprint. Expired entries are removed here and only
    /// here — lookups are the sole eviction path.
    pub fn get(&self, fingerprint: &str) -> Option<ChatResponse> {
        let mut entries = self.lock();
        match entries.get(fingerprint) {
            Some(entry) if entry.inserted_at.elapsed() < self.ttl => {
                Some(entry.response.clone())
            }
            Some(_) => {
                entries.remove(fingerprint);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, fingerprint: String, response: ChatResponse) {
        self.lock().insert(
            fingerprint,
            CacheEntry {
                response,
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
