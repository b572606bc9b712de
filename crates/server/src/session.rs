use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use infrachat_agent::runtime::Session;
use infrachat_core::config::ServerConfig;
use tracing::debug;
use uuid::Uuid;

const MAX_SESSION_ID_LEN: usize = 128;

pub type SessionHandle = Arc<tokio::sync::Mutex<Session>>;

struct Entry {
    handle: SessionHandle,
    last_seen: Instant,
}

/// In-memory sessions keyed by the id clients echo back in the session
/// header. Requests on one session are serialized by its own lock.
///
/// Only [`SessionStore::open`] creates entries. Entries idle for longer than
/// the idle timeout are swept on every access, and the least recently used
/// entry is dropped when a new one would exceed the cap.
pub struct SessionStore {
    sessions: Mutex<HashMap<String, Entry>>,
    idle_timeout: Duration,
    max_sessions: usize,
}

impl SessionStore {
    pub fn new(idle_timeout: Duration, max_sessions: usize) -> Self {
        Self { sessions: Mutex::new(HashMap::new()), idle_timeout, max_sessions: max_sessions.max(1) }
    }

    pub fn from_config(server: &ServerConfig) -> Self {
        let max_sessions = usize::try_from(server.max_sessions).unwrap_or(usize::MAX);
        Self::new(Duration::from_secs(server.session_idle_secs), max_sessions)
    }

    /// Returns the session for `requested`, creating it when unknown. A
    /// missing or malformed id gets a freshly issued one.
    pub fn open(&self, requested: Option<&str>) -> (String, SessionHandle) {
        let id = normalize_session_id(requested).unwrap_or_else(|| Uuid::new_v4().to_string());
        let now = Instant::now();

        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        self.evict_idle(&mut sessions, now);
        if !sessions.contains_key(&id) && sessions.len() >= self.max_sessions {
            evict_least_recent(&mut sessions);
        }

        let entry = sessions
            .entry(id.clone())
            .or_insert_with(|| Entry { handle: SessionHandle::default(), last_seen: now });
        entry.last_seen = now;
        (id, entry.handle.clone())
    }

    /// Looks up a live session without creating one.
    pub fn find(&self, requested: Option<&str>) -> Option<SessionHandle> {
        let id = normalize_session_id(requested)?;
        let now = Instant::now();

        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        self.evict_idle(&mut sessions, now);
        let entry = sessions.get_mut(&id)?;
        entry.last_seen = now;
        Some(entry.handle.clone())
    }

    pub fn count(&self) -> usize {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn evict_idle(&self, sessions: &mut HashMap<String, Entry>, now: Instant) {
        let before = sessions.len();
        sessions.retain(|_, entry| now.duration_since(entry.last_seen) < self.idle_timeout);
        let evicted = before - sessions.len();
        if evicted > 0 {
            debug!(
                event_name = "api.sessions.evicted",
                evicted,
                remaining = sessions.len(),
                "idle sessions dropped"
            );
        }
    }
}

fn evict_least_recent(sessions: &mut HashMap<String, Entry>) {
    let oldest = sessions.iter().min_by_key(|(_, entry)| entry.last_seen).map(|(id, _)| id.clone());
    if let Some(id) = oldest {
        sessions.remove(&id);
    }
}

/// The trimmed id when it is safe to store and echo back.
pub fn normalize_session_id(requested: Option<&str>) -> Option<String> {
    requested.map(str::trim).filter(|id| is_valid_session_id(id)).map(str::to_string)
}

fn is_valid_session_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_SESSION_ID_LEN
        && id.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_')
}
