//! In-memory user sessions.
//!
//! A session owns its result store and the API key the user supplied. Nothing
//! here is ever written to disk.

use crate::store::ResultStore;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
pub struct Session {
    credential: Option<String>,
    pub store: ResultStore,
}

impl Session {
    pub fn set_credential(&mut self, api_key: impl Into<String>) {
        self.credential = Some(api_key.into());
    }

    pub fn credential(&self) -> Option<&str> {
        self.credential.as_deref()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("credential", &self.credential.as_ref().map(|_| "<redacted>"))
            .field("results", &self.store.len())
            .finish()
    }
}

/// Live sessions. Each session sits behind an async mutex held for the
/// whole of a batch, so batches on one session run one after another.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<RwLock<HashMap<Uuid, Arc<Mutex<Session>>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a session with an empty store.
    pub fn create(&self) -> Uuid {
        let id = Uuid::new_v4();
        self.inner
            .write()
            .unwrap()
            .insert(id, Arc::new(Mutex::new(Session::default())));
        tracing::debug!("SessionRegistry: created {}", id);
        id
    }

    pub fn get(&self, id: Uuid) -> Option<Arc<Mutex<Session>>> {
        self.inner.read().unwrap().get(&id).cloned()
    }

    /// End a session. Returns true if it existed.
    pub fn remove(&self, id: Uuid) -> bool {
        self.inner.write().unwrap().remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().len()
    }
}
