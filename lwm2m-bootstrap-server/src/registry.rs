//! Live bootstrap sessions, keyed by id.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use lwm2m_bootstrap_core::{BootstrapSession, SessionId};
use tokio::sync::RwLock;

/// A session shared between the registry and the blocking task driving it.
pub type SharedSession = Arc<Mutex<BootstrapSession>>;

/// In-memory session registry.
///
/// The map lock is held only to look sessions up; per-session work locks the
/// session's own mutex.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    inner: RwLock<HashMap<SessionId, SharedSession>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, session: BootstrapSession) -> SessionId {
        let id = session.id();
        let mut inner = self.inner.write().await;
        inner.insert(id, Arc::new(Mutex::new(session)));
        id
    }

    pub async fn get(&self, id: &SessionId) -> Option<SharedSession> {
        let inner = self.inner.read().await;
        inner.get(id).cloned()
    }

    pub async fn remove(&self, id: &SessionId) -> Option<SharedSession> {
        let mut inner = self.inner.write().await;
        inner.remove(id)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}
