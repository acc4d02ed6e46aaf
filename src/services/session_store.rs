//! Session-scoped state: each session owns a table of pending downloads.
//!
//! The store is an explicit value injected where needed. Every session's
//! table sits behind its own mutex, so requests from one session are
//! serialized while different sessions never contend on more than the
//! outer map.

use chrono::{DateTime, Utc};
use std::{
    collections::{HashMap, HashSet},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::models::download::DownloadEntry;

pub type SessionId = Uuid;

#[derive(Debug)]
struct SessionState {
    downloads: HashMap<String, DownloadEntry>,
    last_seen: DateTime<Utc>,
}

impl SessionState {
    fn new() -> Self {
        Self {
            downloads: HashMap::new(),
            last_seen: Utc::now(),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<SessionId, Arc<Mutex<SessionState>>>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume `presented` if it names a live session, otherwise start a new one.
    ///
    /// Ids the server did not issue are never adopted.
    pub async fn open(&self, presented: Option<SessionId>) -> SessionId {
        if let Some(id) = presented {
            if let Some(state) = self.get(id).await {
                state.lock().await.last_seen = Utc::now();
                return id;
            }
        }

        let id = Uuid::new_v4();
        self.sessions
            .write()
            .await
            .insert(id, Arc::new(Mutex::new(SessionState::new())));
        id
    }

    async fn get(&self, id: SessionId) -> Option<Arc<Mutex<SessionState>>> {
        self.sessions.read().await.get(&id).cloned()
    }

    /// Store a pending download. Returns the entry back when the session is gone.
    pub async fn insert_download(
        &self,
        id: SessionId,
        entry: DownloadEntry,
    ) -> Result<(), DownloadEntry> {
        let Some(state) = self.get(id).await else {
            return Err(entry);
        };
        let mut state = state.lock().await;
        state.last_seen = Utc::now();
        state.downloads.insert(entry.token.clone(), entry);
        Ok(())
    }

    /// Remove and return the entry for `token`, if this session holds one.
    pub async fn take_download(&self, id: SessionId, token: &str) -> Option<DownloadEntry> {
        let state = self.get(id).await?;
        let mut state = state.lock().await;
        state.last_seen = Utc::now();
        state.downloads.remove(token)
    }

    /// End a session now, handing back whatever downloads it still owned.
    pub async fn end(&self, id: SessionId) -> Vec<DownloadEntry> {
        let Some(state) = self.sessions.write().await.remove(&id) else {
            return Vec::new();
        };
        let mut state = state.lock().await;
        state.downloads.drain().map(|(_, entry)| entry).collect()
    }

    /// End every session idle for longer than `ttl`; returns their orphaned downloads.
    pub async fn expire_idle(&self, ttl: Duration) -> Vec<DownloadEntry> {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        let Some(cutoff) = Utc::now().checked_sub_signed(ttl) else {
            return Vec::new();
        };
        let snapshot: Vec<(SessionId, Arc<Mutex<SessionState>>)> = self
            .sessions
            .read()
            .await
            .iter()
            .map(|(id, state)| (*id, Arc::clone(state)))
            .collect();

        let mut expired = Vec::new();
        for (id, state) in snapshot {
            if state.lock().await.last_seen < cutoff {
                expired.extend(self.end(id).await);
            }
        }
        expired
    }

    /// Workspace roots still owned by a pending download.
    pub async fn live_workspaces(&self) -> HashSet<PathBuf> {
        let snapshot: Vec<Arc<Mutex<SessionState>>> =
            self.sessions.read().await.values().cloned().collect();
        let mut live = HashSet::new();
        for state in snapshot {
            for entry in state.lock().await.downloads.values() {
                live.insert(entry.workspace.root().to_path_buf());
            }
        }
        live
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{tool::ToolKind, workspace::Workspace};

    fn entry(token: &str) -> DownloadEntry {
        DownloadEntry {
            token: token.into(),
            result_path: PathBuf::from("/base/ws/out.xlsx"),
            workspace: Workspace::new(PathBuf::from("/base/ws"), Utc::now()),
            tool: ToolKind::Expense,
            published_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn unknown_ids_are_not_adopted() {
        let store = SessionStore::new();
        let forged = Uuid::new_v4();
        let issued = store.open(Some(forged)).await;
        assert_ne!(issued, forged);
        assert_eq!(store.open(Some(issued)).await, issued);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn downloads_are_taken_once_and_only_by_their_session() {
        let store = SessionStore::new();
        let owner = store.open(None).await;
        let other = store.open(None).await;
        store.insert_download(owner, entry("abc")).await.unwrap();

        assert!(store.take_download(other, "abc").await.is_none());
        assert!(store.take_download(owner, "abc").await.is_some());
        assert!(store.take_download(owner, "abc").await.is_none());
    }

    #[tokio::test]
    async fn insert_into_missing_session_hands_entry_back() {
        let store = SessionStore::new();
        let err = store.insert_download(Uuid::new_v4(), entry("t")).await.unwrap_err();
        assert_eq!(err.token, "t");
    }

    #[tokio::test]
    async fn idle_sessions_expire_with_their_downloads() {
        let store = SessionStore::new();
        let id = store.open(None).await;
        store.insert_download(id, entry("t1")).await.unwrap();
        assert_eq!(store.live_workspaces().await.len(), 1);

        assert!(store.expire_idle(Duration::from_secs(3600)).await.is_empty());
        tokio::time::sleep(Duration::from_millis(5)).await;
        let expired = store.expire_idle(Duration::ZERO).await;

        assert_eq!(expired.len(), 1);
        assert_eq!(store.len().await, 0);
        assert!(store.live_workspaces().await.is_empty());
    }
}
