use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tokio::sync::RwLock;

use super::SessionData;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session storage error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Session encoding error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Key-value persistence for session state, keyed by session id.
///
/// Sessions untouched for longer than the store's idle timeout are gone:
/// `load` reports them absent and `purge_idle` removes them in bulk.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, id: &str) -> Result<Option<SessionData>, SessionError>;
    async fn save(&self, id: &str, data: &SessionData) -> Result<(), SessionError>;
    async fn delete(&self, id: &str) -> Result<(), SessionError>;

    /// Remove every session last touched before `cutoff`, returning how many went.
    async fn purge_idle(&self, cutoff: i64) -> Result<usize, SessionError>;

    fn idle_timeout_secs(&self) -> i64;

    /// Sweep with the cutoff derived from the current time.
    async fn purge_expired(&self) -> Result<usize, SessionError> {
        self.purge_idle(Utc::now().timestamp() - self.idle_timeout_secs()).await
    }
}

/// Sessions written before `touched_at` existed count as idle.
fn is_idle(data: &SessionData, cutoff: i64) -> bool {
    data.touched_at.map_or(true, |touched| touched < cutoff)
}

pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, SessionData>>,
    idle_timeout_secs: i64,
}

impl MemorySessionStore {
    pub fn new(idle_timeout_secs: i64) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            idle_timeout_secs,
        }
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, id: &str) -> Result<Option<SessionData>, SessionError> {
        let cutoff = Utc::now().timestamp() - self.idle_timeout_secs;
        {
            let sessions = self.sessions.read().await;
            match sessions.get(id) {
                Some(data) if !is_idle(data, cutoff) => return Ok(Some(data.clone())),
                Some(_) => {}
                None => return Ok(None),
            }
        }
        self.sessions.write().await.remove(id);
        Ok(None)
    }

    async fn save(&self, id: &str, data: &SessionData) -> Result<(), SessionError> {
        self.sessions.write().await.insert(id.to_string(), data.clone());
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), SessionError> {
        self.sessions.write().await.remove(id);
        Ok(())
    }

    async fn purge_idle(&self, cutoff: i64) -> Result<usize, SessionError> {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, data| !is_idle(data, cutoff));
        Ok(before - sessions.len())
    }

    fn idle_timeout_secs(&self) -> i64 {
        self.idle_timeout_secs
    }
}

/// One JSON file per session inside a directory.
pub struct FileSessionStore {
    dir: PathBuf,
    idle_timeout_secs: i64,
}

impl FileSessionStore {
    pub async fn new(dir: impl AsRef<Path>, idle_timeout_secs: i64) -> Result<Self, SessionError> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir, idle_timeout_secs })
    }

    async fn read(path: &Path) -> Result<Option<SessionData>, SessionError> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_str(&content) {
            Ok(data) => Ok(Some(data)),
            Err(e) => {
                tracing::warn!("Discarding unreadable session file {}: {}", path.display(), e);
                Ok(None)
            }
        }
    }

    async fn remove(path: &Path) -> Result<(), SessionError> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn path_for(&self, id: &str) -> Option<PathBuf> {
        // Ids come from cookies; anything but hex could escape the directory
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        Some(self.dir.join(format!("sess_{}.json", id)))
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn load(&self, id: &str) -> Result<Option<SessionData>, SessionError> {
        let Some(path) = self.path_for(id) else {
            return Ok(None);
        };
        let cutoff = Utc::now().timestamp() - self.idle_timeout_secs;
        match Self::read(&path).await? {
            Some(data) if !is_idle(&data, cutoff) => Ok(Some(data)),
            Some(_) => {
                Self::remove(&path).await?;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn save(&self, id: &str, data: &SessionData) -> Result<(), SessionError> {
        let Some(path) = self.path_for(id) else {
            return Ok(());
        };
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec(data)?).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), SessionError> {
        let Some(path) = self.path_for(id) else {
            return Ok(());
        };
        Self::remove(&path).await
    }

    async fn purge_idle(&self, cutoff: i64) -> Result<usize, SessionError> {
        let mut purged = 0;
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_session = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("sess_") && n.ends_with(".json"));
            if !is_session {
                continue;
            }
            // Unreadable files are as dead as idle ones
            let idle = match Self::read(&path).await? {
                Some(data) => is_idle(&data, cutoff),
                None => true,
            };
            if idle {
                Self::remove(&path).await?;
                purged += 1;
            }
        }
        Ok(purged)
    }

    fn idle_timeout_secs(&self) -> i64 {
        self.idle_timeout_secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SessionData {
        let mut data = SessionData::default();
        data.flash.insert("success".into(), "Saved".into());
        data.csrf_token = Some("abc".into());
        data.touched_at = Some(Utc::now().timestamp());
        data
    }

    fn touched(secs_ago: i64) -> SessionData {
        SessionData {
            touched_at: Some(Utc::now().timestamp() - secs_ago),
            ..SessionData::default()
        }
    }

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("ticketa-sessions-{}", uuid::Uuid::new_v4().simple()))
    }

    #[tokio::test]
    async fn memory_store_round_trip() {
        let store = MemorySessionStore::new(3600);
        store.save("aa", &sample()).await.unwrap();
        let loaded = store.load("aa").await.unwrap().unwrap();
        assert_eq!(loaded.csrf_token.as_deref(), Some("abc"));
        store.delete("aa").await.unwrap();
        assert!(store.load("aa").await.unwrap().is_none());
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn file_store_persists_and_rejects_odd_ids() {
        let dir = temp_dir();
        let store = FileSessionStore::new(&dir, 3600).await.unwrap();

        store.save("0badc0de", &sample()).await.unwrap();
        let loaded = store.load("0badc0de").await.unwrap().unwrap();
        assert_eq!(loaded.flash.get("success").map(String::as_str), Some("Saved"));

        assert!(store.load("../../etc/passwd").await.unwrap().is_none());
        store.delete("0badc0de").await.unwrap();
        store.delete("0badc0de").await.unwrap();
        assert!(store.load("0badc0de").await.unwrap().is_none());

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn memory_store_forgets_idle_sessions() {
        let store = MemorySessionStore::new(3600);
        store.save("aa", &touched(3601)).await.unwrap();
        store.save("bb", &touched(10)).await.unwrap();
        store.save("cc", &SessionData::default()).await.unwrap();

        // An idle session is absent and gone from the map
        assert!(store.load("aa").await.unwrap().is_none());
        assert_eq!(store.len().await, 2);

        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert_eq!(store.len().await, 1);
        assert!(store.load("bb").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn anonymous_sessions_do_not_pile_up() {
        let store = MemorySessionStore::new(60);
        for n in 0..500 {
            store.save(&format!("{:x}", n), &touched(120)).await.unwrap();
        }
        store.save("fresh", &touched(0)).await.unwrap();

        assert_eq!(store.purge_expired().await.unwrap(), 500);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn file_store_sweeps_idle_and_unreadable_files() {
        let dir = temp_dir();
        let store = FileSessionStore::new(&dir, 3600).await.unwrap();

        store.save("0a", &touched(7200)).await.unwrap();
        store.save("0b", &touched(5)).await.unwrap();
        store.save("0c", &touched(7200)).await.unwrap();
        tokio::fs::write(dir.join("sess_0d.json"), b"not json").await.unwrap();
        tokio::fs::write(dir.join("keep.txt"), b"unrelated").await.unwrap();

        assert!(store.load("0a").await.unwrap().is_none());
        assert!(!dir.join("sess_0a.json").exists());

        assert_eq!(store.purge_expired().await.unwrap(), 2);
        assert!(store.load("0b").await.unwrap().is_some());
        assert!(!dir.join("sess_0c.json").exists());
        assert!(dir.join("keep.txt").exists());

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
