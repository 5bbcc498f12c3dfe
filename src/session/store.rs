// ABOUTME: Session store — get-or-create, system-message edits, and append-with-eviction.
// ABOUTME: Owns the backend handle and hands out per-conversation locks for serialized exchanges.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

use crate::error::SessionError;
use crate::session::eviction::EvictionPolicy;
use crate::session::persistence::SessionBackend;
use crate::session::types::{Session, Turn};

/// Default instruction used for new sessions and for empty system-message edits.
pub const DEFAULT_SYSTEM_MESSAGE: &str = "You are a helpful and concise assistant. Always detect the user's language and answer in that language.";

/// How failed saves are retried before the error reaches the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveRetry {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for SaveRetry {
    fn default() -> Self {
        Self {
            attempts: 2,
            backoff: Duration::from_millis(50),
        }
    }
}

/// Owns the mapping from conversation identifier to session state.
///
/// Operations on different identifiers are independent. Callers that run a
/// read-modify-write exchange on one identifier take [`SessionStore::lock`]
/// first; the store itself does not serialize them.
pub struct SessionStore {
    backend: Arc<dyn SessionBackend>,
    policy: EvictionPolicy,
    default_system: String,
    retry: SaveRetry,
    locks: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SessionStore {
    /// Create a store over `backend` using `policy` for eviction.
    pub fn new(backend: Arc<dyn SessionBackend>, policy: EvictionPolicy) -> Self {
        Self {
            backend,
            policy,
            default_system: DEFAULT_SYSTEM_MESSAGE.to_string(),
            retry: SaveRetry::default(),
            locks: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Override the system message given to new sessions.
    pub fn with_default_system(mut self, system: impl Into<String>) -> Self {
        let system = system.into();
        if !system.is_empty() {
            self.default_system = system;
        }
        self
    }

    /// Override the save retry behavior.
    pub fn with_save_retry(mut self, retry: SaveRetry) -> Self {
        self.retry = retry;
        self
    }

    pub fn policy(&self) -> &EvictionPolicy {
        &self.policy
    }

    pub fn default_system(&self) -> &str {
        &self.default_system
    }

    pub fn backend(&self) -> &Arc<dyn SessionBackend> {
        &self.backend
    }

    /// Acquire the single-writer lock for one conversation identifier.
    pub async fn lock(&self, id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            // Entries only the map still references have no holder and no waiter.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks
                .entry(id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Return the session for `id`, creating and saving a default one if it
    /// does not exist yet.
    pub async fn get_or_create(&self, id: &str) -> Result<Session, SessionError> {
        if let Some(session) = self.backend.load(id).await? {
            return Ok(session);
        }
        let session = Session::new(id, self.default_system.clone());
        self.save(&session).await?;
        debug!(conversation_id = %id, "created session");
        Ok(session)
    }

    /// Replace the system message. An empty `text` restores the default
    /// instruction. History is untouched.
    pub async fn edit_system_message(&self, id: &str, text: &str) -> Result<Session, SessionError> {
        let mut session = self.get_or_create(id).await?;
        session.system = if text.is_empty() {
            self.default_system.clone()
        } else {
            text.to_string()
        };
        self.save(&session).await?;
        Ok(session)
    }

    /// Append a user turn and the assistant reply as one unit, evict against
    /// the updated session, then save. Nothing is stored if the save fails.
    pub async fn append(
        &self,
        id: &str,
        user_content: &str,
        assistant_content: &str,
        attachments: Vec<Vec<u8>>,
    ) -> Result<Session, SessionError> {
        let mut session = self.get_or_create(id).await?;
        session
            .history
            .push(Turn::user(user_content).with_attachments(attachments));
        session.history.push(Turn::assistant(assistant_content));
        self.policy.evict(&mut session);
        self.save(&session).await?;
        Ok(session)
    }

    /// Serialized size of a conversation under the configured strategy.
    pub async fn size_of(&self, id: &str) -> Result<usize, SessionError> {
        let session = self.get_or_create(id).await?;
        Ok(self.policy.size_of(&session))
    }

    async fn save(&self, session: &Session) -> Result<(), SessionError> {
        let mut attempt = 0;
        loop {
            match self.backend.save(session).await {
                Ok(()) => return Ok(()),
                // A bad identifier will not get better on retry.
                Err(e @ SessionError::InvalidConversationId(_)) => return Err(e),
                Err(e) if attempt >= self.retry.attempts => return Err(e),
                Err(e) => {
                    attempt += 1;
                    warn!(
                        conversation_id = %session.id,
                        attempt,
                        error = %e,
                        "session save failed, retrying"
                    );
                    tokio::time::sleep(self.retry.backoff * attempt).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use crate::session::eviction::{Budget, SizeStrategy};
    use crate::session::persistence::MemoryBackend;
    use crate::session::types::Role;

    fn memory_store() -> SessionStore {
        SessionStore::new(Arc::new(MemoryBackend::new()), EvictionPolicy::default())
    }

    /// Backend whose saves fail a fixed number of times before succeeding.
    struct FlakyBackend {
        inner: MemoryBackend,
        failures_left: AtomicU32,
    }

    #[async_trait]
    impl SessionBackend for FlakyBackend {
        async fn load(&self, id: &str) -> Result<Option<Session>, SessionError> {
            self.inner.load(id).await
        }

        async fn save(&self, session: &Session) -> Result<(), SessionError> {
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(std::io::Error::other("disk full").into());
            }
            self.inner.save(session).await
        }

        async fn delete(&self, id: &str) -> Result<bool, SessionError> {
            self.inner.delete(id).await
        }

        async fn list(&self) -> Result<Vec<String>, SessionError> {
            self.inner.list().await
        }
    }

    fn flaky_store(failures: u32, attempts: u32) -> SessionStore {
        let backend = FlakyBackend {
            inner: MemoryBackend::new(),
            failures_left: AtomicU32::new(failures),
        };
        SessionStore::new(Arc::new(backend), EvictionPolicy::default()).with_save_retry(SaveRetry {
            attempts,
            backoff: Duration::from_millis(1),
        })
    }

    #[tokio::test]
    async fn new_session_has_default_system_and_empty_history() {
        let store = memory_store();
        let session = store.get_or_create("conv_new").await.unwrap();
        assert_eq!(session.id, "conv_new");
        assert_eq!(session.system, DEFAULT_SYSTEM_MESSAGE);
        assert!(session.history.is_empty());
    }

    #[tokio::test]
    async fn custom_default_system_is_used() {
        let store = memory_store().with_default_system("Answer in haiku.");
        let session = store.get_or_create("conv_haiku").await.unwrap();
        assert_eq!(session.system, "Answer in haiku.");
    }

    #[tokio::test]
    async fn edit_system_message_keeps_history() {
        let store = memory_store();
        store.append("c", "q1", "a1", vec![]).await.unwrap();
        store.append("c", "q2", "a2", vec![]).await.unwrap();
        let before = store.get_or_create("c").await.unwrap().history;

        let edited = store.edit_system_message("c", "Be formal.").await.unwrap();
        assert_eq!(edited.system, "Be formal.");
        assert_eq!(edited.history, before);
    }

    #[tokio::test]
    async fn empty_system_edit_falls_back_to_default() {
        let store = memory_store();
        store.edit_system_message("c", "Be formal.").await.unwrap();
        let session = store.edit_system_message("c", "").await.unwrap();
        assert_eq!(session.system, DEFAULT_SYSTEM_MESSAGE);
    }

    #[tokio::test]
    async fn append_adds_user_then_assistant() {
        let store = memory_store();
        let session = store
            .append("c", "what is this?", "a cat", vec![vec![7, 7]])
            .await
            .unwrap();

        assert_eq!(session.history.len(), 2);
        assert_eq!(session.history[0].role, Role::User);
        assert_eq!(session.history[0].attachments, vec![vec![7, 7]]);
        assert_eq!(session.history[1].role, Role::Assistant);
        assert!(session.history[1].attachments.is_empty());
        assert!(session.ends_with_exchange());
    }

    #[tokio::test]
    async fn append_evicts_against_updated_session() {
        let policy = EvictionPolicy::new(Budget::new(20, 1), SizeStrategy::RawLength);
        let store = SessionStore::new(Arc::new(MemoryBackend::new()), policy)
            .with_default_system("s");

        store.append("c", "0123456789", "0123456789", vec![]).await.unwrap();
        let session = store.append("c", "new-q", "new-a", vec![]).await.unwrap();

        // 1 + 20 + 10 = 31 > 20, so the first pair goes; the floor keeps the new one.
        assert_eq!(session.history.len(), 2);
        assert_eq!(session.history[0].content, "new-q");
    }

    #[tokio::test]
    async fn save_retries_transient_failures() {
        let store = flaky_store(2, 2);
        let session = store.append("c", "q", "a", vec![]).await.unwrap();
        assert_eq!(session.history.len(), 2);
    }

    #[tokio::test]
    async fn save_failure_surfaces_and_leaves_session_unchanged() {
        let backend = Arc::new(FlakyBackend {
            inner: MemoryBackend::new(),
            failures_left: AtomicU32::new(0),
        });
        let store = SessionStore::new(backend.clone(), EvictionPolicy::default()).with_save_retry(
            SaveRetry {
                attempts: 1,
                backoff: Duration::from_millis(1),
            },
        );
        store.append("c", "q1", "a1", vec![]).await.unwrap();

        backend.failures_left.store(u32::MAX, Ordering::SeqCst);
        let err = store.append("c", "q2", "a2", vec![]).await.unwrap_err();
        assert!(matches!(err, SessionError::PersistenceIo(_)));

        let stored = backend.inner.load("c").await.unwrap().unwrap();
        assert_eq!(stored.history.len(), 2);
        assert_eq!(stored.history[0].content, "q1");
    }

    #[tokio::test]
    async fn locks_are_per_conversation() {
        let store = memory_store();
        let _a = store.lock("a").await;
        // A different identifier is not blocked by the held lock.
        let b = tokio::time::timeout(Duration::from_millis(100), store.lock("b")).await;
        assert!(b.is_ok());
        // The same identifier is.
        let a_again = tokio::time::timeout(Duration::from_millis(50), store.lock("a")).await;
        assert!(a_again.is_err());
    }

    fn tracked_locks(store: &SessionStore) -> usize {
        store.locks.lock().unwrap().len()
    }

    #[tokio::test]
    async fn released_locks_are_not_kept_around() {
        let store = memory_store();
        for i in 0..50 {
            let _guard = store.lock(&format!("conv_{i}")).await;
        }
        let _held = store.lock("conv_held").await;
        assert_eq!(tracked_locks(&store), 1);

        let _other = store.lock("conv_other").await;
        assert_eq!(tracked_locks(&store), 2);
    }

    #[tokio::test]
    async fn pruning_keeps_the_lock_of_a_waiting_caller() {
        let store = Arc::new(memory_store());
        let first = store.lock("conv_busy").await;

        let waiter = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                let _guard = store.lock("conv_busy").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Another id prunes idle entries, but the busy one has a holder and a waiter.
        drop(store.lock("conv_idle").await);
        assert!(!waiter.is_finished());
        let second = tokio::time::timeout(Duration::from_millis(50), store.lock("conv_busy")).await;
        assert!(second.is_err());

        drop(first);
        waiter.await.unwrap();
    }
}
