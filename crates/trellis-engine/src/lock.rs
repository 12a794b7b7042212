//! Advisory locks on documents and items.
//!
//! A lock is an expirable claim of one user on a target. Acquiring is
//! serialized within the process; atomicity across processes is up to the
//! graph store.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;

use trellis_core::{LockTarget, ObjectLock, Result, TrellisError, User, UserId};
use trellis_graph::{Change, GraphStore};

/// Default lock lifetime.
pub const DEFAULT_TTL_SECS: i64 = 600;

pub struct LockManager {
    store: Arc<dyn GraphStore>,
    ttl: Duration,
    gate: Mutex<()>,
}

impl LockManager {
    pub fn new(store: Arc<dyn GraphStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            gate: Mutex::new(()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Acquire or refresh the lock on `target` for `user`.
    pub async fn acquire(&self, target: LockTarget, user: &User) -> Result<ObjectLock> {
        self.acquire_at(target, user, Utc::now()).await
    }

    /// As [`acquire`](Self::acquire), with an explicit clock reading.
    pub async fn acquire_at(
        &self,
        target: LockTarget,
        user: &User,
        now: DateTime<Utc>,
    ) -> Result<ObjectLock> {
        let _guard = self.gate.lock().await;

        if let Some(existing) = self.store.find_lock(target).await? {
            if existing.user != user.id && !existing.is_expired(now) {
                let age_secs = existing.age(now).num_seconds();
                tracing::warn!(
                    %target,
                    holder = %existing.user,
                    requested_by = %user.id,
                    age_secs,
                    "Lock held by another user"
                );
                return Err(TrellisError::AlreadyLocked {
                    holder: existing.user,
                    username: existing.username,
                    age_secs,
                });
            }
        }

        let lock = ObjectLock {
            target,
            user: user.id,
            username: user.username.clone(),
            acquired_at: now,
            expires_at: now + self.ttl,
        };
        self.store.persist(Change::PutLock(lock.clone())).await?;
        tracing::info!(%target, user = %user.id, expires_at = %lock.expires_at, "Lock acquired");
        Ok(lock)
    }

    /// Release the lock on `target`.
    ///
    /// With `None` the lock is removed whoever holds it. With a user it is
    /// only removed if that user holds it. Returns whether a lock was removed.
    pub async fn release(&self, target: LockTarget, user: Option<UserId>) -> Result<bool> {
        let _guard = self.gate.lock().await;

        let Some(existing) = self.store.find_lock(target).await? else {
            return Ok(false);
        };
        if let Some(user) = user {
            if existing.user != user {
                tracing::debug!(%target, holder = %existing.user, %user, "Release by non-holder ignored");
                return Ok(false);
            }
        }

        self.store.persist(Change::RemoveLock(target)).await?;
        tracing::info!(%target, holder = %existing.user, forced = user.is_none(), "Lock released");
        Ok(true)
    }

    /// The live lock on `target`, if any.
    pub async fn holder(&self, target: LockTarget) -> Result<Option<ObjectLock>> {
        self.holder_at(target, Utc::now()).await
    }

    pub async fn holder_at(
        &self,
        target: LockTarget,
        now: DateTime<Utc>,
    ) -> Result<Option<ObjectLock>> {
        Ok(self
            .store
            .find_lock(target)
            .await?
            .filter(|lock| !lock.is_expired(now)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::{Document, DocumentId};
    use trellis_graph::MemoryGraphStore;

    fn user(id: i64, name: &str) -> User {
        User {
            id: UserId(id),
            username: name.to_string(),
            organization: None,
        }
    }

    async fn manager(ttl_secs: i64) -> (LockManager, LockTarget) {
        let store = Arc::new(MemoryGraphStore::new());
        store
            .persist(Change::PutDocument(Document::new(DocumentId(1), "Math")))
            .await
            .unwrap();
        let locks = LockManager::new(store, Duration::seconds(ttl_secs));
        (locks, LockTarget::Document(DocumentId(1)))
    }

    #[tokio::test]
    async fn second_user_is_refused_with_holder_details() {
        let (locks, target) = manager(600).await;
        let t0 = Utc::now();
        locks.acquire_at(target, &user(1, "ana"), t0).await.unwrap();

        let err = locks
            .acquire_at(target, &user(2, "ben"), t0 + Duration::seconds(30))
            .await
            .unwrap_err();
        match err {
            TrellisError::AlreadyLocked {
                holder,
                username,
                age_secs,
            } => {
                assert_eq!(holder, UserId(1));
                assert_eq!(username, "ana");
                assert_eq!(age_secs, 30);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn same_user_refreshes_the_lock() {
        let (locks, target) = manager(600).await;
        let t0 = Utc::now();
        let first = locks.acquire_at(target, &user(1, "ana"), t0).await.unwrap();
        let later = t0 + Duration::seconds(120);
        let second = locks.acquire_at(target, &user(1, "ana"), later).await.unwrap();
        assert!(second.expires_at > first.expires_at);
        assert_eq!(second.acquired_at, later);
    }

    #[tokio::test]
    async fn release_then_other_user_acquires() {
        let (locks, target) = manager(600).await;
        locks.acquire(target, &user(1, "ana")).await.unwrap();
        assert!(locks.release(target, Some(UserId(1))).await.unwrap());
        let lock = locks.acquire(target, &user(2, "ben")).await.unwrap();
        assert_eq!(lock.user, UserId(2));
    }

    #[tokio::test]
    async fn expired_lock_is_taken_over() {
        let (locks, target) = manager(600).await;
        let t0 = Utc::now();
        locks.acquire_at(target, &user(1, "ana"), t0).await.unwrap();

        let later = t0 + Duration::seconds(601);
        assert!(locks.holder_at(target, later).await.unwrap().is_none());
        let lock = locks.acquire_at(target, &user(2, "ben"), later).await.unwrap();
        assert_eq!(lock.user, UserId(2));
    }

    #[tokio::test]
    async fn release_by_non_holder_is_a_no_op() {
        let (locks, target) = manager(600).await;
        locks.acquire(target, &user(1, "ana")).await.unwrap();

        assert!(!locks.release(target, Some(UserId(2))).await.unwrap());
        let holder = locks.holder(target).await.unwrap().unwrap();
        assert_eq!(holder.user, UserId(1));
    }

    #[tokio::test]
    async fn forced_release_ignores_holder() {
        let (locks, target) = manager(600).await;
        locks.acquire(target, &user(1, "ana")).await.unwrap();
        assert!(locks.release(target, None).await.unwrap());
        assert!(locks.holder(target).await.unwrap().is_none());
        assert!(!locks.release(target, None).await.unwrap());
    }
}
