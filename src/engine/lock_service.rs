use crate::{Error, Result};
use async_lock::{Mutex as AsyncMutex, MutexGuardArc, RwLock, RwLockReadGuardArc, RwLockWriteGuardArc};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Two lock levels: a database gate (shared for transactions, exclusive
/// for checkpoint/rebuild) and one named lock per collection so a single
/// writer mutates a collection at a time. Acquisition is bounded by the
/// TIMEOUT pragma; timers come from tokio.
pub(crate) struct LockService {
    timeout: Cell<Duration>,
    transaction: Arc<RwLock<()>>,
    collections: RefCell<HashMap<String, Arc<AsyncMutex<()>>>>,
}

/// Held for the lifetime of a transaction (shared side of the gate).
#[derive(Debug)]
pub(crate) struct TransactionScope {
    _guard: RwLockReadGuardArc<()>,
}

/// Held by checkpoint and rebuild (exclusive side of the gate).
#[derive(Debug)]
pub(crate) struct ExclusiveScope {
    _guard: RwLockWriteGuardArc<()>,
}

/// Held by a write snapshot over one collection.
#[derive(Debug)]
pub(crate) struct CollectionLockScope {
    _guard: MutexGuardArc<()>,
}

impl LockService {
    pub fn new(timeout: Duration) -> Self {
        LockService {
            timeout: Cell::new(timeout),
            transaction: Arc::new(RwLock::new(())),
            collections: RefCell::new(HashMap::new()),
        }
    }

    pub fn set_timeout(&self, timeout: Duration) {
        self.timeout.set(timeout);
    }

    async fn acquire<T>(&self, target: &str, future: impl Future<Output = T>) -> Result<T> {
        tokio::time::timeout(self.timeout.get(), future)
            .await
            .map_err(|_| Error::lock_timeout(target))
    }

    pub async fn enter_transaction(&self) -> Result<TransactionScope> {
        let lock = Arc::clone(&self.transaction);
        let guard = self.acquire("database", lock.read_arc()).await?;
        Ok(TransactionScope { _guard: guard })
    }

    pub async fn enter_exclusive(&self) -> Result<ExclusiveScope> {
        let lock = Arc::clone(&self.transaction);
        let guard = self.acquire("database (exclusive)", lock.write_arc()).await?;
        Ok(ExclusiveScope { _guard: guard })
    }

    pub async fn enter_lock(&self, collection: &str) -> Result<CollectionLockScope> {
        let lock = {
            let mut collections = self.collections.borrow_mut();
            Arc::clone(
                collections
                    .entry(collection.to_string())
                    .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
            )
        };

        let guard = self.acquire(collection, lock.lock_arc()).await?;
        Ok(CollectionLockScope { _guard: guard })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[tokio::test]
    async fn collection_lock_excludes_second_writer() {
        let locker = LockService::new(Duration::from_millis(50));

        let held = locker.enter_lock("col").await.unwrap();
        let err = locker.enter_lock("col").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LockTimeout);

        drop(held);
        assert!(locker.enter_lock("col").await.is_ok());
    }

    #[tokio::test]
    async fn distinct_collections_do_not_contend() {
        let locker = LockService::new(Duration::from_millis(50));

        let _a = locker.enter_lock("a").await.unwrap();
        assert!(locker.enter_lock("b").await.is_ok());
    }

    #[tokio::test]
    async fn exclusive_blocks_transactions() {
        let locker = LockService::new(Duration::from_millis(50));

        let shared = locker.enter_transaction().await.unwrap();
        let second = locker.enter_transaction().await.unwrap();
        assert_eq!(
            locker.enter_exclusive().await.unwrap_err().kind(),
            ErrorKind::LockTimeout
        );

        drop(shared);
        drop(second);
        let _exclusive = locker.enter_exclusive().await.unwrap();
        assert_eq!(
            locker.enter_transaction().await.unwrap_err().kind(),
            ErrorKind::LockTimeout
        );
    }
}
