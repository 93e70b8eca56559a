//! Limits on what concurrent requests may hold at once.
//!
//! There are three budgets: open object store connections, bytes of source data in memory and
//! CPU-bound tasks. Each is a Tokio [Semaphore], and an unset limit never blocks.

use crate::error::EnergyVizError;

use tokio::sync::{Semaphore, SemaphorePermit};

/// One permit per byte, plus the pool size so oversized requests fail fast.
#[derive(Debug)]
struct MemoryPool {
    bytes: Semaphore,
    total: usize,
}

/// Budgets shared by all requests.
///
/// The acquire methods return `None` when the corresponding limit is unset. A permit is returned
/// to its pool when dropped.
#[derive(Debug)]
pub struct ResourceManager {
    store_connections: Option<Semaphore>,
    memory: Option<MemoryPool>,
    tasks: Option<Semaphore>,
}

impl ResourceManager {
    pub fn new(
        store_connection_limit: Option<usize>,
        memory_limit: Option<usize>,
        task_limit: Option<usize>,
    ) -> Self {
        Self {
            store_connections: store_connection_limit.map(Semaphore::new),
            memory: memory_limit.map(|total| MemoryPool {
                bytes: Semaphore::new(total),
                total,
            }),
            tasks: task_limit.map(Semaphore::new),
        }
    }

    /// Wait for an object store connection.
    pub async fn store_connection(&self) -> Result<Option<SemaphorePermit<'_>>, EnergyVizError> {
        acquire(self.store_connections.as_ref(), 1).await
    }

    /// Wait for `bytes` of memory.
    ///
    /// Asking for more than the whole pool fails at once with
    /// [EnergyVizError::InsufficientMemory].
    pub async fn memory(&self, bytes: usize) -> Result<Option<SemaphorePermit<'_>>, EnergyVizError> {
        let Some(pool) = &self.memory else {
            return Ok(None);
        };
        if bytes > pool.total {
            return Err(EnergyVizError::InsufficientMemory {
                requested: bytes,
                total: pool.total,
            });
        }
        acquire(Some(&pool.bytes), bytes).await
    }

    /// Wait for a CPU task slot.
    pub async fn task(&self) -> Result<Option<SemaphorePermit<'_>>, EnergyVizError> {
        acquire(self.tasks.as_ref(), 1).await
    }
}

async fn acquire(
    semaphore: Option<&Semaphore>,
    n: usize,
) -> Result<Option<SemaphorePermit<'_>>, EnergyVizError> {
    match semaphore {
        Some(semaphore) => Ok(Some(semaphore.acquire_many(n.try_into()?).await?)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::sync::TryAcquireError;

    #[tokio::test]
    async fn no_resource_management() {
        let rm = ResourceManager::new(None, None, None);
        assert!(rm.store_connections.is_none());
        assert!(rm.memory.is_none());
        assert!(rm.tasks.is_none());
        let c = rm.store_connection().await.unwrap();
        let m = rm.memory(1 << 40).await.unwrap();
        let t = rm.task().await.unwrap();
        assert!(c.is_none());
        assert!(m.is_none());
        assert!(t.is_none());
    }

    #[tokio::test]
    async fn full_resource_management() {
        let rm = ResourceManager::new(Some(1), Some(8), Some(1));
        let c = rm.store_connection().await.unwrap();
        let m = rm.memory(8).await.unwrap();
        let t = rm.task().await.unwrap();
        assert_eq!(1, c.as_ref().unwrap().num_permits());
        assert_eq!(8, m.as_ref().unwrap().num_permits());
        assert!(t.is_some());
        // Check that there are no more resources (without blocking).
        assert_eq!(
            rm.store_connections.as_ref().unwrap().try_acquire().err(),
            Some(TryAcquireError::NoPermits)
        );
        assert_eq!(
            rm.memory.as_ref().unwrap().bytes.try_acquire().err(),
            Some(TryAcquireError::NoPermits)
        );
        assert_eq!(
            rm.tasks.as_ref().unwrap().try_acquire().err(),
            Some(TryAcquireError::NoPermits)
        );
        drop(m);
        assert!(rm.memory.as_ref().unwrap().bytes.try_acquire_many(8).is_ok());
    }

    #[tokio::test]
    async fn memory_request_exceeds_pool() {
        let rm = ResourceManager::new(None, Some(4), None);
        let err = rm.memory(5).await.unwrap_err();
        assert_eq!(
            "Insufficient memory to process request (5 > 4)",
            err.to_string()
        );
    }
}
