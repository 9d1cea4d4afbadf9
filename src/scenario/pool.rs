//! Closer pool.
//!
//! Scenario shutdown must release resources in reverse insertion order
//! (connections before listeners, servers before stacks). The pool records
//! every closeable resource and closes them all in one operation, joining
//! any errors.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;

use crate::errno::Errno;
use crate::netstack::{Stack, TcpConn, TcpListener, UdpConn};

/// Anything the pool can close.
#[async_trait]
pub trait Closer: Send + Sync {
    /// Releases the resource. Closing must be idempotent.
    async fn close(&self) -> Result<(), Errno>;
}

/// Joined errors from closing a pool.
#[derive(Debug, Error)]
#[error("close pool: {} resource(s) failed to close", .0.len())]
pub struct PoolError(pub Vec<Errno>);

/// A pool of closeable resources, closed in reverse insertion order.
#[derive(Default)]
pub struct ClosePool {
    items: Mutex<Vec<Arc<dyn Closer>>>,
}

impl ClosePool {
    /// Creates an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a resource.
    pub fn add(&self, closer: Arc<dyn Closer>) {
        self.items.lock().push(closer);
    }

    /// Closes every registered resource, last-in first-out.
    ///
    /// All resources are closed even when some fail; the failures are
    /// joined into the returned error. A second call is a no-op.
    ///
    /// # Errors
    ///
    /// [`PoolError`] collecting every individual failure.
    pub async fn close(&self) -> Result<(), PoolError> {
        let mut items = std::mem::take(&mut *self.items.lock());
        let mut errors = Vec::new();
        while let Some(item) = items.pop() {
            if let Err(err) = item.close().await {
                errors.push(err);
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(PoolError(errors))
        }
    }
}

#[async_trait]
impl Closer for Stack {
    async fn close(&self) -> Result<(), Errno> {
        Stack::close(self);
        Ok(())
    }
}

#[async_trait]
impl Closer for TcpListener {
    async fn close(&self) -> Result<(), Errno> {
        TcpListener::close(self);
        Ok(())
    }
}

#[async_trait]
impl Closer for UdpConn {
    async fn close(&self) -> Result<(), Errno> {
        UdpConn::close(self);
        Ok(())
    }
}

#[async_trait]
impl Closer for TcpConn {
    async fn close(&self) -> Result<(), Errno> {
        TcpConn::close(self).await;
        Ok(())
    }
}
