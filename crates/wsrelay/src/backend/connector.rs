//! Lazily established, process-wide backend connection.

use async_trait::async_trait;
use log::{debug, info};
use tokio::sync::Mutex;

use super::BackendError;

/// Establishes a connection to the backend.
#[async_trait]
pub trait Dialer: Send + Sync + 'static {
    /// Cheaply cloneable handle. Clones share the underlying transport.
    type Connection: Clone + Send + Sync + 'static;

    async fn dial(&self) -> Result<Self::Connection, BackendError>;
}

/// Holds at most one backend connection for the life of the process.
///
/// The first caller of [`get_connection`](Self::get_connection) dials while
/// holding the lock; concurrent callers wait and then share the result. A
/// failed dial leaves the slot empty so the next caller tries again.
pub struct BackendConnector<D: Dialer> {
    dialer: D,
    slot: Mutex<Option<D::Connection>>,
}

impl<D: Dialer> BackendConnector<D> {
    pub fn new(dialer: D) -> Self {
        Self {
            dialer,
            slot: Mutex::new(None),
        }
    }

    pub async fn get_connection(&self) -> Result<D::Connection, BackendError> {
        let mut slot = self.slot.lock().await;
        if let Some(connection) = slot.as_ref() {
            return Ok(connection.clone());
        }

        debug!("Dialing backend");
        let connection = self.dialer.dial().await?;
        info!("Backend connection established");
        *slot = Some(connection.clone());
        Ok(connection)
    }

    pub async fn is_connected(&self) -> bool {
        self.slot.lock().await.is_some()
    }

    pub fn dialer(&self) -> &D {
        &self.dialer
    }
}
