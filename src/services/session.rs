use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::WarehouseConfig;
use crate::services::stage::{PutOptions, StageLocation};
use crate::services::warehouse::{
    Row, TransferResult, WarehouseConnector, WarehouseError, WarehouseSession,
};

/// Opens one warehouse session per interaction.
#[derive(Clone)]
pub struct SessionProvisioner {
    connector: Arc<dyn WarehouseConnector>,
    config: WarehouseConfig,
}

impl SessionProvisioner {
    pub fn new(connector: Arc<dyn WarehouseConnector>, config: WarehouseConfig) -> Self {
        Self { connector, config }
    }

    pub fn backend(&self) -> &'static str {
        self.connector.name()
    }

    pub fn config(&self) -> &WarehouseConfig {
        &self.config
    }

    /// Fails without touching the network when a required setting is missing.
    pub async fn open(&self) -> Result<SessionHandle, WarehouseError> {
        let credentials = self.config.credentials()?;
        let session = self.connector.connect(&credentials).await?;
        Ok(SessionHandle {
            session,
            closed: false,
        })
    }
}

/// An open session, released with [`SessionHandle::close`].
///
/// Dropping an unclosed handle closes the session on the current runtime.
pub struct SessionHandle {
    session: Box<dyn WarehouseSession>,
    closed: bool,
}

impl SessionHandle {
    pub fn session(&self) -> &dyn WarehouseSession {
        self.session.as_ref()
    }

    /// Closes the session; close failures are logged, not returned.
    pub async fn close(mut self) {
        self.closed = true;
        match self.session.close().await {
            Ok(()) => tracing::debug!("Warehouse session closed"),
            Err(e) => tracing::warn!("Failed to close warehouse session: {}", e),
        }
    }
}

impl Drop for SessionHandle {
    // Reached when the interaction is cancelled mid-flight; the close still runs.
    fn drop(&mut self) {
        if self.closed {
            return;
        }

        let mut session = std::mem::replace(&mut self.session, Box::new(Released));
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                tracing::warn!("Warehouse session dropped while open, closing in background");
                runtime.spawn(async move {
                    if let Err(e) = session.close().await {
                        tracing::warn!("Failed to close abandoned warehouse session: {}", e);
                    }
                });
            }
            Err(_) => {
                tracing::warn!("Warehouse session dropped outside a runtime, left open");
            }
        }
    }
}

/// Stands in for a session whose close was handed off to the runtime.
struct Released;

#[async_trait]
impl WarehouseSession for Released {
    async fn put(
        &self,
        _local_path: &Path,
        _stage: &StageLocation,
        _options: PutOptions,
    ) -> Result<TransferResult, WarehouseError> {
        Err(released())
    }

    async fn query(&self, _sql: &str) -> Result<Vec<Row>, WarehouseError> {
        Err(released())
    }

    async fn close(&mut self) -> Result<(), WarehouseError> {
        Ok(())
    }
}

fn released() -> WarehouseError {
    WarehouseError::Session("session already released".to_string())
}
