use crate::config::{AppConfig, WarehouseConfig};
use crate::services::memory_warehouse::InMemoryWarehouse;
use crate::services::warehouse::{SnowflakeConnector, WarehouseConnector};
use std::sync::Arc;
use tracing::{info, warn};

pub fn create_connector(backend: &str) -> Arc<dyn WarehouseConnector> {
    match backend.to_lowercase().as_str() {
        "snowflake" => Arc::new(SnowflakeConnector),
        "memory" | "in-memory" | "local" => Arc::new(InMemoryWarehouse::new()),
        _ => {
            warn!("Unknown warehouse backend '{}', using snowflake", backend);
            Arc::new(SnowflakeConnector)
        }
    }
}

pub fn setup_warehouse(
    config: &AppConfig,
    warehouse_config: &WarehouseConfig,
) -> Arc<dyn WarehouseConnector> {
    let connector = create_connector(&config.warehouse_backend);

    info!(
        "❄️  Warehouse: backend={}, account={}, database={}",
        connector.name(),
        warehouse_config.account.as_deref().unwrap_or("<unset>"),
        warehouse_config.database.as_deref().unwrap_or("<unset>"),
    );

    // Sessions are opened per interaction; only report what is missing here.
    let missing = warehouse_config.missing_fields();
    if !missing.is_empty() {
        warn!(
            "⚠️  Warehouse settings missing: {}. Uploads will fail until they are set.",
            missing.join(", ")
        );
    }

    connector
}
