use std::path::Path;

use arrow::array::Array;
use arrow::record_batch::RecordBatch;
use arrow::util::display::{ArrayFormatter, FormatOptions};
use async_trait::async_trait;
use snowflake_api::{QueryResult, SnowflakeApi};
use thiserror::Error;

use crate::config::WarehouseCredentials;
use crate::services::stage::{PutOptions, StageLocation};

/// One result row; `None` is SQL NULL.
pub type Row = Vec<Option<String>>;

#[derive(Debug, Error)]
pub enum WarehouseError {
    #[error("Missing required configuration: {0}")]
    MissingConfig(&'static str),

    #[error("Failed to connect to warehouse: {0}")]
    Connect(String),

    #[error("File transfer failed: {0}")]
    Transfer(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Unsupported statement: {0}")]
    Unsupported(String),

    #[error("Session error: {0}")]
    Session(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferResult {
    pub source: String,
    pub target: String,
}

/// Opens authenticated sessions against a warehouse.
#[async_trait]
pub trait WarehouseConnector: Send + Sync {
    fn name(&self) -> &'static str;

    async fn connect(
        &self,
        credentials: &WarehouseCredentials,
    ) -> Result<Box<dyn WarehouseSession>, WarehouseError>;
}

/// A live warehouse connection.
#[async_trait]
pub trait WarehouseSession: Send + Sync {
    /// Transfers a local file to a stage.
    async fn put(
        &self,
        local_path: &Path,
        stage: &StageLocation,
        options: PutOptions,
    ) -> Result<TransferResult, WarehouseError>;

    /// Runs a statement and returns its rows as display strings.
    async fn query(&self, sql: &str) -> Result<Vec<Row>, WarehouseError>;

    async fn close(&mut self) -> Result<(), WarehouseError>;
}

/// Snowflake connector backed by the `snowflake-api` client.
#[derive(Debug, Default, Clone, Copy)]
pub struct SnowflakeConnector;

pub struct SnowflakeSession {
    api: SnowflakeApi,
}

#[async_trait]
impl WarehouseConnector for SnowflakeConnector {
    fn name(&self) -> &'static str {
        "snowflake"
    }

    async fn connect(
        &self,
        credentials: &WarehouseCredentials,
    ) -> Result<Box<dyn WarehouseSession>, WarehouseError> {
        let api = SnowflakeApi::with_password_auth(
            &credentials.account,
            Some(&credentials.warehouse),
            Some(&credentials.database),
            credentials.schema.as_deref(),
            &credentials.user,
            None,
            &credentials.password,
        )
        .map_err(|e| WarehouseError::Connect(e.to_string()))?;

        // The client logs in lazily; force it so bad credentials fail here.
        api.exec("SELECT 1")
            .await
            .map_err(|e| WarehouseError::Connect(e.to_string()))?;

        tracing::info!(
            "❄️  Snowflake session opened (account={}, warehouse={}, database={})",
            credentials.account,
            credentials.warehouse,
            credentials.database
        );
        Ok(Box::new(SnowflakeSession { api }))
    }
}

#[async_trait]
impl WarehouseSession for SnowflakeSession {
    async fn put(
        &self,
        local_path: &Path,
        stage: &StageLocation,
        options: PutOptions,
    ) -> Result<TransferResult, WarehouseError> {
        let sql = stage.put_sql(local_path, options);
        tracing::debug!("Executing {}", sql);
        self.api
            .exec(&sql)
            .await
            .map_err(|e| WarehouseError::Transfer(e.to_string()))?;

        Ok(TransferResult {
            source: local_path.display().to_string(),
            target: stage.as_str().to_string(),
        })
    }

    async fn query(&self, sql: &str) -> Result<Vec<Row>, WarehouseError> {
        let result = self
            .api
            .exec(sql)
            .await
            .map_err(|e| WarehouseError::Query(e.to_string()))?;

        match result {
            QueryResult::Arrow(batches) => {
                rows_from_batches(&batches).map_err(|e| WarehouseError::Query(e.to_string()))
            }
            QueryResult::Json(json) => Ok(rows_from_json(&json.value)),
            QueryResult::Empty => Ok(Vec::new()),
        }
    }

    async fn close(&mut self) -> Result<(), WarehouseError> {
        self.api
            .close_session()
            .await
            .map_err(|e| WarehouseError::Session(e.to_string()))
    }
}

fn rows_from_batches(batches: &[RecordBatch]) -> Result<Vec<Row>, arrow::error::ArrowError> {
    let options = FormatOptions::default();
    let mut rows = Vec::new();

    for batch in batches {
        let formatters = batch
            .columns()
            .iter()
            .map(|column| ArrayFormatter::try_new(column.as_ref(), &options))
            .collect::<Result<Vec<_>, _>>()?;

        for idx in 0..batch.num_rows() {
            let row = batch
                .columns()
                .iter()
                .zip(&formatters)
                .map(|(column, formatter)| {
                    if column.is_null(idx) {
                        None
                    } else {
                        Some(formatter.value(idx).to_string())
                    }
                })
                .collect();
            rows.push(row);
        }
    }

    Ok(rows)
}

/// JSON row sets arrive as an array of arrays of strings or nulls.
fn rows_from_json(value: &serde_json::Value) -> Vec<Row> {
    let Some(rows) = value.as_array() else {
        return Vec::new();
    };

    rows.iter()
        .filter_map(|row| row.as_array())
        .map(|cells| {
            cells
                .iter()
                .map(|cell| match cell {
                    serde_json::Value::Null => None,
                    serde_json::Value::String(s) => Some(s.clone()),
                    other => Some(other.to_string()),
                })
                .collect()
        })
        .collect()
}
