//! Process-local warehouse used for development and tests.
//!
//! Understands `PUT` through the session trait and `LIST @stage [PATTERN = '...']`
//! statements; anything else is rejected as unsupported.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;

use crate::config::WarehouseCredentials;
use crate::services::stage::{PutOptions, StageLocation};
use crate::services::warehouse::{
    Row, TransferResult, WarehouseConnector, WarehouseError, WarehouseSession,
};

#[derive(Debug, Clone)]
struct StoredObject {
    bytes: Vec<u8>,
    uploaded_at: DateTime<Utc>,
}

type Stages = HashMap<String, BTreeMap<String, StoredObject>>;

#[derive(Debug, Clone, Default)]
pub struct InMemoryWarehouse {
    stages: Arc<Mutex<Stages>>,
}

impl InMemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored object names for a stage, prefixed like the warehouse lists them.
    pub fn object_names(&self, stage: &StageLocation) -> Vec<String> {
        let prefix = stage_prefix(stage.as_str());
        self.lock()
            .get(&prefix)
            .map(|objects| objects.keys().map(|k| format!("{}/{}", prefix, k)).collect())
            .unwrap_or_default()
    }

    pub fn object_bytes(&self, stage: &StageLocation, name: &str) -> Option<Vec<u8>> {
        self.lock()
            .get(&stage_prefix(stage.as_str()))
            .and_then(|objects| objects.get(name))
            .map(|o| o.bytes.clone())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Stages> {
        // A poisoned map is still structurally valid.
        self.stages.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl WarehouseConnector for InMemoryWarehouse {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn connect(
        &self,
        credentials: &WarehouseCredentials,
    ) -> Result<Box<dyn WarehouseSession>, WarehouseError> {
        tracing::debug!("In-memory warehouse session opened for {}", credentials.user);
        Ok(Box::new(InMemorySession {
            warehouse: self.clone(),
            open: true,
        }))
    }
}

pub struct InMemorySession {
    warehouse: InMemoryWarehouse,
    open: bool,
}

impl InMemorySession {
    fn ensure_open(&self) -> Result<(), WarehouseError> {
        if self.open {
            Ok(())
        } else {
            Err(WarehouseError::Session("session is closed".to_string()))
        }
    }
}

#[async_trait]
impl WarehouseSession for InMemorySession {
    async fn put(
        &self,
        local_path: &Path,
        stage: &StageLocation,
        options: PutOptions,
    ) -> Result<TransferResult, WarehouseError> {
        self.ensure_open()?;

        let file_name = local_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| WarehouseError::Transfer("local path has no file name".to_string()))?;
        // Compression is not simulated; only the name changes.
        let object_name = if options.auto_compress {
            format!("{}.gz", file_name)
        } else {
            file_name.to_string()
        };

        let bytes = tokio::fs::read(local_path)
            .await
            .map_err(|e| WarehouseError::Transfer(format!("{}: {}", local_path.display(), e)))?;

        let mut stages = self.warehouse.lock();
        let objects = stages.entry(stage_prefix(stage.as_str())).or_default();
        if options.overwrite || !objects.contains_key(&object_name) {
            objects.insert(
                object_name.clone(),
                StoredObject {
                    bytes,
                    uploaded_at: Utc::now(),
                },
            );
        }

        Ok(TransferResult {
            source: local_path.display().to_string(),
            target: format!("{}/{}", stage.as_str(), object_name),
        })
    }

    async fn query(&self, sql: &str) -> Result<Vec<Row>, WarehouseError> {
        self.ensure_open()?;

        let statement = ListStatement::parse(sql)?;
        let stages = self.warehouse.lock();
        let Some(objects) = stages.get(&statement.stage) else {
            return Ok(Vec::new());
        };

        let rows = objects
            .iter()
            .map(|(name, object)| (format!("{}/{}", statement.stage, name), object))
            .filter(|(path, _)| {
                statement
                    .pattern
                    .as_ref()
                    .is_none_or(|pattern| pattern.is_match(path))
            })
            .map(|(path, object)| {
                vec![
                    Some(path),
                    Some(object.bytes.len().to_string()),
                    None,
                    Some(object.uploaded_at.to_rfc2822()),
                ]
            })
            .collect();

        Ok(rows)
    }

    async fn close(&mut self) -> Result<(), WarehouseError> {
        self.ensure_open()?;
        self.open = false;
        Ok(())
    }
}

struct ListStatement {
    stage: String,
    pattern: Option<Regex>,
}

impl ListStatement {
    fn parse(sql: &str) -> Result<Self, WarehouseError> {
        let grammar = Regex::new(
            r"(?is)^\s*LIST\s+(@\w+)(?:\s+PATTERN\s*=\s*'((?:[^'\\]|\\.)*)')?\s*;?\s*$",
        )
        .map_err(|e| WarehouseError::Query(e.to_string()))?;

        let captures = grammar
            .captures(sql)
            .ok_or_else(|| WarehouseError::Unsupported(sql.to_string()))?;

        let stage = stage_prefix(&captures[1]);
        let pattern = captures
            .get(2)
            .map(|m| {
                // Patterns must match the whole stage path.
                Regex::new(&format!("^(?:{})$", unescape_sql_string(m.as_str())))
                    .map_err(|e| WarehouseError::Query(format!("invalid pattern: {}", e)))
            })
            .transpose()?;

        Ok(Self { stage, pattern })
    }
}

fn stage_prefix(stage: &str) -> String {
    stage.trim_start_matches('@').to_lowercase()
}

fn unescape_sql_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(escaped) = chars.next() {
                out.push(escaped);
            }
        } else {
            out.push(c);
        }
    }
    out
}
