//! Stage naming, statement text for `PUT`/`LIST`, and listing rows.

use std::path::Path;

use serde::Serialize;

use crate::services::warehouse::Row;

/// Landing stage for every upload.
pub const MY_FILES: &str = "@MY_FILES";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageLocation(String);

impl Default for StageLocation {
    fn default() -> Self {
        Self(MY_FILES.to_string())
    }
}

/// Transfer flags sent with `PUT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PutOptions {
    pub overwrite: bool,
    pub auto_compress: bool,
}

impl PutOptions {
    /// Replace any object of the same name and keep the file byte-identical.
    pub const REPLACE_UNCOMPRESSED: Self = Self {
        overwrite: true,
        auto_compress: false,
    };
}

impl StageLocation {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn put_sql(&self, local_path: &Path, options: PutOptions) -> String {
        let path = local_path.to_string_lossy().replace('\\', "/");
        format!(
            "PUT '{}' {} OVERWRITE = {} AUTO_COMPRESS = {}",
            escape_sql_string(&format!("file://{}", path)),
            self.0,
            sql_bool(options.overwrite),
            sql_bool(options.auto_compress),
        )
    }

    pub fn list_sql(&self) -> String {
        format!("LIST {}", self.0)
    }

    /// `LIST` restricted to objects whose last path segment is exactly `filename`.
    pub fn list_matching_sql(&self, filename: &str) -> String {
        format!(
            "LIST {} PATTERN = '{}'",
            self.0,
            escape_sql_string(&literal_pattern(filename))
        )
    }
}

/// Regex matching a stage path that ends in `filename`, taken literally.
pub fn literal_pattern(filename: &str) -> String {
    format!("(.*/)?{}", regex::escape(filename))
}

fn escape_sql_string(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

fn sql_bool(value: bool) -> &'static str {
    if value { "TRUE" } else { "FALSE" }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageObject {
    pub name: String,
    pub size: Option<u64>,
    pub md5: Option<String>,
    pub last_modified: Option<String>,
}

impl StageObject {
    /// Object name without the stage prefix (`my_files/sales.csv` -> `sales.csv`).
    pub fn file_name(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StageListing {
    pub objects: Vec<StageObject>,
}

impl StageListing {
    /// Builds a listing from `LIST` result rows: name, size, md5, last_modified.
    pub fn from_rows(rows: Vec<Row>) -> Self {
        let objects = rows
            .into_iter()
            .filter_map(|row| {
                let mut cells = row.into_iter();
                let name = cells.next().flatten()?;
                let size = cells.next().flatten().and_then(|s| s.parse().ok());
                let md5 = cells.next().flatten();
                let last_modified = cells.next().flatten();
                Some(StageObject {
                    name,
                    size,
                    md5,
                    last_modified,
                })
            })
            .collect();

        Self { objects }
    }

    pub fn contains_file(&self, filename: &str) -> bool {
        self.objects.iter().any(|o| o.file_name() == filename)
    }

    pub fn names(&self) -> Vec<String> {
        self.objects.iter().map(|o| o.name.clone()).collect()
    }
}
