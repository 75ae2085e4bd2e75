use serde::{Deserialize, Serialize};

use super::job::{
    Compression, CreateDisposition, DestinationFormat, Encoding, QueryPriority, SourceFormat,
    WriteDisposition,
};
use super::schema::SchemaField;

const fn default_true() -> bool {
    true
}

fn default_field_delimiter() -> String {
    ",".to_string()
}

/// One task in a definitions file, e.g.
///
/// ```json
/// [
///   {"type": "load", "table": "proj:ds.raw", "source_uris": ["gs://bucket/raw.json"],
///    "schema": [{"name": "field1", "type": "STRING"}]},
///   {"type": "query", "table": "proj:ds.summary", "requires": ["proj:ds.raw"],
///    "query": "SELECT field1 FROM [proj:ds.raw]"}
/// ]
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskDefinition {
    Load(LoadDefinition),
    Query(QueryDefinition),
    View(ViewDefinition),
    Extract(ExtractDefinition),
    External(ExternalDefinition),
}

impl TaskDefinition {
    /// Name other definitions use in `requires`. Defaults to the table reference.
    pub fn name(&self) -> &str {
        let (name, table) = match self {
            Self::Load(d) => (&d.name, &d.table),
            Self::Query(d) => (&d.name, &d.table),
            Self::View(d) => (&d.name, &d.table),
            Self::Extract(d) => (&d.name, &d.table),
            Self::External(d) => (&d.name, &d.table),
        };
        name.as_deref().unwrap_or(table)
    }

    /// `project:dataset.table` the task writes (or, for extract, reads).
    pub fn table(&self) -> &str {
        match self {
            Self::Load(d) => &d.table,
            Self::Query(d) => &d.table,
            Self::View(d) => &d.table,
            Self::Extract(d) => &d.table,
            Self::External(d) => &d.table,
        }
    }

    pub fn requires(&self) -> &[String] {
        match self {
            Self::Load(d) => &d.requires,
            Self::Query(d) => &d.requires,
            Self::View(d) => &d.requires,
            Self::Extract(d) => &d.requires,
            Self::External(_) => &[],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadDefinition {
    pub name: Option<String>,
    pub table: String,
    #[serde(default)]
    pub requires: Vec<String>,
    pub source_uris: Vec<String>,
    /// Empty → schema autodetection.
    #[serde(default)]
    pub schema: Vec<SchemaField>,
    #[serde(default)]
    pub source_format: SourceFormat,
    #[serde(default)]
    pub encoding: Encoding,
    /// Defaults to `WRITE_EMPTY`.
    pub write_disposition: Option<WriteDisposition>,
    #[serde(default)]
    pub create_disposition: CreateDisposition,
    #[serde(default)]
    pub max_bad_records: u32,
    #[serde(default)]
    pub ignore_unknown_values: bool,
    /// CSV only.
    pub field_delimiter: Option<String>,
    /// CSV only.
    pub skip_leading_rows: Option<u32>,
    #[serde(default)]
    pub allow_jagged_rows: bool,
    #[serde(default)]
    pub allow_quoted_newlines: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryDefinition {
    pub name: Option<String>,
    pub table: String,
    #[serde(default)]
    pub requires: Vec<String>,
    pub query: String,
    #[serde(default)]
    pub priority: QueryPriority,
    /// Defaults to `WRITE_TRUNCATE`.
    pub write_disposition: Option<WriteDisposition>,
    #[serde(default)]
    pub create_disposition: CreateDisposition,
    #[serde(default = "default_true")]
    pub flatten_results: bool,
    #[serde(default = "default_true")]
    pub use_legacy_sql: bool,
    #[serde(default)]
    pub udf_resource_uris: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewDefinition {
    pub name: Option<String>,
    pub table: String,
    #[serde(default)]
    pub requires: Vec<String>,
    pub view: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractDefinition {
    pub name: Option<String>,
    /// Source table.
    pub table: String,
    #[serde(default)]
    pub requires: Vec<String>,
    pub destination_uris: Vec<String>,
    #[serde(default)]
    pub destination_format: DestinationFormat,
    #[serde(default)]
    pub compression: Compression,
    #[serde(default = "default_field_delimiter")]
    pub field_delimiter: String,
    #[serde(default = "default_true")]
    pub print_header: bool,
}

/// A table produced outside this run; only its existence is checked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalDefinition {
    pub name: Option<String>,
    pub table: String,
}
