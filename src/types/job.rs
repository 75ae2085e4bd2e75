//! Job configurations in the shape the BigQuery `jobs.insert` endpoint expects.
//!
//! `JobConfiguration` is externally tagged, so `JobConfiguration::Load(..)`
//! serializes as `{"load": {...}}`, which is exactly the REST
//! `configuration` object.

use serde::{Deserialize, Serialize};

use super::schema::TableSchema;
use super::table::TableReference;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceFormat {
    Csv,
    #[default]
    NewlineDelimitedJson,
    Avro,
    Parquet,
    Orc,
    DatastoreBackup,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DestinationFormat {
    #[default]
    Csv,
    NewlineDelimitedJson,
    Avro,
    Parquet,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Compression {
    #[default]
    None,
    Gzip,
    Snappy,
    Deflate,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Encoding {
    #[default]
    #[serde(rename = "UTF-8")]
    Utf8,
    #[serde(rename = "ISO-8859-1")]
    Iso88591,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WriteDisposition {
    WriteTruncate,
    WriteAppend,
    WriteEmpty,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CreateDisposition {
    #[default]
    CreateIfNeeded,
    CreateNever,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueryPriority {
    #[default]
    Interactive,
    Batch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobConfiguration {
    Load(LoadJob),
    Query(QueryJob),
    Copy(CopyJob),
    Extract(ExtractJob),
}

impl JobConfiguration {
    /// Short label for logs.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Load(_) => "load",
            Self::Query(_) => "query",
            Self::Copy(_) => "copy",
            Self::Extract(_) => "extract",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadJob {
    pub destination_table: TableReference,
    pub source_uris: Vec<String>,
    pub source_format: SourceFormat,
    pub encoding: Encoding,
    pub write_disposition: WriteDisposition,
    pub create_disposition: CreateDisposition,
    pub max_bad_records: u32,
    pub ignore_unknown_values: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<TableSchema>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autodetect: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_delimiter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_leading_rows: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_jagged_rows: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_quoted_newlines: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UdfResource {
    pub resource_uri: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryJob {
    pub query: String,
    pub priority: QueryPriority,
    pub destination_table: TableReference,
    pub allow_large_results: bool,
    pub create_disposition: CreateDisposition,
    pub write_disposition: WriteDisposition,
    pub flatten_results: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub user_defined_function_resources: Vec<UdfResource>,
    pub use_legacy_sql: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyJob {
    pub source_table: TableReference,
    pub destination_table: TableReference,
    pub create_disposition: CreateDisposition,
    pub write_disposition: WriteDisposition,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractJob {
    pub source_table: TableReference,
    pub destination_uris: Vec<String>,
    pub destination_format: DestinationFormat,
    pub compression: Compression,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_delimiter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub print_header: Option<bool>,
}

/// REST `ErrorProto`, as found in a finished job's `status.errorResult`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorProto {
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

/// Handle to a submitted job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub project_id: String,
    pub job_id: String,
    pub location: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Running,
    Done { error: Option<ErrorProto> },
}

impl JobState {
    /// Parse the REST `status.state` string plus optional `errorResult`.
    pub fn from_rest(state: &str, error: Option<ErrorProto>) -> Self {
        match state {
            "DONE" => Self::Done { error },
            "RUNNING" => Self::Running,
            _ => Self::Pending,
        }
    }
}
