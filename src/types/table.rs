use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A BigQuery dataset: `(project, dataset)` plus an optional expected location.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BqDataset {
    pub project_id: String,
    pub dataset_id: String,
    /// When set, `dataset_exists` rejects a dataset living elsewhere.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl BqDataset {
    pub fn new(project_id: impl Into<String>, dataset_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            dataset_id: dataset_id.into(),
            location: None,
        }
    }

    #[must_use]
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// A table inside this dataset.
    pub fn table(&self, table_id: impl Into<String>) -> BqTable {
        BqTable {
            dataset: self.clone(),
            table_id: table_id.into(),
        }
    }
}

impl fmt::Display for BqDataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.project_id, self.dataset_id)
    }
}

/// A BigQuery table: `(project, dataset, table)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BqTable {
    #[serde(flatten)]
    pub dataset: BqDataset,
    pub table_id: String,
}

impl BqTable {
    pub fn new(
        project_id: impl Into<String>,
        dataset_id: impl Into<String>,
        table_id: impl Into<String>,
    ) -> Self {
        BqDataset::new(project_id, dataset_id).table(table_id)
    }

    pub fn project_id(&self) -> &str {
        &self.dataset.project_id
    }

    pub fn dataset_id(&self) -> &str {
        &self.dataset.dataset_id
    }

    /// Same dataset, different table name.
    #[must_use]
    pub fn sibling(&self, table_id: impl Into<String>) -> Self {
        self.dataset.table(table_id)
    }

    /// `bq://project/dataset/table`.
    pub fn uri(&self) -> String {
        format!(
            "bq://{}/{}/{}",
            self.dataset.project_id, self.dataset.dataset_id, self.table_id
        )
    }

    pub(crate) fn reference(&self) -> TableReference {
        TableReference {
            project_id: self.dataset.project_id.clone(),
            dataset_id: self.dataset.dataset_id.clone(),
            table_id: self.table_id.clone(),
        }
    }
}

impl fmt::Display for BqTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.dataset, self.table_id)
    }
}

impl FromStr for BqTable {
    type Err = String;

    /// Accepts `project:dataset.table` and `project.dataset.table`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (project, rest) = s
            .split_once(':')
            .or_else(|| s.split_once('.'))
            .ok_or_else(|| format!("invalid table reference '{s}': missing project"))?;
        let (dataset, table) = rest
            .split_once('.')
            .ok_or_else(|| format!("invalid table reference '{s}': missing dataset"))?;
        if project.is_empty() || dataset.is_empty() || table.is_empty() || table.contains('.') {
            return Err(format!(
                "invalid table reference '{s}': expected project:dataset.table"
            ));
        }
        Ok(Self::new(project, dataset, table))
    }
}

/// REST `TableReference`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableReference {
    pub project_id: String,
    pub dataset_id: String,
    pub table_id: String,
}

impl From<TableReference> for BqTable {
    fn from(r: TableReference) -> Self {
        Self::new(r.project_id, r.dataset_id, r.table_id)
    }
}

/// REST `DatasetReference`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetReference {
    pub project_id: String,
    pub dataset_id: String,
}

impl From<&BqDataset> for DatasetReference {
    fn from(d: &BqDataset) -> Self {
        Self {
            project_id: d.project_id.clone(),
            dataset_id: d.dataset_id.clone(),
        }
    }
}
