use serde::{Deserialize, Serialize};

/// Column type, using the REST (legacy) spellings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FieldType {
    String,
    Bytes,
    Integer,
    Float,
    Numeric,
    Boolean,
    Timestamp,
    Date,
    Time,
    Datetime,
    Record,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FieldMode {
    #[default]
    Nullable,
    Required,
    Repeated,
}

/// One column of a table schema (REST `TableFieldSchema`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub mode: FieldMode,
    /// Sub-fields of a `RECORD`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<SchemaField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl SchemaField {
    pub fn new(name: impl Into<String>, field_type: FieldType, mode: FieldMode) -> Self {
        Self {
            name: name.into(),
            field_type,
            mode,
            fields: Vec::new(),
            description: None,
        }
    }

    pub fn nullable(name: impl Into<String>, field_type: FieldType) -> Self {
        Self::new(name, field_type, FieldMode::Nullable)
    }

    pub fn required(name: impl Into<String>, field_type: FieldType) -> Self {
        Self::new(name, field_type, FieldMode::Required)
    }

    /// Whether a JSON value is acceptable for this column.
    ///
    /// Mirrors what a JSON load accepts: numbers may arrive as strings, and
    /// date and time types are accepted as any string.
    pub fn accepts(&self, value: &serde_json::Value) -> bool {
        if value.is_null() {
            return self.mode != FieldMode::Required;
        }
        if self.mode == FieldMode::Repeated {
            return value.as_array().is_some_and(|items| {
                let inner = Self {
                    mode: FieldMode::Nullable,
                    ..self.clone()
                };
                items.iter().all(|item| !item.is_null() && inner.accepts(item))
            });
        }
        match self.field_type {
            FieldType::String
            | FieldType::Bytes
            | FieldType::Timestamp
            | FieldType::Date
            | FieldType::Time
            | FieldType::Datetime => value.is_string(),
            FieldType::Integer => {
                value.is_i64()
                    || value.is_u64()
                    || value.as_str().is_some_and(|s| s.parse::<i64>().is_ok())
            }
            FieldType::Float | FieldType::Numeric => {
                value.is_number() || value.as_str().is_some_and(|s| s.parse::<f64>().is_ok())
            }
            FieldType::Boolean => {
                value.is_boolean()
                    || value.as_str().is_some_and(|s| {
                        s.eq_ignore_ascii_case("true") || s.eq_ignore_ascii_case("false")
                    })
            }
            FieldType::Record => value
                .as_object()
                .is_some_and(|obj| record_accepts(&self.fields, obj, true)),
        }
    }
}

/// Check a JSON object against a list of fields.
///
/// Unknown keys are rejected unless `ignore_unknown` is set.
pub fn record_accepts(
    fields: &[SchemaField],
    obj: &serde_json::Map<String, serde_json::Value>,
    ignore_unknown: bool,
) -> bool {
    if !ignore_unknown && obj.keys().any(|k| !fields.iter().any(|f| &f.name == k)) {
        return false;
    }
    fields
        .iter()
        .all(|f| f.accepts(obj.get(&f.name).unwrap_or(&serde_json::Value::Null)))
}

/// REST `TableSchema`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub fields: Vec<SchemaField>,
}
