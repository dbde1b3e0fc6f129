// schema.rs
use crate::libs::error::{Result, TableError};
use crate::libs::types::{LogicalType, validate_type_token};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use uuid::Uuid;

pub const MAX_COLUMN_NAME_LEN: usize = 63;
pub const MAX_TABLE_NAME_LEN: usize = 48;

/// Names the store gives every table implicitly; a user column must not shadow them.
const RESERVED_NAMES: &[&str] = &["rowid", "oid", "_rowid_"];

/// Lower-cases and replaces spaces with underscores. Idempotent.
pub fn normalize_title(title: &str) -> String {
    title.to_lowercase().replace(' ', "_")
}

/// Allow-list for anything that ends up as an identifier in statement text.
pub fn check_identifier(name: &str, max_len: usize) -> Result<()> {
    let invalid = |reason: &str| TableError::InvalidIdentifier {
        name: name.to_string(),
        reason: reason.to_string(),
    };
    let mut chars = name.chars();
    match chars.next() {
        None => return Err(invalid("must not be empty")),
        Some(c) if !(c.is_ascii_lowercase() || c == '_') => {
            return Err(invalid("must start with a lowercase letter or underscore"));
        }
        Some(_) => {}
    }
    if !chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_') {
        return Err(invalid("only lowercase letters, digits and underscores are allowed"));
    }
    if name.len() > max_len {
        return Err(invalid(&format!("longer than {max_len} characters")));
    }
    if RESERVED_NAMES.contains(&name) {
        return Err(invalid("reserved by the store"));
    }
    Ok(())
}

/// Normalized column identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ColumnName(String);

impl ColumnName {
    /// Normalizes a user supplied title and checks it against the allow-list.
    pub fn normalize(title: &str) -> Result<Self> {
        let name = normalize_title(title);
        check_identifier(&name, MAX_COLUMN_NAME_LEN)?;
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ColumnName {
    type Error = TableError;

    fn try_from(value: String) -> Result<Self> {
        Self::normalize(&value)
    }
}

impl From<ColumnName> for String {
    fn from(value: ColumnName) -> Self {
        value.0
    }
}

// Lets schema and row maps be queried with a plain `&str`.
impl Borrow<str> for ColumnName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ColumnName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Normalized table name; registry key and lock key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TableName(String);

impl TableName {
    pub fn normalize(name: &str) -> Result<Self> {
        let name = normalize_title(name);
        check_identifier(&name, MAX_TABLE_NAME_LEN)?;
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for TableName {
    type Error = TableError;

    fn try_from(value: String) -> Result<Self> {
        Self::normalize(&value)
    }
}

impl From<TableName> for String {
    fn from(value: TableName) -> Self {
        value.0
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ordered column name → logical type mapping of one table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TableSchema {
    columns: IndexMap<ColumnName, LogicalType>,
}

impl TableSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a schema from parallel title/type lists as a caller supplies them.
    pub fn from_titles<T, K>(titles: &[T], types: &[K]) -> Result<Self>
    where
        T: AsRef<str>,
        K: AsRef<str>,
    {
        let logical = types
            .iter()
            .map(|t| validate_type_token(t.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        if titles.len() != logical.len() {
            return Err(TableError::SchemaMismatch(
                "field_types and field_titles must have the same length".into(),
            ));
        }
        if titles.is_empty() {
            return Err(TableError::SchemaMismatch(
                "at least one field is required".into(),
            ));
        }

        let mut schema = Self::new();
        for (title, ty) in titles.iter().zip(logical) {
            schema.insert(ColumnName::normalize(title.as_ref())?, ty);
        }
        Ok(schema)
    }

    /// Inserts or overrides a column; an overridden column keeps its position.
    pub fn insert(&mut self, name: ColumnName, ty: LogicalType) -> Option<LogicalType> {
        self.columns.insert(name, ty)
    }

    pub fn get(&self, name: &str) -> Option<LogicalType> {
        self.columns.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ColumnName, &LogicalType)> {
        self.columns.iter()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

impl FromIterator<(ColumnName, LogicalType)> for TableSchema {
    fn from_iter<I: IntoIterator<Item = (ColumnName, LogicalType)>>(iter: I) -> Self {
        Self {
            columns: iter.into_iter().collect(),
        }
    }
}

/// Union of both schemas; on a name collision the incoming type wins.
///
/// Existing columns keep their position, new ones are appended in incoming order.
/// No compatibility check is made when a type is overwritten.
pub fn merge(existing: &TableSchema, incoming: &TableSchema) -> TableSchema {
    let mut merged = existing.clone();
    for (name, ty) in incoming.iter() {
        merged.insert(name.clone(), *ty);
    }
    merged
}

/// Registry record of one runtime-defined table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDescriptor {
    pub id: Uuid,
    pub name: TableName,
    pub schema: TableSchema,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TableDescriptor {
    pub fn new(name: TableName, schema: TableSchema) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name,
            schema,
            created_at: now,
            updated_at: now,
        }
    }
}
