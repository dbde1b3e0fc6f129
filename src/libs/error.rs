//! Error types for table service operations

use indexmap::IndexMap;
use serde::Serialize;
use thiserror::Error;

pub const NON_FIELD_ERRORS: &str = "non_field_errors";

/// A single field that failed row validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub reason: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Errors produced by the registry, the codecs and the table service.
#[derive(Error, Debug)]
pub enum TableError {
    #[error("Invalid field type '{token}'. Field types must be 'string', 'number', or 'boolean'.")]
    InvalidType { token: String },

    #[error("{0}")]
    SchemaMismatch(String),

    #[error("Invalid identifier '{name}': {reason}")]
    InvalidIdentifier { name: String, reason: String },

    #[error("A table with the name '{0}' already exists.")]
    DuplicateTable(String),

    #[error("A table with the name '{0}' does not exist.")]
    NotFound(String),

    #[error("Row validation failed for {} field(s)", .0.len())]
    Validation(Vec<FieldError>),

    #[error("Physical store error during {context}: {source}")]
    PhysicalStore {
        context: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Registry error during {context}: {source}")]
    Registry {
        context: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Corrupt descriptor for table '{table}': {reason}")]
    CorruptDescriptor { table: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Machine-readable error kind carried in error payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidType,
    SchemaMismatch,
    InvalidIdentifier,
    DuplicateTable,
    NotFound,
    Validation,
    PhysicalStore,
    Registry,
    Config,
}

/// Structured error as handed to the transport layer.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorPayload {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<IndexMap<String, Vec<String>>>,
}

impl TableError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TableError::InvalidType { .. } => ErrorKind::InvalidType,
            TableError::SchemaMismatch(_) => ErrorKind::SchemaMismatch,
            TableError::InvalidIdentifier { .. } => ErrorKind::InvalidIdentifier,
            TableError::DuplicateTable(_) => ErrorKind::DuplicateTable,
            TableError::NotFound(_) => ErrorKind::NotFound,
            TableError::Validation(_) => ErrorKind::Validation,
            TableError::PhysicalStore { .. } => ErrorKind::PhysicalStore,
            TableError::Registry { .. } | TableError::CorruptDescriptor { .. } => {
                ErrorKind::Registry
            }
            TableError::Config(_) => ErrorKind::Config,
        }
    }

    /// Errors raised before anything was written to the store.
    pub fn is_validation(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::InvalidType
                | ErrorKind::SchemaMismatch
                | ErrorKind::InvalidIdentifier
                | ErrorKind::Validation
        )
    }

    pub fn to_payload(&self) -> ErrorPayload {
        let fields = match self {
            TableError::Validation(errors) => {
                let mut map: IndexMap<String, Vec<String>> = IndexMap::new();
                for e in errors {
                    map.entry(e.field.clone()).or_default().push(e.reason.clone());
                }
                Some(map)
            }
            _ => None,
        };
        ErrorPayload {
            kind: self.kind(),
            message: self.to_string(),
            fields,
        }
    }

    /// Adapter for `map_err` on physical DDL/DML execution.
    pub(crate) fn store(context: impl Into<String>) -> impl FnOnce(sqlx::Error) -> TableError {
        let context = context.into();
        move |source| TableError::PhysicalStore { context, source }
    }

    /// Adapter for `map_err` on registry reads and writes.
    pub(crate) fn registry(context: impl Into<String>) -> impl FnOnce(sqlx::Error) -> TableError {
        let context = context.into();
        move |source| TableError::Registry { context, source }
    }
}

pub type Result<T> = std::result::Result<T, TableError>;
