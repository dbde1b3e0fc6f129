use crate::libs::error::{Result, TableError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Column kinds a caller may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogicalType {
    String,
    Number,
    Boolean,
}

/// Storage representation of a logical type in the physical store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhysicalColumnType {
    Text,
    Real,
    Boolean,
}

impl LogicalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogicalType::String => "string",
            LogicalType::Number => "number",
            LogicalType::Boolean => "boolean",
        }
    }

    pub fn from_physical(physical: PhysicalColumnType) -> Self {
        match physical {
            PhysicalColumnType::Text => LogicalType::String,
            PhysicalColumnType::Real => LogicalType::Number,
            PhysicalColumnType::Boolean => LogicalType::Boolean,
        }
    }
}

impl fmt::Display for LogicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PhysicalColumnType {
    pub fn sql_type(&self) -> &'static str {
        match self {
            PhysicalColumnType::Text => "TEXT",
            PhysicalColumnType::Real => "REAL",
            PhysicalColumnType::Boolean => "BOOLEAN",
        }
    }

    /// Reads back a declared column type as reported by the store.
    pub fn from_declared(declared: &str) -> Option<Self> {
        match declared.trim().to_ascii_uppercase().as_str() {
            "TEXT" => Some(PhysicalColumnType::Text),
            "REAL" => Some(PhysicalColumnType::Real),
            "BOOLEAN" => Some(PhysicalColumnType::Boolean),
            _ => None,
        }
    }
}

pub fn to_physical_type(logical: LogicalType) -> PhysicalColumnType {
    match logical {
        LogicalType::String => PhysicalColumnType::Text,
        LogicalType::Number => PhysicalColumnType::Real,
        LogicalType::Boolean => PhysicalColumnType::Boolean,
    }
}

/// Accepts exactly `string`, `number` or `boolean`.
pub fn validate_type_token(token: &str) -> Result<LogicalType> {
    match token {
        "string" => Ok(LogicalType::String),
        "number" => Ok(LogicalType::Number),
        "boolean" => Ok(LogicalType::Boolean),
        _ => Err(TableError::InvalidType {
            token: token.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn physical_mapping_is_stable() {
        for token in ["string", "number", "boolean"] {
            let first = to_physical_type(validate_type_token(token).unwrap());
            let second = to_physical_type(validate_type_token(token).unwrap());
            assert_eq!(first, second);
            assert_eq!(
                LogicalType::from_physical(first),
                validate_type_token(token).unwrap()
            );
        }
        assert_eq!(to_physical_type(LogicalType::Number).sql_type(), "REAL");
    }

    #[test]
    fn unknown_tokens_are_rejected() {
        for token in ["invalid_type", "String", "int", ""] {
            match validate_type_token(token) {
                Err(TableError::InvalidType { token: t }) => assert_eq!(t, token),
                other => panic!("expected InvalidType for {token:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn declared_types_read_back() {
        assert_eq!(
            PhysicalColumnType::from_declared("boolean"),
            Some(PhysicalColumnType::Boolean)
        );
        assert_eq!(PhysicalColumnType::from_declared("INTEGER"), None);
    }
}
