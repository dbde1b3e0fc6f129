use crate::libs::error::{Result, TableError};
use crate::libs::schema::{MAX_COLUMN_NAME_LEN, check_identifier};
use serde::{Deserialize, Serialize};

/// What row validation does with keys the schema does not declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownFieldPolicy {
    #[default]
    Ignore,
    Reject,
}

/// Table service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// sqlx connection URL, e.g. `sqlite://tables.db` or `sqlite::memory:`
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Pool size. In-memory databases always use a single connection.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// How long a connection waits for another writer before giving up.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Prepended to every runtime table name to form the physical table name.
    #[serde(default = "default_table_prefix")]
    pub table_prefix: String,

    /// Table holding the registry's descriptors.
    #[serde(default = "default_registry_table")]
    pub registry_table: String,

    #[serde(default)]
    pub unknown_fields: UnknownFieldPolicy,
}

fn default_database_url() -> String {
    "sqlite::memory:".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_table_prefix() -> String {
    "dyn_".to_string()
}

fn default_registry_table() -> String {
    "dynamic_tables".to_string()
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            max_connections: default_max_connections(),
            busy_timeout_ms: default_busy_timeout_ms(),
            table_prefix: default_table_prefix(),
            registry_table: default_registry_table(),
            unknown_fields: UnknownFieldPolicy::default(),
        }
    }
}

impl ServiceConfig {
    pub fn from_json_str(s: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(s).map_err(|e| TableError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads `DYNTABLES_DATABASE_URL`, `DYNTABLES_MAX_CONNECTIONS`,
    /// `DYNTABLES_BUSY_TIMEOUT_MS`, `DYNTABLES_TABLE_PREFIX`, `DYNTABLES_REGISTRY_TABLE` and
    /// `DYNTABLES_UNKNOWN_FIELDS` on top of the defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(url) = lookup("DYNTABLES_DATABASE_URL") {
            config.database_url = url;
        }
        if let Some(n) = lookup("DYNTABLES_MAX_CONNECTIONS") {
            config.max_connections = n.parse().map_err(|_| {
                TableError::Config(format!("DYNTABLES_MAX_CONNECTIONS is not a number: {n}"))
            })?;
        }
        if let Some(ms) = lookup("DYNTABLES_BUSY_TIMEOUT_MS") {
            config.busy_timeout_ms = ms.parse().map_err(|_| {
                TableError::Config(format!("DYNTABLES_BUSY_TIMEOUT_MS is not a number: {ms}"))
            })?;
        }
        if let Some(prefix) = lookup("DYNTABLES_TABLE_PREFIX") {
            config.table_prefix = prefix;
        }
        if let Some(table) = lookup("DYNTABLES_REGISTRY_TABLE") {
            config.registry_table = table;
        }
        if let Some(policy) = lookup("DYNTABLES_UNKNOWN_FIELDS") {
            config.unknown_fields = match policy.to_ascii_lowercase().as_str() {
                "ignore" => UnknownFieldPolicy::Ignore,
                "reject" => UnknownFieldPolicy::Reject,
                other => {
                    return Err(TableError::Config(format!(
                        "DYNTABLES_UNKNOWN_FIELDS must be 'ignore' or 'reject', got '{other}'"
                    )));
                }
            };
        }
        config.validate()?;
        Ok(config)
    }

    /// Prefix and registry table end up in statement text, so they go through
    /// the same allow-list as user identifiers.
    pub fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            return Err(TableError::Config("max_connections must be at least 1".into()));
        }
        if !self.table_prefix.is_empty() {
            check_identifier(&self.table_prefix, MAX_COLUMN_NAME_LEN)
                .map_err(|e| TableError::Config(format!("table_prefix: {e}")))?;
        }
        check_identifier(&self.registry_table, MAX_COLUMN_NAME_LEN)
            .map_err(|e| TableError::Config(format!("registry_table: {e}")))?;
        if !self.table_prefix.is_empty() && self.registry_table.starts_with(&self.table_prefix) {
            return Err(TableError::Config(format!(
                "registry_table '{}' must not start with table_prefix '{}'",
                self.registry_table, self.table_prefix
            )));
        }
        Ok(())
    }

    pub fn is_in_memory(&self) -> bool {
        self.database_url.contains(":memory:") || self.database_url.contains("mode=memory")
    }

    pub fn physical_name(&self, table: &str) -> String {
        format!("{}{}", self.table_prefix, table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn json_fills_defaults() {
        let config = ServiceConfig::from_json_str(r#"{"table_prefix": "tb_"}"#).unwrap();
        assert_eq!(config.table_prefix, "tb_");
        assert_eq!(config.registry_table, "dynamic_tables");
        assert_eq!(config.max_connections, 5);
        assert_eq!(config.busy_timeout_ms, 5_000);
        assert_eq!(config.unknown_fields, UnknownFieldPolicy::Ignore);
        assert!(config.is_in_memory());
        assert_eq!(config.physical_name("people"), "tb_people");
    }

    #[test]
    fn env_overrides_defaults() {
        let vars: HashMap<&str, &str> = [
            ("DYNTABLES_DATABASE_URL", "sqlite://tables.db"),
            ("DYNTABLES_MAX_CONNECTIONS", "8"),
            ("DYNTABLES_BUSY_TIMEOUT_MS", "250"),
            ("DYNTABLES_UNKNOWN_FIELDS", "Reject"),
        ]
        .into_iter()
        .collect();
        let config =
            ServiceConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.database_url, "sqlite://tables.db");
        assert_eq!(config.max_connections, 8);
        assert_eq!(config.busy_timeout_ms, 250);
        assert_eq!(config.unknown_fields, UnknownFieldPolicy::Reject);
        assert!(!config.is_in_memory());
    }

    #[test]
    fn unsafe_identifiers_are_refused() {
        let err = ServiceConfig::from_json_str(r#"{"registry_table": "x; DROP TABLE y"}"#);
        assert!(matches!(err, Err(TableError::Config(_))));

        let err = ServiceConfig::from_json_str(
            r#"{"table_prefix": "dyn_", "registry_table": "dyn_registry"}"#,
        );
        assert!(matches!(err, Err(TableError::Config(_))));

        let err = ServiceConfig::from_json_str(r#"{"max_connections": 0}"#);
        assert!(matches!(err, Err(TableError::Config(_))));
    }
}
