//! Durable table name → descriptor mapping.
//!
//! Descriptors live as records in the registry table of the same store as the
//! runtime tables. Every call runs on the connection it is handed, so the table
//! service can make a registry write the last step of an open transaction.

use crate::libs::ddl::build_registry_table;
use crate::libs::error::{Result, TableError};
use crate::libs::query_builder::quote_ident;
use crate::libs::schema::{MAX_COLUMN_NAME_LEN, TableDescriptor, TableName, TableSchema, check_identifier};
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::SqliteConnection;
use uuid::Uuid;

#[derive(Debug, sqlx::FromRow)]
struct DescriptorRecord {
    id: String,
    name: String,
    columns: String,
    created_at: String,
    updated_at: String,
}

impl DescriptorRecord {
    fn into_descriptor(self) -> Result<TableDescriptor> {
        let corrupt = |reason: String| TableError::CorruptDescriptor {
            table: self.name.clone(),
            reason,
        };
        let id = Uuid::parse_str(&self.id).map_err(|e| corrupt(format!("id: {e}")))?;
        let name = TableName::normalize(&self.name).map_err(|e| corrupt(e.to_string()))?;
        let schema: TableSchema =
            serde_json::from_str(&self.columns).map_err(|e| corrupt(format!("columns: {e}")))?;
        let created_at = parse_timestamp(&self.created_at).map_err(|e| corrupt(format!("created_at: {e}")))?;
        let updated_at = parse_timestamp(&self.updated_at).map_err(|e| corrupt(format!("updated_at: {e}")))?;
        Ok(TableDescriptor {
            id,
            name,
            schema,
            created_at,
            updated_at,
        })
    }
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn parse_timestamp(s: &str) -> std::result::Result<DateTime<Utc>, chrono::ParseError> {
    Ok(DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc))
}

fn encode_schema(table: &TableName, schema: &TableSchema) -> Result<String> {
    serde_json::to_string(schema).map_err(encoding_failed(table))
}

fn encoding_failed(table: &TableName) -> impl FnOnce(serde_json::Error) -> TableError {
    let table = table.to_string();
    move |e| TableError::CorruptDescriptor {
        table,
        reason: format!("columns could not be encoded: {e}"),
    }
}

pub struct SchemaRegistry {
    table: String,
}

impl SchemaRegistry {
    pub fn new(registry_table: &str) -> Result<Self> {
        check_identifier(registry_table, MAX_COLUMN_NAME_LEN)
            .map_err(|e| TableError::Config(format!("registry_table: {e}")))?;
        Ok(Self {
            table: registry_table.to_string(),
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Creates the registry table when it does not exist yet.
    pub async fn bootstrap(&self, conn: &mut SqliteConnection) -> Result<()> {
        build_registry_table(&self.table)
            .execute(conn)
            .await
            .map_err(TableError::registry("registry bootstrap"))?;
        Ok(())
    }

    /// Persists a new descriptor; fails if the name is already registered.
    pub async fn create(&self, conn: &mut SqliteConnection, descriptor: &TableDescriptor) -> Result<()> {
        if self.get(&mut *conn, &descriptor.name).await?.is_some() {
            return Err(TableError::DuplicateTable(descriptor.name.to_string()));
        }
        let sql = format!(
            "INSERT INTO {} (id, name, columns, created_at, updated_at) VALUES ($1, $2, $3, $4, $5)",
            quote_ident(&self.table)
        );
        sqlx::query(&sql)
            .bind(descriptor.id.to_string())
            .bind(descriptor.name.as_str())
            .bind(encode_schema(&descriptor.name, &descriptor.schema)?)
            .bind(format_timestamp(&descriptor.created_at))
            .bind(format_timestamp(&descriptor.updated_at))
            .execute(conn)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                    TableError::DuplicateTable(descriptor.name.to_string())
                }
                source => TableError::Registry {
                    context: "create descriptor".into(),
                    source,
                },
            })?;
        log::debug!("registered table '{}'", descriptor.name);
        Ok(())
    }

    pub async fn get(&self, conn: &mut SqliteConnection, name: &TableName) -> Result<Option<TableDescriptor>> {
        let sql = format!(
            "SELECT id, name, columns, created_at, updated_at FROM {} WHERE name = $1",
            quote_ident(&self.table)
        );
        let record = sqlx::query_as::<_, DescriptorRecord>(&sql)
            .bind(name.as_str())
            .fetch_optional(conn)
            .await
            .map_err(TableError::registry("get descriptor"))?;
        record.map(DescriptorRecord::into_descriptor).transpose()
    }

    /// Overwrites the schema of an existing descriptor wholesale.
    pub async fn replace_schema(
        &self,
        conn: &mut SqliteConnection,
        name: &TableName,
        schema: &TableSchema,
    ) -> Result<TableDescriptor> {
        let sql = format!(
            "UPDATE {} SET columns = $1, updated_at = $2 WHERE name = $3",
            quote_ident(&self.table)
        );
        let result = sqlx::query(&sql)
            .bind(encode_schema(name, schema)?)
            .bind(format_timestamp(&Utc::now()))
            .bind(name.as_str())
            .execute(&mut *conn)
            .await
            .map_err(TableError::registry("replace schema"))?;
        if result.rows_affected() == 0 {
            return Err(TableError::NotFound(name.to_string()));
        }
        self.get(conn, name)
            .await?
            .ok_or_else(|| TableError::NotFound(name.to_string()))
    }

    /// All descriptors in registration order.
    pub async fn list(&self, conn: &mut SqliteConnection) -> Result<Vec<TableDescriptor>> {
        let sql = format!(
            "SELECT id, name, columns, created_at, updated_at FROM {} ORDER BY rowid",
            quote_ident(&self.table)
        );
        sqlx::query_as::<_, DescriptorRecord>(&sql)
            .fetch_all(conn)
            .await
            .map_err(TableError::registry("list descriptors"))?
            .into_iter()
            .map(DescriptorRecord::into_descriptor)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::libs::error::ErrorKind;
    use crate::libs::schema::ColumnName;
    use crate::libs::types::LogicalType;
    use sqlx::Connection;

    async fn registry() -> (SchemaRegistry, SqliteConnection) {
        let mut conn = SqliteConnection::connect("sqlite::memory:").await.unwrap();
        let registry = SchemaRegistry::new("dynamic_tables").unwrap();
        registry.bootstrap(&mut conn).await.unwrap();
        (registry, conn)
    }

    fn descriptor(name: &str) -> TableDescriptor {
        TableDescriptor::new(
            TableName::normalize(name).unwrap(),
            TableSchema::from_titles(&["Name", "Age"], &["string", "number"]).unwrap(),
        )
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let (registry, mut conn) = registry().await;
        let people = descriptor("people");
        registry.create(&mut conn, &people).await.unwrap();

        let fetched = registry.get(&mut conn, &people.name).await.unwrap();
        assert_eq!(fetched, Some(people));
    }

    #[tokio::test]
    async fn absent_name_is_none() {
        let (registry, mut conn) = registry().await;
        let name = TableName::normalize("ghosts").unwrap();
        assert!(registry.get(&mut conn, &name).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_create_keeps_original() {
        let (registry, mut conn) = registry().await;
        let original = descriptor("people");
        registry.create(&mut conn, &original).await.unwrap();

        let err = registry.create(&mut conn, &descriptor("people")).await.unwrap_err();
        assert!(matches!(err, TableError::DuplicateTable(ref n) if n == "people"));
        let fetched = registry.get(&mut conn, &original.name).await.unwrap();
        assert_eq!(fetched, Some(original));
    }

    #[tokio::test]
    async fn replace_schema_overwrites_and_requires_existing() {
        let (registry, mut conn) = registry().await;
        let people = descriptor("people");
        registry.create(&mut conn, &people).await.unwrap();

        let mut schema = TableSchema::new();
        schema.insert(ColumnName::normalize("email").unwrap(), LogicalType::String);
        let updated = registry.replace_schema(&mut conn, &people.name, &schema).await.unwrap();
        assert_eq!(updated.schema, schema);
        assert_eq!(updated.id, people.id);
        assert_eq!(updated.created_at, people.created_at);

        let ghosts = TableName::normalize("ghosts").unwrap();
        let err = registry.replace_schema(&mut conn, &ghosts, &schema).await.unwrap_err();
        assert!(matches!(err, TableError::NotFound(_)));
    }

    #[tokio::test]
    async fn list_is_in_registration_order() {
        let (registry, mut conn) = registry().await;
        for name in ["zebras", "apples", "mangos"] {
            registry.create(&mut conn, &descriptor(name)).await.unwrap();
        }
        let names: Vec<_> = registry
            .list(&mut conn)
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.name.to_string())
            .collect();
        assert_eq!(names, ["zebras", "apples", "mangos"]);
    }

    #[test]
    fn encoding_failure_is_a_registry_error() {
        let name = TableName::normalize("people").unwrap();
        let cause = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = encoding_failed(&name)(cause);
        assert!(matches!(err, TableError::CorruptDescriptor { ref table, .. } if table == "people"));
        assert_eq!(err.kind(), ErrorKind::Registry);
    }
}
