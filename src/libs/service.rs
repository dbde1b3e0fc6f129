use crate::libs::codec::{Record, decode_row, physical_row, validate_value};
use crate::libs::config::ServiceConfig;
use crate::libs::ddl::{build_create_table, build_drop_table, build_rename_table};
use crate::libs::error::{Result, TableError};
use crate::libs::handle::TableHandle;
use crate::libs::locks::TableLocks;
use crate::libs::query_builder::{QueryBuilder, build_insert, build_select_all};
use crate::libs::registry::SchemaRegistry;
use crate::libs::schema::{TableDescriptor, TableName, TableSchema, merge};
use crate::libs::types::{LogicalType, PhysicalColumnType};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::{Sqlite, SqliteConnection, Transaction};
use std::str::FromStr;
use std::time::Duration;

/// Suffix of the shadow table an update builds before swapping it in.
pub const SHADOW_SUFFIX: &str = "__rebuild";

/// Body of a create call: `{table_name, field_titles, field_types}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTableRequest {
    pub table_name: String,
    pub field_titles: Vec<String>,
    pub field_types: Vec<String>,
}

/// Body of an update call; the table name travels separately.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateTableRequest {
    pub field_titles: Vec<String>,
    pub field_types: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TypeMismatch {
    pub column: String,
    pub declared: LogicalType,
    pub physical: String,
}

/// Comparison of a descriptor with the physical columns of its table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsistencyReport {
    pub table: String,
    /// Declared but absent from the physical table.
    pub missing: Vec<String>,
    /// Present physically but not declared; tolerated.
    pub undeclared: Vec<String>,
    pub type_mismatches: Vec<TypeMismatch>,
}

impl ConsistencyReport {
    pub fn is_consistent(&self) -> bool {
        self.missing.is_empty() && self.type_mismatches.is_empty()
    }
}

/// Creates, evolves and populates runtime-defined tables.
///
/// Structural changes take the table's write lock and run as one store
/// transaction in which the registry write comes last. Inserts and listings
/// take the read lock.
pub struct TableService {
    config: ServiceConfig,
    pool: SqlitePool,
    registry: SchemaRegistry,
    locks: TableLocks,
}

impl TableService {
    pub async fn connect(config: ServiceConfig) -> Result<Self> {
        config.validate()?;
        log::info!("Connecting to {}", config.database_url);
        let mut options = SqliteConnectOptions::from_str(&config.database_url)
            .map_err(TableError::store("parse database url"))?
            .create_if_missing(true)
            .busy_timeout(Duration::from_millis(config.busy_timeout_ms));
        if !config.is_in_memory() {
            // Readers keep going while one connection rebuilds a table.
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        let mut pool_options = SqlitePoolOptions::new().max_connections(config.max_connections);
        if config.is_in_memory() {
            // Every connection to an in-memory database opens a database of its own.
            pool_options = pool_options
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }
        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(TableError::store("connect"))?;
        Self::with_pool(pool, config).await
    }

    /// Wraps an existing pool and makes sure the registry table exists.
    pub async fn with_pool(pool: SqlitePool, config: ServiceConfig) -> Result<Self> {
        config.validate()?;
        let registry = SchemaRegistry::new(&config.registry_table)?;
        let mut conn = pool
            .acquire()
            .await
            .map_err(TableError::registry("acquire connection"))?;
        registry.bootstrap(&mut *conn).await?;
        drop(conn);
        Ok(Self {
            config,
            pool,
            registry,
            locks: TableLocks::new(),
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn physical_name(&self, table: &TableName) -> String {
        self.config.physical_name(table.as_str())
    }

    pub fn table(&self, name: &str) -> TableHandle<'_> {
        TableHandle::new(self, name)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Names that cannot be valid identifiers cannot name an existing table.
    fn lookup_name(&self, name: &str) -> Result<TableName> {
        TableName::normalize(name).map_err(|_| TableError::NotFound(name.to_string()))
    }

    async fn require(&self, conn: &mut SqliteConnection, table: &TableName) -> Result<TableDescriptor> {
        self.registry
            .get(conn, table)
            .await?
            .ok_or_else(|| TableError::NotFound(table.to_string()))
    }

    async fn acquire(&self) -> Result<sqlx::pool::PoolConnection<sqlx::Sqlite>> {
        self.pool
            .acquire()
            .await
            .map_err(TableError::store("acquire connection"))
    }

    /// Opens a transaction that holds the store's write lock from BEGIN, so a
    /// concurrent writer makes it wait on the busy timeout instead of failing.
    async fn begin_structural(&self) -> Result<Transaction<'static, Sqlite>> {
        self.pool
            .begin_with("BEGIN IMMEDIATE")
            .await
            .map_err(TableError::store("begin transaction"))
    }

    // -------- Create table --------
    pub async fn create_table<T, K>(&self, name: &str, titles: &[T], types: &[K]) -> Result<TableDescriptor>
    where
        T: AsRef<str>,
        K: AsRef<str>,
    {
        let table = TableName::normalize(name)?;
        if table.as_str().ends_with(SHADOW_SUFFIX) {
            return Err(TableError::InvalidIdentifier {
                name: name.to_string(),
                reason: format!("the suffix '{SHADOW_SUFFIX}' is reserved"),
            });
        }
        let schema = TableSchema::from_titles(titles, types)?;

        let _guard = self.locks.write(table.as_str()).await;
        let mut tx = self.begin_structural().await?;
        if self.registry.get(&mut *tx, &table).await?.is_some() {
            return Err(TableError::DuplicateTable(table.to_string()));
        }

        // Physical table first: a failure here leaves no registry record behind.
        let physical = self.physical_name(&table);
        build_create_table(&physical, &schema)
            .execute(&mut *tx)
            .await
            .map_err(TableError::store(format!("create table '{}'", table)))?;

        let descriptor = TableDescriptor::new(table, schema);
        self.registry.create(&mut *tx, &descriptor).await?;
        tx.commit()
            .await
            .map_err(TableError::store(format!("commit create of '{}'", descriptor.name)))?;

        log::info!(
            "created table '{}' with {} column(s)",
            descriptor.name,
            descriptor.schema.len()
        );
        Ok(descriptor)
    }

    pub async fn create_from_request(&self, req: &CreateTableRequest) -> Result<TableDescriptor> {
        self.create_table(&req.table_name, &req.field_titles, &req.field_types)
            .await
    }

    // -------- Update table --------

    /// Merges the incoming columns into the table's schema and rebuilds the table.
    ///
    /// **Destructive**: the table is recreated with the merged schema and every
    /// existing row is discarded. The rebuild goes through a shadow table that is
    /// renamed into place inside one transaction, so on failure the old table and
    /// descriptor stay as they were.
    pub async fn update_table<T, K>(&self, name: &str, titles: &[T], types: &[K]) -> Result<TableDescriptor>
    where
        T: AsRef<str>,
        K: AsRef<str>,
    {
        let incoming = TableSchema::from_titles(titles, types)?;
        let table = self.lookup_name(name)?;

        let _guard = self.locks.write(table.as_str()).await;
        let mut tx = self.begin_structural().await?;
        let existing = self.require(&mut *tx, &table).await?;
        let merged = merge(&existing.schema, &incoming);

        log::warn!(
            "rebuilding table '{}' with {} column(s); existing rows are discarded",
            table,
            merged.len()
        );
        let descriptor = match self.rebuild(&mut *tx, &table, &merged).await {
            Ok(descriptor) => descriptor,
            Err(e) => {
                log::error!("rebuild of table '{}' failed, rolling back: {}", table, e);
                return Err(e);
            }
        };
        if let Err(source) = tx.commit().await {
            log::error!("commit of rebuilt table '{}' failed: {}", table, source);
            return Err(TableError::PhysicalStore {
                context: format!("commit rebuild of '{}'", table),
                source,
            });
        }

        log::info!("updated table '{}'", descriptor.name);
        Ok(descriptor)
    }

    pub async fn update_from_request(&self, name: &str, req: &UpdateTableRequest) -> Result<TableDescriptor> {
        self.update_table(name, &req.field_titles, &req.field_types)
            .await
    }

    async fn rebuild(
        &self,
        conn: &mut SqliteConnection,
        table: &TableName,
        schema: &TableSchema,
    ) -> Result<TableDescriptor> {
        let physical = self.physical_name(table);
        let shadow = format!("{}{}", physical, SHADOW_SUFFIX);
        let step = |what: &str| format!("rebuild of '{}': {}", table, what);

        build_create_table(&shadow, schema)
            .execute(&mut *conn)
            .await
            .map_err(TableError::store(step("create shadow table")))?;
        build_drop_table(&physical)
            .execute(&mut *conn)
            .await
            .map_err(TableError::store(step("drop live table")))?;
        build_rename_table(&shadow, &physical)
            .execute(&mut *conn)
            .await
            .map_err(TableError::store(step("swap in shadow table")))?;

        self.registry.replace_schema(conn, table, schema).await
    }

    // -------- Insert a row --------
    pub async fn insert_row(&self, name: &str, record: &Value) -> Result<()> {
        let table = self.lookup_name(name)?;
        let _guard = self.locks.read(table.as_str()).await;
        let mut conn = self.acquire().await?;
        let descriptor = self.require(&mut *conn, &table).await?;

        let row = validate_value(record, &descriptor.schema, self.config.unknown_fields)?;
        build_insert(&self.physical_name(&table), &row)
            .execute(&mut *conn)
            .await
            .map_err(TableError::store(format!("insert into '{}'", table)))?;
        log::debug!("inserted row into '{}'", table);
        Ok(())
    }

    // -------- List rows --------
    pub async fn list_rows(&self, name: &str) -> Result<Vec<Record>> {
        self.select_rows(name, None).await
    }

    pub async fn list_rows_page(&self, name: &str, limit: u32, offset: u32) -> Result<Vec<Record>> {
        self.select_rows(name, Some((limit, offset))).await
    }

    async fn select_rows(&self, name: &str, page: Option<(u32, u32)>) -> Result<Vec<Record>> {
        let table = self.lookup_name(name)?;
        let _guard = self.locks.read(table.as_str()).await;
        let mut conn = self.acquire().await?;
        let descriptor = self.require(&mut *conn, &table).await?;

        let physical = self.physical_name(&table);
        let statement = match page {
            None => build_select_all(&physical),
            Some((limit, offset)) => QueryBuilder::new(&physical)
                .order_by("rowid", "ASC")
                .limit(limit)
                .offset(offset)
                .build(),
        };
        let rows = statement
            .fetch_all(&mut *conn)
            .await
            .map_err(TableError::store(format!("select from '{}'", table)))?;

        Ok(rows
            .iter()
            .map(|r| decode_row(physical_row(r), &descriptor.schema))
            .collect())
    }

    // -------- Registry views --------
    pub async fn describe_table(&self, name: &str) -> Result<TableDescriptor> {
        let table = self.lookup_name(name)?;
        let _guard = self.locks.read(table.as_str()).await;
        let mut conn = self.acquire().await?;
        self.require(&mut *conn, &table).await
    }

    pub async fn list_tables(&self) -> Result<Vec<TableDescriptor>> {
        let mut conn = self.acquire().await?;
        self.registry.list(&mut *conn).await
    }

    /// Checks that every declared column exists physically with the mapped type.
    pub async fn verify_table(&self, name: &str) -> Result<ConsistencyReport> {
        let table = self.lookup_name(name)?;
        let _guard = self.locks.read(table.as_str()).await;
        let mut conn = self.acquire().await?;
        let descriptor = self.require(&mut *conn, &table).await?;

        let physical: Vec<(String, String)> =
            sqlx::query_as("SELECT name, type FROM pragma_table_info($1) ORDER BY cid")
                .bind(self.physical_name(&table))
                .fetch_all(&mut *conn)
                .await
                .map_err(TableError::store(format!("inspect table '{}'", table)))?;

        let mut report = ConsistencyReport {
            table: table.to_string(),
            missing: Vec::new(),
            undeclared: Vec::new(),
            type_mismatches: Vec::new(),
        };
        for (column, declared) in descriptor.schema.iter() {
            match physical.iter().find(|(n, _)| n == column.as_str()) {
                None => report.missing.push(column.to_string()),
                Some((_, sql_type)) => {
                    let matches = PhysicalColumnType::from_declared(sql_type)
                        .map(LogicalType::from_physical)
                        == Some(*declared);
                    if !matches {
                        report.type_mismatches.push(TypeMismatch {
                            column: column.to_string(),
                            declared: *declared,
                            physical: sql_type.clone(),
                        });
                    }
                }
            }
        }
        report.undeclared = physical
            .into_iter()
            .filter(|(n, _)| !descriptor.schema.contains(n))
            .map(|(n, _)| n)
            .collect();
        Ok(report)
    }
}
