use crate::libs::codec::Record;
use crate::libs::error::{FieldError, NON_FIELD_ERRORS, Result, TableError};
use crate::libs::schema::TableDescriptor;
use crate::libs::service::TableService;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// A handle to one runtime table.
pub struct TableHandle<'a> {
    service: &'a TableService,
    name: String,
}

impl<'a> TableHandle<'a> {
    /// Create a new table handle. The table does not have to exist yet.
    /// ```ignore
    /// let people = service.table("people");
    /// ```
    pub fn new(service: &'a TableService, name: &str) -> Self {
        Self {
            service,
            name: name.to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Insert a record validated against the table's current schema.
    ///
    /// # Example
    /// ```ignore
    /// people.insert(&json!({"name": "Ann", "age": 31})).await?;
    /// ```
    pub async fn insert(&self, record: &Value) -> Result<()> {
        self.service.insert_row(&self.name, record).await
    }

    /// Get all records from the table in insertion order.
    pub async fn rows(&self) -> Result<Vec<Record>> {
        self.service.list_rows(&self.name).await
    }

    /// Get all records deserialized into `T`.
    ///
    /// # Example
    /// ```ignore
    /// #[derive(Deserialize)]
    /// struct Person { name: String, age: u32 }
    /// let everyone: Vec<Person> = people.rows_as().await?;
    /// ```
    pub async fn rows_as<T>(&self) -> Result<Vec<T>>
    where
        T: DeserializeOwned,
    {
        self.rows()
            .await?
            .into_iter()
            .map(|record| {
                serde_json::to_value(record)
                    .and_then(serde_json::from_value::<T>)
                    .map_err(|e| {
                        TableError::Validation(vec![FieldError::new(
                            NON_FIELD_ERRORS,
                            format!("record does not match the requested type: {e}"),
                        )])
                    })
            })
            .collect()
    }

    pub async fn describe(&self) -> Result<TableDescriptor> {
        self.service.describe_table(&self.name).await
    }

    /// Add or retype columns. Rebuilds the table and discards its rows,
    /// see [`TableService::update_table`].
    pub async fn extend<T, K>(&self, titles: &[T], types: &[K]) -> Result<TableDescriptor>
    where
        T: AsRef<str>,
        K: AsRef<str>,
    {
        self.service.update_table(&self.name, titles, types).await
    }
}
