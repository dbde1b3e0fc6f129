use crate::libs::codec::{FieldValue, Row};
use sqlx::sqlite::{Sqlite, SqliteArguments, SqliteConnection, SqliteQueryResult, SqliteRow};

/// Generated SQL text plus the values bound to its `$N` placeholders.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<FieldValue>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn query(&self) -> sqlx::query::Query<'_, Sqlite, SqliteArguments<'_>> {
        // Not cached: `SELECT *` keeps its text across a rebuild while its columns change.
        let mut query = sqlx::query(&self.sql).persistent(false);
        for param in &self.params {
            query = match param {
                FieldValue::Text(s) => query.bind(s.clone()),
                FieldValue::Number(n) => query.bind(*n),
                FieldValue::Boolean(b) => query.bind(*b),
            };
        }
        query
    }

    pub async fn execute(&self, conn: &mut SqliteConnection) -> sqlx::Result<SqliteQueryResult> {
        log::debug!("executing: {} ({} params)", self.sql, self.params.len());
        self.query().execute(conn).await
    }

    pub async fn fetch_all(&self, conn: &mut SqliteConnection) -> sqlx::Result<Vec<SqliteRow>> {
        log::debug!("fetching: {} ({} params)", self.sql, self.params.len());
        self.query().fetch_all(conn).await
    }
}

/// Quotes an identifier that already passed the allow-list.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn placeholders(count: usize) -> Vec<String> {
    (1..=count).map(|i| format!("${}", i)).collect()
}

/// Parameterized insert of a validated row, columns in row order.
pub fn build_insert(table: &str, row: &Row) -> Statement {
    if row.is_empty() {
        return Statement::new(format!("INSERT INTO {} DEFAULT VALUES", quote_ident(table)));
    }
    let mut cols = Vec::with_capacity(row.len());
    let mut params = Vec::with_capacity(row.len());
    for (name, value) in row.iter() {
        cols.push(quote_ident(name.as_str()));
        params.push(value.clone());
    }
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(table),
        cols.join(", "),
        placeholders(cols.len()).join(", ")
    );
    Statement { sql, params }
}

/// Every column of a table in insertion order.
pub fn build_select_all(table: &str) -> Statement {
    QueryBuilder::new(table).order_by("rowid", "ASC").build()
}

pub struct QueryBuilder {
    table: String,
    order_clause: Option<String>,
    limit_clause: Option<String>,
    offset_clause: Option<String>,
}

impl QueryBuilder {
    pub fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            order_clause: None,
            limit_clause: None,
            offset_clause: None,
        }
    }

    pub fn order_by(mut self, column: &str, direction: &str) -> Self {
        let direction = if direction.eq_ignore_ascii_case("DESC") {
            "DESC"
        } else {
            "ASC"
        };
        self.order_clause = Some(format!("ORDER BY {} {}", column, direction));
        self
    }

    pub fn limit(mut self, n: u32) -> Self {
        self.limit_clause = Some(format!("LIMIT {}", n));
        self
    }

    pub fn offset(mut self, n: u32) -> Self {
        if self.limit_clause.is_none() {
            // SQLite only accepts OFFSET after a LIMIT.
            self.limit_clause = Some("LIMIT -1".to_string());
        }
        self.offset_clause = Some(format!("OFFSET {}", n));
        self
    }

    pub fn build(self) -> Statement {
        let mut sql = format!("SELECT * FROM {}", quote_ident(&self.table));
        if let Some(order) = &self.order_clause {
            sql += &format!(" {}", order);
        }
        if let Some(limit) = &self.limit_clause {
            sql += &format!(" {}", limit);
        }
        if let Some(offset) = &self.offset_clause {
            sql += &format!(" {}", offset);
        }
        Statement::new(sql)
    }
}
