//! DDL generation for runtime tables and the registry table.
//!
//! Nothing here touches the store; the table service executes the statements.

use crate::libs::query_builder::{Statement, quote_ident};
use crate::libs::schema::TableSchema;
use crate::libs::types::{PhysicalColumnType, to_physical_type};

/// Physical definition of one column.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub sql_type: PhysicalColumnType,
    pub not_null: bool,
}

impl ColumnDef {
    fn to_sql(&self) -> String {
        let mut col_def = format!("{} {}", quote_ident(&self.name), self.sql_type.sql_type());
        if self.not_null {
            col_def.push_str(" NOT NULL");
        }
        col_def
    }
}

pub fn column_defs(schema: &TableSchema) -> Vec<ColumnDef> {
    schema
        .iter()
        .map(|(name, ty)| ColumnDef {
            name: name.to_string(),
            sql_type: to_physical_type(*ty),
            not_null: true,
        })
        .collect()
}

/// One column definition per schema column, in schema order.
pub fn build_create_table(table: &str, schema: &TableSchema) -> Statement {
    let cols: Vec<String> = column_defs(schema).iter().map(ColumnDef::to_sql).collect();
    Statement::new(format!(
        "CREATE TABLE {} ({})",
        quote_ident(table),
        cols.join(", ")
    ))
}

pub fn build_drop_table(table: &str) -> Statement {
    Statement::new(format!("DROP TABLE {}", quote_ident(table)))
}

pub fn build_rename_table(from: &str, to: &str) -> Statement {
    Statement::new(format!(
        "ALTER TABLE {} RENAME TO {}",
        quote_ident(from),
        quote_ident(to)
    ))
}

pub fn build_registry_table(registry_table: &str) -> Statement {
    Statement::new(format!(
        "CREATE TABLE IF NOT EXISTS {} (\
         id TEXT PRIMARY KEY NOT NULL, \
         name TEXT NOT NULL UNIQUE, \
         columns TEXT NOT NULL, \
         created_at TEXT NOT NULL, \
         updated_at TEXT NOT NULL)",
        quote_ident(registry_table)
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_table_follows_schema_order() {
        let schema =
            TableSchema::from_titles(&["Name", "Age", "Is Active"], &["string", "number", "boolean"])
                .unwrap();
        let stmt = build_create_table("dyn_people", &schema);
        assert_eq!(
            stmt.sql,
            r#"CREATE TABLE "dyn_people" ("name" TEXT NOT NULL, "age" REAL NOT NULL, "is_active" BOOLEAN NOT NULL)"#
        );
        assert!(stmt.params.is_empty());
        // Same input, same text.
        assert_eq!(stmt, build_create_table("dyn_people", &schema));
    }

    #[test]
    fn drop_and_rename() {
        assert_eq!(build_drop_table("dyn_people").sql, r#"DROP TABLE "dyn_people""#);
        assert_eq!(
            build_rename_table("dyn_people__rebuild", "dyn_people").sql,
            r#"ALTER TABLE "dyn_people__rebuild" RENAME TO "dyn_people""#
        );
    }

    #[test]
    fn registry_table_is_idempotent() {
        let stmt = build_registry_table("dynamic_tables");
        assert!(stmt.sql.starts_with(r#"CREATE TABLE IF NOT EXISTS "dynamic_tables" ("#));
        assert!(stmt.sql.contains("name TEXT NOT NULL UNIQUE"));
    }
}
