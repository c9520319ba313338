use std::collections::{BTreeMap, BTreeSet};
use serde::Serialize;
use crate::backend::column::quote_identifier;
use crate::backend::db::{Database, DbAction};
use crate::backend::registry::Registry;
use crate::backend::structure::{column_name, get_table_name};
use crate::backend::table::Table;
use crate::util::error;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
/// What a migration changed.
pub struct MigrationReport {
    pub created: Vec<String>,
    pub rebuilt: Vec<String>,
    pub dropped: Vec<String>,
    /// Every DDL statement issued, in order.
    pub statements: Vec<String>,
}

impl MigrationReport {
    pub fn is_empty(&self) -> bool {
        return self.statements.is_empty();
    }
}

/// Every table the registered entities need. Tables shared by both sides of a relation appear once.
pub fn declared_tables(registry: &Registry) -> Result<Vec<Table>, error::Error> {
    let mut tables: Vec<Table> = Vec::new();
    for schema in registry.entities().values() {
        let mut table = Table::new(&get_table_name(schema));
        let mut extra: Vec<Table> = Vec::new();
        for field in schema.fields.iter() {
            extra.extend(field.data_type.generate_columns(registry, &mut table, &column_name(&field.name), &field.constraints)?);
        }
        tables.push(table);
        tables.extend(extra);
    }

    let mut seen: BTreeSet<String> = BTreeSet::new();
    tables.retain(|t| seen.insert(t.name.clone()));
    return Ok(tables);
}

fn run(action: &DbAction<'_>, report: &mut MigrationReport, sql: String) -> Result<(), error::Error> {
    action.execute(&sql)?;
    report.statements.push(sql);
    return Ok(());
}

/// Recreates a table whose definition changed, keeping the data of the columns both versions share.
fn rebuild(action: &DbAction<'_>, report: &mut MigrationReport, table: &Table) -> Result<(), error::Error> {
    let name = quote_identifier(&table.name);
    let old = quote_identifier(&format!("{}__old", table.name));
    run(action, report, format!("ALTER TABLE {name} RENAME TO {old}"))?;
    run(action, report, table.create_statement())?;

    let mut old_columns: Vec<String> = Vec::new();
    action.query_iterate(&format!("PRAGMA table_info({old})"), [], &mut |row| {
        old_columns.push(row.get(1)?);
        return Ok(());
    })?;

    let common: Vec<String> = table.column_names()
        .into_iter()
        .filter(|c| old_columns.contains(c))
        .map(|c| quote_identifier(&c))
        .collect();
    if !common.is_empty() {
        let columns = common.join(", ");
        run(action, report, format!("INSERT INTO {name} ({columns}) SELECT {columns} FROM {old}"))?;
    }
    run(action, report, format!("DROP TABLE {old}"))?;
    return Ok(());
}

fn migrate(action: &DbAction<'_>, tables: &[Table]) -> Result<MigrationReport, error::Error> {
    // Get the stored definitions
    let mut existing: BTreeMap<String, String> = BTreeMap::new();
    action.query_iterate(
        "SELECT name, sql FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite\\_%' ESCAPE '\\'",
        [],
        &mut |row| {
            let sql: Option<String> = row.get(1)?;
            existing.insert(row.get(0)?, sql.unwrap_or_default());
            return Ok(());
        }
    )?;

    let mut report = MigrationReport::default();
    for table in tables.iter() {
        let statement = table.create_statement();
        match existing.get(&table.name) {
            None => {
                run(action, &mut report, statement)?;
                report.created.push(table.name.clone());
            },
            Some(stored) if *stored != statement => {
                rebuild(action, &mut report, table)?;
                report.rebuilt.push(table.name.clone());
            },
            Some(_) => {}
        }
    }

    // Drop tables that are no longer declared
    let declared: BTreeSet<&str> = tables.iter().map(|t| t.name.as_str()).collect();
    for name in existing.keys() {
        if !declared.contains(name.as_str()) {
            run(action, &mut report, format!("DROP TABLE {}", quote_identifier(name)))?;
            report.dropped.push(name.clone());
        }
    }
    return Ok(report);
}

/// Brings the database in line with the registered entities.
pub async fn construct_tables(db: &Database, registry: &Registry) -> Result<MigrationReport, error::Error> {
    let tables = declared_tables(registry)?;
    let report = db.schema_action(|action| migrate(action, &tables)).await?;

    for name in report.created.iter() {
        tracing::info!(table = name.as_str(), "Created table");
    }
    for name in report.rebuilt.iter() {
        tracing::info!(table = name.as_str(), "Rebuilt table");
    }
    for name in report.dropped.iter() {
        tracing::info!(table = name.as_str(), "Dropped table");
    }

    // Rows copied during a rebuild may no longer satisfy their keys
    for violation in db.query_rows("PRAGMA foreign_key_check", &[]).await? {
        tracing::warn!(
            table = ?violation.first(),
            row = ?violation.get(1),
            parent = ?violation.get(2),
            "Foreign key violation after migration"
        );
    }
    return Ok(report);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use crate::backend::registry::RegistryBuilder;
    use crate::backend::schema::{Schema, SchemaField, SchemaKind};

    fn registry(with_age: bool) -> Registry {
        let mut builder = RegistryBuilder::with_default_types();
        let text = builder.data_type("shortText").unwrap().clone();
        let integer = builder.data_type("integer").unwrap().clone();
        let mut user = Schema::new("user", SchemaKind::Entity).field(SchemaField::new("name", text, json!({"required": true})));
        if with_age {
            user = user.field(SchemaField::new("age", integer, json!({})));
        }
        builder.register_entity(user).unwrap();
        return builder.build().unwrap();
    }

    #[tokio::test]
    async fn unchanged_schema_issues_no_statements() {
        let db = Database::open_in_memory().unwrap();
        let first = construct_tables(&db, &registry(false)).await.unwrap();
        assert_eq!(first.created, vec![String::from("user")]);

        let second = construct_tables(&db, &registry(false)).await.unwrap();
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn changed_tables_keep_their_rows() {
        let db = Database::open_in_memory().unwrap();
        construct_tables(&db, &registry(false)).await.unwrap();
        db.execute("INSERT INTO \"user\" (\"name\") VALUES ('Ann')", &[]).await.unwrap();

        let report = construct_tables(&db, &registry(true)).await.unwrap();
        assert_eq!(report.rebuilt, vec![String::from("user")]);

        let rows = db.query_rows("SELECT \"name\", \"age\" FROM \"user\"", &[]).await.unwrap();
        assert_eq!(rows, vec![vec![
            rusqlite::types::Value::Text(String::from("Ann")),
            rusqlite::types::Value::Null
        ]]);
    }

    #[tokio::test]
    async fn undeclared_tables_are_dropped() {
        let db = Database::open_in_memory().unwrap();
        db.execute("CREATE TABLE \"legacy\" (\"_id\" INTEGER PRIMARY KEY AUTOINCREMENT)", &[]).await.unwrap();
        let report = construct_tables(&db, &registry(false)).await.unwrap();
        assert_eq!(report.dropped, vec![String::from("legacy")]);
    }
}
