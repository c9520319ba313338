pub mod config;
pub mod db;
pub mod column;
pub mod table;
pub mod schema;
pub mod registry;
pub mod data_type;
pub mod selector;
pub mod filter;
pub mod structure;
pub mod query;
pub mod insert;
pub mod remove;
pub mod construct;

use std::sync::Arc;
use serde::Serialize;
use serde_json::Value;
use crate::backend::config::DatabaseConfig;
use crate::backend::construct::MigrationReport;
use crate::backend::db::Database;
use crate::backend::filter::{Filter, IgnoredClause};
use crate::backend::query::{QueryArgs, Source};
use crate::backend::registry::Registry;
use crate::backend::remove::RemoveResult;
use crate::backend::schema::Schema;
use crate::backend::selector::Selector;
use crate::backend::structure::{get_table_name, CompileContext, Structure};
use crate::util::error;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub data: Vec<Value>,
    pub ignored: Vec<IgnoredClause>,
}

/// A content database: the registered content types bound to their storage.
pub struct ContentDb {
    db: Database,
    registry: Registry,
}

impl ContentDb {
    pub fn new(db: Database, registry: Registry) -> ContentDb {
        return ContentDb { db, registry };
    }

    /// Opens the configured database for a registry.
    pub fn open(config: &DatabaseConfig, registry: Registry) -> Result<ContentDb, error::Error> {
        return Ok(ContentDb::new(Database::open(config)?, registry));
    }

    pub fn database(&self) -> &Database {
        return &self.db;
    }

    pub fn registry(&self) -> &Registry {
        return &self.registry;
    }

    fn entity(&self, type_name: &str) -> Result<&Arc<Schema>, error::Error> {
        return match self.registry.entity(type_name) {
            Some(schema) => Ok(schema),
            None => Err(error::Error::NotFoundError(format!("Entity type {type_name} not found")))
        };
    }

    /// Compiles the structure of an entity type for a selector.
    pub fn compile(&self, type_name: &str, selector: &Selector) -> Result<Structure, error::Error> {
        let schema = self.entity(type_name)?;
        let ctx = CompileContext::new(&self.registry);
        return structure::compile(&ctx, schema, selector, None);
    }

    /// Creates, rebuilds and drops tables until the database matches the registry.
    pub async fn construct_tables(&self) -> Result<MigrationReport, error::Error> {
        return construct::construct_tables(&self.db, &self.registry).await;
    }

    /// Reads the entities of a type, shaped by a selector.
    pub async fn query(&self, type_name: &str, selector: &Selector, args: &QueryArgs) -> Result<QueryResult, error::Error> {
        let table = get_table_name(self.entity(type_name)?);
        let structure = self.compile(type_name, selector)?;
        let output = query::fetch_by_structure(&self.db, &structure, &Source::table(&table), args).await?;
        return Ok(QueryResult { data: output.rows, ignored: output.ignored });
    }

    /// Writes an entity with everything it owns and returns its id.
    /// An `id` member updates the existing row.
    pub async fn insert(&self, type_name: &str, value: &Value) -> Result<i64, error::Error> {
        let table = get_table_name(self.entity(type_name)?);
        let structure = self.compile(type_name, &Selector::All)?;
        let plan = insert::extract_insert_plan(&structure, &table, value)?;
        return insert::execute_insert_plan(&self.db, plan).await;
    }

    /// Deletes the entities of a type matching a filter.
    pub async fn remove(&self, type_name: &str, filter: &Filter) -> Result<RemoveResult, error::Error> {
        let table = get_table_name(self.entity(type_name)?);
        let structure = self.compile(type_name, &Selector::from_filter(filter))?;
        return remove::remove_with_filter(&self.db, &structure, &table, filter).await;
    }
}
