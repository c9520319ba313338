use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use futures::future::BoxFuture;
use serde_json::Value;
use crate::backend::column::quote_identifier;
use crate::backend::db::Database;
use crate::backend::registry::Registry;
use crate::backend::schema::Schema;
use crate::backend::selector::Selector;
use crate::backend::table::PRIMARY_KEY;
use crate::util::error;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
/// A column of a table or of a join alias.
pub struct ColumnRef {
    pub table: String,
    pub column: String,
}

impl ColumnRef {
    pub fn new(table: &str, column: &str) -> ColumnRef {
        return ColumnRef { table: table.to_string(), column: column.to_string() };
    }

    /// The primary key of a table or alias.
    pub fn id(table: &str) -> ColumnRef {
        return ColumnRef::new(table, PRIMARY_KEY);
    }

    pub fn to_sql(&self) -> String {
        return format!("{}.{}", quote_identifier(&self.table), quote_identifier(&self.column));
    }
}

/// Dotted field path mapped to the column holding it.
pub type Columns = BTreeMap<String, ColumnRef>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    String,
    Number,
    Boolean,
    /// Id of a row in another table. Written as a number or an object carrying `id`.
    Reference,
}

#[derive(Debug, Clone, PartialEq)]
/// `LEFT JOIN table AS alias ON alias.column = on`
pub struct Join {
    pub alias: String,
    pub table: String,
    pub column: String,
    pub on: ColumnRef,
}

impl Join {
    pub fn to_sql(&self) -> String {
        return format!(
            "LEFT JOIN {} AS {} ON {} = {}",
            quote_identifier(&self.table),
            quote_identifier(&self.alias),
            ColumnRef::new(&self.alias, &self.column).to_sql(),
            self.on.to_sql()
        );
    }
}

#[derive(Debug, Clone)]
/// Compiled plan for a (schema, selector) pair.
pub struct Structure {
    pub data: StructureField,
    pub joins: Vec<Join>,
}

#[derive(Debug, Clone)]
pub enum StructureField {
    Scalar(ScalarField),
    Object(ObjectField),
    Array(ArrayField),
    Custom(Arc<dyn CustomField>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScalarField {
    pub kind: ScalarKind,
    pub column: ColumnRef,
}

#[derive(Debug, Clone)]
/// Object whose scalar members are read inline from the current row.
pub struct ObjectField {
    pub fields: BTreeMap<String, StructureField>,
    pub upload: Option<ObjectUpload>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ObjectUpload {
    /// The owning row stores the id of the object's row in `column`.
    Outwards { column: ColumnRef, target_table: String },
    /// The object's row in `table` stores the owner id in `link_column`.
    Inwards { table: String, link_column: String },
}

#[derive(Debug, Clone)]
pub struct ArrayField {
    pub item: ArrayItem,
    pub fetch: FetchSpec,
    pub upload: ArrayUpload,
}

#[derive(Debug, Clone)]
pub enum ArrayItem {
    Object { fields: BTreeMap<String, StructureField>, joins: Vec<Join> },
    /// Elements are bare target ids.
    Ids,
}

#[derive(Debug, Clone, PartialEq)]
/// Describes the rows of a sub-fetch: rows of `table` where `link` equals the owner id.
pub struct FetchSpec {
    pub table: String,
    pub joins: Vec<Join>,
    pub id: ColumnRef,
    pub link: ColumnRef,
    pub order: ColumnRef,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ArrayUpload {
    /// One row per element in `table`, linked to the owner and numbered by position.
    Rows { table: String, link_column: String, order_column: Option<String> },
    /// One bridge row per element pairing the owner with a target row.
    Bridge { table: String, entity_column: String, target_column: String, target_table: String },
    /// Each element row of `table` gets the owner id written to `column`.
    Relink { table: String, column: String },
}

/// Field that reads and writes through its own queries.
pub trait CustomField: Send + Sync + fmt::Debug {
    fn fetch<'a>(&'a self, db: &'a Database, id: i64) -> BoxFuture<'a, Result<Value, error::Error>>;
    fn upload<'a>(&'a self, db: &'a Database, id: i64, value: Value) -> BoxFuture<'a, Result<(), error::Error>>;
}

/// Produces join aliases unique within one compile invocation.
#[derive(Debug, Default)]
pub struct AliasGenerator {
    next: Cell<usize>,
}

impl AliasGenerator {
    pub fn generate(&self) -> String {
        let n = self.next.get() + 1;
        self.next.set(n);
        return format!("__j{n}");
    }
}

/// State shared by one compile invocation.
pub struct CompileContext<'r> {
    pub registry: &'r Registry,
    aliases: AliasGenerator,
    components: RefCell<Vec<String>>,
}

impl<'r> CompileContext<'r> {
    pub fn new(registry: &'r Registry) -> CompileContext<'r> {
        return CompileContext {
            registry,
            aliases: AliasGenerator::default(),
            components: RefCell::new(Vec::new()),
        };
    }

    pub fn alias(&self) -> String {
        return self.aliases.generate();
    }

    /// Marks a component as being expanded. Fails when it is already being expanded.
    pub fn enter_component(&self, name: &str) -> Result<(), error::Error> {
        let mut stack = self.components.borrow_mut();
        if stack.iter().any(|c| c == name) {
            let mut chain: Vec<String> = stack.clone();
            chain.push(name.to_string());
            return Err(error::Error::SchemaError(format!("Recursive component definition: {}", chain.join(" -> "))));
        }
        stack.push(name.to_string());
        return Ok(());
    }

    pub fn leave_component(&self) {
        self.components.borrow_mut().pop();
    }
}

/// Arguments handed to a data type when compiling one field.
pub struct StructureArgs<'a> {
    pub ctx: &'a CompileContext<'a>,
    /// Table name or join alias that columns are read from.
    pub table: &'a str,
    /// Physical table behind `table`, used to name owned tables.
    pub physical: &'a str,
    /// Column name of the field, prefixed when nested in an inline component.
    pub path: &'a str,
    pub constraints: &'a serde_json::Map<String, Value>,
    pub selector: &'a Selector,
}

/// Physical table of an entity.
pub fn get_table_name(schema: &Schema) -> String {
    return schema.name.replace('.', "_");
}

/// Column-safe form of a field name.
pub fn column_name(name: &str) -> String {
    return name.replace('.', "_");
}

/// Compiles a schema against a selector into an object structure read from `table_name`
/// (defaults to the schema's own table).
pub fn compile(ctx: &CompileContext<'_>, schema: &Schema, selector: &Selector, table_name: Option<&str>) -> Result<Structure, error::Error> {
    let physical = get_table_name(schema);
    let table = table_name.unwrap_or(&physical);
    let (fields, joins) = compile_fields(ctx, schema, selector, table, &physical, None)?;
    return Ok(Structure {
        data: StructureField::Object(ObjectField { fields, upload: None }),
        joins
    });
}

/// Compiles every selected field of a schema. `prefix` is prepended to column names.
pub fn compile_fields(
    ctx: &CompileContext<'_>,
    schema: &Schema,
    selector: &Selector,
    table: &str,
    physical: &str,
    prefix: Option<&str>
) -> Result<(BTreeMap<String, StructureField>, Vec<Join>), error::Error> {
    let mut fields: BTreeMap<String, StructureField> = BTreeMap::new();
    let mut joins: Vec<Join> = Vec::new();

    for field in schema.fields.iter() {
        let field_selector = match selector.descend(&field.name) {
            Some(s) => s,
            None => { continue; }
        };
        let path = match prefix {
            Some(p) => format!("{p}_{}", column_name(&field.name)),
            None => column_name(&field.name)
        };

        let structure = field.data_type.generate_structure(StructureArgs {
            ctx,
            table,
            physical,
            path: &path,
            constraints: &field.constraints,
            selector: &field_selector
        })?;
        fields.insert(field.name.clone(), structure.data);
        joins.extend(structure.joins);
    }
    return Ok((fields, joins));
}

/// Maps every inline field path (dotted) to its column, plus `id` to the row's primary key.
pub fn extract_columns(data: &StructureField, id: ColumnRef) -> Columns {
    return match data {
        StructureField::Object(object) => columns_of(&object.fields, id),
        _ => columns_of(&BTreeMap::new(), id)
    };
}

/// `extract_columns` for the members of an object.
pub fn columns_of(fields: &BTreeMap<String, StructureField>, id: ColumnRef) -> Columns {
    let mut columns = Columns::new();
    columns.insert(String::from("id"), id);
    collect_columns(fields, "", &mut columns);
    return columns;
}

fn collect_columns(fields: &BTreeMap<String, StructureField>, prefix: &str, columns: &mut Columns) {
    for (name, field) in fields.iter() {
        let path = if prefix.is_empty() { name.clone() } else { format!("{prefix}.{name}") };
        match field {
            StructureField::Scalar(scalar) => {
                columns.insert(path, scalar.column.clone());
            },
            StructureField::Object(object) => match &object.upload {
                Some(ObjectUpload::Inwards { .. }) => {},
                Some(ObjectUpload::Outwards { column, .. }) => {
                    // The relation itself compares as the stored id
                    columns.insert(path.clone(), column.clone());
                    collect_columns(&object.fields, &path, columns);
                },
                None => collect_columns(&object.fields, &path, columns)
            },
            StructureField::Array(_) | StructureField::Custom(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_are_unique_per_generator() {
        let aliases = AliasGenerator::default();
        assert_eq!(aliases.generate(), "__j1");
        assert_eq!(aliases.generate(), "__j2");
        assert_eq!(AliasGenerator::default().generate(), "__j1");
    }

    #[test]
    fn join_renders_left_join() {
        let join = Join {
            alias: String::from("__j1"),
            table: String::from("user"),
            column: String::from("_id"),
            on: ColumnRef::new("restaurant", "owner"),
        };
        assert_eq!(join.to_sql(), "LEFT JOIN \"user\" AS \"__j1\" ON \"__j1\".\"_id\" = \"restaurant\".\"owner\"");
    }

    #[test]
    fn columns_cover_inline_objects_and_relation_ids() {
        let mut owner: BTreeMap<String, StructureField> = BTreeMap::new();
        owner.insert(String::from("id"), StructureField::Scalar(ScalarField { kind: ScalarKind::Number, column: ColumnRef::id("__j1") }));
        owner.insert(String::from("name"), StructureField::Scalar(ScalarField { kind: ScalarKind::String, column: ColumnRef::new("__j1", "name") }));

        let mut fields: BTreeMap<String, StructureField> = BTreeMap::new();
        fields.insert(String::from("name"), StructureField::Scalar(ScalarField { kind: ScalarKind::String, column: ColumnRef::new("t", "name") }));
        fields.insert(String::from("owner"), StructureField::Object(ObjectField {
            fields: owner,
            upload: Some(ObjectUpload::Outwards { column: ColumnRef::new("t", "owner"), target_table: String::from("user") })
        }));

        let columns = extract_columns(&StructureField::Object(ObjectField { fields, upload: None }), ColumnRef::id("t"));
        let paths: Vec<&str> = columns.keys().map(|k| k.as_str()).collect();
        assert_eq!(paths, vec!["id", "name", "owner", "owner.id", "owner.name"]);
        assert_eq!(columns["owner.name"].to_sql(), "\"__j1\".\"name\"");
        assert_eq!(columns["owner"].to_sql(), "\"t\".\"owner\"");
    }

    #[test]
    fn table_names_replace_dots() {
        assert_eq!(column_name("seo.title"), "seo_title");
    }
}
