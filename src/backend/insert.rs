use std::collections::BTreeMap;
use std::sync::Arc;
use futures::future::{try_join, try_join_all, BoxFuture};
use rusqlite::types::Value as SqlValue;
use serde_json::{Map, Value};
use crate::backend::column::quote_identifier;
use crate::backend::db::Database;
use crate::backend::filter::to_sql_value;
use crate::backend::structure::{ArrayItem, ArrayUpload, CustomField, ObjectUpload, ScalarKind, Structure, StructureField};
use crate::backend::table::PRIMARY_KEY;
use crate::util::error;

#[derive(Debug, Clone, Default, PartialEq)]
/// Column values of one row.
pub struct TablePlan {
    pub name: String,
    pub data: BTreeMap<String, SqlValue>,
}

#[derive(Debug, Clone)]
pub struct CustomUpload {
    pub field: Arc<dyn CustomField>,
    pub value: Value,
}

#[derive(Debug, Clone)]
pub enum BridgeTarget {
    /// An existing row.
    Id(i64),
    /// A row to write first.
    Plan(InsertPlan),
}

#[derive(Debug, Clone)]
/// Write that needs the id of the row that owns it.
pub enum DependentWrite {
    /// Insert a row, storing the owner id in `link_column`.
    Insert { plan: InsertPlan, link_column: String },
    /// Pair the owner with a target row in a bridge table.
    Bridge { table: String, entity_column: String, target_column: String, target: BridgeTarget },
    /// Store the owner id in `column` of an existing row.
    Relink { table: String, column: String, row_id: i64 },
    /// Drop the rows of `table` linked to the owner, then insert `rows` in their place.
    Replace { table: String, link_column: String, rows: Vec<InsertPlan> },
}

#[derive(Debug, Clone)]
/// The writes required to persist one object.
pub struct InsertPlan {
    pub main_table: TablePlan,
    /// Rows written before the main row, e.g. related rows edited in place.
    pub sibling_tables: Vec<InsertPlan>,
    /// Writes after the main row.
    pub dependent: Vec<DependentWrite>,
    pub custom: Vec<CustomUpload>,
}

impl InsertPlan {
    pub fn new(table: &str) -> InsertPlan {
        return InsertPlan {
            main_table: TablePlan { name: table.to_string(), data: BTreeMap::new() },
            sibling_tables: Vec::new(),
            dependent: Vec::new(),
            custom: Vec::new(),
        };
    }
}

fn describe(value: &Value) -> &'static str {
    return match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object"
    };
}

/// Reads a `/`-separated member path. Missing members give `None`;
/// descending into anything but an object is a shape error.
pub fn dig<'v>(value: &'v Value, path: &str) -> Result<Option<&'v Value>, error::Error> {
    let mut current = value;
    for part in path.split('/') {
        match current {
            Value::Object(map) => match map.get(part) {
                Some(member) => current = member,
                None => { return Ok(None); }
            },
            _ => { return Err(error::Error::ShapeError(format!("Cannot read {part} of {}", describe(current)))); }
        }
    }
    return Ok(Some(current));
}

fn row_id(map: &Map<String, Value>, path: &str) -> Result<Option<i64>, error::Error> {
    return match map.get("id") {
        None | Some(Value::Null) => Ok(None),
        Some(id) => match id.as_i64() {
            Some(id) => Ok(Some(id)),
            None => Err(error::Error::ShapeError(format!("{path}.id must be an integer, got {}", describe(id))))
        }
    };
}

fn reference(value: &Value, path: &str) -> Result<SqlValue, error::Error> {
    return match value {
        Value::Null => Ok(SqlValue::Null),
        Value::Number(n) => match n.as_i64() {
            Some(id) => Ok(SqlValue::Integer(id)),
            None => Err(error::Error::ShapeError(format!("{path} must be an integer id")))
        },
        Value::Object(map) => match row_id(map, path)? {
            Some(id) => Ok(SqlValue::Integer(id)),
            None => Err(error::Error::ShapeError(format!("{path} needs an id")))
        },
        other => Err(error::Error::ShapeError(format!("{path} must be an id, got {}", describe(other))))
    };
}

fn scalar_value(kind: ScalarKind, value: &Value, path: &str) -> Result<SqlValue, error::Error> {
    if kind == ScalarKind::Reference {
        return reference(value, path);
    }
    return match to_sql_value(value) {
        Some(v) => Ok(v),
        None => Err(error::Error::ShapeError(format!("{path} must be a single value, got {}", describe(value))))
    };
}

/// Whether `map` carries any member besides `id` that `fields` knows how to write.
fn has_members(map: &Map<String, Value>, fields: &BTreeMap<String, StructureField>) -> bool {
    return map.keys().any(|k| k != "id" && fields.contains_key(k));
}

/// Plans the row of `table` described by `value`.
pub fn row_plan(table: &str, fields: &BTreeMap<String, StructureField>, value: &Value, path: &str) -> Result<InsertPlan, error::Error> {
    let map = match value {
        Value::Object(map) => map,
        other => { return Err(error::Error::ShapeError(format!("{path} must be an object, got {}", describe(other)))); }
    };
    let mut plan = InsertPlan::new(table);
    if let Some(id) = row_id(map, path)? {
        plan.main_table.data.insert(String::from(PRIMARY_KEY), SqlValue::Integer(id));
    }
    extract_fields(fields, value, &mut plan, path)?;
    return Ok(plan);
}

/// Turns a value shaped like `structure` into the writes that persist it in `table`.
pub fn extract_insert_plan(structure: &Structure, table: &str, value: &Value) -> Result<InsertPlan, error::Error> {
    return match &structure.data {
        StructureField::Object(object) => row_plan(table, &object.fields, value, table),
        _ => Err(error::Error::ShapeError(String::from("Only object structures can be written")))
    };
}

fn extract_fields(fields: &BTreeMap<String, StructureField>, value: &Value, plan: &mut InsertPlan, path: &str) -> Result<(), error::Error> {
    for (name, field) in fields.iter() {
        let member = match dig(value, name)? {
            Some(m) => m,
            None => { continue; }
        };
        let member_path = format!("{path}.{name}");

        match field {
            StructureField::Scalar(scalar) => {
                plan.main_table.data.insert(scalar.column.column.clone(), scalar_value(scalar.kind, member, &member_path)?);
            },
            StructureField::Object(object) => match &object.upload {
                None => match member {
                    Value::Object(_) => extract_fields(&object.fields, member, plan, &member_path)?,
                    Value::Null => {},
                    other => {
                        return Err(error::Error::ShapeError(format!("{member_path} must be an object, got {}", describe(other))));
                    }
                },
                Some(ObjectUpload::Outwards { column, target_table }) => {
                    let id = reference(member, &member_path)?;
                    if let (Value::Object(map), SqlValue::Integer(target_id)) = (member, &id) {
                        // Members besides the id update the related row
                        if has_members(map, &object.fields) {
                            let mut sibling = InsertPlan::new(target_table);
                            sibling.main_table.data.insert(String::from(PRIMARY_KEY), SqlValue::Integer(*target_id));
                            extract_fields(&object.fields, member, &mut sibling, &member_path)?;
                            plan.sibling_tables.push(sibling);
                        }
                    }
                    plan.main_table.data.insert(column.column.clone(), id);
                },
                Some(ObjectUpload::Inwards { table, link_column }) => {
                    if !member.is_null() {
                        plan.dependent.push(DependentWrite::Insert {
                            plan: row_plan(table, &object.fields, member, &member_path)?,
                            link_column: link_column.clone()
                        });
                    }
                }
            },
            StructureField::Array(array) => {
                let elements = match member {
                    Value::Array(elements) => elements,
                    Value::Null => { continue; }
                    other => {
                        return Err(error::Error::ShapeError(format!("{member_path} must be a list, got {}", describe(other))));
                    }
                };

                // Owned rows are rewritten as a whole list
                if let ArrayUpload::Rows { table, link_column, order_column } = &array.upload {
                    let fields = match &array.item {
                        ArrayItem::Object { fields, .. } => fields,
                        ArrayItem::Ids => {
                            return Err(error::Error::ShapeError(format!("{member_path} cannot be written as ids")));
                        }
                    };
                    let mut rows: Vec<InsertPlan> = Vec::new();
                    for (index, element) in elements.iter().enumerate() {
                        let mut row = row_plan(table, fields, element, &format!("{member_path}[{index}]"))?;
                        if let Some(order) = order_column {
                            row.main_table.data.insert(order.clone(), SqlValue::Integer(index as i64));
                        }
                        rows.push(row);
                    }
                    plan.dependent.push(DependentWrite::Replace { table: table.clone(), link_column: link_column.clone(), rows });
                    continue;
                }

                for (index, element) in elements.iter().enumerate() {
                    let element_path = format!("{member_path}[{index}]");
                    let write = match (&array.upload, &array.item) {
                        (ArrayUpload::Rows { .. }, _) => { continue; },
                        (ArrayUpload::Bridge { table, entity_column, target_column, target_table }, item) => {
                            let target = match (element, item) {
                                (Value::Object(map), ArrayItem::Object { fields, .. })
                                    if map.get("id").is_none_or(|id| id.is_null()) || has_members(map, fields) => {
                                    BridgeTarget::Plan(row_plan(target_table, fields, element, &element_path)?)
                                },
                                _ => match reference(element, &element_path)? {
                                    SqlValue::Integer(id) => BridgeTarget::Id(id),
                                    _ => { return Err(error::Error::ShapeError(format!("{element_path} needs an id"))); }
                                }
                            };
                            DependentWrite::Bridge {
                                table: table.clone(),
                                entity_column: entity_column.clone(),
                                target_column: target_column.clone(),
                                target
                            }
                        },
                        (ArrayUpload::Relink { table, column }, item) => match (element, item) {
                            (Value::Object(_), ArrayItem::Object { fields, .. }) => DependentWrite::Insert {
                                plan: row_plan(table, fields, element, &element_path)?,
                                link_column: column.clone()
                            },
                            _ => match reference(element, &element_path)? {
                                SqlValue::Integer(row_id) => DependentWrite::Relink { table: table.clone(), column: column.clone(), row_id },
                                _ => { return Err(error::Error::ShapeError(format!("{element_path} needs an id"))); }
                            }
                        }
                    };
                    plan.dependent.push(write);
                }
            },
            StructureField::Custom(custom) => {
                plan.custom.push(CustomUpload { field: custom.clone(), value: member.clone() });
            }
        }
    }
    return Ok(());
}

/// Updates the row a plan names by id. Returns `None` when there is no such row.
async fn update(db: &Database, table: &TablePlan, id: &SqlValue) -> Result<Option<i64>, error::Error> {
    let name = quote_identifier(&table.name);
    let mut params: Vec<SqlValue> = Vec::new();
    let mut assignments: Vec<String> = Vec::new();
    for (column, value) in table.data.iter().filter(|(c, _)| c.as_str() != PRIMARY_KEY) {
        assignments.push(format!("{} = ?", quote_identifier(column)));
        params.push(value.clone());
    }
    params.push(id.clone());

    let sql = if assignments.is_empty() {
        format!("SELECT \"{PRIMARY_KEY}\" FROM {name} WHERE \"{PRIMARY_KEY}\" = ?")
    } else {
        format!("UPDATE {name} SET {} WHERE \"{PRIMARY_KEY}\" = ? RETURNING \"{PRIMARY_KEY}\"", assignments.join(", "))
    };
    return db.insert_returning_id(&sql, &params).await;
}

/// Inserts or updates the row of a table plan and returns its id.
async fn upsert(db: &Database, table: &TablePlan) -> Result<i64, error::Error> {
    // NOT NULL is checked before conflicts are resolved, so existing rows are updated directly
    if let Some(id) = table.data.get(PRIMARY_KEY) {
        if let Some(id) = update(db, table, id).await? {
            return Ok(id);
        }
    }

    let name = quote_identifier(&table.name);
    let params: Vec<SqlValue> = table.data.values().cloned().collect();

    let sql = if table.data.is_empty() {
        format!("INSERT INTO {name} DEFAULT VALUES RETURNING \"{PRIMARY_KEY}\"")
    } else {
        let columns: Vec<String> = table.data.keys().map(|c| quote_identifier(c)).collect();
        let placeholders: Vec<&str> = table.data.keys().map(|_| "?").collect();
        let mut updates: Vec<String> = table.data.keys()
            .filter(|c| c.as_str() != PRIMARY_KEY)
            .map(|c| format!("{0} = excluded.{0}", quote_identifier(c)))
            .collect();
        if updates.is_empty() {
            updates.push(format!("\"{PRIMARY_KEY}\" = excluded.\"{PRIMARY_KEY}\""));
        }
        format!(
            "INSERT INTO {name} ({}) VALUES ({}) ON CONFLICT (\"{PRIMARY_KEY}\") DO UPDATE SET {} RETURNING \"{PRIMARY_KEY}\"",
            columns.join(", "),
            placeholders.join(", "),
            updates.join(", ")
        )
    };

    return match db.insert_returning_id(&sql, &params).await? {
        Some(id) => Ok(id),
        None => Err(error::Error::NotFoundError(format!("No id returned for a row of {}", table.name)))
    };
}

/// Executes a plan: siblings and the main row first, then dependent and custom writes.
/// Returns the id of the main row.
pub fn execute_insert_plan(db: &Database, plan: InsertPlan) -> BoxFuture<'_, Result<i64, error::Error>> {
    return Box::pin(async move {
        let InsertPlan { main_table, sibling_tables, dependent, custom } = plan;
        tracing::debug!(table = %main_table.name, siblings = sibling_tables.len(), dependent = dependent.len(), "Executing insert plan");

        let siblings = try_join_all(sibling_tables.into_iter().map(|p| execute_insert_plan(db, p)));
        let (_, id) = try_join(siblings, upsert(db, &main_table)).await?;

        let mut tasks: Vec<BoxFuture<'_, Result<(), error::Error>>> = Vec::new();
        for write in dependent {
            tasks.push(execute_dependent(db, write, id));
        }
        for upload in custom {
            tasks.push(Box::pin(async move {
                let CustomUpload { field, value } = upload;
                return field.upload(db, id, value).await;
            }));
        }
        try_join_all(tasks).await?;

        return Ok(id);
    });
}

fn execute_dependent(db: &Database, write: DependentWrite, owner_id: i64) -> BoxFuture<'_, Result<(), error::Error>> {
    return Box::pin(async move {
        match write {
            DependentWrite::Insert { mut plan, link_column } => {
                plan.main_table.data.insert(link_column, SqlValue::Integer(owner_id));
                execute_insert_plan(db, plan).await?;
            },
            DependentWrite::Bridge { table, entity_column, target_column, target } => {
                let target_id = match target {
                    BridgeTarget::Id(id) => id,
                    BridgeTarget::Plan(plan) => execute_insert_plan(db, plan).await?
                };
                let sql = format!(
                    "INSERT OR IGNORE INTO {} ({}, {}) VALUES (?, ?)",
                    quote_identifier(&table),
                    quote_identifier(&entity_column),
                    quote_identifier(&target_column)
                );
                db.execute(&sql, &[SqlValue::Integer(owner_id), SqlValue::Integer(target_id)]).await?;
            },
            DependentWrite::Relink { table, column, row_id } => {
                let sql = format!(
                    "UPDATE {} SET {} = ? WHERE \"{PRIMARY_KEY}\" = ?",
                    quote_identifier(&table),
                    quote_identifier(&column)
                );
                db.execute(&sql, &[SqlValue::Integer(owner_id), SqlValue::Integer(row_id)]).await?;
            },
            DependentWrite::Replace { table, link_column, rows } => {
                let sql = format!("DELETE FROM {} WHERE {} = ?", quote_identifier(&table), quote_identifier(&link_column));
                let removed = db.execute(&sql, &[SqlValue::Integer(owner_id)]).await?;
                tracing::debug!(table = %table, removed, rows = rows.len(), "Replacing owned rows");

                let writes = rows.into_iter().map(|mut row| {
                    row.main_table.data.insert(link_column.clone(), SqlValue::Integer(owner_id));
                    return execute_insert_plan(db, row);
                });
                try_join_all(writes).await?;
            }
        }
        return Ok(());
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::structure::{ArrayField, ColumnRef, FetchSpec, ObjectField, ScalarField};
    use serde_json::json;

    fn scalar(kind: ScalarKind, table: &str, column: &str) -> StructureField {
        return StructureField::Scalar(ScalarField { kind, column: ColumnRef::new(table, column) });
    }

    fn restaurant() -> Structure {
        let mut owner: BTreeMap<String, StructureField> = BTreeMap::new();
        owner.insert(String::from("id"), scalar(ScalarKind::Number, "__j1", "_id"));
        owner.insert(String::from("name"), scalar(ScalarKind::String, "__j1", "name"));

        let mut fields: BTreeMap<String, StructureField> = BTreeMap::new();
        fields.insert(String::from("name"), scalar(ScalarKind::String, "restaurant", "name"));
        fields.insert(String::from("open"), scalar(ScalarKind::Boolean, "restaurant", "open"));
        fields.insert(String::from("owner"), StructureField::Object(ObjectField {
            fields: owner,
            upload: Some(ObjectUpload::Outwards { column: ColumnRef::new("restaurant", "owner"), target_table: String::from("user") })
        }));
        return Structure { data: StructureField::Object(ObjectField { fields, upload: None }), joins: Vec::new() };
    }

    fn with_reviews() -> Structure {
        let mut review: BTreeMap<String, StructureField> = BTreeMap::new();
        review.insert(String::from("id"), scalar(ScalarKind::Number, "restaurant__reviews", "_id"));
        review.insert(String::from("text"), scalar(ScalarKind::String, "restaurant__reviews", "text"));

        let mut fields: BTreeMap<String, StructureField> = BTreeMap::new();
        fields.insert(String::from("reviews"), StructureField::Array(ArrayField {
            item: ArrayItem::Object { fields: review, joins: Vec::new() },
            fetch: FetchSpec {
                table: String::from("restaurant__reviews"),
                joins: Vec::new(),
                id: ColumnRef::id("restaurant__reviews"),
                link: ColumnRef::new("restaurant__reviews", "_entityId"),
                order: ColumnRef::new("restaurant__reviews", "_order"),
            },
            upload: ArrayUpload::Rows {
                table: String::from("restaurant__reviews"),
                link_column: String::from("_entityId"),
                order_column: Some(String::from("_order"))
            }
        }));
        return Structure { data: StructureField::Object(ObjectField { fields, upload: None }), joins: Vec::new() };
    }

    #[test]
    fn component_lists_replace_the_stored_rows() {
        let value = json!({"id": 1, "reviews": [{"id": 8, "text": "b"}, {"text": "a"}]});
        let plan = extract_insert_plan(&with_reviews(), "restaurant", &value).unwrap();
        assert_eq!(plan.dependent.len(), 1);
        match &plan.dependent[0] {
            DependentWrite::Replace { table, link_column, rows } => {
                assert_eq!(table, "restaurant__reviews");
                assert_eq!(link_column, "_entityId");
                assert_eq!(rows.len(), 2);
                assert_eq!(rows[0].main_table.data["_id"], SqlValue::Integer(8));
                assert_eq!(rows[0].main_table.data["_order"], SqlValue::Integer(0));
                assert_eq!(rows[1].main_table.data["_order"], SqlValue::Integer(1));
                assert!(!rows[1].main_table.data.contains_key("_id"));
            },
            other => panic!("unexpected write {other:?}")
        }

        let cleared = extract_insert_plan(&with_reviews(), "restaurant", &json!({"reviews": []})).unwrap();
        assert!(matches!(&cleared.dependent[0], DependentWrite::Replace { rows, .. } if rows.is_empty()));
        let untouched = extract_insert_plan(&with_reviews(), "restaurant", &json!({"reviews": null})).unwrap();
        assert!(untouched.dependent.is_empty());
    }

    #[test]
    fn dig_reads_nested_members() {
        let value = json!({"a": {"b": 3}, "c": [1]});
        assert_eq!(dig(&value, "a/b").unwrap(), Some(&json!(3)));
        assert_eq!(dig(&value, "a/x").unwrap(), None);
        assert!(dig(&value, "c/0").is_err());
    }

    #[test]
    fn relation_ids_are_stored_on_the_owner() {
        let plan = extract_insert_plan(&restaurant(), "restaurant", &json!({"name": "Roma", "open": true, "owner": 4})).unwrap();
        assert_eq!(plan.main_table.data["name"], SqlValue::Text(String::from("Roma")));
        assert_eq!(plan.main_table.data["open"], SqlValue::Integer(1));
        assert_eq!(plan.main_table.data["owner"], SqlValue::Integer(4));
        assert!(plan.sibling_tables.is_empty());
    }

    #[test]
    fn related_objects_with_members_become_siblings() {
        let plan = extract_insert_plan(&restaurant(), "restaurant", &json!({"id": 2, "owner": {"id": 4, "name": "Ann"}})).unwrap();
        assert_eq!(plan.main_table.data["_id"], SqlValue::Integer(2));
        assert_eq!(plan.sibling_tables.len(), 1);
        assert_eq!(plan.sibling_tables[0].main_table.name, "user");
        assert_eq!(plan.sibling_tables[0].main_table.data["_id"], SqlValue::Integer(4));
        assert_eq!(plan.sibling_tables[0].main_table.data["name"], SqlValue::Text(String::from("Ann")));
    }

    #[test]
    fn related_objects_need_an_id() {
        let result = extract_insert_plan(&restaurant(), "restaurant", &json!({"owner": {"name": "Ann"}}));
        assert!(matches!(result, Err(error::Error::ShapeError(_))));
        let result = extract_insert_plan(&restaurant(), "restaurant", &json!({"name": ["a"]}));
        assert!(matches!(result, Err(error::Error::ShapeError(_))));
    }
}
