use std::collections::BTreeMap;
use futures::future::{try_join_all, BoxFuture};
use rusqlite::types::Value as SqlValue;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use crate::backend::column::quote_identifier;
use crate::backend::db::Database;
use crate::backend::filter::{build_condition, build_order_by, Filter, IgnoredClause, SortEntry};
use crate::backend::structure::{
    columns_of, ArrayItem, ColumnRef, FetchSpec, Join, ObjectUpload, ScalarField, ScalarKind, Structure, StructureField
};
use crate::util::error;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Filter, sort and limit applied to the top level of a query.
pub struct QueryArgs {
    #[serde(default)]
    pub filter: Filter,
    #[serde(default)]
    pub sort: Vec<SortEntry>,
    #[serde(default)]
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
/// The rows a query starts from.
pub struct Source {
    pub table: String,
    pub joins: Vec<Join>,
    /// Projected as `id`.
    pub id: ColumnRef,
    /// Seed equality conditions.
    pub conditions: Vec<(ColumnRef, SqlValue)>,
    /// Applied after any requested sort.
    pub order: Vec<ColumnRef>,
}

impl Source {
    /// Every row of a table, in primary key order.
    pub fn table(name: &str) -> Source {
        return Source {
            table: name.to_string(),
            joins: Vec::new(),
            id: ColumnRef::id(name),
            conditions: Vec::new(),
            order: vec![ColumnRef::id(name)],
        };
    }

    /// The rows a sub-fetch reads for one owner.
    pub fn from_fetch(fetch: &FetchSpec, owner_id: i64) -> Source {
        return Source {
            table: fetch.table.clone(),
            joins: fetch.joins.clone(),
            id: fetch.id.clone(),
            conditions: vec![(fetch.link.clone(), SqlValue::Integer(owner_id))],
            order: vec![fetch.order.clone()],
        };
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryOutput {
    pub rows: Vec<Value>,
    pub ignored: Vec<IgnoredClause>,
}

struct SubFetch<'a> {
    path: Vec<String>,
    /// Path of the owning row's id inside the row value. `None` is the row itself.
    owner: Option<Vec<String>>,
    field: &'a StructureField,
}

#[derive(Default)]
struct Selection<'a> {
    scalars: Vec<(Vec<String>, &'a ScalarField)>,
    relations: Vec<Vec<String>>,
    subs: Vec<SubFetch<'a>>,
}

fn select_fields<'a>(fields: &'a BTreeMap<String, StructureField>, path: &[String], owner: &Option<Vec<String>>, selection: &mut Selection<'a>) {
    for (name, field) in fields.iter() {
        let mut field_path = path.to_vec();
        field_path.push(name.clone());

        match field {
            StructureField::Scalar(scalar) => selection.scalars.push((field_path, scalar)),
            StructureField::Object(object) => match &object.upload {
                Some(ObjectUpload::Outwards { .. }) => {
                    let mut id_path = field_path.clone();
                    id_path.push(String::from("id"));
                    select_fields(&object.fields, &field_path, &Some(id_path), selection);
                    selection.relations.push(field_path);
                },
                Some(ObjectUpload::Inwards { .. }) => {},
                None => select_fields(&object.fields, &field_path, owner, selection)
            },
            StructureField::Array(_) | StructureField::Custom(_) => {
                selection.subs.push(SubFetch { path: field_path, owner: owner.clone(), field });
            }
        }
    }
}

fn number(f: f64) -> Value {
    return Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null);
}

/// Converts a column value to JSON according to the field kind.
pub fn to_json(kind: ScalarKind, value: &SqlValue) -> Value {
    return match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(i) => match kind {
            ScalarKind::Boolean => Value::Bool(*i != 0),
            ScalarKind::String => Value::String(i.to_string()),
            ScalarKind::Number | ScalarKind::Reference => Value::from(*i)
        },
        SqlValue::Real(f) => match kind {
            ScalarKind::Boolean => Value::Bool(*f != 0.0),
            ScalarKind::String => Value::String(f.to_string()),
            ScalarKind::Number | ScalarKind::Reference => number(*f)
        },
        SqlValue::Text(s) => Value::String(s.clone()),
        SqlValue::Blob(b) => Value::String(String::from_utf8_lossy(b).into_owned())
    };
}

fn get_path<'v>(value: &'v Value, path: &[String]) -> Option<&'v Value> {
    let mut current = value;
    for part in path.iter() {
        current = current.as_object()?.get(part)?;
    }
    return Some(current);
}

/// Sets a nested member, creating intermediate objects. Does nothing below a non-object.
fn set_path(value: &mut Value, path: &[String], member: Value) {
    let (last, parents) = match path.split_last() {
        Some(split) => split,
        None => { return; }
    };
    let mut current = value;
    for part in parents.iter() {
        let map = match current {
            Value::Object(map) => map,
            _ => { return; }
        };
        current = map.entry(part.clone()).or_insert_with(|| Value::Object(Map::new()));
    }
    if let Value::Object(map) = current {
        map.insert(last.clone(), member);
    }
}

/// Executes an object structure against `source` and returns one value per row.
pub async fn fetch_by_structure(db: &Database, structure: &Structure, source: &Source, args: &QueryArgs) -> Result<QueryOutput, error::Error> {
    let fields = match &structure.data {
        StructureField::Object(object) => &object.fields,
        _ => { return Err(error::Error::ShapeError(String::from("Only object structures can be queried"))); }
    };
    let (rows, ignored) = fetch_rows(db, fields, &structure.joins, source.clone(), Some(args)).await?;
    return Ok(QueryOutput { rows, ignored });
}

/// Reads the rows of `source`, selecting the inline members of `fields` and resolving sub-fetches.
pub(crate) fn fetch_rows<'a>(
    db: &'a Database,
    fields: &'a BTreeMap<String, StructureField>,
    joins: &'a [Join],
    source: Source,
    args: Option<&'a QueryArgs>
) -> BoxFuture<'a, Result<(Vec<Value>, Vec<IgnoredClause>), error::Error>> {
    return Box::pin(async move {
        let mut selection = Selection::default();
        select_fields(fields, &[], &None, &mut selection);

        // Build the query
        let mut select: Vec<String> = vec![format!("{} AS \"id\"", source.id.to_sql())];
        for (path, scalar) in selection.scalars.iter() {
            select.push(format!("{} AS {}", scalar.column.to_sql(), quote_identifier(&path.join("/"))));
        }
        let mut sql = format!("SELECT {} FROM {}", select.join(", "), quote_identifier(&source.table));
        for join in source.joins.iter().chain(joins.iter()) {
            sql = format!("{sql} {}", join.to_sql());
        }

        let mut params: Vec<SqlValue> = Vec::new();
        let mut conditions: Vec<String> = Vec::new();
        for (column, value) in source.conditions.iter() {
            conditions.push(format!("{} = ?", column.to_sql()));
            params.push(value.clone());
        }

        let mut ignored: Vec<IgnoredClause> = Vec::new();
        let mut order: Vec<String> = Vec::new();
        if let Some(args) = args {
            let columns = columns_of(fields, source.id.clone());
            if let Some(condition) = build_condition(&args.filter, &columns, &mut ignored) {
                conditions.push(format!("({})", condition.sql));
                params.extend(condition.params);
            }
            order = build_order_by(&args.sort, &columns, &mut ignored);
        }
        order.extend(source.order.iter().map(|c| format!("{} ASC", c.to_sql())));

        if !conditions.is_empty() {
            sql = format!("{sql} WHERE {}", conditions.join(" AND "));
        }
        if !order.is_empty() {
            sql = format!("{sql} ORDER BY {}", order.join(", "));
        }
        if let Some(limit) = args.and_then(|a| a.limit) {
            sql = format!("{sql} LIMIT ?");
            params.push(SqlValue::Integer(limit));
        }

        // Unflatten every row
        let result = db.query_rows(&sql, &params).await?;
        let mut rows: Vec<Value> = Vec::with_capacity(result.len());
        let mut owners: Vec<Vec<Option<i64>>> = Vec::with_capacity(result.len());
        for columns in result.iter() {
            let mut row = Value::Object(Map::new());
            set_path(&mut row, &[String::from("id")], to_json(ScalarKind::Number, &columns[0]));
            for (i, (path, scalar)) in selection.scalars.iter().enumerate() {
                set_path(&mut row, path, to_json(scalar.kind, &columns[i + 1]));
            }

            owners.push(selection.subs.iter().map(|sub| {
                let id = match &sub.owner {
                    Some(path) => get_path(&row, path),
                    None => get_path(&row, &[String::from("id")])
                };
                id.and_then(|v| v.as_i64())
            }).collect());

            // A relation without a target row reads as null, deepest first
            let mut relations: Vec<&Vec<String>> = selection.relations.iter().collect();
            relations.sort_by_key(|p| std::cmp::Reverse(p.len()));
            for path in relations {
                let mut id_path = path.clone();
                id_path.push(String::from("id"));
                if get_path(&row, &id_path).is_some_and(|v| v.is_null()) {
                    set_path(&mut row, path, Value::Null);
                }
            }
            rows.push(row);
        }

        // Resolve sub-fetches of every row concurrently
        let mut tasks: Vec<BoxFuture<'a, Result<(usize, usize, Value), error::Error>>> = Vec::new();
        for (row_index, row_owners) in owners.iter().enumerate() {
            for (sub_index, owner) in row_owners.iter().enumerate() {
                if let Some(owner_id) = *owner {
                    let field = selection.subs[sub_index].field;
                    tasks.push(Box::pin(async move {
                        let value: Result<Value, error::Error> = fetch_field(db, field, owner_id).await;
                        return value.map(|v| (row_index, sub_index, v));
                    }));
                }
            }
        }
        for (row_index, sub_index, value) in try_join_all(tasks).await? {
            set_path(&mut rows[row_index], &selection.subs[sub_index].path, value);
        }

        return Ok((rows, ignored));
    });
}

/// Runs the sub-fetch of an array or custom field for one owner row.
fn fetch_field<'a>(db: &'a Database, field: &'a StructureField, owner_id: i64) -> BoxFuture<'a, Result<Value, error::Error>> {
    return Box::pin(async move {
        return match field {
            StructureField::Array(array) => {
                let source = Source::from_fetch(&array.fetch, owner_id);
                match &array.item {
                    ArrayItem::Object { fields, joins } => {
                        let (rows, _) = fetch_rows(db, fields, joins, source, None).await?;
                        Ok(Value::Array(rows))
                    },
                    ArrayItem::Ids => {
                        let empty: BTreeMap<String, StructureField> = BTreeMap::new();
                        let (rows, _) = fetch_rows(db, &empty, &[], source, None).await?;
                        Ok(Value::Array(
                            rows.into_iter()
                                .filter_map(|row| row.get("id").cloned())
                                .filter(|id| !id.is_null())
                                .collect()
                        ))
                    }
                }
            },
            StructureField::Custom(custom) => custom.fetch(db, owner_id).await,
            StructureField::Scalar(_) | StructureField::Object(_) => Ok(Value::Null)
        };
    });
}
