use std::collections::BTreeMap;
use std::sync::Arc;
use futures::future::{try_join_all, BoxFuture};
use rusqlite::types::Value as SqlValue;
use serde::Deserialize;
use serde_json::{Map, Value};
use crate::backend::column::{quote_identifier, ReferentialAction};
use crate::backend::data_type::component::{ENTITY_COLUMN, ORDER_COLUMN};
use crate::backend::data_type::{parse_payload, payload, DataType};
use crate::backend::db::Database;
use crate::backend::insert::{execute_insert_plan, extract_insert_plan};
use crate::backend::query::{fetch_rows, Source};
use crate::backend::registry::Registry;
use crate::backend::schema::{Constraints, Schema};
use crate::backend::structure::{
    column_name, compile_fields, ColumnRef, CustomField, Join, ObjectField, ObjectUpload, ScalarField, ScalarKind, Structure,
    StructureArgs, StructureField
};
use crate::backend::table::{Table, PRIMARY_KEY};
use crate::util::error;

/// Bridge column holding the full name of the entry's component type.
pub const TYPE_COLUMN: &str = "_type";
/// Side table column pointing at the bridge row.
pub const ENTRY_COLUMN: &str = "_entryId";

#[derive(Debug, Deserialize)]
struct DynamicPayload {
    types: Vec<String>,
    #[serde(default)]
    list: bool,
}

fn lookup<'r>(registry: &'r Registry, name: &str) -> Result<&'r Schema, error::Error> {
    return registry
        .component(name)
        .map(|c| c.as_ref())
        .ok_or_else(|| error::Error::SchemaError(format!("Missing component type: {name}")));
}

/// Key of an entry's single member, e.g. `{"blocks_quote": {...}}` for `blocks.quote`.
pub fn type_key(name: &str) -> String {
    return name.replace('.', "_");
}

fn scalar(kind: ScalarKind, column: ColumnRef) -> StructureField {
    return StructureField::Scalar(ScalarField { kind, column });
}

#[derive(Debug)]
struct EntryType {
    name: String,
    key: String,
    /// Primary key of the side row under its join alias.
    id: ColumnRef,
    /// Fields and joins that read one entry, keyed by `key` next to `_order`.
    read_fields: BTreeMap<String, StructureField>,
    read_joins: Vec<Join>,
    /// Writes a bridge row with its side row.
    write: Structure,
}

#[derive(Debug)]
/// Ordered list of entries that may each be any of several component types.
pub struct DynamicField {
    bridge: String,
    types: Vec<EntryType>,
}

impl DynamicField {
    async fn fetch_type(&self, db: &Database, entry: &EntryType, id: i64) -> Result<Vec<(i64, Value)>, error::Error> {
        let source = Source {
            table: self.bridge.clone(),
            joins: Vec::new(),
            id: entry.id.clone(),
            conditions: vec![
                (ColumnRef::new(&self.bridge, TYPE_COLUMN), SqlValue::Text(entry.name.clone())),
                (ColumnRef::new(&self.bridge, ENTITY_COLUMN), SqlValue::Integer(id)),
            ],
            order: vec![ColumnRef::new(&self.bridge, ORDER_COLUMN)],
        };
        let (rows, _) = fetch_rows(db, &entry.read_fields, &entry.read_joins, source, None).await?;

        let mut entries: Vec<(i64, Value)> = Vec::with_capacity(rows.len());
        for row in rows.into_iter() {
            let order = row.get(ORDER_COLUMN).and_then(|o| o.as_i64()).unwrap_or_default();
            let mut element = Map::new();
            element.insert(entry.key.clone(), row.get(&entry.key).cloned().unwrap_or(Value::Null));
            entries.push((order, Value::Object(element)));
        }
        return Ok(entries);
    }
}

impl CustomField for DynamicField {
    fn fetch<'a>(&'a self, db: &'a Database, id: i64) -> BoxFuture<'a, Result<Value, error::Error>> {
        return Box::pin(async move {
            let per_type = try_join_all(self.types.iter().map(|t| self.fetch_type(db, t, id))).await?;
            let mut entries: Vec<(i64, Value)> = per_type.into_iter().flatten().collect();
            entries.sort_by_key(|(order, _)| *order);
            return Ok(Value::Array(entries.into_iter().map(|(_, element)| element).collect()));
        });
    }

    fn upload<'a>(&'a self, db: &'a Database, id: i64, value: Value) -> BoxFuture<'a, Result<(), error::Error>> {
        return Box::pin(async move {
            let elements = match value {
                Value::Array(elements) => elements,
                Value::Null => Vec::new(),
                _ => { return Err(error::Error::ShapeError(format!("{} must be a list", self.bridge))); }
            };

            // Plan every entry before touching the stored list
            let mut plans = Vec::with_capacity(elements.len());
            for (index, element) in elements.into_iter().enumerate() {
                let (key, inner) = match element {
                    Value::Object(map) if map.len() == 1 => match map.into_iter().next() {
                        Some(member) => member,
                        None => { continue; }
                    },
                    _ => {
                        return Err(error::Error::ShapeError(format!("{}[{index}] must be an object with a single member", self.bridge)));
                    }
                };
                let entry = match self.types.iter().find(|t| t.key == key) {
                    Some(entry) => entry,
                    None => { return Err(error::Error::ShapeError(format!("Unknown entry type {key} in {}", self.bridge))); }
                };

                let mut row = Map::new();
                row.insert(String::from(ENTITY_COLUMN), Value::from(id));
                row.insert(String::from(ORDER_COLUMN), Value::from(index as i64));
                row.insert(String::from(TYPE_COLUMN), Value::String(entry.name.clone()));
                row.insert(key, inner);
                plans.push(extract_insert_plan(&entry.write, &self.bridge, &Value::Object(row))?);
            }

            // Side rows go with their bridge rows
            let sql = format!("DELETE FROM {} WHERE {} = ?", quote_identifier(&self.bridge), quote_identifier(ENTITY_COLUMN));
            db.execute(&sql, &[SqlValue::Integer(id)]).await?;

            try_join_all(plans.into_iter().map(|plan| execute_insert_plan(db, plan))).await?;
            return Ok(());
        });
    }
}

/// Ordered list whose entries are each one of several component types.
pub struct DynamicComponentDataType;

impl DataType for DynamicComponentDataType {
    fn name(&self) -> &str {
        return "dynamicComponent";
    }

    fn generate_columns(&self, registry: &Registry, table: &mut Table, name: &str, constraints: &Constraints) -> Result<Vec<Table>, error::Error> {
        let p: DynamicPayload = payload(self.name(), constraints)?;
        if !p.list {
            return Err(error::Error::SchemaError(String::from("Single item dynamic components are not supported")));
        }

        let bridge_name = format!("{}__{name}", table.name);
        let mut bridge = Table::new(&bridge_name);
        bridge.int(ENTITY_COLUMN).references(&table.name, PRIMARY_KEY).on_delete(ReferentialAction::Cascade);
        bridge.int(ORDER_COLUMN);
        bridge.string(TYPE_COLUMN);

        let mut tables: Vec<Table> = vec![bridge];
        for type_name in p.types.iter() {
            let component = lookup(registry, type_name)?;
            let mut side = Table::new(&format!("{bridge_name}__{}", type_key(type_name)));
            side.int(ENTRY_COLUMN).references(&bridge_name, PRIMARY_KEY).on_delete(ReferentialAction::Cascade);

            let mut extra: Vec<Table> = Vec::new();
            for field in component.fields.iter() {
                extra.extend(field.data_type.generate_columns(registry, &mut side, &column_name(&field.name), &field.constraints)?);
            }
            tables.push(side);
            tables.extend(extra);
        }
        return Ok(tables);
    }

    fn generate_structure(&self, args: StructureArgs<'_>) -> Result<Structure, error::Error> {
        let p: DynamicPayload = payload(self.name(), args.constraints)?;
        if !p.list {
            return Err(error::Error::SchemaError(String::from("Single item dynamic components are not supported")));
        }
        let bridge = format!("{}__{}", args.physical, args.path);

        let mut types: Vec<EntryType> = Vec::new();
        for type_name in p.types.iter() {
            let component = lookup(args.ctx.registry, type_name)?;
            let key = type_key(type_name);
            let selector = match args.selector.descend(&key) {
                Some(s) => s,
                None => { continue; }
            };
            let side = format!("{bridge}__{key}");
            let alias = args.ctx.alias();

            args.ctx.enter_component(&component.name)?;
            let compiled = compile_fields(args.ctx, component, &selector, &alias, &side, None)
                .and_then(|read| compile_fields(args.ctx, component, &selector, &side, &side, None).map(|write| (read, write)));
            args.ctx.leave_component();
            let ((mut inner, nested), (write_fields, _)) = compiled?;

            // Read: bridge row joined with its side row
            inner.insert(String::from("id"), scalar(ScalarKind::Number, ColumnRef::id(&alias)));
            let mut read_fields: BTreeMap<String, StructureField> = BTreeMap::new();
            read_fields.insert(String::from(ORDER_COLUMN), scalar(ScalarKind::Number, ColumnRef::new(&bridge, ORDER_COLUMN)));
            read_fields.insert(key.clone(), StructureField::Object(ObjectField { fields: inner, upload: None }));
            let mut read_joins: Vec<Join> = vec![Join {
                alias: alias.clone(),
                table: side.clone(),
                column: String::from(ENTRY_COLUMN),
                on: ColumnRef::id(&bridge)
            }];
            read_joins.extend(nested);

            // Write: bridge row with the side row as an inwards object
            let mut write: BTreeMap<String, StructureField> = BTreeMap::new();
            write.insert(String::from(ENTITY_COLUMN), scalar(ScalarKind::Number, ColumnRef::new(&bridge, ENTITY_COLUMN)));
            write.insert(String::from(ORDER_COLUMN), scalar(ScalarKind::Number, ColumnRef::new(&bridge, ORDER_COLUMN)));
            write.insert(String::from(TYPE_COLUMN), scalar(ScalarKind::String, ColumnRef::new(&bridge, TYPE_COLUMN)));
            write.insert(key.clone(), StructureField::Object(ObjectField {
                fields: write_fields,
                upload: Some(ObjectUpload::Inwards { table: side.clone(), link_column: String::from(ENTRY_COLUMN) })
            }));

            types.push(EntryType {
                name: type_name.clone(),
                key,
                id: ColumnRef::id(&alias),
                read_fields,
                read_joins,
                write: Structure { data: StructureField::Object(ObjectField { fields: write, upload: None }), joins: Vec::new() }
            });
        }

        return Ok(Structure {
            data: StructureField::Custom(Arc::new(DynamicField { bridge, types })),
            joins: Vec::new()
        });
    }

    fn verify_data(&self, registry: &Registry, constraints: &Constraints) -> Option<String> {
        let p: DynamicPayload = match parse_payload(self.name(), constraints) {
            Ok(p) => p,
            Err(e) => { return Some(e); }
        };
        if !p.list {
            return Some(String::from("Single item dynamic components are not supported"));
        }
        if p.types.is_empty() {
            return Some(String::from("At least one component type is required"));
        }
        for type_name in p.types.iter() {
            if registry.component(type_name).is_none() {
                return Some(format!("Missing component type: {type_name}"));
            }
        }
        return None;
    }

    fn referenced_components(&self, constraints: &Constraints) -> Vec<String> {
        return match parse_payload::<DynamicPayload>(self.name(), constraints) {
            Ok(p) => p.types,
            Err(_) => Vec::new()
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_keys_replace_dots() {
        assert_eq!(type_key("blocks.quote"), "blocks_quote");
        assert_eq!(type_key("hero"), "hero");
    }
}
