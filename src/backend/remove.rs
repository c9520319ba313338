use rusqlite::types::Value as SqlValue;
use serde::Serialize;
use crate::backend::column::quote_identifier;
use crate::backend::db::Database;
use crate::backend::filter::{build_condition, Filter, IgnoredClause};
use crate::backend::structure::{extract_columns, ColumnRef, Structure};
use crate::backend::table::PRIMARY_KEY;
use crate::util::error;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveResult {
    pub deleted: usize,
    pub ignored: Vec<IgnoredClause>,
}

/// Builds the delete statement for the rows of `table` matching `filter`.
/// `structure` must select at least the fields the filter mentions.
/// Gives `None` when a clause could not be applied, so nothing outside the filter is deleted.
pub fn delete_statement(structure: &Structure, table: &str, filter: &Filter, ignored: &mut Vec<IgnoredClause>) -> Option<(String, Vec<SqlValue>)> {
    let name = quote_identifier(table);
    if filter.is_empty() {
        return Some((format!("DELETE FROM {name}"), Vec::new()));
    }

    let columns = extract_columns(&structure.data, ColumnRef::id(table));
    let condition = build_condition(filter, &columns, ignored)?;
    if !ignored.is_empty() {
        return None;
    }

    let mut select = format!("SELECT {} FROM {name}", ColumnRef::id(table).to_sql());
    for join in structure.joins.iter() {
        select = format!("{select} {}", join.to_sql());
    }
    let sql = format!("DELETE FROM {name} WHERE \"{PRIMARY_KEY}\" IN ({select} WHERE {})", condition.sql);
    return Some((sql, condition.params));
}

/// Deletes the rows of `table` matching `filter`. Owned rows go with them through cascading keys.
pub async fn remove_with_filter(db: &Database, structure: &Structure, table: &str, filter: &Filter) -> Result<RemoveResult, error::Error> {
    let mut ignored: Vec<IgnoredClause> = Vec::new();
    let (sql, params) = match delete_statement(structure, table, filter, &mut ignored) {
        Some(statement) => statement,
        None => {
            tracing::warn!(table, ignored = ignored.len(), "Filter not fully applicable, nothing removed");
            return Ok(RemoveResult { deleted: 0, ignored });
        }
    };
    let deleted = db.execute(&sql, &params).await?;
    tracing::info!(table, deleted, "Removed rows");
    return Ok(RemoveResult { deleted, ignored });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use serde_json::json;
    use crate::backend::structure::{Join, ObjectField, ObjectUpload, ScalarField, ScalarKind, StructureField};

    fn structure() -> Structure {
        let mut owner: BTreeMap<String, StructureField> = BTreeMap::new();
        owner.insert(String::from("name"), StructureField::Scalar(ScalarField { kind: ScalarKind::String, column: ColumnRef::new("__j1", "name") }));
        let mut fields: BTreeMap<String, StructureField> = BTreeMap::new();
        fields.insert(String::from("owner"), StructureField::Object(ObjectField {
            fields: owner,
            upload: Some(ObjectUpload::Outwards { column: ColumnRef::new("restaurant", "owner"), target_table: String::from("user") })
        }));
        return Structure {
            data: StructureField::Object(ObjectField { fields, upload: None }),
            joins: vec![Join {
                alias: String::from("__j1"),
                table: String::from("user"),
                column: String::from("_id"),
                on: ColumnRef::new("restaurant", "owner")
            }]
        };
    }

    #[test]
    fn empty_filter_deletes_everything() {
        let (sql, params) = delete_statement(&structure(), "restaurant", &Filter::new(), &mut Vec::new()).unwrap();
        assert_eq!(sql, "DELETE FROM \"restaurant\"");
        assert!(params.is_empty());
    }

    #[test]
    fn filters_on_related_fields_use_a_subquery() {
        let filter = Filter::from_value(json!({"owner.name": {"!eq": "Ann"}})).unwrap();
        let (sql, params) = delete_statement(&structure(), "restaurant", &filter, &mut Vec::new()).unwrap();
        assert!(sql.starts_with("DELETE FROM \"restaurant\" WHERE \"_id\" IN (SELECT \"restaurant\".\"_id\" FROM \"restaurant\" LEFT JOIN"));
        assert!(sql.contains("\"__j1\".\"name\""));
        assert_eq!(params, vec![SqlValue::Text(String::from("Ann"))]);
    }

    #[test]
    fn relations_compare_by_their_stored_id() {
        let filter = Filter::from_value(json!({"owner": {"!eq": 4}})).unwrap();
        let (sql, params) = delete_statement(&structure(), "restaurant", &filter, &mut Vec::new()).unwrap();
        assert!(sql.contains("\"restaurant\".\"owner\" = ?"));
        assert_eq!(params, vec![SqlValue::Integer(4)]);
    }

    #[test]
    fn unapplied_clauses_delete_nothing() {
        let mut ignored: Vec<IgnoredClause> = Vec::new();
        let typo = Filter::from_value(json!({"nme": {"!eq": "Roma"}})).unwrap();
        assert_eq!(delete_statement(&structure(), "restaurant", &typo, &mut ignored), None);
        assert_eq!(ignored.len(), 1);

        let mut ignored: Vec<IgnoredClause> = Vec::new();
        let partial = Filter::from_value(json!({"owner.name": {"!eq": "Ann"}, "nme": {"!eq": "Roma"}})).unwrap();
        assert_eq!(delete_statement(&structure(), "restaurant", &partial, &mut ignored), None);

        let empty_group = Filter::from_value(json!({"!and": []})).unwrap();
        assert_eq!(delete_statement(&structure(), "restaurant", &empty_group, &mut Vec::new()), None);
    }
}
