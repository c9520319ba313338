use rusqlite::types::Value as SqlValue;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use crate::backend::structure::Columns;
use crate::util::error;

const COMBINATORS: [&str; 3] = ["!and", "!or", "!not"];
const COMPARATORS: [&str; 11] = ["!eq", "!neq", "!null", "!notNull", "!lt", "!lte", "!gt", "!ge", "!like", "!in", "!between"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
/// Predicate tree in its wire form: field paths mapped to comparators, or combinators mapped to sub-filters.
pub struct Filter(pub Map<String, Value>);

impl Filter {
    pub fn new() -> Filter {
        return Filter(Map::new());
    }

    /// Wraps a JSON object. Anything else is a shape error.
    pub fn from_value(value: Value) -> Result<Filter, error::Error> {
        return match value {
            Value::Object(map) => Ok(Filter(map)),
            Value::Null => Ok(Filter::new()),
            other => Err(error::Error::ShapeError(format!("Invalid filter: {other}")))
        };
    }

    pub fn is_empty(&self) -> bool {
        return self.0.is_empty();
    }

    /// Every field path compared against by a known comparator, including inside combinators.
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = Vec::new();
        collect_paths(&self.0, &mut paths);
        return paths;
    }
}

fn collect_paths(filter: &Map<String, Value>, paths: &mut Vec<String>) {
    for (key, value) in filter.iter() {
        match value {
            Value::Array(items) if COMBINATORS.contains(&key.as_str()) => {
                for item in items.iter() {
                    if let Value::Object(inner) = item {
                        collect_paths(inner, paths);
                    }
                }
            },
            Value::Object(ops) => {
                if ops.keys().any(|op| COMPARATORS.contains(&op.as_str())) && !paths.contains(key) {
                    paths.push(key.clone());
                }
            },
            _ => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SortEntry {
    Field(String),
    Ordered {
        field: String,
        #[serde(default)]
        desc: bool
    },
}

impl SortEntry {
    pub fn field(&self) -> &str {
        return match self {
            Self::Field(field) => field,
            Self::Ordered { field, .. } => field
        };
    }

    pub fn is_desc(&self) -> bool {
        return match self {
            Self::Field(_) => false,
            Self::Ordered { desc, .. } => *desc
        };
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
/// A filter or sort clause that was skipped instead of applied.
pub struct IgnoredClause {
    pub path: String,
    pub reason: String,
}

/// SQL condition text with its positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

fn ignore(ignored: &mut Vec<IgnoredClause>, path: &str, reason: String) {
    tracing::debug!(path, reason = reason.as_str(), "Ignoring filter clause");
    ignored.push(IgnoredClause { path: path.to_string(), reason });
}

/// Converts a JSON scalar into a bindable value.
pub fn to_sql_value(value: &Value) -> Option<SqlValue> {
    return match value {
        Value::Null => Some(SqlValue::Null),
        Value::Bool(b) => Some(SqlValue::Integer(if *b { 1 } else { 0 })),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Some(SqlValue::Integer(i)),
            None => n.as_f64().map(SqlValue::Real)
        },
        Value::String(s) => Some(SqlValue::Text(s.clone())),
        Value::Array(_) | Value::Object(_) => None
    };
}

/// Compiles a filter into one condition. Top-level entries are combined with `AND`.
pub fn build_condition(filter: &Filter, columns: &Columns, ignored: &mut Vec<IgnoredClause>) -> Option<Condition> {
    return build_map(&filter.0, columns, ignored);
}

fn build_map(filter: &Map<String, Value>, columns: &Columns, ignored: &mut Vec<IgnoredClause>) -> Option<Condition> {
    let mut parts: Vec<Condition> = Vec::new();
    for (key, value) in filter.iter() {
        if COMBINATORS.contains(&key.as_str()) {
            if let Some(condition) = build_combinator(key, value, columns, ignored) {
                parts.push(condition);
            }
            continue;
        }

        let ops = match value {
            Value::Object(ops) => ops,
            _ => {
                ignore(ignored, key, String::from("expected an object of comparators"));
                continue;
            }
        };
        let column = match columns.get(key) {
            Some(column) => column.to_sql(),
            None => {
                ignore(ignored, key, String::from("unknown field"));
                continue;
            }
        };
        for (op, operand) in ops.iter() {
            match build_comparison(&column, op, operand) {
                Ok(condition) => parts.push(condition),
                Err(reason) => ignore(ignored, key, reason)
            }
        }
    }
    return join_conditions(parts, " AND ");
}

fn build_combinator(key: &str, value: &Value, columns: &Columns, ignored: &mut Vec<IgnoredClause>) -> Option<Condition> {
    let items = match value {
        Value::Array(items) => items,
        _ => {
            ignore(ignored, key, String::from("expected an array of filters"));
            return None;
        }
    };

    let mut parts: Vec<Condition> = Vec::new();
    for item in items.iter() {
        match item {
            Value::Object(inner) => {
                if let Some(condition) = build_map(inner, columns, ignored) {
                    parts.push(condition);
                }
            },
            _ => ignore(ignored, key, String::from("expected a filter object"))
        }
    }

    return match key {
        "!and" => join_conditions(parts, " AND "),
        "!or" => join_conditions(parts, " OR "),
        _ => join_conditions(parts, " OR ").map(|c| Condition { sql: format!("NOT ({})", c.sql), params: c.params })
    };
}

fn join_conditions(parts: Vec<Condition>, separator: &str) -> Option<Condition> {
    if parts.is_empty() {
        return None;
    }
    if parts.len() == 1 {
        return parts.into_iter().next();
    }
    let mut sql: Vec<String> = Vec::with_capacity(parts.len());
    let mut params: Vec<SqlValue> = Vec::new();
    for part in parts {
        sql.push(format!("({})", part.sql));
        params.extend(part.params);
    }
    return Some(Condition { sql: sql.join(separator), params });
}

fn scalar_operand(op: &str, operand: &Value) -> Result<SqlValue, String> {
    return to_sql_value(operand).ok_or_else(|| format!("{op} expects a scalar operand"));
}

fn build_comparison(column: &str, op: &str, operand: &Value) -> Result<Condition, String> {
    let simple = |sql_op: &str| -> Result<Condition, String> {
        return Ok(Condition {
            sql: format!("{column} {sql_op} ?"),
            params: vec![scalar_operand(op, operand)?]
        });
    };

    return match op {
        "!eq" if operand.is_null() => Ok(Condition { sql: format!("{column} IS NULL"), params: Vec::new() }),
        "!neq" if operand.is_null() => Ok(Condition { sql: format!("{column} IS NOT NULL"), params: Vec::new() }),
        "!eq" => simple("="),
        "!neq" => simple("<>"),
        "!lt" => simple("<"),
        "!lte" => simple("<="),
        "!gt" => simple(">"),
        "!ge" => simple(">="),
        "!null" => Ok(Condition { sql: format!("{column} IS NULL"), params: Vec::new() }),
        "!notNull" => Ok(Condition { sql: format!("{column} IS NOT NULL"), params: Vec::new() }),
        "!like" => match operand {
            Value::String(pattern) => Ok(Condition {
                sql: format!("{column} LIKE ?"),
                params: vec![SqlValue::Text(pattern.clone())]
            }),
            _ => Err(String::from("!like expects a string pattern"))
        },
        "!in" => match operand {
            Value::Array(items) => {
                if items.is_empty() {
                    return Ok(Condition { sql: String::from("0"), params: Vec::new() });
                }
                let mut params: Vec<SqlValue> = Vec::with_capacity(items.len());
                for item in items.iter() {
                    params.push(scalar_operand(op, item)?);
                }
                Ok(Condition {
                    sql: format!("{column} IN ({})", vec!["?"; params.len()].join(", ")),
                    params
                })
            },
            _ => Err(String::from("!in expects an array"))
        },
        "!between" => match operand {
            Value::Array(items) if items.len() == 2 => Ok(Condition {
                sql: format!("{column} BETWEEN ? AND ?"),
                params: vec![scalar_operand(op, &items[0])?, scalar_operand(op, &items[1])?]
            }),
            _ => Err(String::from("!between expects an array of two bounds"))
        },
        _ => Err(format!("unknown operator {op}"))
    };
}

/// Compiles sort entries into `ORDER BY` terms. Unresolvable fields are dropped.
pub fn build_order_by(sort: &[SortEntry], columns: &Columns, ignored: &mut Vec<IgnoredClause>) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for entry in sort.iter() {
        match columns.get(entry.field()) {
            Some(column) => {
                terms.push(format!("{} {} NULLS LAST", column.to_sql(), if entry.is_desc() { "DESC" } else { "ASC" }));
            },
            None => {
                tracing::debug!(field = entry.field(), "Ignoring sort clause");
                ignored.push(IgnoredClause { path: entry.field().to_string(), reason: String::from("unknown sort field") });
            }
        }
    }
    return terms;
}
