use std::collections::BTreeMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use crate::backend::filter::Filter;
use crate::util::error;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
/// Client-supplied projection describing which fields, and how deep, to include.
pub enum Selector {
    /// `true`
    Include,
    /// `false`
    Exclude,
    /// `"*"`, every field of one level.
    Star,
    /// `"**"`, every field at every level.
    All,
    /// A comma-joined list of field names.
    Fields(Vec<String>),
    Union(Vec<Selector>),
    Map(BTreeMap<String, Selector>),
}

impl Selector {
    /// Parses the JSON wire form of a selector.
    pub fn from_json(value: &Value) -> Result<Selector, error::Error> {
        return match value {
            Value::Bool(true) => Ok(Selector::Include),
            Value::Bool(false) => Ok(Selector::Exclude),
            Value::String(s) => Ok(Selector::from_list(s)),
            Value::Array(items) => {
                let mut selectors: Vec<Selector> = Vec::with_capacity(items.len());
                for item in items.iter() {
                    selectors.push(Selector::from_json(item)?);
                }
                Ok(Selector::Union(selectors))
            },
            Value::Object(map) => {
                let mut selectors: BTreeMap<String, Selector> = BTreeMap::new();
                for (name, item) in map.iter() {
                    selectors.insert(name.clone(), Selector::from_json(item)?);
                }
                Ok(Selector::Map(selectors))
            },
            Value::Null | Value::Number(_) => Err(error::Error::ShapeError(format!("Invalid selector: {value}")))
        };
    }

    /// Parses the string form: `*`, `**` or a comma-joined field list.
    pub fn from_list(s: &str) -> Selector {
        return match s {
            "*" => Selector::Star,
            "**" => Selector::All,
            _ => Selector::Fields(
                s.split(',')
                    .map(|f| f.trim())
                    .filter(|f| !f.is_empty())
                    .map(|f| f.to_string())
                    .collect()
            )
        };
    }

    /// Builds the selector naming every field path that a filter compares against.
    pub fn from_filter(filter: &Filter) -> Selector {
        let mut root: BTreeMap<String, Selector> = BTreeMap::new();
        for path in filter.paths() {
            let parts: Vec<&str> = path.split('.').collect();
            insert_path(&mut root, &parts);
        }
        return Selector::Map(root);
    }

    /// Descends the selector by a field name. `None` means the field is excluded.
    pub fn descend(&self, field: &str) -> Option<Selector> {
        return match self {
            Selector::Include | Selector::Exclude => None,
            Selector::All => Some(Selector::All),
            Selector::Star => Some(Selector::Include),
            Selector::Fields(fields) => {
                if fields.iter().any(|f| f == field) { Some(Selector::Include) } else { None }
            },
            Selector::Map(map) => match map.get(field) {
                Some(Selector::Exclude) | None => None,
                Some(s) => Some(s.clone())
            },
            Selector::Union(items) => union(items.iter().filter_map(|s| s.descend(field)).collect())
        };
    }
}

/// Includes a dotted path. A nested path upgrades a plain `true` to an object selector.
fn insert_path(map: &mut BTreeMap<String, Selector>, parts: &[&str]) {
    let (head, rest) = match parts.split_first() {
        Some(split) => split,
        None => { return; }
    };
    if rest.is_empty() {
        map.entry(head.to_string()).or_insert(Selector::Include);
        return;
    }

    let entry = map.entry(head.to_string()).or_insert_with(|| Selector::Map(BTreeMap::new()));
    match entry {
        Selector::Map(child) => insert_path(child, rest),
        other => {
            let mut child: BTreeMap<String, Selector> = BTreeMap::new();
            insert_path(&mut child, rest);
            *other = Selector::Map(child);
        }
    }
}

/// Combines descended selectors. `"**"` dominates, concrete selectors dominate `true`,
/// and several concrete selectors stay a flattened, sorted, deduplicated union.
fn union(results: Vec<Selector>) -> Option<Selector> {
    if results.is_empty() {
        return None;
    }

    let mut flat: Vec<Selector> = Vec::new();
    flatten(results, &mut flat);
    if flat.contains(&Selector::All) {
        return Some(Selector::All);
    }

    let has_concrete = flat.iter().any(|s| *s != Selector::Include);
    if has_concrete {
        flat.retain(|s| *s != Selector::Include);
    }
    flat.sort();
    flat.dedup();

    return match flat.len() {
        0 => None,
        1 => flat.pop(),
        _ => Some(Selector::Union(flat))
    };
}

fn flatten(selectors: Vec<Selector>, out: &mut Vec<Selector>) {
    for s in selectors {
        match s {
            Selector::Union(items) => flatten(items, out),
            Selector::Exclude => {},
            other => out.push(other)
        }
    }
}

impl TryFrom<Value> for Selector {
    type Error = error::Error;

    fn try_from(value: Value) -> Result<Selector, error::Error> {
        return Selector::from_json(&value);
    }
}

impl From<Selector> for Value {
    fn from(selector: Selector) -> Value {
        return match selector {
            Selector::Include => Value::Bool(true),
            Selector::Exclude => Value::Bool(false),
            Selector::Star => Value::String(String::from("*")),
            Selector::All => Value::String(String::from("**")),
            Selector::Fields(fields) => Value::String(fields.join(",")),
            Selector::Union(items) => Value::Array(items.into_iter().map(Value::from).collect()),
            Selector::Map(map) => Value::Object(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sel(value: Value) -> Selector {
        Selector::from_json(&value).unwrap()
    }

    #[test]
    fn leaf_selectors_descend_to_nothing() {
        assert_eq!(sel(json!(true)).descend("a"), None);
        assert_eq!(sel(json!(false)).descend("a"), None);
    }

    #[test]
    fn star_and_double_star() {
        assert_eq!(sel(json!("*")).descend("a"), Some(Selector::Include));
        assert_eq!(sel(json!("**")).descend("a"), Some(Selector::All));
    }

    #[test]
    fn comma_list_membership() {
        let s = sel(json!("name, text"));
        assert_eq!(s.descend("text"), Some(Selector::Include));
        assert_eq!(s.descend("author"), None);
    }

    #[test]
    fn object_lookup_and_explicit_exclude() {
        let s = sel(json!({"reviews": "*", "hidden": false}));
        assert_eq!(s.descend("reviews"), Some(Selector::Star));
        assert_eq!(s.descend("hidden"), None);
        assert_eq!(s.descend("other"), None);
    }

    #[test]
    fn union_prefers_concrete_over_true() {
        let s = sel(json!(["name", {"reviews": "*"}, "reviews"]));
        assert_eq!(s.descend("name"), Some(Selector::Include));
        assert_eq!(s.descend("reviews"), Some(Selector::Star));
        assert_eq!(s.descend("missing"), None);
    }

    #[test]
    fn union_is_absorbed_by_double_star() {
        let s = sel(json!([{"a": "x"}, "**", {"a": "*"}]));
        assert_eq!(s.descend("a"), Some(Selector::All));
    }

    #[test]
    fn union_of_concrete_selectors_is_order_independent() {
        let left = sel(json!([{"a": "x"}, {"a": {"y": true}}]));
        let right = sel(json!([{"a": {"y": true}}, [{"a": "x"}]]));
        let expected = Selector::Union(vec![
            Selector::Fields(vec![String::from("x")]),
            sel(json!({"y": true})),
        ]);
        assert_eq!(left.descend("a"), Some(expected.clone()));
        assert_eq!(right.descend("a"), Some(expected));
    }

    #[test]
    fn invalid_selector_is_a_shape_error() {
        assert!(matches!(Selector::from_json(&json!(3)), Err(error::Error::ShapeError(_))));
        assert!(serde_json::from_value::<Selector>(json!([null])).is_err());
    }

    #[test]
    fn wire_form_round_trips() {
        let wire = json!(["name", {"reviews": "*", "owner": "**"}]);
        let value: Value = sel(wire.clone()).into();
        assert_eq!(value, wire);
    }

    #[test]
    fn selector_from_filter_names_compared_paths() {
        let filter: Filter = serde_json::from_value(json!({
            "name": {"!eq": "A"},
            "!or": [{"owner.name": {"!like": "B%"}}, {"owner": {"!notNull": true}}],
            "ignored": {"!unknown": 1}
        })).unwrap();
        assert_eq!(Selector::from_filter(&filter), sel(json!({"name": true, "owner": {"name": true}})));
    }
}
