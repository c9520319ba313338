use std::fmt;
use std::sync::Arc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use crate::backend::data_type::DataType;

/// Constraint payload of a field: `required`, `unique` and type-specific members.
pub type Constraints = Map<String, Value>;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SchemaKind {
    Entity,
    Component,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaDescription {
    pub path: Vec<String>,
    pub description: Option<String>,
    pub icon: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescription {
    pub path: Vec<String>,
    pub description: Option<String>,
    pub order: Option<i64>,
    pub visible: bool,
}

impl Default for FieldDescription {
    fn default() -> Self {
        return FieldDescription { path: Vec::new(), description: None, order: None, visible: true };
    }
}

#[derive(Clone)]
pub struct SchemaField {
    pub name: String,
    pub data_type: Arc<dyn DataType>,
    pub constraints: Constraints,
    pub description: FieldDescription,
}

impl SchemaField {
    /// Creates a field. `constraints` must be a JSON object or null.
    pub fn new(name: &str, data_type: Arc<dyn DataType>, constraints: Value) -> SchemaField {
        let constraints = match constraints {
            Value::Object(map) => map,
            _ => Map::new()
        };
        return SchemaField {
            name: name.to_string(),
            data_type,
            constraints,
            description: FieldDescription::default(),
        };
    }
}

impl fmt::Debug for SchemaField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaField")
            .field("name", &self.name)
            .field("data_type", &self.data_type.name())
            .field("constraints", &self.constraints)
            .finish()
    }
}

#[derive(Debug, Clone)]
/// A content type: an entity backed by its own table, or a reusable component.
pub struct Schema {
    pub name: String,
    pub kind: SchemaKind,
    pub description: SchemaDescription,
    pub fields: Vec<SchemaField>,
}

impl Schema {
    pub fn new(name: &str, kind: SchemaKind) -> Schema {
        return Schema {
            name: name.to_string(),
            kind,
            description: SchemaDescription::default(),
            fields: Vec::new(),
        };
    }

    pub fn field(mut self, field: SchemaField) -> Schema {
        self.fields.push(field);
        return self;
    }

    pub fn get_field(&self, name: &str) -> Option<&SchemaField> {
        return self.fields.iter().find(|f| f.name == name);
    }
}

fn split_path(path: &str) -> Vec<String> {
    return path.split('/').filter(|p| !p.is_empty()).map(|p| p.to_string()).collect();
}

fn default_visible() -> bool { true }

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SchemaFileDescription {
    /// `/`-joined path
    #[serde(default)]
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FieldFileDescription {
    /// `/`-joined path
    #[serde(default)]
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<i64>,
    #[serde(default = "default_visible")]
    pub visible: bool,
}

impl Default for FieldFileDescription {
    fn default() -> Self {
        return FieldFileDescription { path: String::new(), description: None, order: None, visible: true };
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SchemaFileField {
    pub name: String,
    /// Registered data type name.
    #[serde(rename = "type")]
    pub data_type: String,
    #[serde(default)]
    pub constraints: Constraints,
    #[serde(default)]
    pub description: FieldFileDescription,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
/// The declarative form of a content type, as read by the schema loader.
pub struct SchemaFile {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: SchemaKind,
    #[serde(default)]
    pub description: SchemaFileDescription,
    #[serde(default)]
    pub fields: Vec<SchemaFileField>,
}

impl SchemaFile {
    /// Converts a registered schema back to its declarative form.
    pub fn from_schema(schema: &Schema) -> SchemaFile {
        return SchemaFile {
            name: schema.name.clone(),
            kind: schema.kind,
            description: SchemaFileDescription {
                path: schema.description.path.join("/"),
                description: schema.description.description.clone(),
                icon: schema.description.icon.clone(),
            },
            fields: schema.fields.iter().map(|f| SchemaFileField {
                name: f.name.clone(),
                data_type: f.data_type.name().to_string(),
                constraints: f.constraints.clone(),
                description: FieldFileDescription {
                    path: f.description.path.join("/"),
                    description: f.description.description.clone(),
                    order: f.description.order,
                    visible: f.description.visible,
                }
            }).collect(),
        };
    }
}

impl SchemaFileDescription {
    pub fn to_description(&self) -> SchemaDescription {
        return SchemaDescription {
            path: split_path(&self.path),
            description: self.description.clone(),
            icon: self.icon.clone(),
        };
    }
}

impl FieldFileDescription {
    pub fn to_description(&self) -> FieldDescription {
        return FieldDescription {
            path: split_path(&self.path),
            description: self.description.clone(),
            order: self.order,
            visible: self.visible,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn schema_file_defaults() {
        let file: SchemaFile = serde_json::from_value(json!({
            "name": "restaurant",
            "type": "entity",
            "description": {"path": "food/places", "icon": "fork"},
            "fields": [{"name": "name", "type": "shortText", "constraints": {"required": true}}]
        })).unwrap();

        assert_eq!(file.kind, SchemaKind::Entity);
        assert_eq!(file.description.to_description().path, vec!["food", "places"]);
        assert!(file.fields[0].description.visible);
        assert_eq!(file.fields[0].description.to_description().path, Vec::<String>::new());
    }
}
