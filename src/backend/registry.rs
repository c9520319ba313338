use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use crate::backend::data_type::{default_types, DataType};
use crate::backend::schema::{Schema, SchemaFile, SchemaField, SchemaKind};
use crate::util::error::{self, FailedValidation};

/// Collects data types and content types, then validates them into a `Registry`.
pub struct RegistryBuilder {
    data_types: BTreeMap<String, Arc<dyn DataType>>,
    components: BTreeMap<String, Arc<Schema>>,
    entities: BTreeMap<String, Arc<Schema>>,
}

impl RegistryBuilder {
    /// An empty builder without any data types.
    pub fn new() -> RegistryBuilder {
        return RegistryBuilder {
            data_types: BTreeMap::new(),
            components: BTreeMap::new(),
            entities: BTreeMap::new(),
        };
    }

    /// A builder with every built-in data type registered.
    pub fn with_default_types() -> RegistryBuilder {
        let mut builder = RegistryBuilder::new();
        builder.data_types = default_types().into_iter().map(|t| (t.name().to_string(), t)).collect();
        return builder;
    }

    pub fn data_type(&self, name: &str) -> Option<&Arc<dyn DataType>> {
        return self.data_types.get(name);
    }

    pub fn register_data_type(&mut self, data_type: Arc<dyn DataType>) -> Result<&mut RegistryBuilder, error::Error> {
        let name = data_type.name().to_string();
        if self.data_types.contains_key(&name) {
            return Err(error::Error::SchemaError(format!("Data type {name} is already registered")));
        }
        self.data_types.insert(name, data_type);
        return Ok(self);
    }

    fn check_free(&self, name: &str) -> Result<(), error::Error> {
        if self.components.contains_key(name) || self.entities.contains_key(name) {
            return Err(error::Error::SchemaError(format!("Content type {name} is already registered")));
        }
        return Ok(());
    }

    pub fn register_component(&mut self, mut schema: Schema) -> Result<&mut RegistryBuilder, error::Error> {
        self.check_free(&schema.name)?;
        schema.kind = SchemaKind::Component;
        self.components.insert(schema.name.clone(), Arc::new(schema));
        return Ok(self);
    }

    pub fn register_entity(&mut self, mut schema: Schema) -> Result<&mut RegistryBuilder, error::Error> {
        self.check_free(&schema.name)?;
        schema.kind = SchemaKind::Entity;
        self.entities.insert(schema.name.clone(), Arc::new(schema));
        return Ok(self);
    }

    /// Registers a content type in its declarative form, resolving data type names.
    pub fn register_schema_file(&mut self, file: SchemaFile) -> Result<&mut RegistryBuilder, error::Error> {
        let mut schema = Schema::new(&file.name, file.kind);
        schema.description = file.description.to_description();

        for field in file.fields.into_iter() {
            let data_type = match self.data_types.get(&field.data_type) {
                Some(t) => t.clone(),
                None => { return Err(error::Error::SchemaError(format!("Unknown data type: {}", field.data_type))); }
            };
            schema.fields.push(SchemaField {
                name: field.name,
                data_type,
                constraints: field.constraints,
                description: field.description.to_description(),
            });
        }

        return match file.kind {
            SchemaKind::Entity => self.register_entity(schema),
            SchemaKind::Component => self.register_component(schema)
        };
    }

    /// Validates every registered type and freezes the registry.
    pub fn build(self) -> Result<Registry, error::Error> {
        let registry = Registry {
            data_types: self.data_types,
            components: self.components,
            entities: self.entities,
        };

        for schema in registry.components.values().chain(registry.entities.values()) {
            let mut seen: BTreeSet<&str> = BTreeSet::new();
            for field in schema.fields.iter() {
                if !seen.insert(field.name.as_str()) {
                    return Err(error::Error::SchemaError(format!("Duplicate field {} in {}", field.name, schema.name)));
                }
                if !registry.data_types.contains_key(field.data_type.name()) {
                    return Err(error::Error::SchemaError(format!("Unknown data type: {}", field.data_type.name())));
                }
            }
        }

        for name in registry.components.keys() {
            registry.check_component_cycle(name, &mut Vec::new())?;
        }

        // Constraint payloads
        let mut failures: Vec<FailedValidation> = Vec::new();
        for schema in registry.components.values().chain(registry.entities.values()) {
            for field in schema.fields.iter() {
                if let Some(message) = field.data_type.verify_data(&registry, &field.constraints) {
                    failures.push(FailedValidation { description: format!("{}.{}: {message}", schema.name, field.name) });
                }
            }
        }
        if !failures.is_empty() {
            return Err(error::Error::ValidationError(failures));
        }

        tracing::info!(entities = registry.entities.len(), components = registry.components.len(), "Registry built");
        return Ok(registry);
    }
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        return RegistryBuilder::with_default_types();
    }
}

/// Immutable lookup of data types and content types.
pub struct Registry {
    data_types: BTreeMap<String, Arc<dyn DataType>>,
    components: BTreeMap<String, Arc<Schema>>,
    entities: BTreeMap<String, Arc<Schema>>,
}

impl Registry {
    pub fn data_type(&self, name: &str) -> Option<&Arc<dyn DataType>> {
        return self.data_types.get(name);
    }

    pub fn component(&self, name: &str) -> Option<&Arc<Schema>> {
        return self.components.get(name);
    }

    pub fn entity(&self, name: &str) -> Option<&Arc<Schema>> {
        return self.entities.get(name);
    }

    pub fn entities(&self) -> &BTreeMap<String, Arc<Schema>> {
        return &self.entities;
    }

    pub fn components(&self) -> &BTreeMap<String, Arc<Schema>> {
        return &self.components;
    }

    fn check_component_cycle(&self, name: &str, stack: &mut Vec<String>) -> Result<(), error::Error> {
        if stack.iter().any(|c| c == name) {
            let mut chain = stack.clone();
            chain.push(name.to_string());
            return Err(error::Error::SchemaError(format!("Recursive component definition: {}", chain.join(" -> "))));
        }
        // Missing components are reported by validation
        let component = match self.components.get(name) {
            Some(c) => c,
            None => { return Ok(()); }
        };

        stack.push(name.to_string());
        for field in component.fields.iter() {
            for child in field.data_type.referenced_components(&field.constraints) {
                self.check_component_cycle(&child, stack)?;
            }
        }
        stack.pop();
        return Ok(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn text(builder: &RegistryBuilder) -> Arc<dyn DataType> {
        return builder.data_type("shortText").unwrap().clone();
    }

    #[test]
    fn duplicate_registrations_are_rejected() {
        let mut builder = RegistryBuilder::with_default_types();
        builder.register_entity(Schema::new("user", SchemaKind::Entity)).unwrap();
        assert!(matches!(builder.register_component(Schema::new("user", SchemaKind::Component)), Err(error::Error::SchemaError(_))));

        let duplicate = builder.data_type("relation").unwrap().clone();
        assert!(matches!(builder.register_data_type(duplicate), Err(error::Error::SchemaError(_))));
    }

    #[test]
    fn unknown_data_types_in_schema_files_are_rejected() {
        let mut builder = RegistryBuilder::with_default_types();
        let file: SchemaFile = serde_json::from_value(json!({
            "name": "user",
            "type": "entity",
            "fields": [{"name": "age", "type": "years"}]
        })).unwrap();
        match builder.register_schema_file(file) {
            Err(error::Error::SchemaError(message)) => assert_eq!(message, "Unknown data type: years"),
            _ => panic!("expected a schema error")
        }
    }

    #[test]
    fn duplicate_fields_are_rejected() {
        let mut builder = RegistryBuilder::with_default_types();
        let t = text(&builder);
        builder.register_entity(
            Schema::new("user", SchemaKind::Entity)
                .field(SchemaField::new("name", t.clone(), json!({})))
                .field(SchemaField::new("name", t, json!({})))
        ).unwrap();
        assert!(matches!(builder.build(), Err(error::Error::SchemaError(_))));
    }

    #[test]
    fn recursive_components_are_rejected() {
        let mut builder = RegistryBuilder::with_default_types();
        let component = builder.data_type("component").unwrap().clone();
        builder.register_component(
            Schema::new("a", SchemaKind::Component).field(SchemaField::new("b", component.clone(), json!({"type": "b"})))
        ).unwrap();
        builder.register_component(
            Schema::new("b", SchemaKind::Component).field(SchemaField::new("a", component, json!({"type": "a", "list": true})))
        ).unwrap();
        match builder.build() {
            Err(error::Error::SchemaError(message)) => assert!(message.starts_with("Recursive component definition: ")),
            _ => panic!("expected a schema error")
        }
    }

    #[test]
    fn invalid_payloads_are_collected() {
        let mut builder = RegistryBuilder::with_default_types();
        let relation = builder.data_type("relation").unwrap().clone();
        let t = text(&builder);
        builder.register_entity(
            Schema::new("restaurant", SchemaKind::Entity)
                .field(SchemaField::new("owner", relation, json!({"type": "user", "relation": "one"})))
                .field(SchemaField::new("name", t, json!({"min": 4, "max": 1})))
        ).unwrap();
        match builder.build() {
            Err(error::Error::ValidationError(failures)) => {
                let messages: Vec<&str> = failures.iter().map(|f| f.description.as_str()).collect();
                assert_eq!(messages, vec![
                    "restaurant.owner: Missing entity type: user",
                    "restaurant.name: Minimum length 4 is greater than maximum length 1",
                ]);
            },
            _ => panic!("expected a validation error")
        }
    }
}
