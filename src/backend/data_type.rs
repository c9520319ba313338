pub mod scalar;
pub mod component;
pub mod relation;
pub mod dynamic;

use std::sync::Arc;
use serde::de::DeserializeOwned;
use serde_json::Value;
use crate::backend::registry::Registry;
use crate::backend::schema::Constraints;
use crate::backend::structure::{Structure, StructureArgs};
use crate::backend::table::Table;
use crate::util::error;

pub use component::ComponentDataType;
pub use dynamic::DynamicComponentDataType;
pub use relation::{Relation, RelationDataType};
pub use scalar::{ScalarDataType, ScalarVariant};

/// Per-field-kind strategy: column generation, structure generation and payload validation.
pub trait DataType: Send + Sync {
    /// Name the type is registered under.
    fn name(&self) -> &str;

    /// Adds the field's columns to `table` and returns any extra tables the field owns.
    fn generate_columns(&self, registry: &Registry, table: &mut Table, name: &str, constraints: &Constraints) -> Result<Vec<Table>, error::Error>;

    /// Compiles the field for a selector.
    fn generate_structure(&self, args: StructureArgs<'_>) -> Result<Structure, error::Error>;

    /// Checks the constraint payload. Returns a readable message when it is invalid.
    fn verify_data(&self, registry: &Registry, constraints: &Constraints) -> Option<String>;

    /// Components this field embeds, used to reject recursive definitions.
    fn referenced_components(&self, _constraints: &Constraints) -> Vec<String> {
        return Vec::new();
    }
}

/// Deserializes a constraint payload, describing the failure in readable form.
pub fn parse_payload<T: DeserializeOwned>(type_name: &str, constraints: &Constraints) -> Result<T, String> {
    return serde_json::from_value::<T>(Value::Object(constraints.clone()))
        .map_err(|e| format!("Invalid {type_name} constraints: {e}"));
}

/// Deserializes a payload that has already been verified.
pub(crate) fn payload<T: DeserializeOwned>(type_name: &str, constraints: &Constraints) -> Result<T, error::Error> {
    return parse_payload(type_name, constraints).map_err(error::Error::SchemaError);
}

/// Every built-in data type.
pub fn default_types() -> Vec<Arc<dyn DataType>> {
    let mut types: Vec<Arc<dyn DataType>> = Vec::new();
    for variant in ScalarVariant::ALL {
        types.push(Arc::new(ScalarDataType::new(variant)));
    }
    types.push(Arc::new(ComponentDataType));
    types.push(Arc::new(RelationDataType));
    types.push(Arc::new(DynamicComponentDataType));
    return types;
}
