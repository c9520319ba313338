use serde::Deserialize;
use time::format_description::well_known::Rfc3339;
use time::{OffsetDateTime, UtcOffset};
use crate::backend::column::{Field, LengthCheck};
use crate::backend::data_type::{parse_payload, payload, DataType};
use crate::backend::registry::Registry;
use crate::backend::schema::Constraints;
use crate::backend::structure::{ColumnRef, ScalarField, ScalarKind, Structure, StructureArgs, StructureField};
use crate::backend::table::Table;
use crate::util::error;

/// Shape accepted in `dateTime` columns.
const DATE_TIME_PATTERN: &str = r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(\.\d+)?(Z|[+-]\d{2}:\d{2})$";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarVariant {
    ShortText,
    LongText,
    Integer,
    Float,
    Double,
    Boolean,
    DateTime,
}

impl ScalarVariant {
    pub const ALL: [ScalarVariant; 7] = [
        Self::ShortText, Self::LongText, Self::Integer, Self::Float, Self::Double, Self::Boolean, Self::DateTime
    ];

    pub fn name(&self) -> &'static str {
        return match self {
            Self::ShortText => "shortText",
            Self::LongText => "longText",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Double => "double",
            Self::Boolean => "boolean",
            Self::DateTime => "dateTime",
        };
    }

    pub fn kind(&self) -> ScalarKind {
        return match self {
            Self::ShortText | Self::LongText | Self::DateTime => ScalarKind::String,
            Self::Integer | Self::Float | Self::Double => ScalarKind::Number,
            Self::Boolean => ScalarKind::Boolean,
        };
    }
}

#[derive(Debug, Deserialize)]
struct TextPayload {
    #[serde(default)]
    required: bool,
    #[serde(default)]
    unique: bool,
    min: Option<i64>,
    max: Option<i64>,
    regex: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NumberPayload {
    #[serde(default)]
    required: bool,
    #[serde(default)]
    unique: bool,
    min: Option<f64>,
    max: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct BooleanPayload {
    #[serde(default)]
    required: bool,
    #[serde(default)]
    unique: bool,
}

#[derive(Debug, Deserialize)]
struct DateTimePayload {
    #[serde(default)]
    required: bool,
    #[serde(default)]
    unique: bool,
    min: Option<String>,
    max: Option<String>,
}

/// Parses an RFC 3339 timestamp and renders it in UTC.
pub fn normalize_date_time(value: &str) -> Result<String, String> {
    let parsed = OffsetDateTime::parse(value, &Rfc3339)
        .map_err(|e| format!("Invalid dateTime {value}: {e}"))?;
    return parsed
        .to_offset(UtcOffset::UTC)
        .format(&Rfc3339)
        .map_err(|e| format!("Invalid dateTime {value}: {e}"));
}

fn apply_common(field: &mut Field, required: bool, unique: bool) {
    if unique {
        field.unique();
    }
    field.nullable(!required);
}

/// Single-column data type.
pub struct ScalarDataType {
    variant: ScalarVariant,
}

impl ScalarDataType {
    pub fn new(variant: ScalarVariant) -> ScalarDataType {
        return ScalarDataType { variant };
    }

    fn verify(&self, constraints: &Constraints) -> Result<(), String> {
        let name = self.variant.name();
        match self.variant {
            ScalarVariant::ShortText | ScalarVariant::LongText => {
                let p: TextPayload = parse_payload(name, constraints)?;
                if p.min.is_some_and(|m| m < 0) || p.max.is_some_and(|m| m < 0) {
                    return Err(String::from("Length bounds must not be negative"));
                }
                if let (Some(min), Some(max)) = (p.min, p.max) {
                    if min > max {
                        return Err(format!("Minimum length {min} is greater than maximum length {max}"));
                    }
                }
                if let Some(pattern) = &p.regex {
                    if let Err(e) = regex::Regex::new(pattern) {
                        return Err(format!("Invalid regex {pattern}: {e}"));
                    }
                }
            },
            ScalarVariant::Integer | ScalarVariant::Float | ScalarVariant::Double => {
                let p: NumberPayload = parse_payload(name, constraints)?;
                if let (Some(min), Some(max)) = (p.min, p.max) {
                    if min > max {
                        return Err(format!("Minimum {min} is greater than maximum {max}"));
                    }
                }
            },
            ScalarVariant::Boolean => {
                let _: BooleanPayload = parse_payload(name, constraints)?;
            },
            ScalarVariant::DateTime => {
                let p: DateTimePayload = parse_payload(name, constraints)?;
                let min = p.min.as_deref().map(normalize_date_time).transpose()?;
                let max = p.max.as_deref().map(normalize_date_time).transpose()?;
                if let (Some(min), Some(max)) = (min, max) {
                    if min > max {
                        return Err(format!("Minimum {min} is later than maximum {max}"));
                    }
                }
            }
        }
        return Ok(());
    }
}

impl DataType for ScalarDataType {
    fn name(&self) -> &str {
        return self.variant.name();
    }

    fn generate_columns(&self, _registry: &Registry, table: &mut Table, name: &str, constraints: &Constraints) -> Result<Vec<Table>, error::Error> {
        let type_name = self.variant.name();
        match self.variant {
            ScalarVariant::ShortText | ScalarVariant::LongText => {
                let p: TextPayload = payload(type_name, constraints)?;
                let field = if self.variant == ScalarVariant::ShortText { table.string(name) } else { table.text(name) };
                if let Some(min) = p.min {
                    field.length(LengthCheck::Ge, min);
                }
                if let Some(max) = p.max {
                    field.length(LengthCheck::Le, max);
                }
                if let Some(pattern) = &p.regex {
                    field.regex(pattern);
                }
                apply_common(field, p.required, p.unique);
            },
            ScalarVariant::Integer | ScalarVariant::Float | ScalarVariant::Double => {
                let p: NumberPayload = payload(type_name, constraints)?;
                let field = match self.variant {
                    ScalarVariant::Integer => table.int(name),
                    ScalarVariant::Float => table.float(name),
                    _ => table.double(name)
                };
                if let (Some(min), Some(max)) = (p.min, p.max) {
                    field.in_range(min, max);
                }
                apply_common(field, p.required, p.unique);
            },
            ScalarVariant::Boolean => {
                let p: BooleanPayload = payload(type_name, constraints)?;
                apply_common(table.bool(name), p.required, p.unique);
            },
            ScalarVariant::DateTime => {
                let p: DateTimePayload = payload(type_name, constraints)?;
                let min = p.min.as_deref().map(normalize_date_time).transpose().map_err(error::Error::SchemaError)?;
                let max = p.max.as_deref().map(normalize_date_time).transpose().map_err(error::Error::SchemaError)?;
                let field = table.text(name);
                field.regex(DATE_TIME_PATTERN);
                if let (Some(min), Some(max)) = (min, max) {
                    field.text_range(&min, &max);
                }
                apply_common(field, p.required, p.unique);
            }
        }
        return Ok(Vec::new());
    }

    fn generate_structure(&self, args: StructureArgs<'_>) -> Result<Structure, error::Error> {
        return Ok(Structure {
            data: StructureField::Scalar(ScalarField {
                kind: self.variant.kind(),
                column: ColumnRef::new(args.table, args.path)
            }),
            joins: Vec::new()
        });
    }

    fn verify_data(&self, _registry: &Registry, constraints: &Constraints) -> Option<String> {
        return self.verify(constraints).err();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::registry::RegistryBuilder;
    use serde_json::json;

    fn constraints(value: serde_json::Value) -> Constraints {
        match value {
            serde_json::Value::Object(map) => map,
            _ => panic!("constraints must be an object")
        }
    }

    #[test]
    fn text_columns_translate_constraints() {
        let registry = RegistryBuilder::new().build().unwrap();
        let mut table = Table::new("t");
        ScalarDataType::new(ScalarVariant::ShortText)
            .generate_columns(&registry, &mut table, "title", &constraints(json!({"required": true, "unique": true, "min": 2})))
            .unwrap();
        assert_eq!(
            table.fields()[0].column_definition(),
            "\"title\" VARCHAR(255) NOT NULL UNIQUE CHECK (length(\"title\") >= 2)"
        );
    }

    #[test]
    fn number_range_needs_both_bounds() {
        let registry = RegistryBuilder::new().build().unwrap();
        let mut table = Table::new("t");
        let double = ScalarDataType::new(ScalarVariant::Double);
        double.generate_columns(&registry, &mut table, "a", &constraints(json!({"min": 1}))).unwrap();
        double.generate_columns(&registry, &mut table, "b", &constraints(json!({"min": 1, "max": 5}))).unwrap();
        assert_eq!(table.fields()[0].column_definition(), "\"a\" DOUBLE");
        assert_eq!(table.fields()[1].column_definition(), "\"b\" DOUBLE CHECK (\"b\" BETWEEN 1 AND 5)");
    }

    #[test]
    fn invalid_payloads_are_described() {
        let registry = RegistryBuilder::new().build().unwrap();
        let text = ScalarDataType::new(ScalarVariant::ShortText);
        assert!(text.verify_data(&registry, &constraints(json!({"min": "three"}))).unwrap().starts_with("Invalid shortText constraints"));
        assert_eq!(
            text.verify_data(&registry, &constraints(json!({"min": 5, "max": 2}))),
            Some(String::from("Minimum length 5 is greater than maximum length 2"))
        );
        assert!(text.verify_data(&registry, &constraints(json!({"regex": "("}))).unwrap().starts_with("Invalid regex"));
        assert_eq!(text.verify_data(&registry, &constraints(json!({"required": true}))), None);
    }

    #[test]
    fn date_time_bounds_are_normalized_to_utc() {
        assert_eq!(normalize_date_time("2024-05-01T12:00:00+02:00").unwrap(), "2024-05-01T10:00:00Z");
        assert!(normalize_date_time("yesterday").is_err());

        let registry = RegistryBuilder::new().build().unwrap();
        let date = ScalarDataType::new(ScalarVariant::DateTime);
        assert!(date.verify_data(&registry, &constraints(json!({"min": "2025-01-01T00:00:00Z", "max": "2024-01-01T00:00:00Z"}))).is_some());
    }
}
