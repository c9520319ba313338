use serde::Deserialize;
use crate::backend::column::ReferentialAction;
use crate::backend::data_type::{parse_payload, payload, DataType};
use crate::backend::registry::Registry;
use crate::backend::schema::{Constraints, Schema};
use crate::backend::structure::{
    compile_fields, ArrayField, ArrayItem, ArrayUpload, ColumnRef, FetchSpec, ObjectField, Structure, StructureArgs, StructureField
};
use crate::backend::table::{Table, PRIMARY_KEY};
use crate::util::error;

/// Column of a child row pointing at its owner.
pub const ENTITY_COLUMN: &str = "_entityId";
/// Column holding the position of a child row within its list.
pub const ORDER_COLUMN: &str = "_order";

#[derive(Debug, Deserialize)]
struct ComponentPayload {
    #[serde(rename = "type")]
    component: String,
    #[serde(default)]
    list: bool,
}

/// Embeds a component, inline in the owner's table or as a list in a child table.
pub struct ComponentDataType;

fn lookup<'r>(registry: &'r Registry, name: &str) -> Result<&'r Schema, error::Error> {
    return registry
        .component(name)
        .map(|c| c.as_ref())
        .ok_or_else(|| error::Error::SchemaError(format!("Missing component type: {name}")));
}

impl DataType for ComponentDataType {
    fn name(&self) -> &str {
        return "component";
    }

    fn generate_columns(&self, registry: &Registry, table: &mut Table, name: &str, constraints: &Constraints) -> Result<Vec<Table>, error::Error> {
        let p: ComponentPayload = payload(self.name(), constraints)?;
        let component = lookup(registry, &p.component)?;

        // Inline: prefix every child column and add it to the owner's table
        if !p.list {
            let mut tables: Vec<Table> = Vec::new();
            for field in component.fields.iter() {
                let child_name = format!("{name}_{}", field.name.replace('.', "_"));
                tables.extend(field.data_type.generate_columns(registry, table, &child_name, &field.constraints)?);
            }
            return Ok(tables);
        }

        // List: child table linked to the owner's row
        let mut child = Table::new(&format!("{}__{name}", table.name));
        child.int(ENTITY_COLUMN).references(&table.name, PRIMARY_KEY).on_delete(ReferentialAction::Cascade);
        child.int(ORDER_COLUMN);
        child.composite(&[ENTITY_COLUMN, ORDER_COLUMN]);

        let mut tables: Vec<Table> = Vec::new();
        for field in component.fields.iter() {
            tables.extend(field.data_type.generate_columns(registry, &mut child, &field.name.replace('.', "_"), &field.constraints)?);
        }
        tables.insert(0, child);
        return Ok(tables);
    }

    fn generate_structure(&self, args: StructureArgs<'_>) -> Result<Structure, error::Error> {
        let p: ComponentPayload = payload(self.name(), args.constraints)?;
        let component = lookup(args.ctx.registry, &p.component)?;

        args.ctx.enter_component(&component.name)?;
        let result = if p.list {
            let child = format!("{}__{}", args.physical, args.path);
            compile_fields(args.ctx, component, args.selector, &child, &child, None).map(|(fields, joins)| Structure {
                data: StructureField::Array(ArrayField {
                    item: ArrayItem::Object { fields, joins },
                    fetch: FetchSpec {
                        table: child.clone(),
                        joins: Vec::new(),
                        id: ColumnRef::id(&child),
                        link: ColumnRef::new(&child, ENTITY_COLUMN),
                        order: ColumnRef::new(&child, ORDER_COLUMN),
                    },
                    upload: ArrayUpload::Rows {
                        table: child.clone(),
                        link_column: String::from(ENTITY_COLUMN),
                        order_column: Some(String::from(ORDER_COLUMN)),
                    },
                }),
                joins: Vec::new()
            })
        } else {
            compile_fields(args.ctx, component, args.selector, args.table, args.physical, Some(args.path)).map(|(fields, joins)| Structure {
                data: StructureField::Object(ObjectField { fields, upload: None }),
                joins
            })
        };
        args.ctx.leave_component();
        return result;
    }

    fn verify_data(&self, registry: &Registry, constraints: &Constraints) -> Option<String> {
        let p: ComponentPayload = match parse_payload(self.name(), constraints) {
            Ok(p) => p,
            Err(e) => { return Some(e); }
        };
        if registry.component(&p.component).is_none() {
            return Some(format!("Missing component type: {}", p.component));
        }
        return None;
    }

    fn referenced_components(&self, constraints: &Constraints) -> Vec<String> {
        return match parse_payload::<ComponentPayload>(self.name(), constraints) {
            Ok(p) => vec![p.component],
            Err(_) => Vec::new()
        };
    }
}
