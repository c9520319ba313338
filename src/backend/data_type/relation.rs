use serde::{Deserialize, Serialize};
use crate::backend::column::ReferentialAction;
use crate::backend::data_type::component::ENTITY_COLUMN;
use crate::backend::data_type::{parse_payload, payload, DataType};
use crate::backend::registry::Registry;
use crate::backend::schema::{Constraints, Schema};
use crate::backend::selector::Selector;
use crate::backend::structure::{
    column_name, compile_fields, get_table_name, ArrayField, ArrayItem, ArrayUpload, ColumnRef, FetchSpec, Join,
    ObjectField, ObjectUpload, ScalarField, ScalarKind, Structure, StructureArgs, StructureField
};
use crate::backend::table::{Table, PRIMARY_KEY};
use crate::util::error;

/// Bridge column pointing at the related row.
pub const TARGET_COLUMN: &str = "_targetId";

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Relation {
    One,
    Many,
    OneToOne,
    OneToMany,
    ManyToOne,
    ManyToMany,
}

impl Relation {
    /// Relations stored as a foreign key on the owning table.
    pub fn is_simple(&self) -> bool {
        return matches!(self, Self::One | Self::OneToOne | Self::ManyToOne);
    }

    /// Relations that name the inverse field on the target.
    pub fn is_targeted(&self) -> bool {
        return !matches!(self, Self::One | Self::Many);
    }
}

#[derive(Debug, Deserialize)]
struct RelationPayload {
    #[serde(rename = "type")]
    target: String,
    relation: Relation,
    field: Option<String>,
    #[serde(default)]
    unique: bool,
}

/// Bridge table shared by both sides of a many-to-many relation, with the
/// bridge column owned by this side and the one owned by the other side.
///
/// Both sides derive the same table because the lexicographically smaller
/// candidate name wins.
pub fn many_to_many_bridge(table: &str, field: &str, target_table: &str, target_field: &str) -> (String, &'static str, &'static str) {
    let own = format!("{table}__{field}");
    let other = format!("{target_table}__{target_field}");
    if own < other {
        return (own, ENTITY_COLUMN, TARGET_COLUMN);
    }
    return (other, TARGET_COLUMN, ENTITY_COLUMN);
}

fn bridge_table(name: &str, first: &str, second: &str) -> Table {
    let mut bridge = Table::new(name);
    bridge.int(ENTITY_COLUMN).references(first, PRIMARY_KEY).on_delete(ReferentialAction::Cascade);
    bridge.int(TARGET_COLUMN).references(second, PRIMARY_KEY).on_delete(ReferentialAction::Cascade);
    bridge.composite(&[ENTITY_COLUMN, TARGET_COLUMN]);
    return bridge;
}

fn lookup<'r>(registry: &'r Registry, name: &str) -> Result<&'r Schema, error::Error> {
    return registry
        .entity(name)
        .map(|e| e.as_ref())
        .ok_or_else(|| error::Error::SchemaError(format!("Missing entity type: {name}")));
}

fn inverse_field(p: &RelationPayload) -> Result<String, error::Error> {
    return match &p.field {
        Some(field) => Ok(column_name(field)),
        None => Err(error::Error::SchemaError(format!("Linked field in entity type {} not specified", p.target)))
    };
}

/// Links rows of one entity to rows of another.
pub struct RelationDataType;

impl DataType for RelationDataType {
    fn name(&self) -> &str {
        return "relation";
    }

    fn generate_columns(&self, registry: &Registry, table: &mut Table, name: &str, constraints: &Constraints) -> Result<Vec<Table>, error::Error> {
        let p: RelationPayload = payload(self.name(), constraints)?;
        let target_table = get_table_name(lookup(registry, &p.target)?);

        return match p.relation {
            Relation::One | Relation::OneToOne | Relation::ManyToOne => {
                let field = table.int(name);
                field.nullable(true).references(&target_table, PRIMARY_KEY).on_delete(ReferentialAction::SetNull);
                if p.unique {
                    field.unique();
                }
                Ok(Vec::new())
            },
            Relation::OneToMany => Ok(Vec::new()),
            Relation::Many => Ok(vec![bridge_table(&format!("{}__{name}", table.name), &table.name, &target_table)]),
            Relation::ManyToMany => {
                let (bridge, own_column, _) = many_to_many_bridge(&table.name, name, &target_table, &inverse_field(&p)?);
                if own_column == ENTITY_COLUMN {
                    Ok(vec![bridge_table(&bridge, &table.name, &target_table)])
                } else {
                    Ok(vec![bridge_table(&bridge, &target_table, &table.name)])
                }
            }
        };
    }

    fn generate_structure(&self, args: StructureArgs<'_>) -> Result<Structure, error::Error> {
        let p: RelationPayload = payload(self.name(), args.constraints)?;
        let target = lookup(args.ctx.registry, &p.target)?;
        let target_table = get_table_name(target);
        let follow = *args.selector != Selector::All;

        if p.relation.is_simple() {
            let column = ColumnRef::new(args.table, args.path);

            // "**" stops at the stored id
            if !follow {
                return Ok(Structure {
                    data: StructureField::Scalar(ScalarField { kind: ScalarKind::Reference, column }),
                    joins: Vec::new()
                });
            }

            let alias = args.ctx.alias();
            let (mut fields, nested) = compile_fields(args.ctx, target, args.selector, &alias, &target_table, None)?;
            fields.insert(String::from("id"), StructureField::Scalar(ScalarField {
                kind: ScalarKind::Number,
                column: ColumnRef::id(&alias)
            }));

            let mut joins: Vec<Join> = vec![Join {
                alias: alias.clone(),
                table: target_table.clone(),
                column: String::from(PRIMARY_KEY),
                on: column.clone()
            }];
            joins.extend(nested);
            return Ok(Structure {
                data: StructureField::Object(ObjectField {
                    fields,
                    upload: Some(ObjectUpload::Outwards { column, target_table })
                }),
                joins
            });
        }

        if p.relation == Relation::OneToMany {
            let other_column = inverse_field(&p)?;
            let item = if follow {
                let (fields, joins) = compile_fields(args.ctx, target, args.selector, &target_table, &target_table, None)?;
                ArrayItem::Object { fields, joins }
            } else {
                ArrayItem::Ids
            };
            return Ok(Structure {
                data: StructureField::Array(ArrayField {
                    item,
                    fetch: FetchSpec {
                        table: target_table.clone(),
                        joins: Vec::new(),
                        id: ColumnRef::id(&target_table),
                        link: ColumnRef::new(&target_table, &other_column),
                        order: ColumnRef::id(&target_table),
                    },
                    upload: ArrayUpload::Relink { table: target_table.clone(), column: other_column }
                }),
                joins: Vec::new()
            });
        }

        let (bridge, own_column, other_column) = if p.relation == Relation::Many {
            (format!("{}__{}", args.physical, args.path), ENTITY_COLUMN, TARGET_COLUMN)
        } else {
            many_to_many_bridge(args.physical, args.path, &target_table, &inverse_field(&p)?)
        };

        let (item, fetch_joins, id) = if follow {
            let alias = args.ctx.alias();
            let (fields, joins) = compile_fields(args.ctx, target, args.selector, &alias, &target_table, None)?;
            let join = Join {
                alias: alias.clone(),
                table: target_table.clone(),
                column: String::from(PRIMARY_KEY),
                on: ColumnRef::new(&bridge, other_column)
            };
            (ArrayItem::Object { fields, joins }, vec![join], ColumnRef::id(&alias))
        } else {
            (ArrayItem::Ids, Vec::new(), ColumnRef::new(&bridge, other_column))
        };

        return Ok(Structure {
            data: StructureField::Array(ArrayField {
                item,
                fetch: FetchSpec {
                    table: bridge.clone(),
                    joins: fetch_joins,
                    id,
                    link: ColumnRef::new(&bridge, own_column),
                    order: ColumnRef::id(&bridge),
                },
                upload: ArrayUpload::Bridge {
                    table: bridge.clone(),
                    entity_column: String::from(own_column),
                    target_column: String::from(other_column),
                    target_table
                }
            }),
            joins: Vec::new()
        });
    }

    fn verify_data(&self, registry: &Registry, constraints: &Constraints) -> Option<String> {
        let p: RelationPayload = match parse_payload(self.name(), constraints) {
            Ok(p) => p,
            Err(e) => { return Some(e); }
        };
        let target = match registry.entity(&p.target) {
            Some(t) => t,
            None => { return Some(format!("Missing entity type: {}", p.target)); }
        };
        if !p.relation.is_targeted() {
            return None;
        }
        let field = match &p.field {
            Some(f) => f,
            None => { return Some(format!("Linked field in entity type {} not specified", p.target)); }
        };
        if matches!(p.relation, Relation::OneToMany | Relation::ManyToMany) && target.get_field(field).is_none() {
            return Some(format!("Linked field {field} not found in entity type {}", p.target));
        }
        return None;
    }
}
