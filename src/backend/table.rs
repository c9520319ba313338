use crate::backend::column::{quote_identifier, Field, FieldType};

/// Name of the auto-increment primary key every table carries.
pub const PRIMARY_KEY: &str = "_id";

#[derive(Debug, Clone, PartialEq)]
/// In-memory description of a physical table.
pub struct Table {
    pub name: String,
    fields: Vec<Field>,
    composites: Vec<Vec<String>>,
}

impl Table {
    pub fn new(name: &str) -> Table {
        return Table {
            name: name.to_string(),
            fields: Vec::new(),
            composites: Vec::new(),
        };
    }

    /// Adds a column. Redeclaring a column replaces it in place.
    fn add_field(&mut self, name: &str, field_type: FieldType) -> &mut Field {
        let field = Field::new(name, field_type);
        return match self.fields.iter().position(|f| f.name == name) {
            Some(i) => {
                self.fields[i] = field;
                &mut self.fields[i]
            },
            None => {
                self.fields.push(field);
                let last = self.fields.len() - 1;
                &mut self.fields[last]
            }
        };
    }

    pub fn int(&mut self, name: &str) -> &mut Field {
        return self.add_field(name, FieldType::Integer);
    }

    pub fn inc(&mut self, name: &str) -> &mut Field {
        return self.add_field(name, FieldType::Increments);
    }

    pub fn float(&mut self, name: &str) -> &mut Field {
        return self.add_field(name, FieldType::Float);
    }

    pub fn double(&mut self, name: &str) -> &mut Field {
        return self.add_field(name, FieldType::Double);
    }

    pub fn string(&mut self, name: &str) -> &mut Field {
        return self.add_field(name, FieldType::Varchar);
    }

    pub fn text(&mut self, name: &str) -> &mut Field {
        return self.add_field(name, FieldType::Text);
    }

    pub fn bool(&mut self, name: &str) -> &mut Field {
        return self.add_field(name, FieldType::Boolean);
    }

    /// Declares a unique constraint spanning several columns.
    pub fn composite(&mut self, columns: &[&str]) -> &mut Table {
        let group: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
        if !self.composites.contains(&group) {
            self.composites.push(group);
        }
        return self;
    }

    pub fn fields(&self) -> &[Field] {
        return &self.fields;
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        return self.fields.iter().find(|f| f.name == name);
    }

    /// Every column of the physical table, the primary key first.
    pub fn column_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        if !self.has_own_primary_key() {
            names.push(String::from(PRIMARY_KEY));
        }
        names.extend(self.fields.iter().map(|f| f.name.clone()));
        return names;
    }

    fn has_own_primary_key(&self) -> bool {
        return self.fields.iter().any(|f| f.field_type == FieldType::Increments);
    }

    /// Renders the canonical `CREATE TABLE` statement, as stored by SQLite.
    pub fn create_statement(&self) -> String {
        let mut definitions: Vec<String> = Vec::new();
        if !self.has_own_primary_key() {
            definitions.push(format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", quote_identifier(PRIMARY_KEY)));
        }
        for field in self.fields.iter() {
            definitions.push(field.column_definition());
        }
        for group in self.composites.iter() {
            definitions.push(format!(
                "UNIQUE ({})",
                group.iter().map(|c| quote_identifier(c)).collect::<Vec<String>>().join(", ")
            ));
        }
        return format!("CREATE TABLE {} ({})", quote_identifier(&self.name), definitions.join(", "));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::column::ReferentialAction;

    #[test]
    fn create_statement_puts_primary_key_first() {
        let mut table = Table::new("restaurant__reviews");
        table.int("_entityId").references("restaurant", "_id").on_delete(ReferentialAction::Cascade);
        table.int("_order");
        table.string("text").nullable(true);
        table.composite(&["_entityId", "_order"]);

        assert_eq!(
            table.create_statement(),
            "CREATE TABLE \"restaurant__reviews\" (\"_id\" INTEGER PRIMARY KEY AUTOINCREMENT, \
             \"_entityId\" INTEGER NOT NULL REFERENCES \"restaurant\" (\"_id\") ON DELETE CASCADE, \
             \"_order\" INTEGER NOT NULL, \"text\" VARCHAR(255), UNIQUE (\"_entityId\", \"_order\"))"
        );
        assert_eq!(table.column_names(), vec!["_id", "_entityId", "_order", "text"]);
    }

    #[test]
    fn redeclaring_a_column_keeps_its_position() {
        let mut table = Table::new("t");
        table.int("a");
        table.int("b");
        table.text("a").nullable(true);
        table.composite(&["a", "b"]).composite(&["a", "b"]);

        let names: Vec<&str> = table.fields().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(table.field("a").map(|f| f.field_type), Some(FieldType::Text));
        assert!(table.create_statement().ends_with("UNIQUE (\"a\", \"b\"))"));
        assert_eq!(table.create_statement().matches("UNIQUE").count(), 1);
    }

    #[test]
    fn explicit_increments_replace_the_implicit_key() {
        let mut table = Table::new("t");
        table.inc("_id");
        assert_eq!(table.create_statement(), "CREATE TABLE \"t\" (\"_id\" INTEGER PRIMARY KEY AUTOINCREMENT)");
    }
}
