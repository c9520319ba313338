use serde::{Deserialize, Serialize};

/// Wraps an identifier in double quotes, escaping embedded quotes.
pub fn quote_identifier(name: &str) -> String {
    return format!("\"{}\"", name.replace('"', "\"\""));
}

/// Wraps a literal in single quotes, escaping embedded quotes.
pub fn quote_literal(value: &str) -> String {
    return format!("'{}'", value.replace('\'', "''"));
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum FieldType {
    Integer,
    Increments,
    Float,
    Double,
    Text,
    Varchar,
    Boolean,
}

impl FieldType {
    /// Gets the declared SQLite column type for a given field type.
    pub fn get_sqlite_type(&self) -> &'static str {
        return match self {
            Self::Integer | Self::Increments => "INTEGER",
            Self::Float => "FLOAT",
            Self::Double => "DOUBLE",
            Self::Text => "TEXT",
            Self::Varchar => "VARCHAR(255)",
            Self::Boolean => "BOOLEAN",
        };
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum ReferentialAction {
    Cascade,
    SetNull,
    SetDefault,
    Restrict,
    NoAction,
}

impl ReferentialAction {
    fn to_sql(&self) -> &'static str {
        return match self {
            Self::Cascade => "CASCADE",
            Self::SetNull => "SET NULL",
            Self::SetDefault => "SET DEFAULT",
            Self::Restrict => "RESTRICT",
            Self::NoAction => "NO ACTION",
        };
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
/// Comparison applied to the length of a column value.
pub enum LengthCheck {
    Eq,
    Ne,
    Gt,
    Lt,
    Le,
    Ge,
}

impl LengthCheck {
    fn to_sql(&self) -> &'static str {
        return match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Ge => ">=",
        };
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Range {
    Numeric { min: f64, max: f64 },
    Text { min: String, max: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForeignKey {
    pub table: String,
    pub column: String,
    pub on_delete: Option<ReferentialAction>,
    pub on_update: Option<ReferentialAction>,
}

#[derive(Debug, Clone, PartialEq)]
/// One physical column of a table, with its constraints.
pub struct Field {
    pub name: String,
    pub field_type: FieldType,
    pub is_nullable: bool,
    pub is_unique: bool,
    pub is_positive: bool,
    pub is_negative: bool,
    pub range: Option<Range>,
    pub foreign: Option<ForeignKey>,
    pub one_of: Option<Vec<String>>,
    pub not_one_of: Option<Vec<String>>,
    pub pattern: Option<String>,
    pub length_checks: Vec<(LengthCheck, i64)>,
}

impl Field {
    /// Creates a non-nullable column without constraints.
    pub fn new(name: &str, field_type: FieldType) -> Field {
        return Field {
            name: name.to_string(),
            field_type,
            is_nullable: false,
            is_unique: false,
            is_positive: false,
            is_negative: false,
            range: None,
            foreign: None,
            one_of: None,
            not_one_of: None,
            pattern: None,
            length_checks: Vec::new(),
        };
    }

    pub fn in_range(&mut self, min: f64, max: f64) -> &mut Field {
        self.range = Some(Range::Numeric { min, max });
        return self;
    }

    pub fn text_range(&mut self, min: &str, max: &str) -> &mut Field {
        self.range = Some(Range::Text { min: min.to_string(), max: max.to_string() });
        return self;
    }

    pub fn references(&mut self, table: &str, column: &str) -> &mut Field {
        self.foreign = Some(ForeignKey {
            table: table.to_string(),
            column: column.to_string(),
            on_delete: None,
            on_update: None,
        });
        return self;
    }

    /// Sets the delete action of the foreign key. Has no effect before `references`.
    pub fn on_delete(&mut self, action: ReferentialAction) -> &mut Field {
        if let Some(foreign) = &mut self.foreign {
            foreign.on_delete = Some(action);
        }
        return self;
    }

    /// Sets the update action of the foreign key. Has no effect before `references`.
    pub fn on_update(&mut self, action: ReferentialAction) -> &mut Field {
        if let Some(foreign) = &mut self.foreign {
            foreign.on_update = Some(action);
        }
        return self;
    }

    pub fn positive(&mut self) -> &mut Field {
        self.is_positive = true;
        return self;
    }

    pub fn negative(&mut self) -> &mut Field {
        self.is_negative = true;
        return self;
    }

    pub fn one_of(&mut self, values: &[&str]) -> &mut Field {
        self.one_of = Some(values.iter().map(|v| v.to_string()).collect());
        return self;
    }

    pub fn not_one_of(&mut self, values: &[&str]) -> &mut Field {
        self.not_one_of = Some(values.iter().map(|v| v.to_string()).collect());
        return self;
    }

    pub fn regex(&mut self, pattern: &str) -> &mut Field {
        self.pattern = Some(pattern.to_string());
        return self;
    }

    pub fn length(&mut self, check: LengthCheck, value: i64) -> &mut Field {
        self.length_checks.push((check, value));
        return self;
    }

    pub fn nullable(&mut self, is_nullable: bool) -> &mut Field {
        self.is_nullable = is_nullable;
        return self;
    }

    pub fn unique(&mut self) -> &mut Field {
        self.is_unique = true;
        return self;
    }

    /// Renders the column definition used inside `CREATE TABLE`.
    pub fn column_definition(&self) -> String {
        let name = quote_identifier(&self.name);
        let mut parts: Vec<String> = vec![name.clone(), String::from(self.field_type.get_sqlite_type())];

        if self.field_type == FieldType::Increments {
            parts.push(String::from("PRIMARY KEY AUTOINCREMENT"));
        } else if !self.is_nullable {
            parts.push(String::from("NOT NULL"));
        }
        if self.is_unique {
            parts.push(String::from("UNIQUE"));
        }

        if let Some(foreign) = &self.foreign {
            let mut reference = format!("REFERENCES {} ({})", quote_identifier(&foreign.table), quote_identifier(&foreign.column));
            if let Some(action) = foreign.on_delete {
                reference = format!("{reference} ON DELETE {}", action.to_sql());
            }
            if let Some(action) = foreign.on_update {
                reference = format!("{reference} ON UPDATE {}", action.to_sql());
            }
            parts.push(reference);
        }

        // Checks
        match &self.range {
            Some(Range::Numeric { min, max }) => {
                parts.push(format!("CHECK ({name} BETWEEN {min} AND {max})"));
            },
            Some(Range::Text { min, max }) => {
                parts.push(format!("CHECK ({name} BETWEEN {} AND {})", quote_literal(min), quote_literal(max)));
            },
            None => {}
        }
        if self.is_positive {
            parts.push(format!("CHECK ({name} > 0)"));
        }
        if self.is_negative {
            parts.push(format!("CHECK ({name} < 0)"));
        }
        if let Some(values) = &self.one_of {
            parts.push(format!("CHECK ({name} IN ({}))", values.iter().map(|v| quote_literal(v)).collect::<Vec<String>>().join(", ")));
        }
        if let Some(values) = &self.not_one_of {
            parts.push(format!("CHECK ({name} NOT IN ({}))", values.iter().map(|v| quote_literal(v)).collect::<Vec<String>>().join(", ")));
        }
        if let Some(pattern) = &self.pattern {
            parts.push(format!("CHECK ({name} REGEXP {})", quote_literal(pattern)));
        }
        for (check, value) in self.length_checks.iter() {
            parts.push(format!("CHECK (length({name}) {} {value})", check.to_sql()));
        }

        return parts.join(" ");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoting_escapes_embedded_quotes() {
        assert_eq!(quote_identifier("a\"b"), "\"a\"\"b\"");
        assert_eq!(quote_literal("it's"), "'it''s'");
    }

    #[test]
    fn column_definition_renders_constraints_in_order() {
        let mut field = Field::new("title", FieldType::Varchar);
        field.unique().length(LengthCheck::Ge, 1).length(LengthCheck::Le, 10).regex("^[A-Z]");
        assert_eq!(
            field.column_definition(),
            "\"title\" VARCHAR(255) NOT NULL UNIQUE CHECK (\"title\" REGEXP '^[A-Z]') CHECK (length(\"title\") >= 1) CHECK (length(\"title\") <= 10)"
        );
    }

    #[test]
    fn foreign_key_actions_follow_references() {
        let mut field = Field::new("owner", FieldType::Integer);
        field.on_delete(ReferentialAction::Cascade);
        assert!(field.foreign.is_none());

        field.references("user", "_id").on_delete(ReferentialAction::SetNull).nullable(true);
        assert_eq!(
            field.column_definition(),
            "\"owner\" INTEGER REFERENCES \"user\" (\"_id\") ON DELETE SET NULL"
        );
    }

    #[test]
    fn numeric_and_enum_checks() {
        let mut field = Field::new("score", FieldType::Double);
        field.in_range(0.0, 2.5).nullable(true);
        assert_eq!(field.column_definition(), "\"score\" DOUBLE CHECK (\"score\" BETWEEN 0 AND 2.5)");

        let mut field = Field::new("kind", FieldType::Text);
        field.one_of(&["a", "b"]).not_one_of(&["c"]);
        assert_eq!(
            field.column_definition(),
            "\"kind\" TEXT NOT NULL CHECK (\"kind\" IN ('a', 'b')) CHECK (\"kind\" NOT IN ('c'))"
        );
    }
}
