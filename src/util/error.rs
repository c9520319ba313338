use rusqlite::Error as RusqliteError;
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A content type definition is inconsistent. Raised while the registry is built.
    #[error("Schema error: {0}")]
    SchemaError(String),

    /// One or more constraint payloads failed their data type's validation.
    #[error("Validation failed: {}", describe(.0))]
    ValidationError(Vec<FailedValidation>),

    /// The requested entity type does not exist.
    #[error("{0}")]
    NotFoundError(String),

    /// A value tree does not have the shape its structure expects.
    #[error("Invalid value: {0}")]
    ShapeError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("SQLite error occurred: {0}")]
    RusqliteError(#[from] RusqliteError),

    #[error("IO error occurred: {0}")]
    IoError(#[from] std::io::Error),
}

impl Error {
    /// The REST status class the error surfaces as.
    pub fn status_code(&self) -> u16 {
        return match self {
            Self::ValidationError(_) | Self::ShapeError(_) => 400,
            Self::NotFoundError(_) => 404,
            Self::SchemaError(_)
            | Self::ConfigError(_)
            | Self::RusqliteError(_)
            | Self::IoError(_) => 500,
        };
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Error {
        Error::ConfigError(e.to_string())
    }
}

impl Into<String> for Error {
    fn into(self) -> String {
        return self.to_string();
    }
}

fn describe(failures: &[FailedValidation]) -> String {
    return failures
        .iter()
        .map(|f| f.description.clone())
        .collect::<Vec<String>>()
        .join("; ");
}


#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
/// A flag for a validation check that was not passed.
pub struct FailedValidation {
    pub description: String
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_error_class() {
        assert_eq!(Error::NotFoundError(String::from("Entity type x not found")).status_code(), 404);
        assert_eq!(Error::ShapeError(String::from("bad")).status_code(), 400);
        assert_eq!(Error::SchemaError(String::from("bad")).status_code(), 500);
    }

    #[test]
    fn validation_error_lists_every_failure() {
        let e = Error::ValidationError(vec![
            FailedValidation { description: String::from("a: missing") },
            FailedValidation { description: String::from("b: missing") },
        ]);
        let message: String = e.into();
        assert_eq!(message, "Validation failed: a: missing; b: missing");
    }
}
