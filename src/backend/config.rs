use std::collections::HashMap;
use std::path::{Path, PathBuf};
use serde::Deserialize;
use crate::util::error;

/// Read access to environment variables, with coercing lookups.
#[derive(Debug, Clone, Default)]
pub struct Env {
    overrides: Option<HashMap<String, String>>
}

impl Env {
    /// Looks variables up in the process environment.
    pub fn process() -> Env {
        return Env { overrides: None };
    }

    /// Looks variables up in the given map only.
    pub fn from_map(vars: HashMap<String, String>) -> Env {
        return Env { overrides: Some(vars) };
    }

    fn lookup(&self, name: &str) -> Option<String> {
        return match &self.overrides {
            Some(vars) => vars.get(name).cloned(),
            None => std::env::var(name).ok()
        };
    }

    /// Raw lookup.
    pub fn var(&self, name: &str, default: &str) -> String {
        return self.lookup(name).unwrap_or_else(|| default.to_string());
    }

    /// Boolean lookup. Values that are not recognisably boolean yield the default.
    pub fn bool(&self, name: &str, default: bool) -> bool {
        let value = match self.lookup(name) {
            Some(v) => v,
            None => { return default; }
        };
        return match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default
        };
    }

    /// Integer lookup. Values that do not parse yield the default.
    pub fn int(&self, name: &str, default: i64) -> i64 {
        return match self.lookup(name) {
            Some(v) => v.trim().parse::<i64>().unwrap_or(default),
            None => default
        };
    }
}

fn default_foreign_keys() -> bool { true }
fn default_journal_mode() -> String { String::from("WAL") }

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Connection parameters for the content database.
pub struct DatabaseConfig {
    /// Database file. `None` opens a private in-memory database.
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_foreign_keys")]
    pub foreign_keys: bool,
    #[serde(default = "default_journal_mode")]
    pub journal_mode: String,
    /// Also log every statement at info level, target `sql`.
    #[serde(default)]
    pub log_sql: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        return DatabaseConfig {
            path: None,
            foreign_keys: default_foreign_keys(),
            journal_mode: default_journal_mode(),
            log_sql: false,
        };
    }
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    database: DatabaseConfig
}

impl DatabaseConfig {
    /// Builds a configuration from the environment alone.
    pub fn from_env(env: &Env) -> DatabaseConfig {
        return DatabaseConfig::default().with_env(env);
    }

    /// Loads the `[database]` table of a TOML file, then applies environment overrides.
    pub fn load<P: AsRef<Path>>(path: P, env: &Env) -> Result<DatabaseConfig, error::Error> {
        let path = path.as_ref();
        tracing::debug!(path = %path.display(), "Loading database config");
        let content = std::fs::read_to_string(path)?;
        let file: ConfigFile = toml::from_str(&content)?;
        return Ok(file.database.with_env(env));
    }

    fn with_env(mut self, env: &Env) -> DatabaseConfig {
        let path = env.var("CONTENT_DB_PATH", "");
        if !path.is_empty() {
            self.path = if path == ":memory:" { None } else { Some(PathBuf::from(path)) };
        }
        self.foreign_keys = env.bool("CONTENT_DB_FOREIGN_KEYS", self.foreign_keys);
        self.journal_mode = env.var("CONTENT_DB_JOURNAL_MODE", &self.journal_mode);
        self.log_sql = env.bool("CONTENT_DB_LOG_SQL", self.log_sql);
        return self;
    }
}
