use std::sync::Arc;
use regex::Regex;
use rusqlite::functions::FunctionFlags;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, OptionalExtension, Params, Row, Transaction};
use tokio::sync::Mutex;
use crate::backend::config::DatabaseConfig;
use crate::util::error;

/// Receives the final text of every statement sent to the database.
pub type SqlLog = Arc<dyn Fn(&str) + Send + Sync>;

/// Shared handle to the content database.
pub struct Database {
    conn: Mutex<Connection>,
    sql_log: Option<SqlLog>,
    foreign_keys: bool
}

/// Data structure giving a schema change exclusive access to the database inside one transaction.
pub struct DbAction<'a> {
    pub trans: Transaction<'a>,
    sql_log: Option<&'a SqlLog>
}

impl DbAction<'_> {
    /// Executes a single statement without parameters.
    pub fn execute(&self, sql: &str) -> Result<(), error::Error> {
        log_statement(self.sql_log, sql);
        self.trans.execute(sql, [])?;
        return Ok(());
    }

    /// Convenience method to execute a query that returns multiple rows, then execute a function for each row.
    pub fn query_iterate<P: Params, F: FnMut(&Row<'_>) -> Result<(), error::Error>>(&self, sql: &str, p: P, f: &mut F) -> Result<(), error::Error> {
        log_statement(self.sql_log, sql);

        // Prepare a statement
        let mut stmt = self.trans.prepare(sql)?;

        // Execute the statement to query rows
        let mut rows = stmt.query(p)?;
        while let Some(row) = rows.next()? {
            f(row)?;
        }
        return Ok(());
    }
}

fn log_statement(sql_log: Option<&SqlLog>, sql: &str) {
    tracing::debug!(target: "sql", "{sql}");
    if let Some(log) = sql_log {
        log(sql);
    }
}

/// Registers the `regexp` function used by `REGEXP` column checks.
fn register_functions(conn: &Connection) -> Result<(), error::Error> {
    conn.create_scalar_function(
        "regexp",
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let pattern: String = ctx.get(0)?;
            let text: Option<String> = ctx.get(1)?;
            let re = Regex::new(&pattern)
                .map_err(|e| rusqlite::Error::UserFunctionError(Box::new(e)))?;
            return Ok(text.map(|t| re.is_match(&t)));
        }
    )?;
    return Ok(());
}

impl Database {
    /// Opens the database described by the configuration.
    pub fn open(config: &DatabaseConfig) -> Result<Database, error::Error> {
        let conn = match &config.path {
            Some(path) => Connection::open(path)?,
            None => Connection::open_in_memory()?
        };

        conn.execute_batch(&format!("PRAGMA foreign_keys = {};", if config.foreign_keys { "ON" } else { "OFF" }))?;
        if config.path.is_some() {
            if !config.journal_mode.chars().all(|c| c.is_ascii_alphabetic()) {
                return Err(error::Error::ConfigError(format!("Invalid journal mode: {}", config.journal_mode)));
            }
            conn.execute_batch(&format!("PRAGMA journal_mode = {};", config.journal_mode))?;
        }
        register_functions(&conn)?;

        let sql_log: Option<SqlLog> = if config.log_sql {
            Some(Arc::new(|sql: &str| tracing::info!(target: "sql", "{sql}")))
        } else {
            None
        };

        return Ok(Database {
            conn: Mutex::new(conn),
            sql_log,
            foreign_keys: config.foreign_keys
        });
    }

    /// Opens a private in-memory database with foreign keys enforced.
    pub fn open_in_memory() -> Result<Database, error::Error> {
        return Database::open(&DatabaseConfig::default());
    }

    /// Injects the SQL debug channel.
    pub fn with_sql_log<F: Fn(&str) + Send + Sync + 'static>(mut self, log: F) -> Database {
        self.sql_log = Some(Arc::new(log));
        return self;
    }

    pub(crate) fn log_sql(&self, sql: &str) {
        log_statement(self.sql_log.as_ref(), sql);
    }

    /// Runs a query and returns every row as a list of column values.
    pub async fn query_rows(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Vec<SqlValue>>, error::Error> {
        let conn = self.conn.lock().await;
        self.log_sql(sql);

        let mut stmt = conn.prepare(sql)?;
        let column_count = stmt.column_count();
        let mut rows = stmt.query(params_from_iter(params.iter()))?;
        let mut result: Vec<Vec<SqlValue>> = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values: Vec<SqlValue> = Vec::with_capacity(column_count);
            for i in 0..column_count {
                values.push(row.get::<_, SqlValue>(i)?);
            }
            result.push(values);
        }
        return Ok(result);
    }

    /// Executes a statement and returns the number of affected rows.
    pub async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<usize, error::Error> {
        let conn = self.conn.lock().await;
        self.log_sql(sql);
        return Ok(conn.execute(sql, params_from_iter(params.iter()))?);
    }

    /// Executes an `INSERT ... RETURNING` statement. Returns `None` when no row was written.
    pub async fn insert_returning_id(&self, sql: &str, params: &[SqlValue]) -> Result<Option<i64>, error::Error> {
        let conn = self.conn.lock().await;
        self.log_sql(sql);
        let id = conn
            .query_row(sql, params_from_iter(params.iter()), |row| row.get::<_, i64>(0))
            .optional()?;
        return Ok(id);
    }

    /// Runs a schema change in one transaction with foreign key enforcement suspended.
    pub async fn schema_action<T, F>(&self, f: F) -> Result<T, error::Error>
    where
        F: FnOnce(&DbAction<'_>) -> Result<T, error::Error>
    {
        let mut conn = self.conn.lock().await;

        // Foreign keys can only be toggled outside of a transaction
        conn.execute_batch("PRAGMA foreign_keys = OFF; PRAGMA legacy_alter_table = ON;")?;
        let outcome = run_in_transaction(&mut conn, self.sql_log.as_ref(), f);
        conn.execute_batch(&format!(
            "PRAGMA legacy_alter_table = OFF; PRAGMA foreign_keys = {};",
            if self.foreign_keys { "ON" } else { "OFF" }
        ))?;
        return outcome;
    }
}

fn run_in_transaction<T, F>(conn: &mut Connection, sql_log: Option<&SqlLog>, f: F) -> Result<T, error::Error>
where
    F: FnOnce(&DbAction<'_>) -> Result<T, error::Error>
{
    let trans = conn.transaction()?;
    let action = DbAction { trans, sql_log };
    let value = f(&action)?;
    action.trans.commit()?;
    return Ok(value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[tokio::test]
    async fn statements_reach_the_sql_log() {
        let seen: Arc<StdMutex<Vec<String>>> = Arc::new(StdMutex::new(Vec::new()));
        let sink = seen.clone();
        let db = Database::open_in_memory().unwrap()
            .with_sql_log(move |sql| sink.lock().unwrap().push(sql.to_string()));

        db.execute("CREATE TABLE \"t\" (\"_id\" INTEGER PRIMARY KEY AUTOINCREMENT, \"v\" TEXT)", &[]).await.unwrap();
        let id = db.insert_returning_id(
            "INSERT INTO \"t\" (\"v\") VALUES (?) RETURNING \"_id\"",
            &[SqlValue::Text(String::from("a"))]
        ).await.unwrap();
        assert_eq!(id, Some(1));

        let rows = db.query_rows("SELECT \"v\" FROM \"t\"", &[]).await.unwrap();
        assert_eq!(rows, vec![vec![SqlValue::Text(String::from("a"))]]);
        assert_eq!(seen.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn regexp_function_backs_checks() {
        let db = Database::open_in_memory().unwrap();
        db.execute("CREATE TABLE \"t\" (\"v\" TEXT CHECK (\"v\" REGEXP '^[a-z]+$'))", &[]).await.unwrap();
        assert!(db.execute("INSERT INTO \"t\" (\"v\") VALUES ('abc')", &[]).await.is_ok());
        assert!(db.execute("INSERT INTO \"t\" (\"v\") VALUES ('ABC')", &[]).await.is_err());
        assert!(db.execute("INSERT INTO \"t\" (\"v\") VALUES (NULL)", &[]).await.is_ok());
    }
}
