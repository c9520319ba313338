pub mod backend;
pub mod util;

use tracing_subscriber::EnvFilter;

pub use backend::{ContentDb, QueryResult};
pub use backend::config::{DatabaseConfig, Env};
pub use backend::db::Database;
pub use backend::filter::{Filter, SortEntry};
pub use backend::query::QueryArgs;
pub use backend::registry::{Registry, RegistryBuilder};
pub use backend::schema::{Schema, SchemaField, SchemaFile, SchemaKind};
pub use backend::selector::Selector;
pub use util::error::Error;

/// Installs the global log subscriber. `RUST_LOG` overrides the default `info` level.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .try_init();
}
