//! SQLite-backed adapter implementing the `TaskStore` port.

pub mod connection;
pub mod migrations;
pub mod task_store;

pub use connection::{create_pool, create_test_pool, ConnectionError, PoolConfig};
pub use migrations::{all_embedded_migrations, Migration, MigrationError, Migrator};
pub use task_store::SqliteTaskStore;
