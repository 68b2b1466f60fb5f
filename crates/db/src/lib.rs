//! Postgres persistence for the approval engine.

pub mod admin;
pub mod error;
pub mod models;
pub mod pool;
pub mod store;

pub use error::DbError;
pub use pool::{create_pool, run_migrations, DbPool};
pub use store::PgWorkflowStore;
