//! Error types for PlanSync shared types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SharedError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}
