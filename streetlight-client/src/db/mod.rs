mod meter_reading_queries;

pub use meter_reading_queries::*;

/// Failure talking to the streetlight database.
#[derive(thiserror::Error, Debug)]
pub enum QueryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, QueryError>;
