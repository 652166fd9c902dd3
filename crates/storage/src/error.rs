use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to connect to the database")]
    ConnectionError(#[from] sqlx::Error),
    #[error("Database migration failed: {0}")]
    MigrateError(#[from] sqlx::migrate::MigrateError),
    #[error("Database operation failed")]
    OperationFailed(#[source] sqlx::Error),
    #[error("Store file I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("Store file is not valid CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error("Stored row is corrupt: {0}")]
    CorruptRow(String),
}

pub type Result<T> = std::result::Result<T, Error>;
