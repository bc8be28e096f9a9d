use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("another send job is still active")]
    JobAlreadyActive,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt row: {0}")]
    CorruptRow(String),
}
