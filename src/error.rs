use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    // domain errors
    #[error("validation error: {0}")]
    Validation(String),
    #[error("authentication failed")]
    Authentication,
    #[error("invalid token")]
    InvalidToken,
    #[error("not found")]
    NotFound,
    #[error("conflict: {0}")]
    Conflict(String),

    // infra things
    #[error(transparent)]
    Db(sqlx::Error),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for AuthError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::RowNotFound => AuthError::NotFound,
            sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => {
                AuthError::Conflict("duplicate key".into())
            }
            _ => AuthError::Db(e),
        }
    }
}
