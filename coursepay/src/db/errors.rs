use thiserror::Error;

/// Storage layer errors, classified from `sqlx::Error` so handlers can react to
/// constraint violations without string matching.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("Entity not found")]
    NotFound,

    #[error("Unique constraint violation: {message}")]
    UniqueViolation {
        constraint: Option<String>,
        table: Option<String>,
        message: String,
    },

    #[error("Foreign key violation: {message}")]
    ForeignKeyViolation { constraint: Option<String>, message: String },

    #[error("Check constraint violation: {message}")]
    CheckViolation {
        constraint: Option<String>,
        table: Option<String>,
        message: String,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DbError {
    /// True if this is a unique violation on the named constraint
    pub fn is_unique_violation_on(&self, name: &str) -> bool {
        matches!(self, DbError::UniqueViolation { constraint: Some(c), .. } if c == name)
    }
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbError::NotFound,
            sqlx::Error::Database(db_err) => {
                let constraint = db_err.constraint().map(str::to_string);
                let table = db_err.table().map(str::to_string);
                let message = db_err.message().to_string();
                match db_err.kind() {
                    sqlx::error::ErrorKind::UniqueViolation => DbError::UniqueViolation {
                        constraint,
                        table,
                        message,
                    },
                    sqlx::error::ErrorKind::ForeignKeyViolation => DbError::ForeignKeyViolation { constraint, message },
                    sqlx::error::ErrorKind::CheckViolation => DbError::CheckViolation {
                        constraint,
                        table,
                        message,
                    },
                    _ => DbError::Other(anyhow::Error::new(sqlx::Error::Database(db_err))),
                }
            }
            other => DbError::Other(other.into()),
        }
    }
}

pub type Result<T> = std::result::Result<T, DbError>;
