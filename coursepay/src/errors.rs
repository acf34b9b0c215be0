use crate::{
    db::errors::DbError,
    types::{Operation, Permission},
};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

#[derive(Error, Debug)]
pub enum Error {
    /// Missing or invalid bearer token
    #[error("Unauthenticated: {}", .message.as_deref().unwrap_or("authentication required"))]
    Unauthenticated { message: Option<String> },

    #[error("Insufficient permissions to {action} {resource}")]
    InsufficientPermissions {
        required: Permission,
        action: Operation,
        resource: String,
    },

    #[error("{resource} with ID {id} not found")]
    NotFound { resource: String, id: String },

    #[error("{message}")]
    BadRequest { message: String },

    #[error("Invalid or expired OTP")]
    InvalidOtp,

    #[error("Insufficient balance: requested {requested}")]
    InsufficientFunds { requested: i64 },

    #[error("{message}")]
    Conflict { message: String },

    #[error("{resource} has already been processed")]
    AlreadyProcessed { resource: String },

    /// An external collaborator (payment gateway, mail relay) failed
    #[error("Upstream service {service} failed: {message}")]
    Upstream { service: String, message: String },

    #[error("Internal error while trying to {operation}")]
    Internal { operation: String },

    #[error(transparent)]
    Database(#[from] DbError),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Unauthenticated { .. } => StatusCode::UNAUTHORIZED,
            Error::InsufficientPermissions { .. } => StatusCode::FORBIDDEN,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::BadRequest { .. } | Error::InvalidOtp | Error::InsufficientFunds { .. } => StatusCode::BAD_REQUEST,
            Error::Conflict { .. } | Error::AlreadyProcessed { .. } => StatusCode::CONFLICT,
            Error::Upstream { .. } => StatusCode::BAD_GATEWAY,
            Error::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Database(db) => match db {
                DbError::NotFound => StatusCode::NOT_FOUND,
                DbError::UniqueViolation { .. } => StatusCode::CONFLICT,
                DbError::ForeignKeyViolation { .. } | DbError::CheckViolation { .. } => StatusCode::BAD_REQUEST,
                DbError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    /// Message shown to the client. Internal details stay in the logs.
    pub fn user_message(&self) -> String {
        match self {
            Error::Upstream { service, .. } => format!("{service} is unavailable, please try again later"),
            Error::Database(DbError::NotFound) => "Resource not found".to_string(),
            Error::Database(DbError::UniqueViolation { .. }) => "Resource already exists".to_string(),
            Error::Database(DbError::ForeignKeyViolation { .. }) => "Referenced resource does not exist".to_string(),
            Error::Database(DbError::CheckViolation { .. }) => "Request violates a data constraint".to_string(),
            Error::Database(DbError::Other(_)) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = %self, "Request failed");
        } else if matches!(self, Error::Database(_)) {
            warn!(error = %self, "Request rejected by database constraint");
        }

        (status, Json(json!({ "message": self.user_message() }))).into_response()
    }
}
