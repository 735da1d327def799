use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use thiserror::Error;

/// Error raised while loading the schema description. Startup-fatal: the
/// process refuses to serve with a schema it could not fully understand.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("schema is missing required field '{0}'")]
    MissingField(String),
    #[error("bad schema version string '{0}', expected X.Y.Z")]
    BadVersion(String),
    #[error("unknown base type '{0}' in column '{1}'")]
    UnknownBaseType(String, String),
    #[error("column '{0}' references unknown table '{1}'")]
    UnknownRefTable(String, String),
    #[error("failed to parse schema description: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Request-time error taxonomy. Every variant maps to exactly one HTTP
/// status; the JSON body is diagnostic only.
#[derive(Debug, Error)]
pub enum RestError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    MethodNotAllowed(String),
    #[error("{message}")]
    Validation {
        message: String,
        fields: Vec<String>,
    },
    #[error("{0}")]
    Conflict(String),
    #[error("precondition failed")]
    PreconditionFailed,
    #[error("transaction failed: {0}")]
    Transaction(String),
    #[error("database unavailable: {0}")]
    Unavailable(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl RestError {
    pub fn validation(message: impl Into<String>) -> Self {
        RestError::Validation {
            message: message.into(),
            fields: Vec::new(),
        }
    }

    pub fn field_validation(message: impl Into<String>, fields: Vec<String>) -> Self {
        RestError::Validation {
            message: message.into(),
            fields,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        RestError::NotFound(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            RestError::NotFound(_) => StatusCode::NOT_FOUND,
            RestError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            RestError::Validation { .. } => StatusCode::BAD_REQUEST,
            RestError::Conflict(_) => StatusCode::BAD_REQUEST,
            RestError::PreconditionFailed => StatusCode::PRECONDITION_FAILED,
            RestError::Transaction(_) => StatusCode::BAD_REQUEST,
            RestError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            RestError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<String>,
    pub message: String,
}

impl IntoResponse for RestError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            RestError::Validation { message, fields } if !fields.is_empty() => ErrorBody {
                code: Some(status.as_u16()),
                fields: fields.clone(),
                message: message.clone(),
            },
            other => ErrorBody {
                code: None,
                fields: Vec::new(),
                message: other.to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}
