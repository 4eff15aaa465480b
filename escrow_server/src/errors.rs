use actix_web::{
    error::ResponseError,
    http::{header::ContentType, StatusCode},
    HttpResponse,
};
use escrow_engine::EscrowError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Could not initialize server. {0}")]
    InitializeError(String),
    #[error("An error occurred on the backend of the server. {0}")]
    BackendError(String),
    #[error("No actor id was provided in the esg_actor_id header")]
    MissingActor,
    #[error("Could not read request query: {0}")]
    InvalidRequestQuery(String),
    #[error("Could not read request body: {0}")]
    InvalidRequestBody(String),
    #[error("{0}")]
    WebhookRejected(String),
    #[error("An I/O error happened in the server. {0}")]
    IOError(#[from] std::io::Error),
    #[error("Invalid server configuration. {0}")]
    ConfigurationError(String),
    #[error("UnspecifiedError. {0}")]
    Unspecified(String),
    #[error("{0}")]
    Escrow(#[from] EscrowError),
}

impl ResponseError for ServerError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingActor => StatusCode::UNAUTHORIZED,
            Self::InvalidRequestQuery(_) => StatusCode::BAD_REQUEST,
            Self::InvalidRequestBody(_) => StatusCode::BAD_REQUEST,
            Self::WebhookRejected(_) => StatusCode::FORBIDDEN,
            Self::Escrow(e) => match e {
                EscrowError::ValidationError(_) => StatusCode::BAD_REQUEST,
                EscrowError::InvalidStateError { .. } => StatusCode::CONFLICT,
                EscrowError::ExternalDependencyError(_) => StatusCode::BAD_GATEWAY,
                EscrowError::NotFound(_) => StatusCode::NOT_FOUND,
                EscrowError::Unauthorized { .. } => StatusCode::FORBIDDEN,
                EscrowError::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::InitializeError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::BackendError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::IOError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ConfigurationError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Unspecified(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code())
            .insert_header(ContentType::json())
            .body(serde_json::json!({ "error": self.to_string() }).to_string())
    }
}
