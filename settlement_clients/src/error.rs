use escrow_engine::CollaboratorError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Could not initialize client: {0}")]
    Initialization(String),
    #[error("Invalid REST request: {0}")]
    RestRequestError(String),
    #[error("Invalid REST response: {0}")]
    RestResponseError(String),
    #[error("Could not deserialize JSON: {0}")]
    JsonError(String),
    #[error("Query failed. Error {status}. {message}")]
    QueryError { status: u16, message: String },
}

impl From<ClientError> for CollaboratorError {
    /// Client errors (4xx) mean the service understood and refused the request. Everything else is treated as the
    /// service being unavailable, and the caller may retry.
    fn from(e: ClientError) -> Self {
        match e {
            ClientError::QueryError { status, message } if (400..500).contains(&status) => {
                CollaboratorError::Rejected(format!("{status}: {message}"))
            },
            ClientError::RestRequestError(_) => CollaboratorError::Rejected(e.to_string()),
            e => CollaboratorError::Unavailable(e.to_string()),
        }
    }
}
