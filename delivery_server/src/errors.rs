use actix_web::{
    error::ResponseError,
    http::{header::ContentType, StatusCode},
    HttpResponse,
};
use delivery_engine::DeliveryError;
use log::error;
use thiserror::Error;

const STORE_UNAVAILABLE_MESSAGE: &str = "Service temporarily unavailable, please retry later";

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Could not initialize server. {0}")]
    InitializeError(String),
    #[error("Could not read request body: {0}")]
    InvalidRequestBody(String),
    #[error("Could not read request path: {0}")]
    InvalidRequestPath(String),
    #[error("An I/O error happened in the server. {0}")]
    IOError(#[from] std::io::Error),
    #[error("Invalid server configuration. {0}")]
    ConfigurationError(String),
    #[error("UnspecifiedError. {0}")]
    Unspecified(String),
    #[error("Authentication Error. {0}")]
    AuthenticationError(#[from] AuthError),
    #[error("Insufficient Permissions. {0}")]
    InsufficientPermissions(String),
    #[error("{0}")]
    Delivery(#[from] DeliveryError),
}

impl ServerError {
    /// The error code clients branch on.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequestBody(_) | Self::InvalidRequestPath(_) => "VALIDATION_ERROR",
            Self::AuthenticationError(AuthError::InsufficientPermissions(_)) => "FORBIDDEN",
            Self::AuthenticationError(_) => "UNAUTHORIZED",
            Self::InsufficientPermissions(_) => "FORBIDDEN",
            Self::Delivery(e) => e.code(),
            Self::InitializeError(_) | Self::IOError(_) | Self::ConfigurationError(_) | Self::Unspecified(_) => {
                "INTERNAL_ERROR"
            },
        }
    }

    /// The message shown to clients. Store failures are logged and replaced with a generic retry hint.
    pub fn client_message(&self) -> String {
        match self {
            Self::Delivery(e @ DeliveryError::Database { .. }) => {
                error!("💻️ Store error while handling a request. {e}");
                STORE_UNAVAILABLE_MESSAGE.to_string()
            },
            _ => self.to_string(),
        }
    }
}

impl ResponseError for ServerError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequestBody(_) => StatusCode::BAD_REQUEST,
            Self::InvalidRequestPath(_) => StatusCode::BAD_REQUEST,
            Self::AuthenticationError(e) => match e {
                AuthError::MissingToken => StatusCode::UNAUTHORIZED,
                AuthError::ValidationError(_) => StatusCode::UNAUTHORIZED,
                AuthError::PoorlyFormattedToken(_) => StatusCode::UNAUTHORIZED,
                AuthError::InsufficientPermissions(_) => StatusCode::FORBIDDEN,
            },
            Self::InsufficientPermissions(_) => StatusCode::FORBIDDEN,
            Self::Delivery(e) => match e {
                DeliveryError::Validation(_) | DeliveryError::PayoutOutstanding(_) => StatusCode::BAD_REQUEST,
                DeliveryError::InvalidTransition(_) => StatusCode::CONFLICT,
                DeliveryError::Forbidden(_) => StatusCode::FORBIDDEN,
                DeliveryError::NotFound(_) => StatusCode::NOT_FOUND,
                DeliveryError::AmountMismatch { .. } |
                DeliveryError::AlreadyRemitted(_) |
                DeliveryError::ProofRequired => StatusCode::UNPROCESSABLE_ENTITY,
                DeliveryError::Database { .. } => StatusCode::SERVICE_UNAVAILABLE,
            },
            Self::InitializeError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::IOError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ConfigurationError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Unspecified(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let message = self.client_message();
        HttpResponse::build(self.status_code())
            .insert_header(ContentType::json())
            .body(serde_json::json!({ "code": self.code(), "error": message }).to_string())
    }
}

#[derive(Debug, Clone, Error)]
pub enum AuthError {
    #[error("No bearer token was provided.")]
    MissingToken,
    #[error("Access token is invalid. {0}")]
    ValidationError(String),
    #[error("Access token is not in the correct format. {0}")]
    PoorlyFormattedToken(String),
    #[error("Insufficient Permissions. {0}")]
    InsufficientPermissions(String),
}
