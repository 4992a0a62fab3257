use std::fmt;

use hyper::StatusCode;
use tracing::{debug, warn};

use crate::federation::FederationError;
use crate::{entity_store, session_store};

#[derive(Debug, PartialEq)]
pub enum Error {
    NotFound,
    MethodNotAllowed,
    BadRequest(String),
    /// No authenticated principal.
    Unauthorized(String),
    /// Authenticated, but a policy denied access.
    Forbidden(String),
    SignInFailed(String),
    PayloadTooLarge,
    Internal(String),
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::NotFound => StatusCode::NOT_FOUND,
            Error::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::Unauthorized(_) | Error::SignInFailed(_) => StatusCode::UNAUTHORIZED,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::NotFound => write!(f, "Not Found"),
            Error::MethodNotAllowed => write!(f, "Method Not Allowed"),
            Error::BadRequest(msg) => write!(f, "Bad Request: {msg}"),
            Error::Unauthorized(msg) => write!(f, "Unauthorized: {msg}"),
            Error::Forbidden(msg) => write!(f, "Forbidden: {msg}"),
            Error::SignInFailed(msg) => write!(f, "Sign-in failed: {msg}"),
            Error::PayloadTooLarge => write!(f, "Payload Too Large"),
            Error::Internal(msg) => write!(f, "Internal Server Error: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<hyper::http::Error> for Error {
    fn from(error: hyper::http::Error) -> Self {
        debug!("HTTP error: {error}");
        Error::Internal(error.to_string())
    }
}

impl From<session_store::Error> for Error {
    fn from(error: session_store::Error) -> Self {
        warn!("Session store error: {error}");
        Error::Internal(error.to_string())
    }
}

impl From<entity_store::Error> for Error {
    fn from(error: entity_store::Error) -> Self {
        match error {
            entity_store::Error::InvalidName(name) => {
                Error::BadRequest(format!("Invalid name: {name}"))
            }
            error => {
                warn!("Entity store error: {error}");
                Error::Internal(error.to_string())
            }
        }
    }
}

impl From<FederationError> for Error {
    fn from(error: FederationError) -> Self {
        match error {
            FederationError::UnknownProvider(_) => Error::NotFound,
            FederationError::Session(error) => Error::Internal(error.to_string()),
            error => Error::SignInFailed(error.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::federation::ProviderExchangeError;

    #[test]
    fn test_status_codes() {
        assert_eq!(Error::NotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            Error::SignInFailed(String::new()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            Error::Forbidden(String::new()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            Error::PayloadTooLarge.status_code(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
    }

    #[test]
    fn test_federation_errors_surface_as_sign_in_failures() {
        let error = Error::from(FederationError::Exchange(ProviderExchangeError::Rejected(
            "invalid_grant".to_string(),
        )));
        assert!(matches!(error, Error::SignInFailed(_)));

        assert_eq!(Error::from(FederationError::Timeout).status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            Error::from(FederationError::UnknownProvider("LinkedIn".to_string())),
            Error::NotFound
        );
    }

    #[test]
    fn test_entity_store_errors() {
        let error = Error::from(entity_store::Error::InvalidName("..".to_string()));
        assert_eq!(error.status_code(), StatusCode::BAD_REQUEST);

        let error = Error::from(entity_store::Error::Io("disk full".to_string()));
        assert_eq!(error.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
