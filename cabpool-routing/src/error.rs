use cabpool_core::RouteServiceError;
use thiserror::Error;

/// Errors from the directions backend or from cell arithmetic.
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("directions request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("directions endpoint returned {0}")]
    Api(String),
    #[error("no drivable route returned")]
    NoRoute,
    #[error("invalid coordinate: {0}")]
    InvalidCoordinate(String),
    #[error("unsupported hex resolution: {0}")]
    InvalidResolution(u8),
}

impl From<RouteError> for RouteServiceError {
    fn from(err: RouteError) -> Self {
        match err {
            RouteError::NoRoute => RouteServiceError::NoRoute,
            RouteError::InvalidCoordinate(msg) => RouteServiceError::InvalidCoordinate(msg),
            other => RouteServiceError::Unavailable(other.to_string()),
        }
    }
}
