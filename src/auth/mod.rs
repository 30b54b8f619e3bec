//! Caller identity resolution.
//!
//! Identity is owned by an external collaborator: this module only resolves
//! an opaque credential to a user id. Account management never happens here.

pub mod extractor;
pub mod provider;

pub use extractor::Caller;
pub use provider::{IdentityClient, IdentityProvider, RemoteIdentityProvider, StaticIdentityProvider};

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};

use crate::error::ErrorResponse;

/// Authentication error surfaced as 401.
#[derive(Debug)]
pub struct AuthError {
    message: String,
}

impl AuthError {
    pub fn new(message: impl Into<String>) -> Self {
        AuthError {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl ResponseError for AuthError {
    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(StatusCode::UNAUTHORIZED).json(ErrorResponse {
            error: "UNAUTHORIZED".to_string(),
            message: self.message.clone(),
            retryable: false,
        })
    }
}
