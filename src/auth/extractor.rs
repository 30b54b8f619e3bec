//! Actix-web extractor resolving the calling user.
//!
//! # Security
//! - The credential is wrapped in `SecretString` immediately and never logged
//! - Resolution is delegated to the configured identity provider

use actix_web::dev::Payload;
use actix_web::{web, FromRequest, HttpRequest};
use futures_util::future::LocalBoxFuture;
use secrecy::SecretString;
use uuid::Uuid;

use super::{AuthError, IdentityClient};
use crate::config::API_KEY_HEADER;

/// Extract a secret header value, wrapping it in SecretString.
/// Returns None if the header is missing or invalid UTF-8.
fn extract_secret_header(req: &HttpRequest, header_name: &str) -> Option<SecretString> {
    req.headers()
        .get(header_name)
        .and_then(|v| v.to_str().ok())
        .map(|s| SecretString::from(s.to_string()))
}

/// The resolved calling user.
///
/// Use this in handlers that require authentication:
/// ```ignore
/// async fn protected_handler(caller: Caller) -> impl Responder {
///     // caller.user_id identifies the authenticated user
/// }
/// ```
pub struct Caller {
    pub user_id: Uuid,
}

impl FromRequest for Caller {
    type Error = AuthError;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let credential = extract_secret_header(req, API_KEY_HEADER);
        let client = req.app_data::<web::Data<IdentityClient>>().cloned();

        Box::pin(async move {
            let client = client.ok_or_else(|| AuthError::new("Internal configuration error"))?;

            let credential = credential.ok_or_else(|| {
                AuthError::new(format!("Missing {} header", API_KEY_HEADER))
            })?;

            let user_id = client.resolve(&credential).await?;
            Ok(Caller { user_id })
        })
    }
}
