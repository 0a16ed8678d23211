//! Bearer authentication.
//!
//! Clients send `authorization: Bearer <base64-token>`. The token is
//! base64-decoded here and handed to an [`IdentityService`]: the directory
//! itself for opaque tokens, or [`JwtIdentityService`] when a JWT secret is
//! configured (`SIEVE_JWT_SECRET`).
//!
//! [`IdentityService`]: sieve_core::IdentityService

mod jwt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sieve_core::{Error, Result};
use sieve_proto::{QueryRequest, AUTHORIZATION};

pub use jwt::{JwtClaims, JwtIdentityService};

const BEARER_PREFIX: &str = "Bearer ";

/// Extract and decode the bearer token of a request.
pub fn bearer_token(request: &QueryRequest) -> Result<String> {
    let header = request
        .metadata_value(AUTHORIZATION)
        .ok_or_else(|| Error::Unauthenticated("missing authorization metadata".to_string()))?;
    let encoded = header
        .strip_prefix(BEARER_PREFIX)
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| Error::Unauthenticated("expected a Bearer token".to_string()))?;
    let decoded = STANDARD
        .decode(encoded)
        .map_err(|_| Error::Unauthenticated("bearer token is not valid base64".to_string()))?;
    String::from_utf8(decoded)
        .map_err(|_| Error::Unauthenticated("bearer token is not valid UTF-8".to_string()))
}

/// Encode a raw token for the `authorization` header.
pub fn encode_token(token: &str) -> String {
    STANDARD.encode(token.as_bytes())
}
