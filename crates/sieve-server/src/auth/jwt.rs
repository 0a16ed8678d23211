//! JWT bearer tokens.
//!
//! Tokens are HS256-signed; `sub` names a directory identity and `exp` is
//! required.
//!
//! ```json
//! { "sub": "ana", "exp": 1735689600, "iss": "sieve-auth" }
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use sieve_core::{
    Directory, Error, Identity, IdentityService, Policy, RequestContext, Result, SourceCatalog,
    SourceDescriptor,
};
use tracing::debug;

/// JWT claims structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtClaims {
    /// Identity id.
    pub sub: String,

    /// Expiration time (Unix timestamp).
    pub exp: u64,

    #[serde(default)]
    pub iat: Option<u64>,

    #[serde(default)]
    pub iss: Option<String>,
}

/// Identity service that accepts JWTs whose subject is a directory
/// identity. Policies and sources come from the directory.
pub struct JwtIdentityService {
    directory: Arc<Directory>,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtIdentityService {
    pub fn with_secret(directory: Arc<Directory>, secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 60;
        Self {
            directory,
            decoding_key: DecodingKey::from_secret(secret),
            validation,
        }
    }

    /// Require the `iss` claim to equal `issuer`.
    pub fn with_issuer(mut self, issuer: &str) -> Self {
        self.validation.set_issuer(&[issuer]);
        self
    }
}

#[async_trait]
impl SourceCatalog for JwtIdentityService {
    async fn get_source(&self, ctx: &RequestContext, label: &str) -> Result<SourceDescriptor> {
        self.directory.get_source(ctx, label).await
    }
}

#[async_trait]
impl IdentityService for JwtIdentityService {
    async fn validate_token(&self, ctx: &RequestContext, token: &str) -> Result<Identity> {
        ctx.check()?;
        let claims = decode::<JwtClaims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| {
                debug!(request_id = ctx.request_id(), error = %e, "jwt rejected");
                Error::Unauthenticated("invalid bearer token".to_string())
            })?
            .claims;
        self.directory
            .identity(&claims.sub)
            .cloned()
            .ok_or_else(|| Error::Unauthenticated("invalid bearer token".to_string()))
    }

    async fn identity_policies(&self, ctx: &RequestContext, identity_id: &str) -> Result<Vec<Policy>> {
        self.directory.identity_policies(ctx, identity_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &[u8] = b"test-secret";

    fn token(sub: &str, secret: &[u8], exp_offset: i64) -> String {
        let exp = (unix_now() as i64 + exp_offset) as u64;
        let claims = JwtClaims {
            sub: sub.to_string(),
            exp,
            iat: None,
            iss: Some("sieve-auth".to_string()),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(secret)).unwrap()
    }

    fn unix_now() -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs()
    }

    fn service() -> JwtIdentityService {
        let directory = Directory::new().with_identity(Identity::new("ana"), Vec::<String>::new());
        JwtIdentityService::with_secret(Arc::new(directory), SECRET).with_issuer("sieve-auth")
    }

    #[tokio::test]
    async fn test_valid_jwt() {
        let ctx = RequestContext::background();
        let identity = service()
            .validate_token(&ctx, &token("ana", SECRET, 3600))
            .await
            .unwrap();
        assert_eq!(identity.id, "ana");
    }

    #[tokio::test]
    async fn test_rejected_jwts() {
        let ctx = RequestContext::background();
        let service = service();
        for bad in [
            token("ana", b"other-secret", 3600),
            token("ana", SECRET, -3600),
            token("mallory", SECRET, 3600),
            "not-a-jwt".to_string(),
        ] {
            let err = service.validate_token(&ctx, &bad).await.unwrap_err();
            assert_eq!(err.code(), "unauthenticated");
        }
    }
}
