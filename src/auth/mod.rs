//! Password hashing and signed bearer tokens.
//!
//! Tokens are compact HMAC-signed envelopes carrying
//! `{sub, role, exp, type}`. Access tokens expire in minutes, refresh
//! tokens in days; only `access` tokens pass the gateway. Log-out is a
//! client-side drop, so there is no revocation state to keep.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::errors::AuthError;
use crate::models::{TokenPair, User, UserRole, UserResponse};

pub const TOKEN_KIND_ACCESS: &str = "access";
pub const TOKEN_KIND_REFRESH: &str = "refresh";

// A real bcrypt digest of an unguessable throwaway string; verifying
// against it equalizes login timing for unknown emails.
const DUMMY_HASH: &str = "$2b$12$K3JNi5xUQ3o8vUg2yq8d1uBCmHzW3N9eFZ0P5pzqXeQyIYxg0aW1S";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    pub sub: String,
    pub role: String,
    pub exp: i64,
    #[serde(rename = "type")]
    pub kind: String,
}

impl TokenClaims {
    pub fn subject(&self) -> Result<Uuid, AuthError> {
        Uuid::parse_str(&self.sub)
            .map_err(|_| AuthError::InvalidToken(format!("bad subject: {}", self.sub)))
    }

    pub fn role(&self) -> UserRole {
        UserRole::parse(&self.role)
    }
}

#[derive(Clone)]
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    algorithm: Algorithm,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenService {
    pub fn new(config: &AuthConfig) -> Self {
        let algorithm = match config.jwt_algorithm.as_str() {
            "HS384" => Algorithm::HS384,
            "HS512" => Algorithm::HS512,
            _ => Algorithm::HS256,
        };
        Self {
            encoding_key: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            algorithm,
            access_ttl: Duration::minutes(config.access_token_expire_minutes),
            refresh_ttl: Duration::days(config.refresh_token_expire_days),
        }
    }

    pub fn create_access_token(&self, user_id: Uuid, role: UserRole) -> Result<String, AuthError> {
        self.create_token(user_id, role, TOKEN_KIND_ACCESS, self.access_ttl)
    }

    pub fn create_refresh_token(&self, user_id: Uuid, role: UserRole) -> Result<String, AuthError> {
        self.create_token(user_id, role, TOKEN_KIND_REFRESH, self.refresh_ttl)
    }

    fn create_token(
        &self,
        user_id: Uuid,
        role: UserRole,
        kind: &str,
        ttl: Duration,
    ) -> Result<String, AuthError> {
        let claims = TokenClaims {
            sub: user_id.to_string(),
            role: role.as_str().to_string(),
            exp: (Utc::now() + ttl).timestamp(),
            kind: kind.to_string(),
        };
        encode(&Header::new(self.algorithm), &claims, &self.encoding_key)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))
    }

    /// Verify signature and expiry, returning the claim set.
    pub fn decode_token(&self, token: &str) -> Result<TokenClaims, AuthError> {
        let mut validation = Validation::new(self.algorithm);
        validation.leeway = 0;
        decode::<TokenClaims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => AuthError::InvalidToken(e.to_string()),
            })
    }

    /// Decode and additionally require the given token kind.
    pub fn decode_token_of_kind(
        &self,
        token: &str,
        kind: &str,
    ) -> Result<TokenClaims, AuthError> {
        let claims = self.decode_token(token)?;
        if claims.kind != kind {
            return Err(AuthError::WrongTokenKind {
                expected: kind.to_string(),
            });
        }
        Ok(claims)
    }

    pub fn create_token_pair(&self, user: &User) -> Result<TokenPair, AuthError> {
        Ok(TokenPair {
            access_token: self.create_access_token(user.id, user.role)?,
            refresh_token: self.create_refresh_token(user.id, user.role)?,
            token_type: "bearer".to_string(),
            user: UserResponse::from(user),
        })
    }
}

pub fn hash_password(password: &str, cost: u32) -> Result<String, AuthError> {
    Ok(bcrypt::hash(password, cost)?)
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    bcrypt::verify(password, hash).unwrap_or(false)
}

/// Burn a hash verification so unknown emails take as long as wrong
/// passwords.
pub fn equalize_timing(password: &str) {
    let _ = bcrypt::verify(password, DUMMY_HASH);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> TokenService {
        TokenService::new(&AuthConfig {
            jwt_secret: "test-secret".to_string(),
            jwt_algorithm: "HS256".to_string(),
            access_token_expire_minutes: 30,
            refresh_token_expire_days: 7,
            bcrypt_cost: 4,
        })
    }

    #[test]
    fn test_token_round_trip() {
        let service = service();
        let user_id = Uuid::new_v4();

        let token = service
            .create_access_token(user_id, UserRole::Admin)
            .unwrap();
        let claims = service.decode_token(&token).unwrap();

        assert_eq!(claims.subject().unwrap(), user_id);
        assert_eq!(claims.role(), UserRole::Admin);
        assert_eq!(claims.kind, TOKEN_KIND_ACCESS);
        assert!(claims.exp > Utc::now().timestamp());
    }

    #[test]
    fn test_expired_token_rejected() {
        let service = service();
        let claims = TokenClaims {
            sub: Uuid::new_v4().to_string(),
            role: "user".to_string(),
            exp: (Utc::now() - Duration::minutes(5)).timestamp(),
            kind: TOKEN_KIND_ACCESS.to_string(),
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(b"test-secret"),
        )
        .unwrap();

        assert!(matches!(
            service.decode_token(&token),
            Err(AuthError::TokenExpired)
        ));
    }

    #[test]
    fn test_tampered_token_rejected() {
        let service = service();
        let token = service
            .create_access_token(Uuid::new_v4(), UserRole::User)
            .unwrap();
        let mut tampered = token.clone();
        tampered.push('x');

        assert!(service.decode_token(&tampered).is_err());
        assert!(service.decode_token("tampered").is_err());
    }

    #[test]
    fn test_refresh_kind_enforced() {
        let service = service();
        let user_id = Uuid::new_v4();

        let access = service.create_access_token(user_id, UserRole::User).unwrap();
        let refresh = service
            .create_refresh_token(user_id, UserRole::User)
            .unwrap();

        assert!(service
            .decode_token_of_kind(&refresh, TOKEN_KIND_REFRESH)
            .is_ok());
        assert!(matches!(
            service.decode_token_of_kind(&access, TOKEN_KIND_REFRESH),
            Err(AuthError::WrongTokenKind { .. })
        ));
        assert!(matches!(
            service.decode_token_of_kind(&refresh, TOKEN_KIND_ACCESS),
            Err(AuthError::WrongTokenKind { .. })
        ));
    }

    #[test]
    fn test_password_hash_round_trip() {
        let hash = hash_password("pass1234", 4).unwrap();
        assert!(verify_password("pass1234", &hash));
        assert!(!verify_password("wrong", &hash));
    }
}
