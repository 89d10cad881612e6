use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::{config::Config, error::AppResult};

/// Bearer claims issued by the identity service. This backend only
/// validates; issuance lives elsewhere.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,       // user_id
    pub device_id: String, // device_id
    pub name: Option<String>,
    pub iss: String,
    pub exp: i64,
    pub iat: i64,
}

pub struct AuthService {
    config: Config,
}

impl AuthService {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn validate_token(&self, token: &str) -> AppResult<Claims> {
        let key = DecodingKey::from_secret(self.config.jwt.secret.as_bytes());
        let validation = Validation::default();

        let token_data = decode::<Claims>(token, &key, &validation)?;
        Ok(token_data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn test_config() -> Config {
        let mut config = Config::load();
        config.jwt.secret = "test-secret".to_string();
        config
    }

    fn mint(claims: &Claims, secret: &str) -> String {
        encode(
            &Header::default(),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn accepts_valid_token() {
        let config = test_config();
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: "7e0b1c9a-0000-0000-0000-000000000001".to_string(),
            device_id: "1".to_string(),
            name: Some("alice".to_string()),
            iss: config.jwt.issuer.clone(),
            exp: now + 600,
            iat: now,
        };

        let token = mint(&claims, &config.jwt.secret);
        let decoded = AuthService::new(config).validate_token(&token).unwrap();
        assert_eq!(decoded.sub, claims.sub);
        assert_eq!(decoded.device_id, "1");
    }

    #[test]
    fn rejects_wrong_secret() {
        let config = test_config();
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: "user".to_string(),
            device_id: "1".to_string(),
            name: None,
            iss: config.jwt.issuer.clone(),
            exp: now + 600,
            iat: now,
        };

        let token = mint(&claims, "other-secret");
        assert!(AuthService::new(config).validate_token(&token).is_err());
    }

    #[test]
    fn rejects_expired_token() {
        let config = test_config();
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: "user".to_string(),
            device_id: "1".to_string(),
            name: None,
            iss: config.jwt.issuer.clone(),
            exp: now - 600,
            iat: now - 1200,
        };

        let token = mint(&claims, &config.jwt.secret);
        assert!(AuthService::new(config).validate_token(&token).is_err());
    }
}
