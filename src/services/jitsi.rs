use chrono::Utc;
use jsonwebtoken::{encode, EncodingKey, Header};
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{config::JitsiConfig, error::AppResult};

const ROOM_SUFFIX_LEN: usize = 8;
const ROOM_SUFFIX_CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Claims understood by a Jitsi deployment with token auth enabled.
#[derive(Debug, Serialize, Deserialize)]
pub struct RoomTokenClaims {
    pub iss: String,
    pub aud: String,
    pub sub: String,
    pub room: String,
    pub exp: i64,
    pub nbf: i64,
    pub context: RoomTokenContext,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RoomTokenContext {
    pub user: RoomTokenUser,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RoomTokenUser {
    pub id: String,
    pub name: String,
    pub moderator: bool,
}

/// Provisions room identifiers and signed room tokens for the external
/// video bridge. Media routing itself happens on the bridge.
#[derive(Clone)]
pub struct JitsiService {
    config: JitsiConfig,
}

impl JitsiService {
    pub fn new(config: JitsiConfig) -> Self {
        Self { config }
    }

    /// Room ids pair a millisecond timestamp with a random suffix so
    /// concurrent calls never collide. Immutable once assigned to a call.
    pub fn generate_room_id(&self) -> String {
        let mut rng = rand::thread_rng();
        let suffix: String = (0..ROOM_SUFFIX_LEN)
            .map(|_| ROOM_SUFFIX_CHARS[rng.gen_range(0..ROOM_SUFFIX_CHARS.len())] as char)
            .collect();
        format!("call-{}-{}", Utc::now().timestamp_millis(), suffix)
    }

    pub fn room_url(&self, room_id: &str) -> String {
        format!("https://{}/{}", self.config.domain, room_id)
    }

    /// Signed room token, or None when the deployment runs without token
    /// auth. Moderator is granted to the call initiator only.
    pub fn room_token(
        &self,
        room_id: &str,
        user_id: Uuid,
        display_name: &str,
        moderator: bool,
    ) -> AppResult<Option<String>> {
        let (app_id, app_secret) = match (&self.config.app_id, &self.config.app_secret) {
            (Some(id), Some(secret)) => (id, secret),
            _ => return Ok(None),
        };

        let now = Utc::now();
        let ttl = chrono::Duration::from_std(self.config.token_ttl)
            .unwrap_or_else(|_| chrono::Duration::hours(24));
        let skew = chrono::Duration::from_std(self.config.token_nbf_skew)
            .unwrap_or_else(|_| chrono::Duration::zero());
        let claims = RoomTokenClaims {
            iss: app_id.clone(),
            aud: "jitsi".to_string(),
            sub: self.config.domain.clone(),
            room: room_id.to_string(),
            exp: (now + ttl).timestamp(),
            nbf: (now - skew).timestamp(),
            context: RoomTokenContext {
                user: RoomTokenUser {
                    id: user_id.to_string(),
                    name: display_name.to_string(),
                    moderator,
                },
            },
        };

        let key = EncodingKey::from_secret(app_secret.as_bytes());
        let token = encode(&Header::default(), &claims, &key)?;
        Ok(Some(token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{decode, DecodingKey, Validation};
    use std::collections::HashSet;
    use std::time::Duration;

    fn test_config(with_identity: bool) -> JitsiConfig {
        JitsiConfig {
            app_id: with_identity.then(|| "relay-app".to_string()),
            app_secret: with_identity.then(|| "relay-secret".to_string()),
            domain: "meet.example.org".to_string(),
            token_ttl: Duration::from_secs(24 * 60 * 60),
            token_nbf_skew: Duration::from_secs(10),
        }
    }

    #[test]
    fn room_ids_have_prefix_and_do_not_collide() {
        let service = JitsiService::new(test_config(false));
        let ids: HashSet<String> = (0..100).map(|_| service.generate_room_id()).collect();
        assert_eq!(ids.len(), 100);
        for id in &ids {
            assert!(id.starts_with("call-"));
        }
    }

    #[test]
    fn no_token_without_identity() {
        let service = JitsiService::new(test_config(false));
        let token = service
            .room_token("call-1-abc", Uuid::new_v4(), "alice", true)
            .unwrap();
        assert!(token.is_none());
    }

    #[test]
    fn token_embeds_room_and_moderator_flag() {
        let service = JitsiService::new(test_config(true));
        let user_id = Uuid::new_v4();
        let room_id = service.generate_room_id();
        let token = service
            .room_token(&room_id, user_id, "alice", true)
            .unwrap()
            .unwrap();

        let mut validation = Validation::default();
        validation.set_audience(&["jitsi"]);
        validation.validate_nbf = true;
        let decoded = decode::<RoomTokenClaims>(
            &token,
            &DecodingKey::from_secret(b"relay-secret"),
            &validation,
        )
        .unwrap()
        .claims;

        assert_eq!(decoded.iss, "relay-app");
        assert_eq!(decoded.sub, "meet.example.org");
        assert_eq!(decoded.room, room_id);
        assert!(decoded.context.user.moderator);
        assert_eq!(decoded.context.user.id, user_id.to_string());
        assert!(decoded.nbf <= Utc::now().timestamp());
        assert!(decoded.exp > Utc::now().timestamp());
    }
}
