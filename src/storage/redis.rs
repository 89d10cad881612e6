use redis::{aio::MultiplexedConnection, AsyncCommands, Client};
use std::time::Duration;

use crate::error::AppResult;

#[derive(Clone)]
pub struct RedisClient {
    client: Client,
    conn: MultiplexedConnection,
}

impl RedisClient {
    pub async fn new(url: &str) -> AppResult<Self> {
        let client = Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self { client, conn })
    }

    // User presence
    pub async fn set_user_presence(
        &self,
        user_id: &str,
        status: &str,
        ttl: Duration,
    ) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let key = format!("presence:{}", user_id);
        conn.set_ex::<_, _, ()>(&key, status, ttl.as_secs()).await?;
        Ok(())
    }

    // Pub/Sub for per-user event fan-out across server instances
    pub async fn publish_event(&self, user_id: &str, message: &str) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let channel = format!("events:{}", user_id);
        conn.publish::<_, _, ()>(&channel, message).await?;
        Ok(())
    }

    pub async fn subscribe_events(&self, user_id: &str) -> AppResult<redis::aio::PubSub> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        let channel = format!("events:{}", user_id);
        pubsub.subscribe(&channel).await?;
        Ok(pubsub)
    }
}
