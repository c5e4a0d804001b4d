use async_trait::async_trait;
use futures_util::StreamExt;
use redis::AsyncCommands;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use cabpool_core::{Notification, NotificationBus, StoreError};

/// Topic-per-passenger pub/sub over Redis channels.
#[derive(Clone)]
pub struct RedisBus {
    client: redis::Client,
}

impl RedisBus {
    pub async fn connect(connection_string: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(connection_string)?;
        let mut conn = client.get_multiplexed_async_connection().await?;
        let _: () = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(Self { client })
    }

    /// Start listening on a passenger's topic. Dropping the returned handle
    /// unsubscribes.
    pub async fn subscribe(&self, topic: &str) -> Result<Subscription, StoreError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(topic).await?;

        let (tx, rx) = mpsc::channel(16);
        let topic = topic.to_string();
        let reader = tokio::spawn(async move {
            let mut stream = pubsub.on_message();
            while let Some(msg) = stream.next().await {
                let payload: String = match msg.get_payload() {
                    Ok(p) => p,
                    Err(e) => {
                        warn!(topic = %topic, "undecodable bus payload: {e}");
                        continue;
                    }
                };
                match serde_json::from_str::<Notification>(&payload) {
                    Ok(notification) => {
                        if tx.send(notification).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(topic = %topic, "unrecognized bus payload: {e}"),
                }
            }
        });

        Ok(Subscription { rx, reader })
    }
}

#[async_trait]
impl NotificationBus for RedisBus {
    async fn publish(&self, topic: &str, payload: &Notification) -> Result<(), StoreError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let body = serde_json::to_string(payload)?;
        conn.publish::<_, _, ()>(topic, body).await?;
        Ok(())
    }
}

/// A live topic subscription. Messages arrive in publish order.
pub struct Subscription {
    rx: mpsc::Receiver<Notification>,
    reader: JoinHandle<()>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<Notification> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
