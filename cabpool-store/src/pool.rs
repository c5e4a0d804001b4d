use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;

use cabpool_core::{PoolEntry, PoolStore, StoreError};

/// The lex-ordered set holding every `signature::entry_id` membership record.
pub const POOL_SET_KEY: &str = "h3:airport_pool";

/// Prefix namespacing the per-entry metadata keys.
const META_KEY_PREFIX: &str = "h3:entry:";

/// Upper-bound sentinel for prefix range scans. Membership records are
/// ASCII, so any record extending a prefix sorts below `prefix + '\u{ff}'`.
const LEX_MAX: char = '\u{ff}';

#[derive(Clone)]
pub struct RedisPool {
    client: redis::Client,
    set_key: String,
}

impl RedisPool {
    pub async fn connect(connection_string: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(connection_string)?;
        // Fail fast at worker startup rather than on the first task.
        let mut conn = client.get_multiplexed_async_connection().await?;
        let _: () = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(Self {
            client,
            set_key: POOL_SET_KEY.to_string(),
        })
    }

    async fn conn(&self) -> Result<MultiplexedConnection, redis::RedisError> {
        self.client.get_multiplexed_async_connection().await
    }

    fn meta_key(entry_id: &str) -> String {
        format!("{META_KEY_PREFIX}{entry_id}")
    }
}

#[async_trait]
impl PoolStore for RedisPool {
    async fn put_meta(&self, entry: &PoolEntry) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        let payload = serde_json::to_string(entry)?;
        conn.set::<_, _, ()>(Self::meta_key(entry.entry_id()), payload)
            .await?;
        Ok(())
    }

    async fn get_meta(&self, entry_id: &str) -> Result<Option<PoolEntry>, StoreError> {
        let mut conn = self.conn().await?;
        let raw: Option<String> = conn.get(Self::meta_key(entry_id)).await?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn del_meta(&self, entry_ids: &[String]) -> Result<(), StoreError> {
        if entry_ids.is_empty() {
            return Ok(());
        }
        let keys: Vec<String> = entry_ids.iter().map(|id| Self::meta_key(id)).collect();
        let mut conn = self.conn().await?;
        conn.del::<_, ()>(keys).await?;
        Ok(())
    }

    async fn add_member(&self, member: &str) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        // Score is irrelevant; ordering is purely lexicographic.
        conn.zadd::<_, _, _, ()>(&self.set_key, member, 0).await?;
        Ok(())
    }

    async fn remove_members(&self, members: &[String]) -> Result<u32, StoreError> {
        if members.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn().await?;
        let removed: u32 = conn.zrem(&self.set_key, members).await?;
        Ok(removed)
    }

    async fn scan_prefix(&self, prefix: &str, limit: usize) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn().await?;
        let members: Vec<String> = conn
            .zrangebylex_limit(
                &self.set_key,
                format!("[{prefix}"),
                format!("[{prefix}{LEX_MAX}"),
                0,
                limit as isize,
            )
            .await?;
        Ok(members)
    }

    async fn predecessors(&self, pivot: &str, limit: usize) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn().await?;
        let members: Vec<String> = conn
            .zrevrangebylex_limit(&self.set_key, format!("({pivot}"), "-", 0, limit as isize)
            .await?;
        Ok(members)
    }

    async fn successors(&self, pivot: &str, limit: usize) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn().await?;
        let members: Vec<String> = conn
            .zrangebylex_limit(&self.set_key, format!("({pivot}"), "+", 0, limit as isize)
            .await?;
        Ok(members)
    }

    async fn all_members(&self) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn().await?;
        let members: Vec<String> = conn.zrangebylex(&self.set_key, "-", "+").await?;
        Ok(members)
    }
}
