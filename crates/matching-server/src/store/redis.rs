/// Redis-backed repository.
///
/// Unlike a cache, every Redis failure propagates to the caller.
///
/// Key schema:
/// - `vm:v1:ps:{id}`: JSON ProblemStatement
/// - `vm:v1:vendor:{name}`: JSON Vendor
/// - `vm:v1:analysis:{kind}:{provider}:{hash}`: JSON analysis
/// - `vm:v1:embedding:{kind}:{hash}`: JSON array of f32
use std::collections::HashSet;
use std::future::Future;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::info;

use matching_common::provider::Provider;

use super::{Repository, StoreError};
use crate::model::{EntityKind, ProblemStatement, Vendor};

const KEY_PREFIX: &str = "vm:v1:";
const SCAN_COUNT: usize = 100;

fn ps_key(id: &str) -> String {
    format!("{KEY_PREFIX}ps:{id}")
}

fn vendor_key(name: &str) -> String {
    format!("{KEY_PREFIX}vendor:{name}")
}

fn analysis_prefix() -> String {
    format!("{KEY_PREFIX}analysis:")
}

fn analysis_key(kind: EntityKind, provider: Provider, hash: &str) -> String {
    format!("{}{}:{provider}:{hash}", analysis_prefix(), kind.as_str())
}

fn embedding_key(kind: EntityKind, hash: &str) -> String {
    format!("{KEY_PREFIX}embedding:{}:{hash}", kind.as_str())
}

/// SCAN MATCH pattern for every key under `prefix`. Glob metacharacters in the prefix are
/// escaped so only the trailing `*` is a wildcard.
fn scan_pattern(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('*');
    pattern
}

/// Follow a SCAN cursor from 0 until the server hands back 0. SCAN may report a key more than
/// once, so the result is deduplicated in first-seen order.
async fn scan_pages<F, Fut>(mut fetch: F) -> Result<Vec<String>, StoreError>
where
    F: FnMut(u64) -> Fut,
    Fut: Future<Output = Result<(u64, Vec<String>), StoreError>>,
{
    let mut cursor: u64 = 0;
    let mut seen = HashSet::new();
    let mut keys = Vec::new();
    loop {
        let (next_cursor, batch) = fetch(cursor).await?;
        for key in batch {
            if seen.insert(key.clone()) {
                keys.push(key);
            }
        }
        cursor = next_cursor;
        if cursor == 0 {
            return Ok(keys);
        }
    }
}

pub struct RedisRepository {
    conn: MultiplexedConnection,
}

impl RedisRepository {
    /// Open a multiplexed connection and check it with a PING.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let mut conn = client.get_multiplexed_async_connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        info!("redis connected");
        Ok(Self { conn })
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(key).await?;
        raw.map(|json| serde_json::from_str(&json))
            .transpose()
            .map_err(StoreError::from)
    }

    async fn set_json<T: serde::Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
    ) -> Result<(), StoreError> {
        let json = serde_json::to_string(value)?;
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(key, json).await?;
        Ok(())
    }

    async fn delete_key(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let removed: usize = conn.del(key).await?;
        Ok(removed > 0)
    }

    /// Every key under `prefix`, via SCAN (never KEYS, which blocks the server).
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let pattern = scan_pattern(prefix);
        scan_pages(|cursor| {
            let mut conn = self.conn.clone();
            let pattern = pattern.clone();
            async move {
                let page: (u64, Vec<String>) = redis::cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(&pattern)
                    .arg("COUNT")
                    .arg(SCAN_COUNT)
                    .query_async(&mut conn)
                    .await?;
                Ok::<_, StoreError>(page)
            }
        })
        .await
    }

    async fn list_json<T: DeserializeOwned>(&self, prefix: &str) -> Result<Vec<T>, StoreError> {
        let mut items = Vec::new();
        for key in self.scan_prefix(prefix).await? {
            // A key may vanish between SCAN and GET.
            if let Some(item) = self.get_json(&key).await? {
                items.push(item);
            }
        }
        Ok(items)
    }
}

#[async_trait]
impl Repository for RedisRepository {
    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    async fn put_problem_statement(&self, ps: &ProblemStatement) -> Result<(), StoreError> {
        self.set_json(&ps_key(&ps.id), ps).await
    }

    async fn get_problem_statement(&self, id: &str) -> Result<Option<ProblemStatement>, StoreError> {
        self.get_json(&ps_key(id)).await
    }

    async fn list_problem_statements(&self) -> Result<Vec<ProblemStatement>, StoreError> {
        self.list_json(&ps_key("")).await
    }

    async fn delete_problem_statement(&self, id: &str) -> Result<bool, StoreError> {
        self.delete_key(&ps_key(id)).await
    }

    async fn put_vendor(&self, vendor: &Vendor) -> Result<(), StoreError> {
        self.set_json(&vendor_key(&vendor.name), vendor).await
    }

    async fn get_vendor(&self, name: &str) -> Result<Option<Vendor>, StoreError> {
        self.get_json(&vendor_key(name)).await
    }

    async fn list_vendors(&self) -> Result<Vec<Vendor>, StoreError> {
        self.list_json(&vendor_key("")).await
    }

    async fn delete_vendor(&self, name: &str) -> Result<bool, StoreError> {
        self.delete_key(&vendor_key(name)).await
    }

    async fn get_analysis(
        &self,
        kind: EntityKind,
        provider: Provider,
        hash: &str,
    ) -> Result<Option<Value>, StoreError> {
        self.get_json(&analysis_key(kind, provider, hash)).await
    }

    async fn put_analysis(
        &self,
        kind: EntityKind,
        provider: Provider,
        hash: &str,
        analysis: &Value,
    ) -> Result<(), StoreError> {
        self.set_json(&analysis_key(kind, provider, hash), analysis)
            .await
    }

    async fn delete_analysis(
        &self,
        kind: EntityKind,
        provider: Provider,
        hash: &str,
    ) -> Result<bool, StoreError> {
        self.delete_key(&analysis_key(kind, provider, hash)).await
    }

    async fn count_analyses(&self) -> Result<usize, StoreError> {
        Ok(self.scan_prefix(&analysis_prefix()).await?.len())
    }

    async fn clear_analyses(&self) -> Result<usize, StoreError> {
        let keys = self.scan_prefix(&analysis_prefix()).await?;
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        let removed: usize = conn.del(&keys).await?;
        Ok(removed)
    }

    async fn get_embedding(
        &self,
        kind: EntityKind,
        hash: &str,
    ) -> Result<Option<Vec<f32>>, StoreError> {
        self.get_json(&embedding_key(kind, hash)).await
    }

    async fn put_embedding(
        &self,
        kind: EntityKind,
        hash: &str,
        embedding: &[f32],
    ) -> Result<(), StoreError> {
        self.set_json(&embedding_key(kind, hash), embedding).await
    }

    async fn delete_embedding(&self, kind: EntityKind, hash: &str) -> Result<bool, StoreError> {
        self.delete_key(&embedding_key(kind, hash)).await
    }
}
