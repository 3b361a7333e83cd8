use anyhow::Result;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::wiki::{SummaryOutcome, WikiSource};

const CACHE_TTL_SECS: u64 = 3600;

fn search_key(query: &str, limit: u32) -> String {
    format!("trivia_bot_search/{}/{}", query, limit)
}

fn summary_key(title: &str, sentences: u8) -> String {
    format!("trivia_bot_summary/{}/{}", title, sentences)
}

/// Time-bounded Redis cache in front of a [`WikiSource`]. The wrapped source
/// stays pure; a dead or missing Redis degrades to a plain pass-through call.
#[derive(Debug)]
pub struct Cached<S> {
    inner: S,
    redis: Option<redis::Client>,
}

impl<S> Cached<S> {
    pub fn new(inner: S, redis: Option<redis::Client>) -> Self {
        Self { inner, redis }
    }

    async fn load<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let client = self.redis.as_ref()?;
        let res: redis::RedisResult<Option<String>> = async {
            let mut con = client.get_multiplexed_async_connection().await?;
            con.get(key).await
        }
        .await;
        match res {
            Ok(Some(raw)) => serde_json::from_str(&raw).ok(),
            Ok(None) => None,
            Err(err) => {
                log::warn!("cache read for {} failed: {}", key, err);
                None
            }
        }
    }

    async fn store<T: Serialize>(&self, key: &str, value: &T) {
        let Some(client) = self.redis.as_ref() else {
            return;
        };
        let payload = match serde_json::to_string(value) {
            Ok(payload) => payload,
            Err(err) => {
                log::warn!("cache encode for {} failed: {}", key, err);
                return;
            }
        };
        let res: redis::RedisResult<()> = async {
            let mut con = client.get_multiplexed_async_connection().await?;
            con.set_ex(key, payload, CACHE_TTL_SECS).await
        }
        .await;
        if let Err(err) = res {
            log::warn!("cache write for {} failed: {}", key, err);
        }
    }
}

impl<S: WikiSource + Sync> WikiSource for Cached<S> {
    async fn search(&self, query: &str, limit: u32) -> Result<Vec<String>> {
        let key = search_key(query, limit);
        if let Some(titles) = self.load::<Vec<String>>(&key).await {
            log::debug!("cache hit: {}", key);
            return Ok(titles);
        }
        let titles = self.inner.search(query, limit).await?;
        self.store(&key, &titles).await;
        Ok(titles)
    }

    async fn summary(&self, title: &str, sentences: u8) -> Result<SummaryOutcome> {
        let key = summary_key(title, sentences);
        if let Some(text) = self.load::<String>(&key).await {
            log::debug!("cache hit: {}", key);
            return Ok(SummaryOutcome::Text(text));
        }
        let outcome = self.inner.summary(title, sentences).await?;
        // Only resolved summaries are worth keeping; disambiguations and
        // misses are cheap to rediscover.
        if let SummaryOutcome::Text(text) = &outcome {
            self.store(&key, text).await;
        }
        Ok(outcome)
    }

    async fn random(&self, count: u32) -> Result<Vec<String>> {
        // Never cached: repeated uniform draws must stay fresh.
        self.inner.random(count).await
    }
}
