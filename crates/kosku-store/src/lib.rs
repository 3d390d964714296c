//! Listing cache, bounded HTTP fetch, and the JSON listing file store.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use kosku_core::Listing;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

pub const CRATE_NAME: &str = "kosku-store";

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_CACHE_CAPACITY: usize = 128;
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug)]
struct CacheSlot {
    listings: Vec<Listing>,
    captured_at: Instant,
}

/// Shared listing cache with a fixed freshness window and bounded capacity.
///
/// Constructed once and handed to every consumer by reference; there is no
/// process-global map. Stale entries are ignored on read and swept on insert,
/// and when the map is still full the oldest slot is dropped, so the cache
/// cannot grow without bound under churning filter sets. The lock makes
/// concurrent adapter tasks writing distinct keys safe.
#[derive(Debug)]
pub struct ListingCache {
    ttl: Duration,
    capacity: usize,
    slots: Mutex<HashMap<String, CacheSlot>>,
}

impl ListingCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity: capacity.max(1),
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_CACHE_TTL, DEFAULT_CACHE_CAPACITY)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the cached listings for `key` when the entry is still inside
    /// the freshness window.
    pub async fn get_fresh(&self, key: &str) -> Option<Vec<Listing>> {
        let slots = self.slots.lock().await;
        let slot = slots.get(key)?;
        if slot.captured_at.elapsed() < self.ttl {
            Some(slot.listings.clone())
        } else {
            None
        }
    }

    /// Stores `listings` under `key`, stamping the capture instant. Existing
    /// entries (fresh or stale) are overwritten in place.
    pub async fn insert(&self, key: String, listings: Vec<Listing>) {
        let mut slots = self.slots.lock().await;
        if !slots.contains_key(&key) && slots.len() >= self.capacity {
            let ttl = self.ttl;
            slots.retain(|_, slot| slot.captured_at.elapsed() < ttl);
            if slots.len() >= self.capacity {
                let oldest = slots
                    .iter()
                    .min_by_key(|(_, slot)| slot.captured_at)
                    .map(|(key, _)| key.clone());
                if let Some(oldest) = oldest {
                    debug!(key = %oldest, "listing cache full, evicting oldest entry");
                    slots.remove(&oldest);
                }
            }
        }
        slots.insert(
            key,
            CacheSlot {
                listings,
                captured_at: Instant::now(),
            },
        );
    }

    pub async fn len(&self) -> usize {
        self.slots.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.slots.lock().await.is_empty()
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

/// Credential style expected by an upstream API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Auth<'a> {
    Bearer(&'a str),
    ApiKey(&'a str),
    None,
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_HTTP_TIMEOUT,
            user_agent: None,
        }
    }
}

/// Thin JSON GET client. The client-level timeout cancels the in-flight
/// request; a timed-out or failed call is never retried, the caller degrades
/// for the rest of the cache window instead.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: HttpConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        let client = builder.build().context("building reqwest client")?;
        Ok(Self { client })
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
        auth: Auth<'_>,
    ) -> Result<T, FetchError> {
        let mut request = self.client.get(url).query(query);
        match auth {
            Auth::Bearer(token) => request = request.bearer_auth(token),
            Auth::ApiKey(key) => request = request.header("X-API-Key", key),
            Auth::None => {}
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: response.url().to_string(),
            });
        }
        Ok(response.json::<T>().await?)
    }
}

/// Wholesale read/write store for the static listing file.
#[derive(Debug, Clone)]
pub struct ListingFileStore {
    path: PathBuf,
}

impl ListingFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn load(&self) -> anyhow::Result<Vec<Listing>> {
        let text = fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("reading {}", self.path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing {}", self.path.display()))
    }

    /// Replaces the whole file through a temp-file rename so a concurrent
    /// reader never observes a partial write.
    pub async fn save(&self, listings: &[Listing]) -> anyhow::Result<()> {
        let bytes = serde_json::to_vec_pretty(listings).context("serializing listings")?;
        let parent = self
            .path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        fs::create_dir_all(&parent)
            .await
            .with_context(|| format!("creating {}", parent.display()))?;

        let temp_path = parent.join(format!(".{}.tmp", Uuid::new_v4()));
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| format!("opening temp listing file {}", temp_path.display()))?;
        file.write_all(&bytes)
            .await
            .with_context(|| format!("writing temp listing file {}", temp_path.display()))?;
        file.flush()
            .await
            .with_context(|| format!("flushing temp listing file {}", temp_path.display()))?;
        drop(file);

        if let Err(err) = fs::rename(&temp_path, &self.path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(err).with_context(|| {
                format!(
                    "renaming temp listing file {} -> {}",
                    temp_path.display(),
                    self.path.display()
                )
            });
        }
        Ok(())
    }

    /// Appends one listing and persists; a missing file starts from an empty
    /// set, an unreadable one is an error. Returns the new total.
    pub async fn append(&self, listing: Listing) -> anyhow::Result<usize> {
        let exists = fs::try_exists(&self.path)
            .await
            .with_context(|| format!("checking {}", self.path.display()))?;
        let mut listings = if exists { self.load().await? } else { Vec::new() };
        listings.push(listing);
        self.save(&listings).await?;
        Ok(listings.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn listing(id: &str, price: u64) -> Listing {
        Listing::new(id, format!("Kos {id}"), format!("Jl. {id}"), price, "mamikos.com")
    }

    #[tokio::test(start_paused = true)]
    async fn cache_returns_fresh_entries_only() {
        let cache = ListingCache::new(Duration::from_secs(300), 8);
        cache.insert("k".to_string(), vec![listing("a", 500_000)]).await;

        let hit = cache.get_fresh("k").await.expect("fresh entry");
        assert_eq!(hit.len(), 1);

        tokio::time::advance(Duration::from_secs(301)).await;
        assert!(cache.get_fresh("k").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn cache_overwrite_refreshes_capture_instant() {
        let cache = ListingCache::new(Duration::from_secs(300), 8);
        cache.insert("k".to_string(), vec![listing("a", 500_000)]).await;
        tokio::time::advance(Duration::from_secs(200)).await;
        cache.insert("k".to_string(), vec![listing("b", 600_000)]).await;
        tokio::time::advance(Duration::from_secs(200)).await;

        let hit = cache.get_fresh("k").await.expect("refreshed entry still fresh");
        assert_eq!(hit[0].id, "b");
    }

    #[tokio::test(start_paused = true)]
    async fn cache_eviction_keeps_capacity_bounded() {
        let cache = ListingCache::new(Duration::from_secs(300), 2);
        cache.insert("first".to_string(), vec![listing("a", 1)]).await;
        tokio::time::advance(Duration::from_secs(1)).await;
        cache.insert("second".to_string(), vec![listing("b", 2)]).await;
        tokio::time::advance(Duration::from_secs(1)).await;
        cache.insert("third".to_string(), vec![listing("c", 3)]).await;

        assert_eq!(cache.len().await, 2);
        assert!(cache.get_fresh("first").await.is_none());
        assert!(cache.get_fresh("second").await.is_some());
        assert!(cache.get_fresh("third").await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn cache_eviction_prefers_sweeping_stale_entries() {
        let cache = ListingCache::new(Duration::from_secs(300), 2);
        cache.insert("stale".to_string(), vec![listing("a", 1)]).await;
        tokio::time::advance(Duration::from_secs(301)).await;
        cache.insert("fresh".to_string(), vec![listing("b", 2)]).await;
        cache.insert("newer".to_string(), vec![listing("c", 3)]).await;

        assert!(cache.get_fresh("fresh").await.is_some());
        assert!(cache.get_fresh("newer").await.is_some());
    }

    #[tokio::test]
    async fn file_store_roundtrips_and_appends() {
        let dir = tempdir().expect("tempdir");
        let store = ListingFileStore::new(dir.path().join("db/kosan.json"));

        store
            .save(&[listing("a", 700_000)])
            .await
            .expect("initial save");
        let loaded = store.load().await.expect("load");
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].price, 700_000);

        let total = store.append(listing("b", 800_000)).await.expect("append");
        assert_eq!(total, 2);
        let loaded = store.load().await.expect("reload");
        assert_eq!(loaded[1].id, "b");
    }

    #[tokio::test]
    async fn file_store_append_starts_empty_when_file_missing() {
        let dir = tempdir().expect("tempdir");
        let store = ListingFileStore::new(dir.path().join("kosan.json"));
        let total = store.append(listing("only", 500_000)).await.expect("append");
        assert_eq!(total, 1);
    }

    #[tokio::test]
    async fn file_store_load_errors_on_missing_file() {
        let dir = tempdir().expect("tempdir");
        let store = ListingFileStore::new(dir.path().join("absent.json"));
        assert!(store.load().await.is_err());
    }
}
