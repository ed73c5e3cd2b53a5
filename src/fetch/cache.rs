//! Conditional fetch cache
//!
//! Wraps a send function with ETag / Last-Modified handling. Entries live in
//! the state store's `http_cache` table.

use crate::fetch::{RawResponse, Validators};
use crate::storage::{hash_bytes, CacheEntry, StateStore, StorageResult};
use crate::HarvestError;
use chrono::{DateTime, Utc};
use std::future::Future;

/// Result of one cached fetch
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    /// Response body; `None` for 304
    pub body: Option<Vec<u8>>,
    /// False for 304 or when the body hash matches the cached one
    pub changed: bool,
    pub status: u16,
    /// Entry to store once the content has been handled downstream
    pending: Option<CacheEntry>,
}

impl FetchOutcome {
    pub fn pending_entry(&self) -> Option<&CacheEntry> {
        self.pending.as_ref()
    }

    /// Body as text, if there is one
    pub fn text(&self) -> Option<String> {
        self.body
            .as_ref()
            .map(|body| String::from_utf8_lossy(body).into_owned())
    }
}

/// ETag / Last-Modified aware fetch layer
#[derive(Clone)]
pub struct ConditionalCache {
    store: StateStore,
    ttl: chrono::Duration,
    conditional: bool,
}

impl ConditionalCache {
    /// `conditional = false` disables validators and unchanged detection
    pub fn new(store: StateStore, cache_days: u32, conditional: bool) -> Self {
        Self {
            store,
            ttl: chrono::Duration::days(i64::from(cache_days)),
            conditional,
        }
    }

    /// Validators to attach for `url`, plus the entry they came from
    ///
    /// Expired entries yield no validators so the request is a full fetch.
    pub fn prepare(
        &self,
        url: &str,
        now: DateTime<Utc>,
    ) -> StorageResult<(Validators, Option<CacheEntry>)> {
        if !self.conditional {
            return Ok((Validators::default(), None));
        }

        let prior = self.store.cache_entry(url)?;
        let validators = match &prior {
            Some(entry) if !entry.is_expired(self.ttl, now) => Validators {
                etag: entry.etag.clone(),
                last_modified: entry.last_modified.clone(),
            },
            Some(_) => {
                tracing::debug!("Cache entry for {} expired, forcing full fetch", url);
                Validators::default()
            }
            None => Validators::default(),
        };

        Ok((validators, prior))
    }

    /// Fetches `url` through `send`, attaching validators when the cache allows
    ///
    /// `send` must only return successful (2xx or 304) responses.
    pub async fn fetch<F, Fut>(&self, url: &str, send: F) -> Result<FetchOutcome, HarvestError>
    where
        F: FnOnce(Validators) -> Fut,
        Fut: Future<Output = Result<RawResponse, HarvestError>>,
    {
        let (validators, prior) = self.prepare(url, Utc::now())?;
        let response = send(validators).await?;
        Ok(self.evaluate(url, prior.as_ref(), response, Utc::now())?)
    }

    /// Turns a response into a [`FetchOutcome`]
    ///
    /// 304 only refreshes `fetched_at`. A 200 whose body hashes the same as
    /// the cached one is unchanged and its entry is stored at once; a changed
    /// body leaves the entry pending until [`ConditionalCache::commit`].
    pub fn evaluate(
        &self,
        url: &str,
        prior: Option<&CacheEntry>,
        response: RawResponse,
        now: DateTime<Utc>,
    ) -> StorageResult<FetchOutcome> {
        if response.status == 304 {
            if prior.is_some() {
                self.store.touch_cache_entry(url, now)?;
            }
            return Ok(FetchOutcome {
                body: None,
                changed: false,
                status: 304,
                pending: None,
            });
        }

        let entry = CacheEntry {
            url: url.to_string(),
            etag: response.etag.clone(),
            last_modified: response.last_modified.clone(),
            body_hash: hash_bytes(&response.body),
            fetched_at: now,
        };

        let unchanged =
            self.conditional && prior.is_some_and(|prior| prior.body_hash == entry.body_hash);

        if unchanged {
            tracing::debug!("{} returned 200 with an identical body", url);
            self.store.put_cache_entry(&entry)?;
            return Ok(FetchOutcome {
                body: Some(response.body),
                changed: false,
                status: response.status,
                pending: None,
            });
        }

        Ok(FetchOutcome {
            body: Some(response.body),
            changed: true,
            status: response.status,
            pending: self.conditional.then_some(entry),
        })
    }

    /// Stores the pending entry of `outcome`, if any
    pub fn commit(&self, outcome: &FetchOutcome) -> StorageResult<()> {
        match outcome.pending_entry() {
            Some(entry) => self.store.put_cache_entry(entry),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: u16, etag: Option<&str>, body: &str) -> RawResponse {
        RawResponse {
            status,
            etag: etag.map(|e| e.to_string()),
            body: body.as_bytes().to_vec(),
            ..RawResponse::default()
        }
    }

    #[tokio::test]
    async fn test_first_fetch_is_unconditional_and_pending() {
        let cache = ConditionalCache::new(StateStore::in_memory().unwrap(), 7, true);

        let outcome = cache
            .fetch("https://a.com/a", |validators| async move {
                assert!(validators.is_empty());
                Ok(response(200, Some("\"v1\""), "hello"))
            })
            .await
            .unwrap();

        assert!(outcome.changed);
        assert_eq!(outcome.pending_entry().unwrap().etag.as_deref(), Some("\"v1\""));

        // Nothing stored until commit
        let (validators, _) = cache.prepare("https://a.com/a", Utc::now()).unwrap();
        assert!(validators.is_empty());

        cache.commit(&outcome).unwrap();
        let (validators, _) = cache.prepare("https://a.com/a", Utc::now()).unwrap();
        assert_eq!(validators.etag.as_deref(), Some("\"v1\""));
    }

    #[tokio::test]
    async fn test_not_modified_is_unchanged() {
        let store = StateStore::in_memory().unwrap();
        let cache = ConditionalCache::new(store.clone(), 7, true);
        let old = Utc::now() - chrono::Duration::days(1);
        store
            .put_cache_entry(&CacheEntry {
                url: "https://a.com/a".to_string(),
                etag: Some("\"v1\"".to_string()),
                last_modified: None,
                body_hash: hash_bytes(b"hello"),
                fetched_at: old,
            })
            .unwrap();

        let outcome = cache
            .fetch("https://a.com/a", |validators| async move {
                assert_eq!(validators.etag.as_deref(), Some("\"v1\""));
                Ok(response(304, None, ""))
            })
            .await
            .unwrap();

        assert!(!outcome.changed);
        assert!(outcome.body.is_none());
        let entry = store.cache_entry("https://a.com/a").unwrap().unwrap();
        assert!(entry.fetched_at > old);
        assert_eq!(entry.body_hash, hash_bytes(b"hello"));
    }

    #[tokio::test]
    async fn test_identical_200_is_unchanged() {
        let store = StateStore::in_memory().unwrap();
        let cache = ConditionalCache::new(store.clone(), 7, true);
        store
            .put_cache_entry(&CacheEntry {
                url: "https://a.com/a".to_string(),
                etag: None,
                last_modified: None,
                body_hash: hash_bytes(b"hello"),
                fetched_at: Utc::now(),
            })
            .unwrap();

        let outcome = cache
            .fetch("https://a.com/a", |_| async { Ok(response(200, None, "hello")) })
            .await
            .unwrap();
        assert!(!outcome.changed);
        assert!(outcome.pending_entry().is_none());
    }

    #[test]
    fn test_expired_entry_forces_full_fetch() {
        let store = StateStore::in_memory().unwrap();
        let cache = ConditionalCache::new(store.clone(), 7, true);
        store
            .put_cache_entry(&CacheEntry {
                url: "https://a.com/a".to_string(),
                etag: Some("\"v1\"".to_string()),
                last_modified: Some("Wed, 21 Oct 2015 07:28:00 GMT".to_string()),
                body_hash: hash_bytes(b"hello"),
                fetched_at: Utc::now() - chrono::Duration::days(8),
            })
            .unwrap();

        let (validators, prior) = cache.prepare("https://a.com/a", Utc::now()).unwrap();
        assert!(validators.is_empty());
        assert!(prior.is_some());
    }

    #[tokio::test]
    async fn test_non_conditional_mode_always_changed() {
        let store = StateStore::in_memory().unwrap();
        let cache = ConditionalCache::new(store.clone(), 7, false);
        store
            .put_cache_entry(&CacheEntry {
                url: "https://a.com/a".to_string(),
                etag: Some("\"v1\"".to_string()),
                last_modified: None,
                body_hash: hash_bytes(b"hello"),
                fetched_at: Utc::now(),
            })
            .unwrap();

        let outcome = cache
            .fetch("https://a.com/a", |validators| async move {
                assert!(validators.is_empty());
                Ok(response(200, Some("\"v1\""), "hello"))
            })
            .await
            .unwrap();
        assert!(outcome.changed);
    }
}
