//! Completed scrape responses, keyed by job and resource type.

use std::sync::Arc;

use {
    dashmap::{DashMap, mapref::entry::Entry},
    tokio::{
        task::JoinHandle,
        time::{self, Duration, Instant},
    },
    tokio_util::sync::CancellationToken,
    tracing::{debug, warn},
    trawl_browser::{ResourceType, ScrapeResponse},
    trawl_common::JobId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub job_id: JobId,
    pub resource_type: ResourceType,
}

impl CacheKey {
    pub fn new(job_id: JobId, resource_type: ResourceType) -> Self {
        Self {
            job_id,
            resource_type,
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    response: ScrapeResponse,
    stored_at: Instant,
}

/// Write-once result store with per-entry expiry.
#[derive(Debug, Clone)]
pub struct ResultCache {
    entries: Arc<DashMap<CacheKey, CacheEntry>>,
    ttl: Duration,
}

impl ResultCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            ttl,
        }
    }

    fn is_expired(&self, entry: &CacheEntry, now: Instant) -> bool {
        now.duration_since(entry.stored_at) >= self.ttl
    }

    /// Store `response` under its own job id and resource type.
    ///
    /// Returns `false` and leaves the cache untouched when a live entry for
    /// the key already exists.
    pub fn set(&self, response: ScrapeResponse) -> bool {
        let key = CacheKey::new(response.job_id, response.resource_type);
        let now = Instant::now();
        let entry = CacheEntry {
            response,
            stored_at: now,
        };

        match self.entries.entry(key) {
            Entry::Occupied(mut occupied) => {
                if !self.is_expired(occupied.get(), now) {
                    warn!(job_id = %key.job_id, resource_type = %key.resource_type, "result already stored, keeping the first");
                    return false;
                }
                occupied.insert(entry);
                true
            },
            Entry::Vacant(vacant) => {
                vacant.insert(entry);
                true
            },
        }
    }

    /// The stored response, if present and not expired.
    pub fn try_get(&self, job_id: JobId, resource_type: ResourceType) -> Option<ScrapeResponse> {
        let entry = self.entries.get(&CacheKey::new(job_id, resource_type))?;
        if self.is_expired(&entry, Instant::now()) {
            return None;
        }
        Some(entry.response.clone())
    }

    /// Entries currently held, expired ones included until the next sweep.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop expired entries. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !self.is_expired(entry, now));
        before.saturating_sub(self.entries.len())
    }

    /// Sweep every `interval` until `cancel` fires.
    pub fn spawn_sweeper(&self, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut ticker = time::interval(interval.max(Duration::from_millis(10)));
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = cache.sweep();
                        if removed > 0 {
                            debug!(removed, remaining = cache.len(), "swept expired results");
                        }
                    },
                }
            }
        })
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn ok(job_id: JobId, body: &str) -> ScrapeResponse {
        ScrapeResponse::ok(job_id, ResourceType::PageSource, body.into())
    }

    #[test]
    fn absent_key_reads_none() {
        let cache = ResultCache::new(Duration::from_secs(60));
        assert!(cache.try_get(JobId::new(), ResourceType::PageSource).is_none());
    }

    #[test]
    fn first_writer_wins() {
        let cache = ResultCache::new(Duration::from_secs(60));
        let id = JobId::new();
        assert!(cache.set(ok(id, "first")));
        assert!(!cache.set(ok(id, "second")));
        assert_eq!(
            cache.try_get(id, ResourceType::PageSource).unwrap().result.as_deref(),
            Some("first")
        );
    }

    #[test]
    fn resource_type_is_part_of_the_key() {
        let cache = ResultCache::new(Duration::from_secs(60));
        let id = JobId::new();
        cache.set(ok(id, "<html/>"));
        assert!(cache.try_get(id, ResourceType::Screenshot).is_none());
        assert!(cache.set(ScrapeResponse::ok(id, ResourceType::Screenshot, "iVBO".into())));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn concurrent_writers_single_winner() {
        let cache = ResultCache::new(Duration::from_secs(60));
        let id = JobId::new();
        let wins: usize = std::thread::scope(|s| {
            let handles: Vec<_> = (0..16)
                .map(|i| {
                    let cache = cache.clone();
                    s.spawn(move || cache.set(ok(id, &format!("writer {i}"))))
                })
                .collect();
            handles.into_iter().map(|h| usize::from(h.join().unwrap())).sum()
        });
        assert_eq!(wins, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entries_are_hidden_then_swept() {
        let cache = ResultCache::new(Duration::from_secs(10));
        let id = JobId::new();
        cache.set(ok(id, "x"));

        time::advance(Duration::from_secs(5)).await;
        assert!(cache.try_get(id, ResourceType::PageSource).is_some());

        time::advance(Duration::from_secs(6)).await;
        assert!(cache.try_get(id, ResourceType::PageSource).is_none());
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.sweep(), 1);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_task_removes_expired() {
        let cache = ResultCache::new(Duration::from_secs(1));
        cache.set(ok(JobId::new(), "x"));
        let cancel = CancellationToken::new();
        let handle = cache.spawn_sweeper(Duration::from_secs(2), cancel.clone());

        time::sleep(Duration::from_secs(3)).await;
        assert!(cache.is_empty());

        cancel.cancel();
        handle.await.unwrap();
    }
}
