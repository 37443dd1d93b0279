//! In-process query result cache.
//!
//! Results are stored as raw JSON rows so one cache can serve every entity
//! type. Each entry carries its own expiry, derived from the
//! [`CachePolicy`] in force when it was inserted.

use std::{
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use moka::{future::Cache, Expiry};
use once_cell::sync::Lazy;

use crate::{query::QueryShape, Result, TableStorageError};

/// Entry limit of [`QueryCache::shared`].
pub const SHARED_CACHE_CAPACITY: u64 = 10_000;

/// Longest sliding window accepted by [`CachePolicy::validate`].
pub const MAX_SLIDING_EXPIRATION: Duration = Duration::from_secs(365 * 24 * 60 * 60);

static SHARED: Lazy<QueryCache> = Lazy::new(|| QueryCache::new(SHARED_CACHE_CAPACITY));

/// Source of the current time.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// When a cached result stops being served.
///
/// At most one of the two fields may be set. With neither set the entry
/// only leaves the cache through capacity eviction.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CachePolicy {
    /// Entries expire at this instant regardless of use.
    pub absolute_expiration: Option<DateTime<Utc>>,
    /// Entries expire after going unread for this long.
    pub sliding_expiration: Option<Duration>,
}

impl CachePolicy {
    /// Expire every entry at `at`.
    pub fn absolute(at: DateTime<Utc>) -> Self {
        Self {
            absolute_expiration: Some(at),
            sliding_expiration: None,
        }
    }

    /// Expire entries left unread for `window`.
    pub fn sliding(window: Duration) -> Self {
        Self {
            absolute_expiration: None,
            sliding_expiration: Some(window),
        }
    }

    /// Absolute expiration `ttl` after `clock`'s current time.
    pub fn expires_in(ttl: Duration, clock: &dyn Clock) -> Self {
        let now = clock.now();
        let at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self::absolute(at)
    }

    pub fn validate(&self) -> Result<()> {
        if self.absolute_expiration.is_some() && self.sliding_expiration.is_some() {
            return Err(TableStorageError::invalid_argument(
                "cache policy cannot combine absolute and sliding expiration",
            ));
        }
        if let Some(window) = self.sliding_expiration {
            if window.is_zero() || window > MAX_SLIDING_EXPIRATION {
                return Err(TableStorageError::invalid_argument(format!(
                    "sliding expiration must be between 1ns and 365 days, got {window:?}"
                )));
            }
        }
        Ok(())
    }

    /// Lifetime of an entry inserted at `now`; `None` means no time limit.
    fn time_to_live(&self, now: DateTime<Utc>) -> Option<Duration> {
        if let Some(at) = self.absolute_expiration {
            return Some((at - now).to_std().unwrap_or(Duration::ZERO));
        }
        self.sliding_expiration
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct QueryCacheKey {
    pub table_url: String,
    pub shape: QueryShape,
    pub hint: String,
}

#[derive(Clone)]
struct CachedRows {
    rows: Arc<Vec<serde_json::Value>>,
    ttl: Option<Duration>,
    sliding: bool,
}

struct PolicyExpiry;

impl Expiry<QueryCacheKey, CachedRows> for PolicyExpiry {
    fn expire_after_create(
        &self,
        _key: &QueryCacheKey,
        value: &CachedRows,
        _created_at: Instant,
    ) -> Option<Duration> {
        value.ttl
    }

    fn expire_after_read(
        &self,
        _key: &QueryCacheKey,
        value: &CachedRows,
        _read_at: Instant,
        duration_until_expiry: Option<Duration>,
        _last_modified_at: Instant,
    ) -> Option<Duration> {
        if value.sliding {
            value.ttl
        } else {
            duration_until_expiry
        }
    }

    fn expire_after_update(
        &self,
        _key: &QueryCacheKey,
        value: &CachedRows,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        value.ttl
    }
}

/// Bounded cache of query results keyed by table, query shape and hint.
#[derive(Clone)]
pub struct QueryCache {
    inner: Cache<QueryCacheKey, CachedRows>,
}

impl fmt::Debug for QueryCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryCache")
            .field("entry_count", &self.inner.entry_count())
            .finish()
    }
}

impl QueryCache {
    /// Creates an isolated cache holding at most `max_capacity` results.
    pub fn new(max_capacity: u64) -> Self {
        let inner = Cache::builder()
            .max_capacity(max_capacity)
            .expire_after(PolicyExpiry)
            .build();
        Self { inner }
    }

    /// Process-wide cache used by readers unless another one is supplied.
    pub fn shared() -> Self {
        SHARED.clone()
    }

    /// Approximate number of live entries.
    pub fn entry_count(&self) -> u64 {
        self.inner.entry_count()
    }

    /// Drops every cached result.
    pub fn invalidate_all(&self) {
        self.inner.invalidate_all();
    }

    pub(crate) async fn get(&self, key: &QueryCacheKey) -> Option<Arc<Vec<serde_json::Value>>> {
        self.inner.get(key).await.map(|entry| entry.rows)
    }

    pub(crate) async fn insert(
        &self,
        key: QueryCacheKey,
        rows: Arc<Vec<serde_json::Value>>,
        policy: &CachePolicy,
        now: DateTime<Utc>,
    ) {
        let ttl = policy.time_to_live(now);
        if ttl.is_some_and(|ttl| ttl.is_zero()) {
            #[cfg(feature = "tracing")]
            tracing::debug!(table = %key.table_url, "cache policy already expired, not storing");
            return;
        }
        let entry = CachedRows {
            rows,
            ttl,
            sliding: policy.sliding_expiration.is_some(),
        };
        self.inner.insert(key, entry).await;
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use chrono::{DateTime, TimeZone, Utc};
    use serde_json::json;

    use super::{CachePolicy, Clock, QueryCache, QueryCacheKey};
    use crate::{query::QueryShape, TableStorageError};

    #[derive(Debug)]
    struct FixedClock(DateTime<Utc>);

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }

    fn key(hint: &str) -> QueryCacheKey {
        shaped_key(None, Vec::new(), hint)
    }

    fn shaped_key(filter: Option<&str>, select: Vec<&str>, hint: &str) -> QueryCacheKey {
        QueryCacheKey {
            table_url: "http://127.0.0.1/acct/people".to_owned(),
            shape: QueryShape {
                filter: filter.map(str::to_owned),
                select: select.into_iter().map(str::to_owned).collect(),
                take: None,
            },
            hint: hint.to_owned(),
        }
    }

    #[test]
    fn expires_in_is_relative_to_clock() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let policy = CachePolicy::expires_in(Duration::from_secs(60), &FixedClock(now));
        assert_eq!(
            policy.absolute_expiration,
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 12, 1, 0).unwrap())
        );
        assert_eq!(policy.sliding_expiration, None);
    }

    #[test]
    fn validate_rejects_conflicting_or_out_of_range_policies() {
        let invalid = [
            CachePolicy {
                absolute_expiration: Some(Utc::now()),
                sliding_expiration: Some(Duration::from_secs(1)),
            },
            CachePolicy::sliding(Duration::ZERO),
            CachePolicy::sliding(Duration::from_secs(366 * 24 * 60 * 60)),
        ];
        for policy in invalid {
            assert!(matches!(
                policy.validate(),
                Err(TableStorageError::InvalidArgument(_))
            ));
        }
        assert!(CachePolicy::default().validate().is_ok());
        assert!(CachePolicy::sliding(Duration::from_secs(30)).validate().is_ok());
    }

    #[test]
    fn time_to_live_clamps_past_deadlines() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let past = CachePolicy::absolute(Utc.with_ymd_and_hms(2024, 5, 1, 11, 0, 0).unwrap());
        let future = CachePolicy::absolute(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 30).unwrap());

        assert_eq!(past.time_to_live(now), Some(Duration::ZERO));
        assert_eq!(future.time_to_live(now), Some(Duration::from_secs(30)));
        assert_eq!(CachePolicy::default().time_to_live(now), None);
    }

    #[tokio::test]
    async fn entries_are_separated_by_hint() {
        let cache = QueryCache::new(16);
        let policy = CachePolicy::sliding(Duration::from_secs(60));
        let rows = Arc::new(vec![json!({"RowKey": "1"})]);

        cache.insert(key("a"), rows.clone(), &policy, Utc::now()).await;

        assert_eq!(cache.get(&key("a")).await, Some(rows));
        assert_eq!(cache.get(&key("b")).await, None);
    }

    #[tokio::test]
    async fn expired_policy_is_not_stored() {
        let cache = QueryCache::new(16);
        let policy = CachePolicy::absolute(Utc::now() - chrono::Duration::seconds(5));

        cache
            .insert(key(""), Arc::new(vec![json!({})]), &policy, Utc::now())
            .await;

        assert_eq!(cache.get(&key("")).await, None);
    }

    #[tokio::test]
    async fn absolute_entries_expire() {
        let cache = QueryCache::new(16);
        let now = Utc::now();
        let policy = CachePolicy::absolute(now + chrono::Duration::milliseconds(50));

        cache
            .insert(key(""), Arc::new(vec![json!({})]), &policy, now)
            .await;
        assert!(cache.get(&key("")).await.is_some());

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(cache.get(&key("")).await, None);
    }

    #[tokio::test]
    async fn shapes_with_separator_characters_stay_apart() {
        let cache = QueryCache::new(16);
        let policy = CachePolicy::sliding(Duration::from_secs(60));
        let rows = Arc::new(vec![json!({"RowKey": "1"})]);

        cache
            .insert(
                shaped_key(Some("a;select=b"), vec!["c"], ""),
                rows.clone(),
                &policy,
                Utc::now(),
            )
            .await;

        assert_eq!(
            cache.get(&shaped_key(Some("a;select=b"), vec!["c"], "")).await,
            Some(rows)
        );
        assert_eq!(
            cache.get(&shaped_key(Some("a"), vec!["b;select=c"], "")).await,
            None
        );
    }

    #[tokio::test]
    async fn sliding_entries_renew_on_read_and_expire_when_idle() {
        let cache = QueryCache::new(16);
        let policy = CachePolicy::sliding(Duration::from_millis(300));
        let rows = Arc::new(vec![json!({"RowKey": "1"})]);

        cache.insert(key(""), rows.clone(), &policy, Utc::now()).await;

        // Each read lands inside the window and pushes it forward, so the
        // entry outlives its original 300ms.
        for _ in 0..4 {
            tokio::time::sleep(Duration::from_millis(200)).await;
            assert_eq!(cache.get(&key("")).await, Some(rows.clone()));
        }

        tokio::time::sleep(Duration::from_millis(450)).await;
        assert_eq!(cache.get(&key("")).await, None);
    }
}
