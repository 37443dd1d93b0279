use std::{sync::Arc, time::Duration};

use serde::de::DeserializeOwned;

use crate::{
    cache::{CachePolicy, Clock, QueryCache, QueryCacheKey, SystemClock},
    client::{CloudTable, TableClient},
    ClientOptions, Result, StorageAccount, TableQuery, TableStorageError,
};

/// Lifetime of results cached through [`TableStorageReader::with_cache`].
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60);

/// Reads entities from one table, optionally through the query cache.
///
/// Configure the reader once with the consuming `with_*` methods, then
/// share it and call [`TableStorageReader::execute`] as often as needed.
///
/// ```no_run
/// use tablestore_reader::{DynamicEntity, TableQuery, TableStorageReader};
///
/// # async fn run() -> tablestore_reader::Result<()> {
/// let reader = TableStorageReader::table("people")?
///     .create_if_not_exist()
///     .await?
///     .with_cache();
///
/// let people: Vec<DynamicEntity> = reader
///     .execute(TableQuery::new().filter("PartitionKey eq 'staff'"))
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct TableStorageReader {
    table: CloudTable,
    cache_policy: Option<CachePolicy>,
    cache_hint: String,
    clock: Arc<dyn Clock>,
    query_cache: QueryCache,
}

impl TableStorageReader {
    /// Creates a reader for `table_name` using the connection string in the
    /// `StorageConnectionString` environment variable.
    pub fn table(table_name: &str) -> Result<Self> {
        Self::connect(StorageAccount::from_env()?, table_name, ClientOptions::default())
    }

    /// Creates a reader for `table_name` from an explicit connection string.
    pub fn with_connection_string(connection_string: &str, table_name: &str) -> Result<Self> {
        Self::connect(
            StorageAccount::parse(connection_string)?,
            table_name,
            ClientOptions::default(),
        )
    }

    /// Creates a reader with a dedicated client configured by `options`.
    pub fn connect(account: StorageAccount, table_name: &str, options: ClientOptions) -> Result<Self> {
        let client = TableClient::new(account, options)?;
        Ok(Self::from_table(client.table(table_name)?))
    }

    /// Wraps an existing table handle.
    pub fn from_table(table: CloudTable) -> Self {
        Self {
            table,
            cache_policy: None,
            cache_hint: String::new(),
            clock: Arc::new(SystemClock),
            query_cache: QueryCache::shared(),
        }
    }

    /// Creates the remote table unless it already exists.
    pub async fn create_if_not_exist(self) -> Result<Self> {
        self.table.create_if_not_exists().await?;
        Ok(self)
    }

    /// Caches results until one minute from now.
    ///
    /// The deadline is fixed here, not per entry: results fetched after it
    /// has passed are no longer cached.
    pub fn with_cache(self) -> Self {
        let policy = CachePolicy::expires_in(DEFAULT_CACHE_TTL, self.clock.as_ref());
        self.apply_cache(policy, String::new())
    }

    /// Caches results under `policy`.
    pub fn with_cache_policy(self, policy: CachePolicy) -> Result<Self> {
        self.with_cache_policy_and_hint(policy, "")
    }

    /// Caches results under `policy`, adding `hint` to every cache key so
    /// identical queries issued from different contexts stay separate.
    pub fn with_cache_policy_and_hint(
        self,
        policy: CachePolicy,
        hint: impl Into<String>,
    ) -> Result<Self> {
        policy.validate()?;
        Ok(self.apply_cache(policy, hint.into()))
    }

    /// Replaces the time source used by [`TableStorageReader::with_cache`].
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Uses `cache` instead of the process-wide [`QueryCache::shared`].
    pub fn with_query_cache(mut self, cache: QueryCache) -> Self {
        self.query_cache = cache;
        self
    }

    pub fn table_name(&self) -> &str {
        self.table.name()
    }

    pub fn cache_policy(&self) -> Option<&CachePolicy> {
        self.cache_policy.as_ref()
    }

    pub fn cache_hint(&self) -> &str {
        &self.cache_hint
    }

    /// Runs `query` on a background task and decodes the rows into `T`.
    ///
    /// Invalid queries are rejected before any request is made. With caching
    /// enabled, a live entry for the same table, query shape and hint is
    /// returned without contacting the service.
    pub async fn execute<T>(&self, query: TableQuery<T>) -> Result<Vec<T>>
    where
        T: DeserializeOwned,
    {
        query.validate()?;

        let table = self.table.clone();
        let query = query.erase();
        let cached = self.cache_policy.clone().map(|policy| CacheContext {
            key: QueryCacheKey {
                table_url: table.url(),
                shape: query.shape(),
                hint: self.cache_hint.clone(),
            },
            policy,
            cache: self.query_cache.clone(),
            clock: Arc::clone(&self.clock),
        });

        let rows = tokio::spawn(fetch_rows(table, query, cached))
            .await
            .map_err(|err| TableStorageError::Task(err.to_string()))??;

        rows.iter()
            .enumerate()
            .map(|(index, row)| {
                T::deserialize(row).map_err(|err| {
                    TableStorageError::Decode(format!("entity {index} could not be decoded: {err}"))
                })
            })
            .collect()
    }

    fn apply_cache(mut self, policy: CachePolicy, hint: String) -> Self {
        self.cache_policy = Some(policy);
        self.cache_hint = hint;
        self
    }
}

struct CacheContext {
    key: QueryCacheKey,
    policy: CachePolicy,
    cache: QueryCache,
    clock: Arc<dyn Clock>,
}

async fn fetch_rows(
    table: CloudTable,
    query: TableQuery<serde_json::Value>,
    cached: Option<CacheContext>,
) -> Result<Arc<Vec<serde_json::Value>>> {
    let Some(context) = cached else {
        return Ok(Arc::new(table.execute_query(&query).await?));
    };

    if let Some(rows) = context.cache.get(&context.key).await {
        #[cfg(feature = "tracing")]
        tracing::debug!(table = %table.name(), hint = %context.key.hint, "query served from cache");
        return Ok(rows);
    }

    let rows = Arc::new(table.execute_query(&query).await?);

    #[cfg(feature = "tracing")]
    tracing::debug!(table = %table.name(), rows = rows.len(), "caching query result");

    context
        .cache
        .insert(context.key, Arc::clone(&rows), &context.policy, context.clock.now())
        .await;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use chrono::{DateTime, TimeZone, Utc};

    use super::TableStorageReader;
    use crate::{CachePolicy, Clock, StorageAccount, TableStorageError};

    #[derive(Debug)]
    struct FixedClock(DateTime<Utc>);

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }

    fn reader() -> TableStorageReader {
        TableStorageReader::connect(
            StorageAccount::development().expect("emulator account must build"),
            "people",
            Default::default(),
        )
        .expect("reader must build")
    }

    #[test]
    fn starts_without_cache() {
        let reader = reader();
        assert_eq!(reader.table_name(), "people");
        assert!(reader.cache_policy().is_none());
        assert_eq!(reader.cache_hint(), "");
    }

    #[test]
    fn with_cache_expires_one_minute_after_clock() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let reader = reader().with_clock(Arc::new(FixedClock(now))).with_cache();

        let policy = reader.cache_policy().expect("policy must be set");
        assert_eq!(
            policy.absolute_expiration,
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 12, 1, 0).unwrap())
        );
        assert_eq!(policy.sliding_expiration, None);
        assert_eq!(reader.cache_hint(), "");
    }

    #[test]
    fn with_cache_policy_keeps_policy_and_hint() {
        let policy = CachePolicy::sliding(Duration::from_secs(30));
        let reader = reader()
            .with_cache_policy_and_hint(policy.clone(), "tenant-a")
            .expect("policy must be accepted");
        assert_eq!(reader.cache_policy(), Some(&policy));
        assert_eq!(reader.cache_hint(), "tenant-a");

        let reader = reader
            .with_cache_policy(policy)
            .expect("policy must be accepted");
        assert_eq!(reader.cache_hint(), "");
    }

    #[test]
    fn invalid_policy_is_an_argument_error() {
        let err = reader()
            .with_cache_policy(CachePolicy::sliding(Duration::ZERO))
            .expect_err("zero sliding window must be rejected");
        assert!(matches!(err, TableStorageError::InvalidArgument(_)));
    }

    #[test]
    fn invalid_table_name_is_rejected() {
        let err = TableStorageReader::connect(
            StorageAccount::development().expect("emulator account must build"),
            "no-dashes",
            Default::default(),
        )
        .expect_err("table name must be rejected");
        assert!(matches!(err, TableStorageError::InvalidArgument(_)));
    }
}
