//! `tablestore-reader` is an async reader for Azure Table Storage with an
//! optional in-process query result cache.
//!
//! - [`TableStorageReader`] binds to one table, can create it on demand and
//!   runs [`TableQuery`]s, serving repeated queries from the cache when
//!   enabled.
//! - [`RetryParams`] carries back-off tunables for callers that retry.

mod account;
mod auth;
mod cache;
mod client;
mod entity;
mod error;
mod options;
mod reader;
mod retry;
mod wire;

pub mod query;

pub use account::{Credentials, StorageAccount, CONNECTION_STRING_VAR};
pub use cache::{CachePolicy, Clock, QueryCache, SystemClock};
pub use client::{CloudTable, TableClient};
pub use entity::DynamicEntity;
pub use error::TableStorageError;
pub use options::ClientOptions;
pub use query::{CompareOp, EdmValue, LogicalOp, QueryShape, TableQuery};
pub use reader::{TableStorageReader, DEFAULT_CACHE_TTL};
pub use retry::RetryParams;

pub type Result<T> = std::result::Result<T, TableStorageError>;
