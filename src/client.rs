use std::{fmt, sync::Arc, time::Duration};

use chrono::Utc;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::{header, Method, RequestBuilder, Response, Url};

use crate::{
    account::{Credentials, StorageAccount},
    auth,
    query::TableQuery,
    wire::{self, CreateTableRequest, QueryResponse},
    ClientOptions, Result, TableStorageError,
};

const ACCEPT_NO_METADATA: &str = "application/json;odata=nometadata";
const DATA_SERVICE_VERSION: &str = "3.0;NetFx";
const NEXT_PARTITION_KEY: &str = "x-ms-continuation-NextPartitionKey";
const NEXT_ROW_KEY: &str = "x-ms-continuation-NextRowKey";

/// Query values keep only RFC 3986 unreserved characters literal.
const QUERY_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

#[derive(Clone)]
/// HTTP client for one storage account's table endpoint.
pub struct TableClient {
    http: reqwest::Client,
    account: Arc<StorageAccount>,
    options: ClientOptions,
}

impl fmt::Debug for TableClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableClient")
            .field("table_endpoint", &self.account.table_endpoint())
            .field("options", &self.options)
            .finish()
    }
}

impl TableClient {
    /// Creates a client for `account`.
    ///
    /// Nagle's algorithm is disabled on the underlying connections: table
    /// calls are small request/response exchanges where coalescing only
    /// adds latency.
    pub fn new(account: StorageAccount, options: ClientOptions) -> Result<Self> {
        let http = reqwest::Client::builder()
            .tcp_nodelay(true)
            .timeout(Duration::from_millis(options.timeout_ms))
            .build()
            .map_err(TableStorageError::Transport)?;

        #[cfg(feature = "tracing")]
        tracing::debug!(endpoint = account.table_endpoint(), "table client created");

        Ok(Self {
            http,
            account: Arc::new(account),
            options,
        })
    }

    /// Parses `connection_string` and creates a client with default options.
    pub fn from_connection_string(connection_string: &str) -> Result<Self> {
        Self::new(
            StorageAccount::parse(connection_string)?,
            ClientOptions::default(),
        )
    }

    pub fn account(&self) -> &StorageAccount {
        &self.account
    }

    /// Returns a handle to `table_name`. No request is sent.
    ///
    /// Table names must start with a letter, contain only ASCII letters and
    /// digits, and be 3 to 63 characters long.
    pub fn table(&self, table_name: impl Into<String>) -> Result<CloudTable> {
        let name = table_name.into();
        validate_table_name(&name)?;
        Ok(CloudTable {
            client: self.clone(),
            name,
        })
    }

    fn request(
        &self,
        method: Method,
        resource: &str,
        params: &[(&str, String)],
    ) -> Result<RequestBuilder> {
        let date = auth::http_date(Utc::now());

        let mut builder = self
            .http
            .request(method, self.request_url(resource, params))
            .header("x-ms-date", &date)
            .header("x-ms-version", &self.options.api_version)
            .header(header::ACCEPT, ACCEPT_NO_METADATA)
            .header("DataServiceVersion", DATA_SERVICE_VERSION)
            .header("MaxDataServiceVersion", DATA_SERVICE_VERSION);

        if let Credentials::SharedKey { account, key } = self.account.credentials() {
            let path = self.resource_path(resource);
            let authorization = auth::shared_key_lite(account, key, &date, &path)?;
            builder = builder.header(header::AUTHORIZATION, authorization);
        }

        Ok(builder)
    }

    /// URL path of `resource` below the endpoint, e.g. `/devstoreaccount1/Tables`.
    fn resource_path(&self, resource: &str) -> String {
        let base = self.account.table_endpoint_url().path().trim_end_matches('/');
        format!("{base}{resource}")
    }

    fn request_url(&self, resource: &str, params: &[(&str, String)]) -> Url {
        let mut url = self.account.table_endpoint_url().clone();
        url.set_path(&self.resource_path(resource));

        let mut query = Vec::with_capacity(params.len() + 1);
        if let Credentials::Sas(token) = self.account.credentials() {
            query.push(token.clone());
        }
        query.extend(
            params
                .iter()
                .map(|(name, value)| format!("{name}={}", utf8_percent_encode(value, QUERY_VALUE))),
        );
        if !query.is_empty() {
            url.set_query(Some(&query.join("&")));
        }
        url
    }
}

/// Handle to a named table.
#[derive(Clone, Debug)]
pub struct CloudTable {
    client: TableClient,
    name: String,
}

impl CloudTable {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Absolute URL of the table; distinguishes tables across accounts.
    pub fn url(&self) -> String {
        format!("{}/{}", self.client.account.table_endpoint(), self.name)
    }

    /// Creates the table if it is missing.
    ///
    /// Returns `true` when the table was created and `false` when it
    /// already existed.
    pub async fn create_if_not_exists(&self) -> Result<bool> {
        let response = self
            .client
            .request(Method::POST, "/Tables", &[])?
            .header("Prefer", "return-no-content")
            .json(&CreateTableRequest {
                table_name: &self.name,
            })
            .send()
            .await
            .map_err(TableStorageError::Transport)?;

        let status = response.status();
        if status.is_success() {
            #[cfg(feature = "tracing")]
            tracing::debug!(table = %self.name, "table created");
            return Ok(true);
        }

        let error = http_error(response).await;
        let already_exists = matches!(
            &error,
            TableStorageError::Http { status: 409, code, .. }
                if code.as_deref().map_or(true, |code| code == "TableAlreadyExists")
        );
        if already_exists {
            #[cfg(feature = "tracing")]
            tracing::debug!(table = %self.name, "table already exists");
            return Ok(false);
        }
        Err(error)
    }

    /// Runs `query` and returns the raw entities in service order.
    ///
    /// Continuation tokens are followed until the service reports no more
    /// pages or the query's `take` limit is reached.
    pub async fn execute_query<T>(&self, query: &TableQuery<T>) -> Result<Vec<serde_json::Value>> {
        let resource = format!("/{}()", self.name);
        let limit = query.take_count().map(|take| take as usize);
        let mut rows = Vec::new();
        let mut continuation: Option<(String, Option<String>)> = None;

        loop {
            let mut params: Vec<(&str, String)> = Vec::new();
            if let Some(filter) = query.filter_expr() {
                params.push(("$filter", filter.to_owned()));
            }
            if !query.selected().is_empty() {
                params.push(("$select", query.selected().join(",")));
            }
            if let Some(limit) = limit {
                params.push(("$top", (limit - rows.len()).to_string()));
            }
            if let Some((partition_key, row_key)) = &continuation {
                params.push(("NextPartitionKey", partition_key.clone()));
                if let Some(row_key) = row_key {
                    params.push(("NextRowKey", row_key.clone()));
                }
            }

            let response = self
                .client
                .request(Method::GET, &resource, &params)?
                .send()
                .await
                .map_err(TableStorageError::Transport)?;

            if !response.status().is_success() {
                return Err(http_error(response).await);
            }

            let next = next_continuation(response.headers());
            let body = response.text().await.map_err(TableStorageError::Transport)?;
            let page = serde_json::from_str::<QueryResponse>(&body).map_err(|err| {
                TableStorageError::Decode(format!("invalid query response JSON: {err}; body: {body}"))
            })?;

            #[cfg(feature = "tracing")]
            tracing::trace!(table = %self.name, rows = page.value.len(), "query page received");

            rows.extend(page.value);

            if let Some(limit) = limit {
                if rows.len() >= limit {
                    rows.truncate(limit);
                    break;
                }
            }
            match next {
                Some(token) => continuation = Some(token),
                None => break,
            }
        }

        Ok(rows)
    }
}

async fn http_error(response: Response) -> TableStorageError {
    let status = response.status().as_u16();
    let body = match response.text().await {
        Ok(body) => body,
        Err(err) => return TableStorageError::Transport(err),
    };
    let (code, message) = wire::parse_error_body(&body);
    TableStorageError::Http {
        status,
        code,
        message,
    }
}

fn next_continuation(headers: &header::HeaderMap) -> Option<(String, Option<String>)> {
    let partition_key = headers.get(NEXT_PARTITION_KEY)?.to_str().ok()?.to_owned();
    let row_key = headers
        .get(NEXT_ROW_KEY)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);
    Some((partition_key, row_key))
}

fn validate_table_name(name: &str) -> Result<()> {
    let valid_chars = name.chars().all(|c| c.is_ascii_alphanumeric());
    let starts_with_letter = name.chars().next().is_some_and(|c| c.is_ascii_alphabetic());
    if !(3..=63).contains(&name.len()) || !valid_chars || !starts_with_letter {
        return Err(TableStorageError::invalid_argument(format!(
            "invalid table name '{name}'"
        )));
    }
    Ok(())
}
