use std::{collections::HashMap, fmt};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use url::Url;

use crate::{Result, TableStorageError};

/// Environment variable read by [`StorageAccount::from_env`].
pub const CONNECTION_STRING_VAR: &str = "StorageConnectionString";

const DEV_ACCOUNT_NAME: &str = "devstoreaccount1";
const DEV_ACCOUNT_KEY: &str =
    "Eby8vdM02xNOcqFlqUwJPLlmEtlCDXJ1OUzFT50uSRZ6IFsuFq2UVErCz4I6tq/K1SZFPTOtr/KBHBeksoGMGw==";
const DEV_TABLE_ENDPOINT: &str = "http://127.0.0.1:10002/devstoreaccount1";
const DEFAULT_ENDPOINT_SUFFIX: &str = "core.windows.net";

/// How requests to the table endpoint are authorized.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// Account name and decoded account key, used for SharedKeyLite signing.
    SharedKey { account: String, key: Vec<u8> },
    /// Shared access signature appended to every request URL.
    Sas(String),
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SharedKey { account, .. } => f
                .debug_struct("SharedKey")
                .field("account", account)
                .field("key", &"<redacted>")
                .finish(),
            Self::Sas(_) => f.debug_tuple("Sas").field(&"<redacted>").finish(),
        }
    }
}

/// Parsed storage connection string.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StorageAccount {
    table_endpoint: Url,
    credentials: Credentials,
}

impl StorageAccount {
    /// Parses a connection string such as
    /// `DefaultEndpointsProtocol=https;AccountName=acct;AccountKey=...`.
    ///
    /// Supported keys (case-insensitive): `UseDevelopmentStorage`,
    /// `DefaultEndpointsProtocol`, `AccountName`, `AccountKey`,
    /// `SharedAccessSignature`, `TableEndpoint`, `EndpointSuffix`.
    pub fn parse(connection_string: &str) -> Result<Self> {
        let settings = parse_settings(connection_string)?;

        if settings
            .get("usedevelopmentstorage")
            .is_some_and(|value| value.eq_ignore_ascii_case("true"))
        {
            return Self::development();
        }

        let protocol = settings
            .get("defaultendpointsprotocol")
            .map(|value| value.to_ascii_lowercase())
            .unwrap_or_else(|| "https".to_owned());
        if protocol != "https" && protocol != "http" {
            return Err(TableStorageError::configuration(format!(
                "unsupported DefaultEndpointsProtocol '{protocol}'"
            )));
        }

        let account_name = settings.get("accountname").filter(|name| !name.is_empty());

        let credentials = match (settings.get("accountkey"), settings.get("sharedaccesssignature")) {
            (Some(key), _) => {
                let account = account_name.ok_or_else(|| {
                    TableStorageError::configuration("AccountKey requires AccountName")
                })?;
                let key = STANDARD.decode(key).map_err(|err| {
                    TableStorageError::configuration(format!("AccountKey is not valid base64: {err}"))
                })?;
                Credentials::SharedKey {
                    account: account.clone(),
                    key,
                }
            }
            (None, Some(sas)) => Credentials::Sas(sas.trim_start_matches('?').to_owned()),
            (None, None) => {
                return Err(TableStorageError::configuration(
                    "connection string has neither AccountKey nor SharedAccessSignature",
                ))
            }
        };

        let table_endpoint = match settings.get("tableendpoint") {
            Some(endpoint) => endpoint.clone(),
            None => {
                let account = account_name.ok_or_else(|| {
                    TableStorageError::configuration(
                        "AccountName is required when TableEndpoint is not set",
                    )
                })?;
                let suffix = settings
                    .get("endpointsuffix")
                    .map(String::as_str)
                    .unwrap_or(DEFAULT_ENDPOINT_SUFFIX);
                format!("{protocol}://{account}.table.{suffix}")
            }
        };

        Ok(Self {
            table_endpoint: parse_endpoint(&table_endpoint)?,
            credentials,
        })
    }

    /// Reads and parses the `StorageConnectionString` environment variable.
    pub fn from_env() -> Result<Self> {
        let value = std::env::var(CONNECTION_STRING_VAR).map_err(|_| {
            TableStorageError::configuration(format!(
                "missing {CONNECTION_STRING_VAR} environment variable"
            ))
        })?;
        if value.trim().is_empty() {
            return Err(TableStorageError::configuration(format!(
                "{CONNECTION_STRING_VAR} is set but empty"
            )));
        }
        Self::parse(&value)
    }

    /// Local storage emulator account.
    pub fn development() -> Result<Self> {
        let key = STANDARD.decode(DEV_ACCOUNT_KEY).map_err(|err| {
            TableStorageError::configuration(format!("emulator key is not valid base64: {err}"))
        })?;
        Ok(Self {
            table_endpoint: parse_endpoint(DEV_TABLE_ENDPOINT)?,
            credentials: Credentials::SharedKey {
                account: DEV_ACCOUNT_NAME.to_owned(),
                key,
            },
        })
    }

    /// Base URL of the table service, without a trailing slash.
    pub fn table_endpoint(&self) -> &str {
        self.table_endpoint.as_str().trim_end_matches('/')
    }

    /// Parsed table service URL.
    pub fn table_endpoint_url(&self) -> &Url {
        &self.table_endpoint
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }
}

fn parse_endpoint(endpoint: &str) -> Result<Url> {
    let url = Url::parse(endpoint).map_err(|err| {
        TableStorageError::configuration(format!("invalid table endpoint '{endpoint}': {err}"))
    })?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(TableStorageError::configuration(format!(
            "table endpoint '{endpoint}' must be an http(s) URL"
        )));
    }
    if url.query().is_some() || url.fragment().is_some() {
        return Err(TableStorageError::configuration(format!(
            "table endpoint '{endpoint}' must not carry a query or fragment"
        )));
    }
    Ok(url)
}

fn parse_settings(connection_string: &str) -> Result<HashMap<String, String>> {
    let mut settings = HashMap::new();
    for segment in connection_string.split(';') {
        let segment = segment.trim();
        if segment.is_empty() {
            continue;
        }
        let (key, value) = segment.split_once('=').ok_or_else(|| {
            TableStorageError::configuration(format!(
                "malformed connection string segment '{segment}'"
            ))
        })?;
        settings.insert(key.trim().to_ascii_lowercase(), value.trim().to_owned());
    }
    if settings.is_empty() {
        return Err(TableStorageError::configuration("connection string is empty"));
    }
    Ok(settings)
}
