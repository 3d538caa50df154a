//! Optional webseed lookup against the vault service.
//!
//! A `200` on `/webseed/<hash>/` means the vault can serve the torrent's
//! bytes over HTTP and the URL is attached to the swarm handle as a webseed;
//! `404` means none; anything else is an upstream failure.

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use reqwest::StatusCode;

use seedgate_core::{Error, InfoHash, Result};

/// Memoization window for lookups.
const CACHE_TTL: Duration = Duration::from_secs(60);

/// Vault webseed resolver.
pub struct Vault {
    base: String,
    client: reqwest::Client,
    cache: Cache<InfoHash, Option<String>>,
}

impl Vault {
    /// Resolver for `http://<host>:<port>`.
    #[must_use]
    pub fn new(host: &str, port: u16, client: reqwest::Client) -> Self {
        Self {
            base: format!("http://{host}:{port}"),
            client,
            cache: Cache::builder().time_to_live(CACHE_TTL).build(),
        }
    }

    /// The webseed URL for `hash`, when the vault holds its payload.
    pub async fn webseed_url(&self, hash: InfoHash) -> Result<Option<String>> {
        let url = format!("{}/webseed/{hash}/", self.base);
        let client = self.client.clone();
        self.cache
            .try_get_with(hash, async move {
                let response = client
                    .get(&url)
                    .send()
                    .await
                    .map_err(|err| Error::transient(format!("vault probe: {err}")))?;
                match response.status() {
                    StatusCode::OK => Ok(Some(url)),
                    StatusCode::NOT_FOUND => Ok(None),
                    status => Err(Error::transient(format!(
                        "vault probe returned unexpected status {status}"
                    ))),
                }
            })
            .await
            .map_err(|err: Arc<Error>| Error::transient(err.to_string()))
    }
}
