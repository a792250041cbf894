//! Upstream archive service access.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, instrument};
use weather_common::{Variable, YearMonth};

use crate::error::{AggregateError, Result};

/// Default COSMO-REA6 hourly 2D archive root.
pub const DEFAULT_BASE_URL: &str =
    "https://opendata.dwd.de/climate_environment/REA/COSMO_REA6/hourly/2D/";

/// Default file naming: `T_2M/T_2M.2D.201801.grb.bz2`.
pub const DEFAULT_URL_TEMPLATE: &str = "{base_url}{code}{year}{month}.grb.bz2";

/// Provides the compressed archive for one (variable, month).
#[async_trait]
pub trait ArchiveSource: Send + Sync {
    /// Human readable location of the archive, used in logs and errors.
    fn locate(&self, variable: &Variable, month: YearMonth) -> String;

    /// Fetch the compressed archive bytes.
    async fn fetch(&self, variable: &Variable, month: YearMonth) -> Result<Bytes>;
}

/// Archive service settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Placeholders: `{base_url}`, `{code}`, `{year}`, `{month}` (zero padded).
    #[serde(default = "default_url_template")]
    pub url_template: String,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_url_template() -> String {
    DEFAULT_URL_TEMPLATE.to_string()
}

fn default_request_timeout_secs() -> u64 {
    600
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            url_template: default_url_template(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl SourceConfig {
    /// Expand the URL template for one archive.
    pub fn archive_url(&self, variable: &Variable, month: YearMonth) -> String {
        self.url_template
            .replace("{base_url}", &self.base_url)
            .replace("{code}", &variable.code)
            .replace("{year}", &month.year().to_string())
            .replace("{month}", &month.month_padded())
    }
}

/// Fetches archives over HTTP.
pub struct HttpArchiveSource {
    client: Client,
    config: SourceConfig,
}

impl HttpArchiveSource {
    pub fn new(config: SourceConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(4)
            .tcp_nodelay(true)
            .build()
            .map_err(|e| AggregateError::TransientFetch {
                url: config.base_url.clone(),
                message: format!("failed to create HTTP client: {}", e),
            })?;

        Ok(Self { client, config })
    }
}

#[async_trait]
impl ArchiveSource for HttpArchiveSource {
    fn locate(&self, variable: &Variable, month: YearMonth) -> String {
        self.config.archive_url(variable, month)
    }

    #[instrument(skip(self), fields(variable = %variable.name, month = %month))]
    async fn fetch(&self, variable: &Variable, month: YearMonth) -> Result<Bytes> {
        let url = self.locate(variable, month);
        let transient = |message: String| AggregateError::TransientFetch {
            url: url.clone(),
            message,
        };

        debug!(url = %url, "Requesting archive");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| transient(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(transient(format!("HTTP {}", status)));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| transient(e.to_string()))?;

        info!(url = %url, bytes = body.len(), "Archive downloaded");
        Ok(body)
    }
}
