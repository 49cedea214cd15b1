//! Feature-service layer query with offset pagination.
//!
//! A count-only probe sizes the job, then pages of `batch_size` records
//! are fetched with at most `max_in_flight` requests outstanding. Each
//! page gets a fixed number of attempts with a fixed backoff; a page that
//! never arrives fails the whole collection for its source.

use crate::error::Error;
use crate::error::Result;
use futures::stream;
use futures::Stream;
use futures::StreamExt;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

const BATCH_SIZE: usize = 250;
const MAX_IN_FLIGHT: usize = 10;
const ATTEMPTS: usize = 3;
const BACKOFF: Duration = Duration::from_secs(10);

/// One GeoJSON feature from a query response.
#[derive(Debug, Clone, Deserialize)]
pub struct Feature {
    #[serde(default)]
    pub geometry: serde_json::Value,
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct FeaturePage {
    #[serde(default)]
    features: Vec<Feature>,
}

#[derive(Debug, Deserialize)]
struct CountPage {
    #[serde(default)]
    properties: Option<CountProperties>,
}

#[derive(Debug, Deserialize)]
struct CountProperties {
    #[serde(default)]
    count: usize,
}

/// Page offsets covering `total` records in `batch` sized steps.
pub(crate) fn offsets(total: usize, batch: usize) -> Vec<usize> {
    (0..total).step_by(batch.max(1)).collect()
}

pub struct FeatureLayerQuery {
    url: String,
    params: BTreeMap<String, String>,
    batch_size: usize,
    max_in_flight: usize,
    attempts: usize,
    backoff: Duration,
    client: reqwest::Client,
}

impl FeatureLayerQuery {
    pub fn new(url: String, params: BTreeMap<String, String>) -> Self {
        Self {
            url,
            params,
            batch_size: BATCH_SIZE,
            max_in_flight: MAX_IN_FLIGHT,
            attempts: ATTEMPTS,
            backoff: BACKOFF,
            client: reqwest::Client::new(),
        }
    }

    fn form(&self) -> BTreeMap<String, String> {
        let mut params = self.params.clone();
        params.insert("f".to_string(), "geojson".to_string());
        params
    }

    /// Total number of features the layer will return for these params.
    pub async fn total_count(&self) -> Result<usize> {
        let mut params = self.form();
        params.insert("returnCountOnly".to_string(), "true".to_string());
        let page: CountPage = self
            .client
            .post(&self.url)
            .form(&params)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(page.properties.map(|p| p.count).unwrap_or(0))
    }

    async fn request(&self, params: &BTreeMap<String, String>) -> Result<Vec<Feature>> {
        let page: FeaturePage = self
            .client
            .post(&self.url)
            .form(params)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(page.features)
    }

    /// Fetch one page, retrying a fixed number of times with a fixed
    /// backoff before giving up.
    async fn fetch_page(&self, offset: usize) -> Result<Vec<Feature>> {
        let mut params = self.form();
        params.insert("resultOffset".to_string(), offset.to_string());
        params.insert("resultRecordCount".to_string(), self.batch_size.to_string());
        for attempt in 1..=self.attempts {
            match self.request(&params).await {
                Ok(features) if !features.is_empty() => {
                    log::debug!("received {} features at offset {}", features.len(), offset);
                    return Ok(features);
                }
                Ok(_) => log::warn!(
                    "no features in response at offset {} (attempt {}/{})",
                    offset,
                    attempt,
                    self.attempts
                ),
                Err(e) => log::warn!(
                    "request failed at offset {} (attempt {}/{}): {}",
                    offset,
                    attempt,
                    self.attempts,
                    e
                ),
            }
            if attempt < self.attempts {
                tokio::time::sleep(self.backoff).await;
            }
        }
        Err(Error::Collection(format!(
            "no data received at offset {} after {} attempts",
            offset, self.attempts
        )))
    }

    /// Stream of pages, at most `max_in_flight` requests outstanding.
    /// Consumers drain this sequentially into the store's insert path.
    pub fn pages(&self, total: usize) -> impl Stream<Item = Result<Vec<Feature>>> + '_ {
        stream::iter(offsets(total, self.batch_size))
            .map(move |offset| self.fetch_page(offset))
            .buffer_unordered(self.max_in_flight)
    }
}
