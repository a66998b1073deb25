//! Artifactory search and storage API client.

use async_trait::async_trait;
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use reqwest::{Client, header::CONTENT_TYPE};
use serde::Deserialize;
use tracing::{debug, info};

use crate::config::Settings;
use crate::error::{ResourceError, Result};
use crate::http::{authorize, client, ensure_success};
use crate::normalize::RawItem;
use crate::properties::Properties;
use crate::query::AqlQuery;
use crate::source::{Credentials, Source};

const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// The metadata side of the artifact store.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn search_items(&self, query: &AqlQuery) -> Result<Vec<RawItem>>;

    /// Looks up the single item stored at `<repo>/<path>/<name>`.
    async fn search_item(&self, path: &str) -> Result<RawItem>;

    async fn set_properties(&self, path: &str, properties: &Properties) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<RawItem>,
}

#[derive(Clone)]
pub struct ArtifactoryClient {
    client: Client,
    endpoint: String,
    credentials: Credentials,
}

impl ArtifactoryClient {
    pub fn new(source: &Source, settings: &Settings) -> Result<Self> {
        Ok(Self {
            client: client(settings)?,
            endpoint: source.endpoint.trim_end_matches('/').to_string(),
            credentials: source.credentials(),
        })
    }
}

#[async_trait]
impl MetadataStore for ArtifactoryClient {
    #[tracing::instrument(level = "debug", skip(self, query))]
    async fn search_items(&self, query: &AqlQuery) -> Result<Vec<RawItem>> {
        let url = format!("{}/api/search/aql", self.endpoint);
        let aql = query.to_aql();

        debug!(%url, %aql, "Searching");

        let request = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, "text/plain")
            .body(aql);
        let response = ensure_success(authorize(request, &self.credentials).send().await?).await?;
        let response: SearchResponse = response.json().await?;

        info!("Search returned {} items", response.results.len());
        Ok(response.results)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn search_item(&self, path: &str) -> Result<RawItem> {
        let query = AqlQuery::for_path(path)?;
        self.search_items(&query)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ResourceError::NotFound(path.to_string()))
    }

    #[tracing::instrument(level = "debug", skip(self, properties))]
    async fn set_properties(&self, path: &str, properties: &Properties) -> Result<()> {
        if properties.is_empty() {
            debug!("No properties to set");
            return Ok(());
        }

        let url = format!(
            "{}/api/storage/{}?properties={}",
            self.endpoint,
            utf8_percent_encode(path.trim_start_matches('/'), SEGMENT),
            properties.to_query_param(),
        );

        let request = self.client.put(&url);
        ensure_success(authorize(request, &self.credentials).send().await?).await?;

        info!("Set {} properties on {path}", properties.len());
        Ok(())
    }
}
