//! Vector index client (Pinecone REST API).
//!
//! The control plane resolves (or creates) the index and yields its
//! data-plane host; deletes and upserts go to that host.

use std::time::Duration;

use async_trait::async_trait;
use noticeharvest_shared::{NoticeHarvestError, PineconeConfig, Result};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, instrument, warn};

/// API version header value.
const API_VERSION: &str = "2024-07";

/// Polls while a freshly created index becomes ready.
const READY_POLL: Duration = Duration::from_secs(2);
const READY_MAX_POLLS: u32 = 60;

/// One vector to upsert.
#[derive(Debug, Clone, Serialize)]
pub struct VectorRecord {
    pub id: String,
    pub values: Vec<f32>,
    pub metadata: Map<String, Value>,
}

/// Data-plane operations used by the indexer.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Remove every vector in `namespace`. A missing namespace is not an error.
    async fn delete_all(&self, namespace: Option<&str>) -> Result<()>;

    /// Insert or overwrite `records` by id.
    async fn upsert(&self, records: &[VectorRecord], namespace: Option<&str>) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Pinecone
// ---------------------------------------------------------------------------

/// Client bound to one index's data-plane host.
pub struct PineconeIndex {
    client: Client,
    api_key: String,
    host: String,
}

impl PineconeIndex {
    /// Describe the configured index, creating it when absent.
    ///
    /// Cloud and region are only required for creation.
    #[instrument(skip_all, fields(index = %config.index_name, dimension))]
    pub async fn connect(api_key: &str, config: &PineconeConfig, dimension: usize) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(NoticeHarvestError::config("missing Pinecone API key"));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| NoticeHarvestError::VectorIndex(e.to_string()))?;
        let control = ControlPlane {
            client: &client,
            api_key: api_key.trim(),
            base: config.control_url.trim_end_matches('/'),
        };

        let description = match control.describe(&config.index_name).await? {
            Some(desc) => {
                match desc.dimension {
                    Some(existing) if existing != dimension => {
                        return Err(NoticeHarvestError::config(format!(
                            "index '{}' has dimension {existing}, embeddings have {dimension}",
                            config.index_name
                        )));
                    }
                    _ => desc,
                }
            }
            None => {
                let (Some(cloud), Some(region)) = (config.cloud.as_deref(), config.region.as_deref())
                else {
                    return Err(NoticeHarvestError::config(format!(
                        "index '{}' does not exist; set pinecone.cloud and pinecone.region to create it",
                        config.index_name
                    )));
                };
                info!(cloud, region, metric = %config.metric, "creating vector index");
                control.create(config, dimension, cloud, region).await?;
                control.wait_ready(&config.index_name).await?
            }
        };

        if description.host.is_empty() {
            return Err(NoticeHarvestError::VectorIndex(format!(
                "index '{}' has no host",
                config.index_name
            )));
        }

        Ok(Self {
            client,
            api_key: api_key.trim().to_string(),
            host: normalize_host(&description.host),
        })
    }

    /// Data-plane base URL.
    pub fn host(&self) -> &str {
        &self.host
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .post(format!("{}{path}", self.host))
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
    }
}

#[async_trait]
impl VectorIndex for PineconeIndex {
    async fn delete_all(&self, namespace: Option<&str>) -> Result<()> {
        let body = DeleteRequest {
            delete_all: true,
            namespace: namespace.unwrap_or(""),
        };
        let resp = self
            .post("/vectors/delete")
            .json(&body)
            .send()
            .await
            .map_err(|e| NoticeHarvestError::VectorIndex(e.to_string()))?;

        match resp.status() {
            s if s.is_success() => {
                info!(namespace = namespace.unwrap_or(""), "namespace cleared");
                Ok(())
            }
            StatusCode::NOT_FOUND => {
                warn!(
                    namespace = namespace.unwrap_or(""),
                    "namespace not found, nothing to clear"
                );
                Ok(())
            }
            status => Err(NoticeHarvestError::VectorIndex(format!(
                "delete-all failed ({status}): {}",
                resp.text().await.unwrap_or_default()
            ))),
        }
    }

    async fn upsert(&self, records: &[VectorRecord], namespace: Option<&str>) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let body = UpsertRequest {
            vectors: records,
            namespace: namespace.unwrap_or(""),
        };
        let resp = self
            .post("/vectors/upsert")
            .json(&body)
            .send()
            .await
            .map_err(|e| NoticeHarvestError::VectorIndex(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(NoticeHarvestError::VectorIndex(format!(
                "upsert failed ({status}): {}",
                resp.text().await.unwrap_or_default()
            )));
        }
        debug!(count = records.len(), "vectors upserted");
        Ok(())
    }
}

/// Hosts come back without a scheme; keep explicit ones untouched.
fn normalize_host(host: &str) -> String {
    let host = host.trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{host}")
    }
}

// ---------------------------------------------------------------------------
// Control plane
// ---------------------------------------------------------------------------

struct ControlPlane<'a> {
    client: &'a Client,
    api_key: &'a str,
    base: &'a str,
}

impl ControlPlane<'_> {
    async fn describe(&self, name: &str) -> Result<Option<IndexDescription>> {
        let resp = self
            .client
            .get(format!("{}/indexes/{name}", self.base))
            .header("Api-Key", self.api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
            .send()
            .await
            .map_err(|e| NoticeHarvestError::VectorIndex(e.to_string()))?;

        match resp.status() {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => resp
                .json::<IndexDescription>()
                .await
                .map(Some)
                .map_err(|e| NoticeHarvestError::VectorIndex(format!("invalid describe response: {e}"))),
            status => Err(NoticeHarvestError::VectorIndex(format!(
                "describe index failed ({status}): {}",
                resp.text().await.unwrap_or_default()
            ))),
        }
    }

    async fn create(
        &self,
        config: &PineconeConfig,
        dimension: usize,
        cloud: &str,
        region: &str,
    ) -> Result<()> {
        let body = serde_json::json!({
            "name": config.index_name,
            "dimension": dimension,
            "metric": config.metric,
            "spec": { "serverless": { "cloud": cloud, "region": region } },
        });
        let resp = self
            .client
            .post(format!("{}/indexes", self.base))
            .header("Api-Key", self.api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| NoticeHarvestError::VectorIndex(e.to_string()))?;

        let status = resp.status();
        // 409: created concurrently by someone else
        if status.is_success() || status == StatusCode::CONFLICT {
            Ok(())
        } else {
            Err(NoticeHarvestError::VectorIndex(format!(
                "create index failed ({status}): {}",
                resp.text().await.unwrap_or_default()
            )))
        }
    }

    async fn wait_ready(&self, name: &str) -> Result<IndexDescription> {
        for attempt in 0..READY_MAX_POLLS {
            match self.describe(name).await? {
                Some(desc) if desc.status.ready && !desc.host.is_empty() => return Ok(desc),
                _ => {}
            }
            debug!(attempt, "index not ready yet");
            tokio::time::sleep(READY_POLL).await;
        }
        Err(NoticeHarvestError::VectorIndex(format!(
            "index '{name}' did not become ready"
        )))
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct IndexDescription {
    #[serde(default)]
    dimension: Option<usize>,
    #[serde(default)]
    host: String,
    #[serde(default)]
    status: IndexStatus,
}

#[derive(Debug, Default, Deserialize)]
struct IndexStatus {
    #[serde(default)]
    ready: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DeleteRequest<'a> {
    delete_all: bool,
    namespace: &'a str,
}

#[derive(Serialize)]
struct UpsertRequest<'a> {
    vectors: &'a [VectorRecord],
    namespace: &'a str,
}
