//! Store backend REST client backing the catalog tools.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use shopper_core::catalog::{Catalog, SearchRequest, Variant, VariantRequest};
use std::time::Duration;
use tracing::{debug, instrument};

/// `get_variants` answers either with `{"result": [...]}` or a bare array.
#[derive(Deserialize)]
#[serde(untagged)]
enum VariantsResponse {
    Wrapped { result: Vec<Variant> },
    Bare(Vec<Variant>),
}

impl From<VariantsResponse> for Vec<Variant> {
    fn from(response: VariantsResponse) -> Self {
        match response {
            VariantsResponse::Wrapped { result } | VariantsResponse::Bare(result) => result,
        }
    }
}

/// Calls `/api/{store}/{sessionId}/...` on the store backend.
pub struct HttpCatalog {
    http: reqwest::Client,
    base_url: String,
    store_id: String,
}

impl HttpCatalog {
    pub fn new(backend_url: &str, store_id: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build catalog HTTP client")?;
        Ok(Self {
            http,
            base_url: backend_url.trim_end_matches('/').to_string(),
            store_id: store_id.to_string(),
        })
    }

    fn endpoint(&self, session_id: &str, operation: &str) -> String {
        let session = if session_id.is_empty() { "anonymous" } else { session_id };
        format!("{}/api/{}/{}/{}", self.base_url, self.store_id, session, operation)
    }

    async fn post<B: Serialize + ?Sized>(&self, session_id: &str, operation: &str, body: &B) -> Result<Value> {
        let url = self.endpoint(session_id, operation);
        debug!(%url, "POST catalog operation.");
        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("{operation} request failed"))?;
        read_json(response, operation).await
    }

    async fn get(&self, session_id: &str, operation: &str) -> Result<Value> {
        let url = self.endpoint(session_id, operation);
        debug!(%url, "GET catalog operation.");
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("{operation} request failed"))?;
        read_json(response, operation).await
    }
}

async fn read_json(response: reqwest::Response, operation: &str) -> Result<Value> {
    let status = response.status();
    if !status.is_success() {
        bail!("{operation} failed with status {status}");
    }
    response
        .json::<Value>()
        .await
        .with_context(|| format!("{operation} returned an invalid body"))
}

#[async_trait]
impl Catalog for HttpCatalog {
    #[instrument(skip(self, request), fields(products = request.products.len()))]
    async fn get_variants(&self, session_id: &str, request: &VariantRequest) -> Result<Vec<Variant>> {
        let body = self.post(session_id, "get_variants", request).await?;
        let variants: VariantsResponse =
            serde_json::from_value(body).context("get_variants returned an unexpected shape")?;
        Ok(variants.into())
    }

    async fn search_products(&self, session_id: &str, request: &SearchRequest) -> Result<Value> {
        self.post(session_id, "search_products", request).await
    }

    async fn get_similar_products(&self, session_id: &str, arguments: &Value) -> Result<Value> {
        self.post(session_id, "get_similar_products", arguments).await
    }

    async fn search_policy(&self, session_id: &str, arguments: &Value) -> Result<Value> {
        self.post(session_id, "search_policy", arguments).await
    }

    async fn get_weather(&self, session_id: &str, arguments: &Value) -> Result<Value> {
        self.post(session_id, "get_weather", arguments).await
    }

    async fn get_total_number_of_products(&self, session_id: &str) -> Result<Value> {
        self.get(session_id, "get_total_number_of_products").await
    }
}
