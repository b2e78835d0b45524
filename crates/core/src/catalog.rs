//! Product catalog collaborator.
//!
//! The assistant never owns product data; it resolves tool-call arguments
//! into concrete variants through a [`Catalog`] and proxies the remaining
//! lookups to the store backend.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// A concrete, purchasable variant of a product.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Variant {
    #[serde(alias = "productId", deserialize_with = "string_or_number")]
    pub product_id: String,
    #[serde(alias = "variantId", alias = "id", deserialize_with = "string_or_number")]
    pub variant_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(default, alias = "image", skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, alias = "url", skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

impl Variant {
    /// The URL-safe product handle embedded in the variant's deep link.
    pub fn handle(&self) -> Option<String> {
        self.link.as_deref().and_then(handle_from_link)
    }
}

/// A product, optionally narrowed to a variant by id, color or size.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ProductRef {
    #[serde(alias = "productId", deserialize_with = "string_or_number")]
    pub product_id: String,
    #[serde(
        default,
        alias = "variantId",
        deserialize_with = "opt_string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub variant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
}

/// Body of a `get_variants` lookup.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct VariantRequest {
    pub products: Vec<ProductRef>,
    pub max_variants: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PriceRange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

/// Body of a `search_products` call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SearchRequest {
    pub queries: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_range: Option<PriceRange>,
}

/// The store backend's product and information endpoints.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Resolves products into concrete variants. Products without a match are
    /// simply absent from the result.
    async fn get_variants(&self, session_id: &str, request: &VariantRequest)
    -> Result<Vec<Variant>>;

    async fn search_products(&self, session_id: &str, request: &SearchRequest) -> Result<Value>;

    async fn get_similar_products(&self, session_id: &str, arguments: &Value) -> Result<Value>;

    async fn search_policy(&self, session_id: &str, arguments: &Value) -> Result<Value>;

    async fn get_weather(&self, session_id: &str, arguments: &Value) -> Result<Value>;

    async fn get_total_number_of_products(&self, session_id: &str) -> Result<Value>;
}

/// Extracts the segment following `/products/` from a storefront link.
pub fn handle_from_link(link: &str) -> Option<String> {
    let base = url::Url::parse("https://storefront.invalid/").ok()?;
    let url = base.join(link).ok()?;
    let mut segments = url.path_segments()?;
    segments.find(|segment| *segment == "products")?;
    segments
        .next()
        .filter(|handle| !handle.is_empty())
        .map(str::to_string)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    String(String),
    Number(serde_json::Number),
}

impl From<StringOrNumber> for String {
    fn from(value: StringOrNumber) -> Self {
        match value {
            StringOrNumber::String(s) => s,
            StringOrNumber::Number(n) => n.to_string(),
        }
    }
}

/// Accepts ids sent either as JSON strings or numbers.
pub(crate) fn string_or_number<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    StringOrNumber::deserialize(d).map(String::from)
}

pub(crate) fn opt_string_or_number<'de, D: Deserializer<'de>>(
    d: D,
) -> Result<Option<String>, D::Error> {
    Option::<StringOrNumber>::deserialize(d).map(|v| v.map(String::from))
}
