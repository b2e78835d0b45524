//! Typed names and argument shapes of the remote-invocable operations.

use super::ToolError;
use crate::catalog::{ProductRef, SearchRequest, opt_string_or_number, string_or_number};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::{fmt, str::FromStr};

/// Every operation the backend may invoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolName {
    NavigateToProduct,
    SearchProducts,
    DisplayProducts,
    AddToCart,
    RemoveFromCart,
    AddToWishlist,
    RemoveFromWishlist,
    ClearCart,
    ClearWishlist,
    NavigateToCart,
    NavigateToWishlist,
    GetSimilarProducts,
    SearchPolicy,
    GetWeather,
    GetTotalNumberOfProducts,
}

impl ToolName {
    pub const ALL: [ToolName; 15] = [
        ToolName::NavigateToProduct,
        ToolName::SearchProducts,
        ToolName::DisplayProducts,
        ToolName::AddToCart,
        ToolName::RemoveFromCart,
        ToolName::AddToWishlist,
        ToolName::RemoveFromWishlist,
        ToolName::ClearCart,
        ToolName::ClearWishlist,
        ToolName::NavigateToCart,
        ToolName::NavigateToWishlist,
        ToolName::GetSimilarProducts,
        ToolName::SearchPolicy,
        ToolName::GetWeather,
        ToolName::GetTotalNumberOfProducts,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ToolName::NavigateToProduct => "navigate_to_product",
            ToolName::SearchProducts => "search_products",
            ToolName::DisplayProducts => "display_products",
            ToolName::AddToCart => "add_to_cart",
            ToolName::RemoveFromCart => "remove_from_cart",
            ToolName::AddToWishlist => "add_to_wishlist",
            ToolName::RemoveFromWishlist => "remove_from_wishlist",
            ToolName::ClearCart => "clear_cart",
            ToolName::ClearWishlist => "clear_wishlist",
            ToolName::NavigateToCart => "navigate_to_cart",
            ToolName::NavigateToWishlist => "navigate_to_wishlist",
            ToolName::GetSimilarProducts => "get_similar_products",
            ToolName::SearchPolicy => "search_policy",
            ToolName::GetWeather => "get_weather",
            ToolName::GetTotalNumberOfProducts => "get_total_number_of_products",
        }
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolName {
    type Err = ToolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ToolName::ALL
            .into_iter()
            .find(|tool| tool.as_str() == s)
            .ok_or_else(|| ToolError::NotFound(s.to_string()))
    }
}

/// Default number of variants resolved per product for `display_products`.
pub const DEFAULT_MAX_VARIANTS: usize = 4;

fn default_max_variants() -> usize {
    DEFAULT_MAX_VARIANTS
}

fn default_quantity() -> u32 {
    1
}

/// Arguments of `display_products`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct DisplayRequest {
    #[serde(default, alias = "products")]
    pub products_list: Vec<ProductRef>,
    #[serde(default = "default_max_variants")]
    pub max_variants: usize,
}

/// One requested cart or wishlist line.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ListItemRequest {
    #[serde(alias = "productId", deserialize_with = "string_or_number")]
    pub product_id: String,
    #[serde(default, alias = "variantId", deserialize_with = "opt_string_or_number")]
    pub variant_id: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
}

impl ListItemRequest {
    pub fn product_ref(&self) -> ProductRef {
        ProductRef {
            product_id: self.product_id.clone(),
            variant_id: self.variant_id.clone(),
            color: self.color.clone(),
            size: self.size.clone(),
        }
    }
}

/// Arguments of the cart and wishlist mutations.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ListRequest {
    #[serde(
        default,
        rename = "cart_items",
        alias = "wishlist_items",
        alias = "items"
    )]
    pub items: Vec<ListItemRequest>,
}

/// Outcome tag reported for each affected list line.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ListOperation {
    Add,
    Delete,
}

/// A tool invocation with its arguments decoded.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolCall {
    NavigateToProduct(ProductRef),
    SearchProducts(SearchRequest),
    DisplayProducts(DisplayRequest),
    AddToCart(ListRequest),
    RemoveFromCart(ListRequest),
    AddToWishlist(ListRequest),
    RemoveFromWishlist(ListRequest),
    ClearCart,
    ClearWishlist,
    NavigateToCart,
    NavigateToWishlist,
    GetSimilarProducts(Value),
    SearchPolicy(Value),
    GetWeather(Value),
    GetTotalNumberOfProducts,
}

impl ToolCall {
    /// Decodes `arguments` into the shape expected by `tool`.
    pub fn parse(tool: ToolName, arguments: Value) -> Result<Self, ToolError> {
        Ok(match tool {
            ToolName::NavigateToProduct => ToolCall::NavigateToProduct(decode(tool, arguments)?),
            ToolName::SearchProducts => ToolCall::SearchProducts(decode(tool, arguments)?),
            ToolName::DisplayProducts => ToolCall::DisplayProducts(decode(tool, arguments)?),
            ToolName::AddToCart => ToolCall::AddToCart(decode(tool, arguments)?),
            ToolName::RemoveFromCart => ToolCall::RemoveFromCart(decode(tool, arguments)?),
            ToolName::AddToWishlist => ToolCall::AddToWishlist(decode(tool, arguments)?),
            ToolName::RemoveFromWishlist => ToolCall::RemoveFromWishlist(decode(tool, arguments)?),
            ToolName::ClearCart => ToolCall::ClearCart,
            ToolName::ClearWishlist => ToolCall::ClearWishlist,
            ToolName::NavigateToCart => ToolCall::NavigateToCart,
            ToolName::NavigateToWishlist => ToolCall::NavigateToWishlist,
            ToolName::GetSimilarProducts => ToolCall::GetSimilarProducts(arguments),
            ToolName::SearchPolicy => ToolCall::SearchPolicy(arguments),
            ToolName::GetWeather => ToolCall::GetWeather(arguments),
            ToolName::GetTotalNumberOfProducts => ToolCall::GetTotalNumberOfProducts,
        })
    }
}

fn decode<T: DeserializeOwned>(tool: ToolName, arguments: Value) -> Result<T, ToolError> {
    serde_json::from_value(arguments).map_err(|e| ToolError::InvalidArguments {
        tool: tool.to_string(),
        reason: e.to_string(),
    })
}
