//! The tool dispatch table.
//!
//! The backend invokes local operations by name while it generates a turn.
//! Every invocation must be answered, so [`ToolRegistry::dispatch`] turns
//! each outcome (unknown names, bad arguments, collaborator failures, timeouts
//! and panics included) into a [`ToolResult`].

mod call;
mod handlers;
mod result;

pub use call::{
    DEFAULT_MAX_VARIANTS, DisplayRequest, ListItemRequest, ListOperation, ListRequest, ToolCall,
    ToolName,
};
pub use result::{ToolError, ToolResult};

use crate::{
    catalog::Catalog,
    storefront::{ItemList, Route, UiBridge},
};
use futures::FutureExt;
use handlers::clear_list;
use serde_json::{Map, Value};
use std::{panic::AssertUnwindSafe, sync::Arc, time::Duration};
use tracing::{info, instrument, warn};

/// Default upper bound for a single dispatch.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

/// Registry of the operations the backend may invoke, bound to the
/// collaborators they act on.
#[derive(Clone)]
pub struct ToolRegistry {
    catalog: Arc<dyn Catalog>,
    cart: Arc<dyn ItemList>,
    wishlist: Arc<dyn ItemList>,
    ui: Arc<dyn UiBridge>,
    timeout: Duration,
}

impl ToolRegistry {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        cart: Arc<dyn ItemList>,
        wishlist: Arc<dyn ItemList>,
        ui: Arc<dyn UiBridge>,
    ) -> Self {
        Self {
            catalog,
            cart,
            wishlist,
            ui,
            timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Whether `name` is a registered operation.
    pub fn supports(&self, name: &str) -> bool {
        name.parse::<ToolName>().is_ok()
    }

    /// Runs the operation `name` with the raw JSON `arguments` sent by the
    /// backend. The session id is merged into the arguments before decoding.
    ///
    /// Never fails: every error becomes a failure [`ToolResult`].
    #[instrument(name = "tool_dispatch", skip(self, arguments), fields(tool = %name))]
    pub async fn dispatch(&self, name: &str, arguments: &str, session_id: &str) -> ToolResult {
        match self.try_dispatch(name, arguments, session_id).await {
            Ok(data) => {
                info!("Tool call succeeded.");
                ToolResult::success(data)
            }
            Err(e) => {
                warn!(error = %e, "Tool call failed.");
                ToolResult::failure(e.to_string(), session_id)
            }
        }
    }

    async fn try_dispatch(
        &self,
        name: &str,
        arguments: &str,
        session_id: &str,
    ) -> Result<Value, ToolError> {
        let tool: ToolName = name.parse()?;
        let arguments = parse_arguments(tool, arguments, session_id)?;
        let call = ToolCall::parse(tool, arguments)?;

        let run = AssertUnwindSafe(self.run(call, session_id)).catch_unwind();
        match tokio::time::timeout(self.timeout, run).await {
            Err(_) => Err(ToolError::TimedOut(name.to_string())),
            Ok(Err(_panic)) => Err(ToolError::Panicked(name.to_string())),
            Ok(Ok(outcome)) => outcome,
        }
    }

    async fn run(&self, call: ToolCall, session_id: &str) -> Result<Value, ToolError> {
        let catalog = self.catalog.as_ref();
        match call {
            ToolCall::NavigateToProduct(product) => {
                self.navigate_to_product(product, session_id).await
            }
            ToolCall::SearchProducts(request) => {
                Ok(catalog.search_products(session_id, &request).await?)
            }
            ToolCall::DisplayProducts(request) => self.display_products(request, session_id).await,
            ToolCall::AddToCart(request) => {
                self.apply_to_list(&self.cart, request, ListOperation::Add, session_id)
                    .await
            }
            ToolCall::RemoveFromCart(request) => {
                self.apply_to_list(&self.cart, request, ListOperation::Delete, session_id)
                    .await
            }
            ToolCall::AddToWishlist(request) => {
                self.apply_to_list(&self.wishlist, request, ListOperation::Add, session_id)
                    .await
            }
            ToolCall::RemoveFromWishlist(request) => {
                self.apply_to_list(&self.wishlist, request, ListOperation::Delete, session_id)
                    .await
            }
            ToolCall::ClearCart => clear_list(&self.cart, "Cart"),
            ToolCall::ClearWishlist => clear_list(&self.wishlist, "Wishlist"),
            ToolCall::NavigateToCart => self.navigate_to(Route::Cart),
            ToolCall::NavigateToWishlist => self.navigate_to(Route::Wishlist),
            ToolCall::GetSimilarProducts(arguments) => {
                Ok(catalog.get_similar_products(session_id, &arguments).await?)
            }
            ToolCall::SearchPolicy(arguments) => {
                Ok(catalog.search_policy(session_id, &arguments).await?)
            }
            ToolCall::GetWeather(arguments) => Ok(catalog.get_weather(session_id, &arguments).await?),
            ToolCall::GetTotalNumberOfProducts => {
                Ok(catalog.get_total_number_of_products(session_id).await?)
            }
        }
    }
}

/// Parses the backend's argument string and merges the session id into it.
fn parse_arguments(tool: ToolName, raw: &str, session_id: &str) -> Result<Value, ToolError> {
    let parsed = if raw.trim().is_empty() {
        Value::Object(Map::new())
    } else {
        serde_json::from_str(raw).map_err(|e| ToolError::InvalidArguments {
            tool: tool.to_string(),
            reason: e.to_string(),
        })?
    };
    let mut map = match parsed {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            return Err(ToolError::InvalidArguments {
                tool: tool.to_string(),
                reason: format!("expected a JSON object, got {other}"),
            });
        }
    };
    map.insert("sessionId".to_string(), Value::String(session_id.to_string()));
    Ok(Value::Object(map))
}
