use super::{DisplayRequest, ListOperation, ListRequest, ToolError, ToolRegistry};
use crate::{
    catalog::{ProductRef, Variant, VariantRequest},
    storefront::{ItemList, Route},
};
use anyhow::{Context, anyhow};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, warn};

impl ToolRegistry {
    /// Resolves the first variant matching `product`.
    async fn resolve_one(
        &self,
        product: ProductRef,
        session_id: &str,
    ) -> anyhow::Result<Option<Variant>> {
        let request = VariantRequest {
            products: vec![product],
            max_variants: 1,
        };
        let variants = self
            .catalog
            .get_variants(session_id, &request)
            .await
            .context("variant lookup failed")?;
        Ok(variants.into_iter().next())
    }

    pub(super) async fn navigate_to_product(
        &self,
        product: ProductRef,
        session_id: &str,
    ) -> Result<Value, ToolError> {
        let product_id = product.product_id.clone();
        let variant = self
            .resolve_one(product, session_id)
            .await?
            .ok_or_else(|| anyhow!("No variant found for product {product_id}"))?;
        let handle = variant
            .handle()
            .ok_or_else(|| anyhow!("No product link returned for product {product_id}"))?;

        let route = Route::Product {
            handle: handle.clone(),
            variant_id: Some(variant.variant_id.clone()),
        };
        let path = route.path();
        self.ui.navigate(route)?;
        Ok(json!({
            "message": format!("Navigated to {}", variant.title),
            "handle": handle,
            "path": path,
            "variant": variant,
        }))
    }

    pub(super) async fn display_products(
        &self,
        request: DisplayRequest,
        session_id: &str,
    ) -> Result<Value, ToolError> {
        if request.products_list.is_empty() {
            return Err(anyhow!("No products provided to display").into());
        }
        let lookup = VariantRequest {
            products: request.products_list,
            max_variants: request.max_variants,
        };
        let variants = self
            .catalog
            .get_variants(session_id, &lookup)
            .await
            .context("variant lookup failed")?;
        if variants.is_empty() {
            return Err(anyhow!("No variants found for the requested products").into());
        }

        self.ui.stage_display(variants.clone())?;
        self.ui.navigate(Route::FittingRoom)?;
        Ok(json!({
            "message": format!("Displaying {} variants", variants.len()),
            "variants": variants,
        }))
    }

    /// Resolves every requested line first, then applies `operation` to the
    /// resolved ones in order. Lines that cannot be resolved, including
    /// failed lookups, are reported under `unresolved`. Lines the list
    /// rejects are reported under `failed` and do not undo earlier ones.
    pub(super) async fn apply_to_list(
        &self,
        list: &Arc<dyn ItemList>,
        request: ListRequest,
        operation: ListOperation,
        session_id: &str,
    ) -> Result<Value, ToolError> {
        if request.items.is_empty() {
            return Err(anyhow!("No items provided").into());
        }

        let mut resolved = Vec::with_capacity(request.items.len());
        let mut unresolved = Vec::new();
        for item in &request.items {
            match self.resolve_one(item.product_ref(), session_id).await {
                Ok(Some(variant)) => resolved.push((variant, item.quantity)),
                Ok(None) => {
                    debug!(product_id = %item.product_id, "No variant matched list item.");
                    unresolved.push(item.product_id.clone());
                }
                Err(e) => {
                    warn!(product_id = %item.product_id, error = ?e, "Lookup failed for list item.");
                    unresolved.push(item.product_id.clone());
                }
            }
        }
        if resolved.is_empty() {
            return Err(anyhow!(
                "None of the requested products could be found: {}",
                unresolved.join(", ")
            )
            .into());
        }

        let mut items = Vec::with_capacity(resolved.len());
        let mut failed = Vec::new();
        for (variant, quantity) in resolved {
            let applied = match operation {
                ListOperation::Add => list.add(&variant, quantity),
                ListOperation::Delete => list.remove(&variant),
            };
            match applied {
                Ok(()) => items.push(json!({
                    "operation": operation,
                    "quantity": quantity,
                    "variant": variant,
                })),
                Err(e) => {
                    warn!(variant_id = %variant.variant_id, error = ?e, "List update failed.");
                    failed.push(json!({
                        "product_id": variant.product_id,
                        "variant_id": variant.variant_id,
                        "error": e.to_string(),
                    }));
                }
            }
        }
        if items.is_empty() {
            return Err(anyhow!("No items could be updated").into());
        }
        Ok(json!({
            "items": items,
            "unresolved": unresolved,
            "failed": failed,
            "partial": !unresolved.is_empty() || !failed.is_empty(),
        }))
    }

    pub(super) fn navigate_to(&self, route: Route) -> Result<Value, ToolError> {
        let path = route.path();
        self.ui.navigate(route)?;
        Ok(json!({ "path": path }))
    }
}

pub(super) fn clear_list(list: &Arc<dyn ItemList>, label: &str) -> Result<Value, ToolError> {
    list.clear()?;
    Ok(json!({ "message": format!("{label} cleared") }))
}
