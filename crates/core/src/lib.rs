pub mod catalog;
pub mod event_log;
pub mod storefront;
pub mod tools;
pub mod transcript;

use catalog::Variant;
use serde::{Deserialize, Serialize};
use storefront::Route;

/// Side effects the assistant asks the storefront UI to perform.
///
/// The assistant never renders anything itself; a UI runtime subscribes to
/// these and executes them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum UiCommand {
    /// Show the given page.
    Navigate { route: Route, path: String },
    /// Replace the fitting-room collection.
    StageDisplay { variants: Vec<Variant> },
}
