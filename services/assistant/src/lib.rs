//! Shopping Assistant Service Library Crate
//!
//! Everything the `assistant` binary wires together: configuration, the
//! backend clients, the realtime session, persisted preferences and the local
//! HTTP/WebSocket control surface the storefront UI talks to.

pub mod bootstrap;
pub mod catalog;
pub mod config;
pub mod handlers;
pub mod models;
pub mod preferences;
pub mod realtime;
pub mod router;
pub mod state;
pub mod ws;
