#![allow(clippy::collapsible_if)]
pub mod config;
pub mod error;
pub mod identity;
pub mod limiter;
pub mod pipeline;
pub mod routes;
pub mod signature;
pub mod state;
