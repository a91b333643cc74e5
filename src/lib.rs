//! Atomgate - An HTTP facade in front of a legacy archival web application
//!
//! This library provides the pieces the facade is assembled from:
//! - Normalizes request paths and strips legacy front-controller prefixes
//! - Classifies every request through an ordered routing policy chain
//! - Serves static assets from an overlay and the application root
//! - Materializes the application tree from a versioned gzip tar snapshot
//! - Waits for the relational store and search index before serving
//! - Hands dynamic requests to a pluggable legacy runtime

pub mod archive;
pub mod assets;
pub mod bridge;
pub mod config;
pub mod error;
pub mod native;
pub mod normalize;
pub mod readiness;
pub mod routing;
pub mod server;

/// Package name from Cargo.toml
pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");

/// Package version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
