//! HTTP implementation of `SearchBackend`.
//!
//! Talks to the search service's `POST /query` endpoint and streams the
//! response body as it arrives.
mod backend;
mod config;

pub use backend::HttpSearchBackend;
pub use config::HttpBackendConfig;
