//! Page retrieval and query-focused text extraction.
//!
//! This crate provides:
//! - [`relevance`]: pure extraction of query-relevant text from page markup
//! - [`fetch`]: SSRF-guarded page fetching and ranked download of search hits

pub mod fetch;
pub mod relevance;

pub use fetch::{DocumentFetcher, HttpFetcher, RelevantDocument, download_relevant};
pub use relevance::{
    RelevanceOptions, extract_main_content, extract_relevant, extract_relevant_with,
};
