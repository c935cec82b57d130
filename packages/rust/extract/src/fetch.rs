//! Full-page fetching for search hits, feeding the relevance extractor.
//!
//! Search hits come from arbitrary sites, so fetches are SSRF-guarded,
//! bounded by a per-request timeout, and retried on transient failures.
//! Failures are per page: one bad URL never affects the others.

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info, instrument, warn};
use url::Url;

use entitylens_providers::retry::{
    AttemptError, is_transient_status, is_transient_transport, with_retry,
};
use entitylens_shared::{EntityLensError, Result, RetrievedDocument, RetryConfig};

use crate::relevance::{RelevanceOptions, extract_relevant_with};

/// User-Agent string for page fetches.
const USER_AGENT: &str = concat!("EntityLens/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Fetcher trait
// ---------------------------------------------------------------------------

/// Retrieves the raw markup of a page.
#[async_trait]
pub trait DocumentFetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<String>;
}

/// reqwest-backed fetcher.
pub struct HttpFetcher {
    client: Client,
    retry: RetryConfig,
    /// Allow localhost/private IPs (self-hosted deployments, mock servers).
    allow_private_hosts: bool,
}

impl HttpFetcher {
    /// Create a fetcher with the given per-request timeout and retry policy.
    pub fn new(timeout_secs: u64, retry: &RetryConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| EntityLensError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            retry: retry.clone(),
            allow_private_hosts: false,
        })
    }

    /// Disable the private-address guard.
    pub fn allow_private_hosts(mut self) -> Self {
        self.allow_private_hosts = true;
        self
    }

    async fn attempt(&self, url: &Url) -> std::result::Result<String, AttemptError> {
        let response = self.client.get(url.as_str()).send().await.map_err(|e| {
            let err = EntityLensError::Retrieval(format!("{url}: {e}"));
            if is_transient_transport(&e) {
                AttemptError::transient(err)
            } else {
                AttemptError::fatal(err)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let err = EntityLensError::Retrieval(format!("{url}: HTTP {status}"));
            return Err(if is_transient_status(status) {
                AttemptError::transient(err)
            } else {
                AttemptError::fatal(err)
            });
        }

        response.text().await.map_err(|e| {
            AttemptError::fatal(EntityLensError::Retrieval(format!(
                "{url}: body read failed: {e}"
            )))
        })
    }
}

#[async_trait]
impl DocumentFetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<String> {
        if !self.allow_private_hosts && is_ssrf_target(url) {
            return Err(EntityLensError::Retrieval(format!(
                "{url}: blocked by SSRF protection"
            )));
        }

        debug!(%url, "fetching page");
        with_retry(&self.retry, "page fetch", || self.attempt(url)).await
    }
}

// ---------------------------------------------------------------------------
// Ranked download
// ---------------------------------------------------------------------------

/// A search hit whose page yielded query-relevant text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelevantDocument {
    pub url: String,
    pub title: String,
    pub content: String,
}

/// Fetch search hits in order and keep the relevant text of the first
/// `max_documents` pages that have any.
///
/// Query terms are the whitespace-separated words of `query`. Hits without a
/// URL, pages that fail to load, and pages with no usable content are
/// skipped.
#[instrument(skip_all, fields(query = %query, candidates = hits.len()))]
pub async fn download_relevant(
    fetcher: &dyn DocumentFetcher,
    query: &str,
    hits: &[RetrievedDocument],
    max_documents: usize,
    opts: &RelevanceOptions,
) -> Vec<RelevantDocument> {
    let terms: Vec<&str> = query.split_whitespace().collect();
    let mut results = Vec::new();

    for hit in hits {
        if results.len() >= max_documents {
            break;
        }
        let Some(raw_url) = hit.url.as_deref() else {
            continue;
        };
        let url = match Url::parse(raw_url) {
            Ok(url) => url,
            Err(e) => {
                debug!(url = raw_url, error = %e, "unparseable result URL, skipping");
                continue;
            }
        };

        let html = match fetcher.fetch(&url).await {
            Ok(html) => html,
            Err(e) => {
                warn!(%url, error = %e, "page fetch failed, skipping");
                continue;
            }
        };

        let content = extract_relevant_with(&html, &terms, opts);
        if content.is_empty() {
            debug!(%url, "no relevant content on page");
            continue;
        }

        debug!(%url, chars = content.chars().count(), "relevant content extracted");
        results.push(RelevantDocument {
            url: url.to_string(),
            title: hit.title.clone(),
            content,
        });
    }

    info!(kept = results.len(), "ranked download complete");
    results
}

// ---------------------------------------------------------------------------
// SSRF protection
// ---------------------------------------------------------------------------

/// Check if a URL targets a potentially dangerous resource.
fn is_ssrf_target(url: &Url) -> bool {
    // Block non-HTTP schemes
    match url.scheme() {
        "http" | "https" => {}
        _ => return true,
    }

    match url.host() {
        Some(url::Host::Ipv4(v4)) => is_private_ip(&IpAddr::V4(v4)),
        Some(url::Host::Ipv6(v6)) => is_private_ip(&IpAddr::V6(v6)),
        Some(url::Host::Domain(host)) => {
            host == "localhost" || host.ends_with(".local") || host.ends_with(".internal")
        }
        None => true,
    }
}

/// Check if an IP is in a private/reserved range.
fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                // 100.64.0.0/10 (Carrier-grade NAT)
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64)
        }
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified(),
    }
}
