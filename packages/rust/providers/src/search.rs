//! Web search capability and a SearXNG client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument};

use entitylens_shared::{EntityLensError, Result, RetrievedDocument, RetryConfig, SearchConfig};

use crate::retry::{AttemptError, is_transient_status, is_transient_transport, with_retry};

/// Some SearXNG instances reject requests without a browser-like agent.
const USER_AGENT: &str = concat!(
    "Mozilla/5.0 (compatible; EntityLens/",
    env!("CARGO_PKG_VERSION"),
    ")"
);

/// Ordered search results for a query.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<RetrievedDocument>>;
}

#[derive(Debug, Deserialize)]
struct SearxngResponse {
    #[serde(default)]
    results: Vec<SearxngResult>,
}

#[derive(Debug, Deserialize)]
struct SearxngResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

impl From<SearxngResult> for RetrievedDocument {
    fn from(r: SearxngResult) -> Self {
        Self {
            title: r.title,
            content: r.content.unwrap_or_default(),
            url: r.url,
        }
    }
}

/// Client for a SearXNG instance with the JSON output format enabled.
pub struct SearxngClient {
    client: Client,
    endpoint: String,
    num_results: u32,
    retry: RetryConfig,
}

impl SearxngClient {
    pub fn new(config: &SearchConfig, retry: &RetryConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EntityLensError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: format!("{}/search", config.base_url.trim_end_matches('/')),
            num_results: config.num_results,
            retry: retry.clone(),
        })
    }

    async fn attempt(
        &self,
        query: &str,
    ) -> std::result::Result<Vec<RetrievedDocument>, AttemptError> {
        let num = self.num_results.to_string();
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("q", query), ("format", "json"), ("num", num.as_str())])
            .send()
            .await
            .map_err(|e| {
                let err = EntityLensError::Retrieval(format!("{}: {e}", self.endpoint));
                if is_transient_transport(&e) {
                    AttemptError::transient(err)
                } else {
                    AttemptError::fatal(err)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let err = EntityLensError::Retrieval(format!("search returned HTTP {status}"));
            return Err(if is_transient_status(status) {
                AttemptError::transient(err)
            } else {
                AttemptError::fatal(err)
            });
        }

        let parsed: SearxngResponse = response.json().await.map_err(|e| {
            AttemptError::fatal(EntityLensError::Retrieval(format!(
                "failed to decode search response: {e}"
            )))
        })?;

        // The `num` parameter is advisory; cap locally.
        Ok(parsed
            .results
            .into_iter()
            .take(self.num_results as usize)
            .map(RetrievedDocument::from)
            .collect())
    }
}

#[async_trait]
impl SearchProvider for SearxngClient {
    #[instrument(skip_all, fields(query = %query))]
    async fn search(&self, query: &str) -> Result<Vec<RetrievedDocument>> {
        let results = with_retry(&self.retry, "search", || self.attempt(query)).await?;
        debug!(results = results.len(), "search complete");
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn client_for(server: &MockServer, num_results: u32) -> SearxngClient {
        let config = SearchConfig {
            base_url: server.uri(),
            num_results,
            ..Default::default()
        };
        let retry = RetryConfig {
            max_retries: 1,
            base_delay_ms: 1,
        };
        SearxngClient::new(&config, &retry).unwrap()
    }

    #[tokio::test]
    async fn decodes_results_in_order() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .and(query_param("q", "Eiffel Tower,Paris review"))
            .and(query_param("format", "json"))
            .and(query_param("num", "7"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "results": [
                    { "title": "First", "content": "snippet one", "url": "https://a.example/1" },
                    { "title": "Second", "url": "https://b.example/2" }
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, 7);
        let docs = client.search("Eiffel Tower,Paris review").await.unwrap();

        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].title, "First");
        assert_eq!(docs[0].content, "snippet one");
        assert_eq!(docs[1].content, "");
        assert_eq!(docs[1].url.as_deref(), Some("https://b.example/2"));
    }

    #[tokio::test]
    async fn caps_results_locally() {
        let server = MockServer::start().await;
        let results: Vec<_> = (0..5)
            .map(|i| serde_json::json!({ "title": format!("r{i}"), "content": "c" }))
            .collect();
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "results": results })),
            )
            .mount(&server)
            .await;

        let client = client_for(&server, 2);
        let docs = client.search("q").await.unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[1].title, "r1");
    }

    #[tokio::test]
    async fn empty_result_set() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let client = client_for(&server, 7);
        assert!(client.search("nothing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn http_error_is_a_retrieval_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, 7);
        let err = client.search("q").await.unwrap_err();
        assert!(matches!(err, EntityLensError::Retrieval(_)));
    }
}
