//! In-memory capabilities for pipeline and batch tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use url::Url;

use entitylens_extract::DocumentFetcher;
use entitylens_providers::{LanguageModel, SearchProvider};
use entitylens_shared::{EntityLensError, Result, RetrievedDocument};

type Responder = dyn Fn(&str, Option<&str>) -> Result<String> + Send + Sync;

/// Model whose answers come from a closure; every call is recorded.
pub struct FakeModel {
    responder: Box<Responder>,
    calls: Mutex<Vec<(String, Option<String>)>>,
}

impl FakeModel {
    pub fn new(
        responder: impl Fn(&str, Option<&str>) -> Result<String> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            responder: Box::new(responder),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Answers by call shape: NER (user turn, system starts with `ner_marker`),
    /// grounded summary (no user turn), web summary (anything else).
    pub fn scripted(
        ner_marker: &'static str,
        entities: &'static str,
        summary: &'static str,
    ) -> Arc<Self> {
        Self::new(move |system, user| match user {
            Some(_) if system.starts_with(ner_marker) => Ok(entities.to_string()),
            None => Ok(summary.to_string()),
            Some(content) => Ok(format!("web summary of {} chars", content.chars().count())),
        })
    }

    pub fn calls(&self) -> Vec<(String, Option<String>)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl LanguageModel for FakeModel {
    fn model(&self) -> &str {
        "fake-model"
    }

    async fn complete(&self, system: &str, user: Option<&str>) -> Result<String> {
        self.calls
            .lock()
            .unwrap()
            .push((system.to_string(), user.map(String::from)));
        (self.responder)(system, user)
    }
}

/// Search returning canned results per query; unknown queries yield nothing.
#[derive(Default)]
pub struct FakeSearch {
    results: HashMap<String, std::result::Result<Vec<RetrievedDocument>, String>>,
    queries: Mutex<Vec<String>>,
}

impl FakeSearch {
    pub fn with(mut self, query: &str, docs: Vec<RetrievedDocument>) -> Self {
        self.results.insert(query.to_string(), Ok(docs));
        self
    }

    pub fn failing(mut self, query: &str, message: &str) -> Self {
        self.results.insert(query.to_string(), Err(message.to_string()));
        self
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl SearchProvider for FakeSearch {
    async fn search(&self, query: &str) -> Result<Vec<RetrievedDocument>> {
        self.queries.lock().unwrap().push(query.to_string());
        match self.results.get(query) {
            Some(Ok(docs)) => Ok(docs.clone()),
            Some(Err(msg)) => Err(EntityLensError::Retrieval(msg.clone())),
            None => Ok(Vec::new()),
        }
    }
}

/// Fetcher serving pages from memory; unknown URLs fail.
#[derive(Default)]
pub struct FakeFetcher {
    pages: HashMap<String, String>,
}

impl FakeFetcher {
    pub fn with(mut self, url: &str, html: &str) -> Self {
        self.pages.insert(url.to_string(), html.to_string());
        self
    }
}

#[async_trait]
impl DocumentFetcher for FakeFetcher {
    async fn fetch(&self, url: &Url) -> Result<String> {
        self.pages
            .get(url.as_str())
            .cloned()
            .ok_or_else(|| EntityLensError::Retrieval(format!("{url}: HTTP 404")))
    }
}

pub fn doc(title: &str, content: &str, url: Option<&str>) -> RetrievedDocument {
    RetrievedDocument {
        title: title.to_string(),
        content: content.to_string(),
        url: url.map(String::from),
    }
}

pub fn temp_dir(label: &str) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!("el-{label}-{}", uuid::Uuid::now_v7()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}
