//! External capabilities used by the pipeline: a language model and web search.
//!
//! Both are traits so the pipeline can be driven by fakes in tests. The
//! shipped HTTP clients carry per-request timeouts and retry transient
//! failures (connect errors, timeouts, HTTP 429 and 5xx) with jittered
//! exponential backoff.

mod llm;
pub mod retry;
mod search;

pub use llm::{LanguageModel, OpenAiCompatClient};
pub use search::{SearchProvider, SearxngClient};
