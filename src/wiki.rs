use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use serde::Deserialize;

pub const DEFAULT_ENDPOINT: &str = "https://en.wikipedia.org/w/api.php";

const REQUEST_TIMEOUT_SECS: u64 = 10;

/// How a summary lookup resolved. A disambiguation page is reported together
/// with the article titles it links to, so the caller can retry one of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SummaryOutcome {
    Text(String),
    Disambiguation(Vec<String>),
    Missing,
}

pub trait WikiSource {
    /// Titles matching `query`, ordered by relevance.
    fn search(&self, query: &str, limit: u32) -> impl Future<Output = Result<Vec<String>>> + Send;

    /// Plain-text summary of `title`, at most `sentences` sentences long.
    fn summary(
        &self,
        title: &str,
        sentences: u8,
    ) -> impl Future<Output = Result<SummaryOutcome>> + Send;

    /// `count` titles drawn uniformly from the article namespace.
    fn random(&self, count: u32) -> impl Future<Output = Result<Vec<String>>> + Send;
}

/// MediaWiki action API client.
#[derive(Debug, Clone)]
pub struct WikiClient {
    http: reqwest::Client,
    endpoint: String,
}

impl WikiClient {
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .user_agent(concat!("trivia_bot/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
        })
    }

    async fn call<T: for<'de> Deserialize<'de>>(&self, params: &[(&str, &str)]) -> Result<T> {
        log::debug!("wiki request: {:?}", params);
        let resp = self
            .http
            .get(&self.endpoint)
            .query(&[("format", "json"), ("formatversion", "2")])
            .query(params)
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json::<T>().await?)
    }
}

impl WikiSource for WikiClient {
    async fn search(&self, query: &str, limit: u32) -> Result<Vec<String>> {
        let limit = limit.to_string();
        let resp: SearchResponse = self
            .call(&[
                ("action", "query"),
                ("list", "search"),
                ("srsearch", query),
                ("srlimit", &limit),
            ])
            .await?;
        Ok(resp
            .query
            .search
            .into_iter()
            .map(|hit| hit.title)
            .collect())
    }

    async fn summary(&self, title: &str, sentences: u8) -> Result<SummaryOutcome> {
        let sentences = sentences.to_string();
        // Links are requested up front: on a disambiguation page they are the
        // alternative article titles.
        let resp: PagesResponse = self
            .call(&[
                ("action", "query"),
                ("prop", "extracts|pageprops|links"),
                ("ppprop", "disambiguation"),
                ("plnamespace", "0"),
                ("pllimit", "50"),
                ("explaintext", "1"),
                ("exsentences", &sentences),
                ("redirects", "1"),
                ("titles", title),
            ])
            .await?;
        Ok(page_outcome(resp))
    }

    async fn random(&self, count: u32) -> Result<Vec<String>> {
        let count = count.to_string();
        let resp: RandomResponse = self
            .call(&[
                ("action", "query"),
                ("list", "random"),
                ("rnnamespace", "0"),
                ("rnlimit", &count),
            ])
            .await?;
        Ok(resp.query.random.into_iter().map(|p| p.title).collect())
    }
}

fn page_outcome(resp: PagesResponse) -> SummaryOutcome {
    let Some(page) = resp.query.pages.into_iter().next() else {
        return SummaryOutcome::Missing;
    };
    if page.missing {
        return SummaryOutcome::Missing;
    }
    if page
        .pageprops
        .as_ref()
        .is_some_and(|props| props.disambiguation.is_some())
    {
        return SummaryOutcome::Disambiguation(
            page.links.into_iter().map(|link| link.title).collect(),
        );
    }
    match page.extract {
        Some(text) if !text.trim().is_empty() => SummaryOutcome::Text(text),
        _ => SummaryOutcome::Missing,
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    query: SearchQuery,
}

#[derive(Debug, Default, Deserialize)]
struct SearchQuery {
    #[serde(default)]
    search: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    title: String,
}

#[derive(Debug, Deserialize)]
struct PagesResponse {
    #[serde(default)]
    query: PagesQuery,
}

#[derive(Debug, Default, Deserialize)]
struct PagesQuery {
    #[serde(default)]
    pages: Vec<Page>,
}

#[derive(Debug, Deserialize)]
struct Page {
    #[serde(default)]
    missing: bool,
    extract: Option<String>,
    pageprops: Option<PageProps>,
    #[serde(default)]
    links: Vec<Link>,
}

#[derive(Debug, Deserialize)]
struct PageProps {
    // The API reports the prop with an empty string value; presence is what
    // matters.
    disambiguation: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Link {
    title: String,
}

#[derive(Debug, Deserialize)]
struct RandomResponse {
    #[serde(default)]
    query: RandomQuery,
}

#[derive(Debug, Default, Deserialize)]
struct RandomQuery {
    #[serde(default)]
    random: Vec<RandomPage>,
}

#[derive(Debug, Deserialize)]
struct RandomPage {
    title: String,
}

#[cfg(test)]
pub mod testing {
    use std::collections::{BTreeMap, VecDeque};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use anyhow::{anyhow, bail, Result};

    use super::{SummaryOutcome, WikiSource};

    /// Canned wiki backend. Search responses can be queued per call; once the
    /// queue is drained the default list is served, and a missing default
    /// simulates a transport failure.
    pub struct MockWiki {
        pub search_queue: Mutex<VecDeque<Vec<String>>>,
        pub search_default: Option<Vec<String>>,
        pub summaries: BTreeMap<String, SummaryOutcome>,
        pub random_queue: Mutex<VecDeque<Vec<String>>>,
        pub random_titles: Vec<String>,
        pub random_err: bool,
        pub search_calls: AtomicU32,
    }

    impl Default for MockWiki {
        fn default() -> Self {
            Self {
                search_queue: Mutex::new(VecDeque::new()),
                search_default: Some(Vec::new()),
                summaries: BTreeMap::new(),
                random_queue: Mutex::new(VecDeque::new()),
                random_titles: Vec::new(),
                random_err: false,
                search_calls: AtomicU32::new(0),
            }
        }
    }

    impl MockWiki {
        pub fn queue_search(&self, titles: &[&str]) {
            self.search_queue
                .lock()
                .unwrap()
                .push_back(titles.iter().map(|t| t.to_string()).collect());
        }

        pub fn queue_random(&self, titles: &[&str]) {
            self.random_queue
                .lock()
                .unwrap()
                .push_back(titles.iter().map(|t| t.to_string()).collect());
        }

        pub fn with_summary(mut self, title: &str, outcome: SummaryOutcome) -> Self {
            self.summaries.insert(title.to_string(), outcome);
            self
        }

        pub fn search_calls(&self) -> u32 {
            self.search_calls.load(Ordering::SeqCst)
        }
    }

    impl WikiSource for MockWiki {
        async fn search(&self, _query: &str, _limit: u32) -> Result<Vec<String>> {
            self.search_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(next) = self.search_queue.lock().unwrap().pop_front() {
                return Ok(next);
            }
            self.search_default
                .clone()
                .ok_or_else(|| anyhow!("search offline"))
        }

        async fn summary(&self, title: &str, _sentences: u8) -> Result<SummaryOutcome> {
            Ok(self
                .summaries
                .get(title)
                .cloned()
                .unwrap_or(SummaryOutcome::Missing))
        }

        async fn random(&self, count: u32) -> Result<Vec<String>> {
            if self.random_err {
                bail!("random offline");
            }
            if let Some(next) = self.random_queue.lock().unwrap().pop_front() {
                return Ok(next);
            }
            Ok(self
                .random_titles
                .iter()
                .take(count as usize)
                .cloned()
                .collect())
        }
    }
}
