use rand::{rng, Rng};
use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION, LINK};
use reqwest::{Response, StatusCode, Url};
use serde::Deserialize;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

use crate::error_handling::{Result, SpiderError};
use crate::period::Period;

const USER_AGENT: &str = "repo-spider/0.1 (repository dataset crawler)";
const API_VERSION: &str = "2022-11-28";
const MAX_RATE_LIMIT_RETRIES: u32 = 6;
const FALLBACK_BRANCH: &str = "master";

fn jitter(ms: u64) -> Duration {
    let j = rng().random_range(0..=ms / 2);
    Duration::from_millis(ms + j)
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// One search result item. Only the fields the crawler reads are kept.
#[derive(Debug, Clone, Deserialize)]
pub struct RepositoryCandidate {
    pub id: u64,
    pub name: String,
    pub full_name: String,
    pub stargazers_count: u64,
    pub fork: bool,
    pub clone_url: String,
    pub description: Option<String>,
    /// Templated, e.g. `https://api.github.com/repos/o/r/git/trees{/sha}`.
    pub trees_url: String,
    #[serde(default)]
    pub default_branch: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    items: Vec<RepositoryCandidate>,
}

#[derive(Debug)]
pub struct SearchPage {
    pub items: Vec<RepositoryCandidate>,
    pub next: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TreeNode {
    pub path: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl TreeNode {
    pub fn is_file(&self) -> bool {
        self.kind == "blob"
    }
}

#[derive(Debug, Deserialize)]
struct TreeResponse {
    tree: Option<Vec<TreeNode>>,
}

/// Tree-listing request rendered from the templated `trees_url`:
/// `<base>/<branch>?recursive=1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeRequest {
    base: String,
    branch: String,
    recursive: bool,
}

impl TreeRequest {
    pub fn for_candidate(candidate: &RepositoryCandidate) -> Self {
        let base = match candidate.trees_url.find('{') {
            Some(idx) => &candidate.trees_url[..idx],
            None => candidate.trees_url.as_str(),
        };
        Self {
            base: base.trim_end_matches('/').to_string(),
            branch: candidate
                .default_branch
                .clone()
                .unwrap_or_else(|| FALLBACK_BRANCH.to_string()),
            recursive: true,
        }
    }

    pub fn url(&self) -> Result<Url> {
        let mut url = Url::parse(&format!("{}/{}", self.base, self.branch))
            .map_err(|e| SpiderError::Config(format!("Bad tree URL {}: {}", self.base, e)))?;
        if self.recursive {
            url.query_pairs_mut().append_pair("recursive", "1");
        }
        Ok(url)
    }
}

/// First page of a month-scoped repository search, most starred first.
pub fn search_url(api_base: &str, language: &str, period: &Period, per_page: u32) -> Result<String> {
    let endpoint = format!("{}/search/repositories", api_base.trim_end_matches('/'));
    let query = format!("language:{} created:{}", language, period.created_range());
    let url = Url::parse_with_params(
        &endpoint,
        &[
            ("q", query),
            ("sort", "stars".to_string()),
            ("order", "desc".to_string()),
            ("per_page", per_page.to_string()),
        ],
    )
    .map_err(|e| SpiderError::Config(format!("Bad search endpoint {}: {}", endpoint, e)))?;
    Ok(url.to_string())
}

/// URL carried by the `rel="next"` entry of a `Link` header, if any.
fn next_link(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(LINK)?.to_str().ok()?;
    value.split(',').find_map(|part| {
        let mut segments = part.split(';');
        let url = segments.next()?.trim().strip_prefix('<')?.strip_suffix('>')?;
        segments
            .any(|p| p.trim() == r#"rel="next""#)
            .then(|| url.to_string())
    })
}

#[derive(Clone)]
pub struct GitHubClient {
    client: reqwest::Client,
    token: String,
}

impl GitHubClient {
    pub fn new(token: String) -> Result<Self> {
        let client = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self { client, token })
    }

    /// GET with auth headers. 403/429 are retried with backoff; an exhausted
    /// rate limit on a successful response sleeps until the reset time.
    async fn get(&self, url: &str) -> Result<Response> {
        let mut attempt = 0u32;
        loop {
            let resp = self
                .client
                .get(url)
                .header(ACCEPT, "application/vnd.github+json")
                .header("X-GitHub-Api-Version", API_VERSION)
                .header(AUTHORIZATION, format!("Bearer {}", self.token))
                .send()
                .await?;
            let status = resp.status();
            let headers = resp.headers();

            if status.is_success() {
                let remaining = headers
                    .get("X-RateLimit-Remaining")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.parse::<i64>().ok());
                let reset = headers
                    .get("X-RateLimit-Reset")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.parse::<u64>().ok());
                if let (Some(0), Some(reset)) = (remaining, reset) {
                    let wait = reset.saturating_sub(now_secs());
                    warn!("Rate limit exhausted; sleeping {}s until reset", wait);
                    tokio::time::sleep(jitter(wait * 1000)).await;
                }
                return Ok(resp);
            }

            let rate_limited =
                status == StatusCode::FORBIDDEN || status == StatusCode::TOO_MANY_REQUESTS;
            if !rate_limited || attempt >= MAX_RATE_LIMIT_RETRIES {
                return Ok(resp);
            }
            attempt += 1;

            let retry_after = headers
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok());
            let wait = match retry_after {
                Some(sec) => {
                    warn!("{} received; Retry-After={}s. Backing off.", status, sec);
                    sec
                }
                None => {
                    let backoff = 2u64.saturating_pow(attempt); // 2,4,8,16,32,64
                    warn!("{} received; exponential backoff {}s (attempt {})", status, backoff, attempt);
                    backoff
                }
            };
            tokio::time::sleep(jitter(wait * 1000)).await;
        }
    }

    pub async fn fetch_search_page(&self, url: &str) -> Result<SearchPage> {
        info!("Requests url: {}", url);
        let resp = self.get(url).await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SpiderError::Api { status: status.as_u16(), body });
        }

        let next = next_link(resp.headers());
        let body: SearchResponse = serde_json::from_str(&resp.text().await?)?;
        debug!("Search page returned {} items (next page: {})", body.items.len(), next.is_some());
        Ok(SearchPage { items: body.items, next })
    }

    /// `None` when the service has no tree for the repository (404 for a
    /// missing branch, 409 for an empty repository, or an unreadable body).
    /// Any other error status is returned as [`SpiderError::Api`].
    pub async fn fetch_tree(&self, candidate: &RepositoryCandidate) -> Result<Option<Vec<TreeNode>>> {
        let url = TreeRequest::for_candidate(candidate).url()?;
        let resp = self.get(url.as_str()).await?;
        let status = resp.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::CONFLICT {
            debug!("No tree for {} ({})", candidate.full_name, status);
            return Ok(None);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SpiderError::Api { status: status.as_u16(), body });
        }

        let text = resp.text().await?;
        match serde_json::from_str::<TreeResponse>(&text) {
            Ok(body) => Ok(body.tree),
            Err(e) => {
                warn!("Unreadable tree listing for {}: {}", candidate.full_name, e);
                Ok(None)
            }
        }
    }
}
