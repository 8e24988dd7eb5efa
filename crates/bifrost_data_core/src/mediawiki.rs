use std::collections::BTreeMap;
use std::thread::sleep;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use reqwest::Url;
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::HarvestConfig;

/// One `list=allredirects` row: the redirect page id and the title it points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectEntry {
    pub source_page_id: u64,
    pub target_title: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Continuation {
    pub arcontinue: String,
    pub continue_token: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RedirectPage {
    pub entries: Vec<RedirectEntry>,
    pub continuation: Option<Continuation>,
}

pub trait RedirectApi {
    fn list_redirects(&mut self, continuation: Option<&Continuation>) -> Result<RedirectPage>;
    fn page_titles(&mut self, page_ids: &[u64]) -> Result<Vec<(u64, String)>>;
    fn request_count(&self) -> usize;
}

pub trait HttpTransport {
    fn get_json(&mut self, url: &Url) -> Result<Value>;
}

pub struct ReqwestTransport {
    client: Client,
    user_agent: String,
}

impl ReqwestTransport {
    pub fn new(config: &HarvestConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .context("failed to build MediaWiki HTTP client")?;
        Ok(Self {
            client,
            user_agent: config.user_agent.clone(),
        })
    }
}

impl HttpTransport for ReqwestTransport {
    fn get_json(&mut self, url: &Url) -> Result<Value> {
        let response = self
            .client
            .get(url.clone())
            .header("User-Agent", self.user_agent.clone())
            .send()
            .context("failed to call MediaWiki API")?;
        let status = response.status();
        if !status.is_success() {
            bail!("MediaWiki API request failed with HTTP {status}");
        }
        response
            .json()
            .context("failed to decode MediaWiki API JSON response")
    }
}

pub struct MediaWikiClient<T = ReqwestTransport> {
    transport: T,
    api_url: Url,
    max_attempts: u32,
    retry_base_delay: Duration,
    request_count: usize,
}

impl MediaWikiClient<ReqwestTransport> {
    pub fn new(config: &HarvestConfig) -> Result<Self> {
        Self::with_transport(ReqwestTransport::new(config)?, config)
    }
}

impl<T: HttpTransport> MediaWikiClient<T> {
    pub fn with_transport(transport: T, config: &HarvestConfig) -> Result<Self> {
        let api_url = Url::parse(&config.api_url)
            .with_context(|| format!("invalid MediaWiki API URL: {}", config.api_url))?;
        Ok(Self {
            transport,
            api_url,
            max_attempts: config.max_attempts.max(1),
            retry_base_delay: config.retry_base_delay,
            request_count: 0,
        })
    }

    /// GET `params` (plus `format=json`), retrying failed attempts with
    /// exponential backoff. Exhausting the attempt budget is fatal and
    /// names the URL.
    pub fn api_get(&mut self, params: &[(&str, String)]) -> Result<Value> {
        let url = self.request_url(params);

        for attempt in 1..=self.max_attempts {
            self.request_count += 1;
            debug!(%url, attempt, "MediaWiki GET");
            let outcome = self
                .transport
                .get_json(&url)
                .and_then(reject_error_envelope);
            match outcome {
                Ok(payload) => return Ok(payload),
                Err(error) => {
                    warn!("attempt {attempt} failed: {error:#}");
                    if attempt < self.max_attempts {
                        sleep(self.retry_delay(attempt));
                    }
                }
            }
        }

        bail!("Failed after {} attempts: {url}", self.max_attempts)
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn request_url(&self, params: &[(&str, String)]) -> Url {
        let mut url = self.api_url.clone();
        {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in params {
                if !value.is_empty() {
                    pairs.append_pair(key, value);
                }
            }
            pairs.append_pair("format", "json");
        }
        url
    }

    fn retry_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.retry_base_delay.saturating_mul(1u32 << exponent)
    }
}

impl<T: HttpTransport> RedirectApi for MediaWikiClient<T> {
    fn list_redirects(&mut self, continuation: Option<&Continuation>) -> Result<RedirectPage> {
        let mut params = vec![
            ("action", "query".to_string()),
            ("list", "allredirects".to_string()),
            ("arprop", "ids|title".to_string()),
            ("arnamespace", "0".to_string()),
            ("arlimit", "max".to_string()),
        ];
        if let Some(continuation) = continuation {
            params.push(("arcontinue", continuation.arcontinue.clone()));
            params.push(("continue", continuation.continue_token.clone()));
        }

        let response = self.api_get(&params)?;
        let parsed: QueryResponse = serde_json::from_value(response)
            .context("failed to decode allredirects API response")?;

        let entries = parsed
            .query
            .allredirects
            .into_iter()
            .filter_map(|item| {
                let source_page_id = item.fromid.and_then(|id| u64::try_from(id).ok())?;
                let target_title = item.title?;
                if source_page_id == 0 || target_title.is_empty() {
                    return None;
                }
                Some(RedirectEntry {
                    source_page_id,
                    target_title,
                })
            })
            .collect();

        let continuation = parsed.continuation.and_then(|cont| {
            cont.arcontinue.map(|arcontinue| Continuation {
                arcontinue,
                continue_token: cont.continue_token.unwrap_or_else(|| "-||".to_string()),
            })
        });

        Ok(RedirectPage {
            entries,
            continuation,
        })
    }

    fn page_titles(&mut self, page_ids: &[u64]) -> Result<Vec<(u64, String)>> {
        let joined = page_ids
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("|");
        let params = vec![
            ("action", "query".to_string()),
            ("pageids", joined),
            ("prop", "info".to_string()),
        ];

        let response = self.api_get(&params)?;
        let parsed: QueryResponse = serde_json::from_value(response)
            .context("failed to decode page info API response")?;

        let mut titles = Vec::new();
        for (key, page) in parsed.query.pages {
            let page_id = match key.parse::<u64>() {
                Ok(value) if value > 0 => value,
                _ => continue,
            };
            if let Some(title) = page.title {
                titles.push((page_id, title));
            }
        }
        Ok(titles)
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

fn reject_error_envelope(payload: Value) -> Result<Value> {
    if let Some(error) = payload.get("error") {
        let code = error
            .get("code")
            .and_then(Value::as_str)
            .unwrap_or("unknown_error");
        let info = error
            .get("info")
            .and_then(Value::as_str)
            .unwrap_or("unknown info");
        bail!("MediaWiki API error [{code}]: {info}");
    }
    Ok(payload)
}

#[derive(Debug, Deserialize, Default)]
struct QueryResponse {
    #[serde(default)]
    query: QueryPayload,
    #[serde(default, rename = "continue")]
    continuation: Option<ContinuationPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct QueryPayload {
    #[serde(default)]
    allredirects: Vec<RedirectQueryItem>,
    #[serde(default)]
    pages: BTreeMap<String, PageInfoItem>,
}

#[derive(Debug, Deserialize, Default)]
struct ContinuationPayload {
    arcontinue: Option<String>,
    #[serde(rename = "continue")]
    continue_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RedirectQueryItem {
    fromid: Option<i64>,
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PageInfoItem {
    title: Option<String>,
}
