//! Website ingestion for training: the start page plus a handful of pages it
//! links to on the same host, reduced to visible text.

use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::{Client, Url};
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::training::html_to_text;

/// Extra same-site pages fetched after the start page.
pub const MAX_LINKED_PAGES: usize = 8;
/// Linked pages with less visible text than this are treated as chrome.
pub const MIN_PAGE_CHARS: usize = 100;
pub const PAGE_SEPARATOR: &str = "\n\n---PAGE SEPARATOR---\n\n";

const USER_AGENT: &str = "Mozilla/5.0 (compatible; leadflow-trainer/0.1)";

#[derive(Debug, Error)]
pub enum WebsiteError {
    #[error("invalid website address `{0}`")]
    InvalidUrl(String),
    #[error("failed to fetch `{url}`: {message}")]
    Fetch { url: String, message: String },
    #[error("website `{0}` has no readable text")]
    Empty(String),
}

/// Retrieves raw HTML for one page.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_page(&self, url: &Url) -> Result<String, WebsiteError>;
}

pub struct HttpPageFetcher {
    client: Client,
}

impl HttpPageFetcher {
    pub fn new(timeout: Duration) -> Result<Self, WebsiteError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|error| WebsiteError::Fetch {
                url: String::new(),
                message: format!("failed to build HTTP client: {error}"),
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch_page(&self, url: &Url) -> Result<String, WebsiteError> {
        let failed = |message: String| WebsiteError::Fetch { url: url.to_string(), message };
        let response =
            self.client.get(url.clone()).send().await.map_err(|error| failed(error.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(failed(format!("HTTP {}", status.as_u16())));
        }
        response.text().await.map_err(|error| failed(error.to_string()))
    }
}

/// Parses an operator-supplied address. A missing scheme means `https`.
pub fn start_url(raw: &str) -> Result<Url, WebsiteError> {
    let trimmed = raw.trim();
    let candidate = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };
    match Url::parse(&candidate) {
        Ok(url) if url.host_str().is_some_and(|host| !host.is_empty()) => Ok(url),
        _ => Err(WebsiteError::InvalidUrl(trimmed.to_string())),
    }
}

static ANCHOR_HREF: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#"(?i)<a\s[^>]*?href\s*=\s*["']([^"']+)["']"#).ok());

/// Same-host page links in document order, without query, fragment or
/// trailing slash, excluding the page itself. At most [`MAX_LINKED_PAGES`].
pub fn same_site_links(html: &str, page: &Url) -> Vec<Url> {
    let Some(pattern) = ANCHOR_HREF.as_ref() else {
        return Vec::new();
    };
    let own = canonical(page.clone());
    let mut links: Vec<Url> = Vec::new();
    for capture in pattern.captures_iter(html) {
        let href = capture[1].trim();
        let lowered = href.to_ascii_lowercase();
        if href.starts_with('#')
            || ["mailto:", "tel:", "javascript:"].iter().any(|prefix| lowered.starts_with(prefix))
        {
            continue;
        }
        let Ok(resolved) = page.join(href) else {
            continue;
        };
        if !matches!(resolved.scheme(), "http" | "https") || resolved.host_str() != page.host_str()
        {
            continue;
        }
        let link = canonical(resolved);
        if link != own && !links.contains(&link) {
            links.push(link);
            if links.len() == MAX_LINKED_PAGES {
                break;
            }
        }
    }
    links
}

fn canonical(mut url: Url) -> Url {
    url.set_query(None);
    url.set_fragment(None);
    let trimmed = url.path().trim_end_matches('/').to_string();
    url.set_path(&trimmed);
    url
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SiteText {
    pub text: String,
    pub pages: usize,
}

/// Fetches the start page and its same-site links concurrently. Only the
/// start page is required; linked pages that fail or are too thin are skipped.
pub async fn collect_site_text(
    fetcher: Arc<dyn PageFetcher>,
    raw_url: &str,
) -> Result<SiteText, WebsiteError> {
    let start = start_url(raw_url)?;
    let html = fetcher.fetch_page(&start).await?;
    let links = same_site_links(&html, &start);
    debug!(
        event_name = "engine.training.website_links",
        url = %start,
        links = links.len(),
        "collected same-site links"
    );

    let mut tasks = JoinSet::new();
    for (index, link) in links.into_iter().enumerate() {
        let fetcher = fetcher.clone();
        tasks.spawn(async move {
            let result = fetcher.fetch_page(&link).await;
            (index, link, result)
        });
    }

    let mut linked = BTreeMap::new();
    while let Some(joined) = tasks.join_next().await {
        let Ok((index, link, result)) = joined else {
            continue;
        };
        match result {
            Ok(page) => {
                let text = html_to_text(&page);
                if text.len() > MIN_PAGE_CHARS {
                    linked.insert(index, text);
                }
            }
            Err(error) => warn!(
                event_name = "engine.training.website_page_failed",
                url = %link,
                error = %error,
                "skipping linked page"
            ),
        }
    }

    let mut sections = vec![html_to_text(&html)];
    sections.extend(linked.into_values());
    sections.retain(|section| !section.is_empty());
    if sections.is_empty() {
        return Err(WebsiteError::Empty(start.to_string()));
    }

    info!(
        event_name = "engine.training.website_fetched",
        url = %start,
        pages = sections.len(),
        "website text collected"
    );
    Ok(SiteText { pages: sections.len(), text: sections.join(PAGE_SEPARATOR) })
}
