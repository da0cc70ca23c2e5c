//! RSS feed source: fetches a feed, stores new items and summarizes them.

use super::Source;
use crate::news_store::{NewArticle, NewsStore};
use crate::summarizer::SummarizerPool;
use anyhow::{Context, Result};
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

lazy_static! {
    static ref ITEM_RE: Regex = Regex::new(r"(?s)<item\b[^>]*>(.*?)</item>").unwrap();
    static ref TITLE_RE: Regex = Regex::new(r"(?s)<title\b[^>]*>(.*?)</title>").unwrap();
    static ref LINK_RE: Regex = Regex::new(r"(?s)<link\b[^>]*>(.*?)</link>").unwrap();
    static ref DESCRIPTION_RE: Regex =
        Regex::new(r"(?s)<description\b[^>]*>(.*?)</description>").unwrap();
    static ref CDATA_RE: Regex = Regex::new(r"(?s)^\s*<!\[CDATA\[(.*?)\]\]>\s*$").unwrap();
    static ref MARKUP_RE: Regex = Regex::new(r"(?s)<[^>]*>").unwrap();
}

/// One `<item>` of an RSS document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedItem {
    pub title: String,
    pub link: String,
    pub description: Option<String>,
}

/// Extract the items of an RSS document. Items without a link are dropped;
/// a missing title falls back to the link.
pub fn parse_feed_items(document: &str) -> Vec<FeedItem> {
    ITEM_RE
        .captures_iter(document)
        .filter_map(|item| {
            let body = item.get(1)?.as_str();
            let link = extract_text(&LINK_RE, body).filter(|l| !l.is_empty())?;
            let title = extract_text(&TITLE_RE, body)
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| link.clone());
            let description = extract_text(&DESCRIPTION_RE, body)
                .map(|d| MARKUP_RE.replace_all(&d, " ").into_owned())
                .map(|d| d.split_whitespace().collect::<Vec<_>>().join(" "))
                .filter(|d| !d.is_empty());
            Some(FeedItem {
                title,
                link,
                description,
            })
        })
        .collect()
}

fn extract_text(re: &Regex, item: &str) -> Option<String> {
    let raw = re.captures(item)?.get(1)?.as_str();
    let text = match CDATA_RE.captures(raw).and_then(|c| c.get(1)) {
        Some(cdata) => cdata.as_str().to_string(),
        None => decode_entities(raw),
    };
    Some(text.trim().to_string())
}

fn decode_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

pub struct HttpFeedSource {
    name: String,
    url: String,
    topic: Option<String>,
    client: Client,
    news_store: Arc<dyn NewsStore>,
    summarizer_pool: Arc<SummarizerPool>,
}

impl HttpFeedSource {
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        topic: Option<String>,
        news_store: Arc<dyn NewsStore>,
        summarizer_pool: Arc<SummarizerPool>,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        let mut builder =
            Client::builder().user_agent(concat!("newshub-server/", env!("CARGO_PKG_VERSION")));
        // Requests only time out when the scrape timeout is configured
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().context("Failed to build HTTP client")?;

        Ok(Self {
            name: name.into(),
            url: url.into(),
            topic,
            client,
            news_store,
            summarizer_pool,
        })
    }

    async fn download(&self) -> Result<String> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .with_context(|| format!("Failed to fetch {}", self.url))?
            .error_for_status()
            .with_context(|| format!("Feed {} returned an error status", self.url))?;
        response
            .text()
            .await
            .with_context(|| format!("Failed to read feed body from {}", self.url))
    }

    /// Hand the bodies of freshly inserted articles to the summarizer pool and
    /// store the results. Summarization failures are logged, the articles
    /// stay stored without a summary.
    async fn summarize_new_articles(&self, new_articles: Vec<(i64, String)>) {
        let pending = new_articles.into_iter().map(|(id, body)| {
            let summary = self.summarizer_pool.submit(body);
            async move { (id, summary.await) }
        });

        for (id, result) in futures::future::join_all(pending).await {
            match result {
                Ok(summary) => {
                    if let Err(e) = self.news_store.set_article_summary(id, &summary) {
                        error!("Failed to store summary of article {}: {:#}", id, e);
                    }
                }
                Err(e) => warn!("Failed to summarize article {}: {}", id, e),
            }
        }
    }
}

#[async_trait]
impl Source for HttpFeedSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> Result<()> {
        let document = self.download().await?;
        let items = parse_feed_items(&document);
        let fetched_at = chrono::Utc::now().timestamp();
        debug!("Feed {} returned {} items", self.name, items.len());

        let total = items.len();
        let mut new_articles = Vec::new();
        for item in items {
            let article = NewArticle {
                link: item.link,
                title: item.title,
                source: self.name.clone(),
                topic: self.topic.clone(),
                body: item.description,
                fetched_at,
            };
            let inserted = self
                .news_store
                .insert_article(&article)
                .with_context(|| format!("Failed to store article {}", article.link))?;
            if let (Some(id), Some(body)) = (inserted, article.body) {
                new_articles.push((id, body));
            }
        }

        info!(
            "Feed {}: {} items, {} new with content",
            self.name,
            total,
            new_articles.len()
        );
        self.summarize_new_articles(new_articles).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::news_store::SqliteNewsStore;
    use crate::summarizer::{LeadSentencesSummarizer, Summarizer, SummarizerFactory};
    use axum::{http::StatusCode, routing::get, Router};
    use tempfile::TempDir;

    const FEED: &str = r#"<?xml version="1.0"?>
<rss version="2.0">
  <channel>
    <title>Example wire</title>
    <item>
      <title>Rates &amp; markets</title>
      <link>https://news.example/rates</link>
      <description><![CDATA[<p>Rates held steady.</p> Analysts expected it. Bonds moved little.]]></description>
    </item>
    <item>
      <title>No link here</title>
      <description>Dropped.</description>
    </item>
    <item>
      <link>https://news.example/untitled</link>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn test_parse_feed_items() {
        let items = parse_feed_items(FEED);
        assert_eq!(items.len(), 2);

        assert_eq!(items[0].title, "Rates & markets");
        assert_eq!(items[0].link, "https://news.example/rates");
        assert_eq!(
            items[0].description.as_deref(),
            Some("Rates held steady. Analysts expected it. Bonds moved little.")
        );

        assert_eq!(items[1].title, "https://news.example/untitled");
        assert_eq!(items[1].description, None);
    }

    #[test]
    fn test_parse_non_feed_document() {
        assert!(parse_feed_items("<html><body>nope</body></html>").is_empty());
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}/feed.xml", addr)
    }

    fn test_source(
        url: String,
        temp_dir: &TempDir,
        timeout: Option<Duration>,
    ) -> (HttpFeedSource, Arc<SqliteNewsStore>, Arc<SummarizerPool>) {
        let store = Arc::new(SqliteNewsStore::new(temp_dir.path().join("news.db")).unwrap());
        let factory: SummarizerFactory =
            Arc::new(|| Box::new(LeadSentencesSummarizer::new(1)) as Box<dyn Summarizer>);
        let pool = Arc::new(SummarizerPool::new(2, factory).unwrap());
        let source = HttpFeedSource::new(
            "wire",
            url,
            Some("finance".to_string()),
            store.clone(),
            pool.clone(),
            timeout,
        )
        .unwrap();
        (source, store, pool)
    }

    #[tokio::test]
    async fn test_fetch_stores_and_summarizes_new_items() {
        let url = serve(Router::new().route("/feed.xml", get(|| async { FEED }))).await;
        let temp_dir = TempDir::new().unwrap();
        let (source, store, pool) = test_source(url, &temp_dir, None);

        source.fetch().await.unwrap();
        assert_eq!(store.count_articles().unwrap(), 2);

        let article = store.get_article(1).unwrap().unwrap();
        assert_eq!(article.source, "wire");
        assert_eq!(article.topic.as_deref(), Some("finance"));
        assert_eq!(article.summary.as_deref(), Some("Rates held steady."));

        // Second fetch of the same feed inserts nothing new
        source.fetch().await.unwrap();
        assert_eq!(store.count_articles().unwrap(), 2);
        assert_eq!(pool.stats().completed, 1);

        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_fetch_fails_on_error_status() {
        let url = serve(Router::new().route(
            "/feed.xml",
            get(|| async { (StatusCode::BAD_GATEWAY, "upstream down") }),
        ))
        .await;
        let temp_dir = TempDir::new().unwrap();
        let (source, store, _pool) = test_source(url, &temp_dir, None);

        assert!(source.fetch().await.is_err());
        assert_eq!(store.count_articles().unwrap(), 0);
    }

    fn slow_feed() -> Router {
        Router::new().route(
            "/feed.xml",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                FEED
            }),
        )
    }

    #[tokio::test]
    async fn test_configured_timeout_fails_slow_fetch() {
        let url = serve(slow_feed()).await;
        let temp_dir = TempDir::new().unwrap();
        let (source, store, pool) =
            test_source(url, &temp_dir, Some(Duration::from_millis(200)));

        let started = std::time::Instant::now();
        assert!(source.fetch().await.is_err());
        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(store.count_articles().unwrap(), 0);

        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_fetch_waits_without_configured_timeout() {
        let url = serve(slow_feed()).await;
        let temp_dir = TempDir::new().unwrap();
        let (source, _store, pool) = test_source(url, &temp_dir, None);

        let pending = tokio::time::timeout(Duration::from_millis(700), source.fetch()).await;
        assert!(pending.is_err(), "fetch settled before the feed answered");

        pool.shutdown().await;
    }
}
