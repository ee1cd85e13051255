// src/ingest/feeds.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quick_xml::de::from_str;
use serde::Deserialize;
use time::{format_description::well_known::Rfc2822, OffsetDateTime};

use crate::ingest::normalize_text;
use crate::ingest::types::{FeedSource, RawItem};

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
    source: Option<Source>,
}

/// `<source url="...">Publisher</source>` as emitted by aggregator feeds.
#[derive(Debug, Deserialize)]
struct Source {
    #[serde(rename = "$text")]
    name: Option<String>,
}

fn parse_rfc2822(ts: &str) -> Option<DateTime<Utc>> {
    OffsetDateTime::parse(ts.trim(), &Rfc2822)
        .ok()
        .and_then(|dt| DateTime::from_timestamp(dt.unix_timestamp(), 0))
}

/// Host of the link minus a leading `www.`, used when a feed names no publisher.
pub fn host_of(link: &str) -> Option<String> {
    url::Url::parse(link)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.trim_start_matches("www.").to_string()))
}

/// Parse an RSS 2.0 document into raw items.
pub fn parse_rss(xml: &str) -> Result<Vec<RawItem>> {
    let rss: Rss = from_str(xml).context("parsing rss xml")?;
    let mut out = Vec::with_capacity(rss.channel.item.len());

    for it in rss.channel.item {
        let title = normalize_text(it.title.as_deref().unwrap_or_default());
        let link = it.link.as_deref().unwrap_or_default().trim().to_string();
        if title.is_empty() || link.is_empty() {
            continue;
        }
        let publisher_hint = it
            .source
            .and_then(|s| s.name)
            .map(|s| normalize_text(&s))
            .filter(|s| !s.is_empty())
            .or_else(|| host_of(&link));
        out.push(RawItem {
            title,
            snippet: normalize_text(it.description.as_deref().unwrap_or_default()),
            publisher_hint,
            published_at: it.pub_date.as_deref().and_then(parse_rfc2822),
            link,
        });
    }
    Ok(out)
}

enum Origin {
    Fixture(String),
    Remote {
        url: String,
        client: reqwest::Client,
    },
}

/// RSS feed read either from a fixture string or over HTTP.
pub struct RssFeed {
    name: String,
    origin: Origin,
}

impl RssFeed {
    pub fn from_fixture(name: &str, content: &str) -> Self {
        Self {
            name: name.to_string(),
            origin: Origin::Fixture(content.to_string()),
        }
    }

    pub fn from_url(url: &str, timeout: std::time::Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("market-news-digest/0.1")
            .build()?;
        Ok(Self {
            name: host_of(url).unwrap_or_else(|| url.to_string()),
            origin: Origin::Remote {
                url: url.to_string(),
                client,
            },
        })
    }
}

#[async_trait]
impl FeedSource for RssFeed {
    async fn fetch_latest(&self) -> Result<Vec<RawItem>> {
        let body = match &self.origin {
            Origin::Fixture(s) => s.clone(),
            Origin::Remote { url, client } => client
                .get(url)
                .send()
                .await
                .with_context(|| format!("fetching feed {url}"))?
                .error_for_status()?
                .text()
                .await?,
        };
        let items = parse_rss(&body)?;
        tracing::debug!(target: "ingest", feed = %self.name, items = items.len(), "feed parsed");
        Ok(items)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
