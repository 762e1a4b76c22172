// Headlines ticker fed by rss2json (https://rss2json.com/)

use crate::error::{DashboardError, Result};
use crate::http_fetch::HttpFetcher;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

#[derive(Debug, Clone, Deserialize)]
pub struct Rss2JsonResponse {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub items: Vec<RssItem>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RssItem {
    pub title: String,
    pub link: String,
    #[serde(rename = "pubDate")]
    pub pub_date: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Headline {
    pub title: String,
    pub link: String,
    pub published: String,
    pub summary: String,
}

static HTML_TAG: LazyLock<std::result::Result<Regex, regex::Error>> = LazyLock::new(|| Regex::new(r"<[^>]*>"));

fn strip_html(text: &str) -> Result<String> {
    let tags = HTML_TAG
        .as_ref()
        .map_err(|e| DashboardError::ParseError(format!("Invalid HTML tag pattern: {}", e)))?;
    Ok(tags
        .replace_all(text, " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" "))
}

impl Rss2JsonResponse {
    pub fn headlines(self) -> Result<Vec<Headline>> {
        if !self.status.eq_ignore_ascii_case("ok") {
            return Err(DashboardError::ParseError(format!(
                "rss2json returned status '{}': {}",
                self.status,
                self.message.unwrap_or_default()
            )));
        }

        let mut headlines = Vec::with_capacity(self.items.len());
        for item in self.items {
            let title = strip_html(&item.title)?;
            if title.is_empty() {
                continue;
            }
            headlines.push(Headline {
                title,
                link: item.link.trim().to_string(),
                published: item.pub_date,
                summary: strip_html(&item.description)?,
            });
        }
        Ok(headlines)
    }
}

pub fn fetch_headlines(fetcher: &HttpFetcher, feed_url: &str) -> Result<Vec<Headline>> {
    let response: Rss2JsonResponse = fetcher.get_json(feed_url)?;
    response.headlines()
}

/// Rotates through the current headlines, one per refresh tick.
#[derive(Debug, Clone, Default)]
pub struct NewsTicker {
    headlines: Vec<Headline>,
    cursor: usize,
}

impl NewsTicker {
    pub fn replace(&mut self, headlines: Vec<Headline>) {
        if self.cursor >= headlines.len() {
            self.cursor = 0;
        }
        self.headlines = headlines;
    }

    pub fn current(&self) -> Option<&Headline> {
        self.headlines.get(self.cursor)
    }

    /// Moves to the next headline (wrapping) and returns it.
    pub fn advance(&mut self) -> Option<&Headline> {
        if self.headlines.is_empty() {
            return None;
        }
        self.cursor = (self.cursor + 1) % self.headlines.len();
        self.current()
    }

    pub fn len(&self) -> usize {
        self.headlines.len()
    }

    pub fn position(&self) -> usize {
        self.cursor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headline(title: &str) -> Headline {
        Headline {
            title: title.to_string(),
            link: String::new(),
            published: String::new(),
            summary: String::new(),
        }
    }

    #[test]
    fn items_are_cleaned() {
        let response: Rss2JsonResponse = serde_json::from_str(
            r#"{"status":"ok","feed":{"title":"Franceinfo"},"items":[
                {"title":"  Grève RER A  ","link":" https://x.test/a ","pubDate":"2026-10-15 06:00:00","description":"<p>Trafic <b>très</b> perturbé</p>"},
                {"title":"<i></i>","link":"https://x.test/b"}
            ]}"#,
        )
        .unwrap();
        let headlines = response.headlines().unwrap();

        assert_eq!(headlines.len(), 1);
        assert_eq!(headlines[0].title, "Grève RER A");
        assert_eq!(headlines[0].link, "https://x.test/a");
        assert_eq!(headlines[0].summary, "Trafic très perturbé");
    }

    #[test]
    fn tag_pattern_is_shared_across_calls() {
        for _ in 0..3 {
            assert_eq!(strip_html("<a href='x'>Prix</a> d'<em>Amérique</em>").unwrap(), "Prix d' Amérique");
        }
        assert!(HTML_TAG.is_ok());
    }

    #[test]
    fn error_status_is_a_parse_error() {
        let response: Rss2JsonResponse =
            serde_json::from_str(r#"{"status":"error","message":"rss_url is invalid"}"#).unwrap();
        assert!(matches!(response.headlines(), Err(DashboardError::ParseError(_))));
    }

    #[test]
    fn ticker_wraps_and_resets() {
        let mut ticker = NewsTicker::default();
        assert!(ticker.advance().is_none());

        ticker.replace(vec![headline("a"), headline("b"), headline("c")]);
        assert_eq!(ticker.current().map(|h| h.title.as_str()), Some("a"));
        ticker.advance();
        ticker.advance();
        assert_eq!(ticker.current().map(|h| h.title.as_str()), Some("c"));
        assert_eq!(ticker.advance().map(|h| h.title.as_str()), Some("a"));

        ticker.advance();
        ticker.advance();
        ticker.replace(vec![headline("x")]);
        assert_eq!(ticker.position(), 0);
        assert_eq!(ticker.len(), 1);
    }
}
