use reqwest::Url;
use schemars::JsonSchema;
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;

use crate::error::DataSourceError;
use crate::models::{SearchHit, deserialize_flexible_count};

pub const DEFAULT_REGION: &str = "wt-wt";

#[derive(Debug, Deserialize, JsonSchema)]
pub struct InternetSearchInput {
    #[schemars(description = "The search query")]
    pub query: String,

    #[serde(default)]
    #[schemars(description = "DuckDuckGo region code (default \"wt-wt\", no region)")]
    pub region: Option<String>,

    #[serde(default, deserialize_with = "deserialize_flexible_count")]
    #[schemars(
        with = "Option<u32>",
        description = "Maximum number of results to return (default 5)"
    )]
    pub max_results: Option<usize>,
}

/// Pull organic results out of a DuckDuckGo HTML results page.
///
/// Ads and results without a link are skipped. Result links on that page go
/// through a `/l/?uddg=` redirect; the target URL is unwrapped from it.
pub fn parse_search(html: &str, max_results: usize) -> Result<Vec<SearchHit>, DataSourceError> {
    let result = selector("div.result")?;
    let link = selector("a.result__a")?;
    let snippet = selector(".result__snippet")?;

    let document = Html::parse_document(html);
    let hits = document
        .select(&result)
        .filter(|node| !node.value().classes().any(|class| class == "result--ad"))
        .filter_map(|node| {
            let anchor = node.select(&link).next()?;
            let href = anchor.value().attr("href").map(resolve_href)?;
            let body = node
                .select(&snippet)
                .next()
                .map(collapsed_text)
                .unwrap_or_default();
            Some(SearchHit {
                title: collapsed_text(anchor),
                href,
                body,
            })
        })
        .take(max_results)
        .collect();

    Ok(hits)
}

fn selector(css: &str) -> Result<Selector, DataSourceError> {
    Selector::parse(css)
        .map_err(|e| DataSourceError::Format(format!("Invalid result selector '{css}': {e}")))
}

fn collapsed_text(node: ElementRef<'_>) -> String {
    node.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn resolve_href(raw: &str) -> String {
    let absolute = match raw.strip_prefix("//") {
        Some(rest) => format!("https://{rest}"),
        None => raw.to_string(),
    };
    Url::parse(&absolute)
        .ok()
        .and_then(|url| {
            url.query_pairs()
                .find(|(key, _)| key == "uddg")
                .map(|(_, target)| target.into_owned())
        })
        .unwrap_or(absolute)
}
