use anyhow::{Context, Result};
use std::collections::HashSet;

use crate::util::url_path;

/// Suffix of the `rel` attribute CMR puts on downloadable data links.
const DATA_REL_SUFFIX: &str = "/data#";

#[derive(Debug, serde::Deserialize)]
pub(crate) struct GranuleFeed {
    feed: Feed,
}

#[derive(Debug, Default, serde::Deserialize)]
struct Feed {
    #[serde(default)]
    entry: Vec<GranuleEntry>,
}

#[derive(Debug, serde::Deserialize)]
pub(crate) struct GranuleEntry {
    #[serde(default)]
    pub(crate) title: Option<String>,
    #[serde(default)]
    links: Vec<GranuleLink>,
}

#[derive(Debug, serde::Deserialize)]
struct GranuleLink {
    href: String,
    #[serde(default)]
    rel: Option<String>,
    #[serde(default)]
    inherited: bool,
}

impl GranuleFeed {
    pub(crate) fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("failed to parse CMR granule feed")
    }

    pub(crate) fn into_entries(self) -> Vec<GranuleEntry> {
        self.feed.entry
    }
}

impl GranuleEntry {
    fn data_urls(&self) -> impl Iterator<Item = &str> {
        self.links
            .iter()
            .filter(|l| !l.inherited)
            .filter(|l| {
                l.rel
                    .as_deref()
                    .is_some_and(|rel| rel.ends_with(DATA_REL_SUFFIX))
            })
            .map(|l| l.href.trim())
            .filter(|href| href.starts_with("https://") || href.starts_with("http://"))
    }
}

/// Collects the data URLs of `entries` in order, without duplicates.
pub(crate) fn granule_urls(entries: &[GranuleEntry], extension: Option<&str>) -> Vec<String> {
    let extension = extension.map(|e| e.to_ascii_lowercase());
    let mut seen: HashSet<&str> = HashSet::new();
    let mut out: Vec<String> = Vec::new();

    for entry in entries {
        for url in entry.data_urls() {
            if let Some(ext) = &extension {
                if !url_path(url).to_ascii_lowercase().ends_with(ext.as_str()) {
                    continue;
                }
            }
            if seen.insert(url) {
                out.push(url.to_string());
            }
        }
    }
    out
}

/// One page of results plus the `CMR-Search-After` token for the next one.
pub(crate) struct Page {
    pub(crate) entries: Vec<GranuleEntry>,
    pub(crate) search_after: Option<String>,
}

/// Drives CMR's search-after paging until a page comes back empty or without a token.
pub(crate) fn collect_pages<F>(mut fetch: F) -> Result<Vec<GranuleEntry>>
where
    F: FnMut(Option<&str>) -> Result<Page>,
{
    let mut all = Vec::new();
    let mut token: Option<String> = None;

    loop {
        let page = fetch(token.as_deref())?;
        let n = page.entries.len();
        all.extend(page.entries);
        log::debug!("received {} granule(s), {} so far", n, all.len());

        match page.search_after {
            Some(next) if n > 0 => token = Some(next),
            _ => return Ok(all),
        }
    }
}
