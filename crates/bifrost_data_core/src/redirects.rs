//! Two-phase redirect harvest: page through `list=allredirects` for
//! (redirect page id, target title) pairs, then resolve the ids to
//! titles through `prop=info`, since the listing cannot return source
//! titles directly.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::thread::sleep;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::config::HarvestConfig;
use crate::mediawiki::{MediaWikiClient, RedirectApi, RedirectEntry};

/// `prop=info` accepts at most 50 page ids per request.
pub const PAGE_ID_BATCH_SIZE: usize = 50;
const BATCH_PROGRESS_INTERVAL: usize = 10;

pub const REDIRECTS_DESCRIPTION: &str =
    "PsychonautWiki redirect mappings: target -> [source aliases]";

pub type PageTitleIndex = HashMap<u64, String>;

/// Target title -> sorted, deduplicated source aliases, ordered by target.
pub type RedirectMap = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HarvestPacing {
    pub page_delay: Duration,
    pub batch_delay: Duration,
}

impl HarvestPacing {
    pub fn from_config(config: &HarvestConfig) -> Self {
        Self {
            page_delay: config.page_delay,
            batch_delay: config.batch_delay,
        }
    }

    pub fn none() -> Self {
        Self {
            page_delay: Duration::ZERO,
            batch_delay: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RedirectMeta {
    pub description: String,
    pub generated_at: String,
    pub total_targets: usize,
    pub total_redirects: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RedirectDocument {
    #[serde(rename = "_meta")]
    pub meta: RedirectMeta,
    pub redirects: RedirectMap,
}

impl RedirectDocument {
    pub fn new(redirects: RedirectMap, generated_at: DateTime<Utc>) -> Self {
        let total_redirects = redirects.values().map(Vec::len).sum();
        Self {
            meta: RedirectMeta {
                description: REDIRECTS_DESCRIPTION.to_string(),
                generated_at: generated_at.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
                total_targets: redirects.len(),
                total_redirects,
            },
            redirects,
        }
    }

    /// Two-space indented JSON; non-ASCII titles are written as-is.
    pub fn render(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("failed to serialize redirect document")
    }
}

/// Phase 1: every redirect entry in the main namespace, in API order.
pub fn fetch_all_redirects<A: RedirectApi>(
    api: &mut A,
    pacing: &HarvestPacing,
) -> Result<Vec<RedirectEntry>> {
    info!("Phase 1: fetching all redirect entries");

    let mut entries = Vec::new();
    let mut continuation = None;
    let mut batch = 0usize;
    loop {
        batch += 1;
        info!("  batch {batch} ({} entries so far)", entries.len());

        let page = api.list_redirects(continuation.as_ref())?;
        entries.extend(page.entries);

        continuation = page.continuation;
        if continuation.is_none() {
            break;
        }
        pause(pacing.page_delay);
    }

    info!("  phase 1 complete: {} entries", entries.len());
    Ok(entries)
}

/// Phase 2: resolve distinct source page ids to titles, 50 ids per request.
pub fn resolve_page_ids<A: RedirectApi>(
    api: &mut A,
    entries: &[RedirectEntry],
    pacing: &HarvestPacing,
) -> Result<PageTitleIndex> {
    info!("Phase 2: resolving page ids to titles");

    let unique_ids = distinct_source_ids(entries);
    info!("  {} unique page ids to resolve", unique_ids.len());

    let total_batches = unique_ids.len().div_ceil(PAGE_ID_BATCH_SIZE);
    let mut index = PageTitleIndex::new();
    for (batch_index, batch) in unique_ids.chunks(PAGE_ID_BATCH_SIZE).enumerate() {
        let batch_number = batch_index + 1;
        if batch_index % BATCH_PROGRESS_INTERVAL == 0 {
            info!(
                "  batch {batch_number}/{total_batches} ({} resolved)",
                index.len()
            );
        }

        for (page_id, title) in api.page_titles(batch)? {
            index.insert(page_id, title);
        }

        if batch_number < total_batches {
            pause(pacing.batch_delay);
        }
    }

    info!("  phase 2 complete: {} titles resolved", index.len());
    Ok(index)
}

/// Group resolved source titles under their targets, skipping self-redirects
/// and ids phase 2 could not resolve.
pub fn build_redirect_map(entries: &[RedirectEntry], index: &PageTitleIndex) -> RedirectMap {
    let mut grouped: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for entry in entries {
        let Some(source_title) = index.get(&entry.source_page_id) else {
            continue;
        };
        if *source_title == entry.target_title {
            continue;
        }
        grouped
            .entry(entry.target_title.clone())
            .or_default()
            .insert(source_title.clone());
    }

    grouped
        .into_iter()
        .map(|(target, aliases)| (target, aliases.into_iter().collect()))
        .collect()
}

pub fn harvest<A: RedirectApi>(api: &mut A, pacing: &HarvestPacing) -> Result<RedirectMap> {
    let entries = fetch_all_redirects(api, pacing)?;
    let index = resolve_page_ids(api, &entries, pacing)?;

    let redirects = build_redirect_map(&entries, &index);
    let total_aliases: usize = redirects.values().map(Vec::len).sum();
    info!("  {} targets with redirects", redirects.len());
    info!("  {total_aliases} total redirect entries");
    info!("  {} API requests", api.request_count());
    Ok(redirects)
}

/// Run a full harvest against the configured wiki and stamp the result.
pub fn fetch_redirects(config: &HarvestConfig) -> Result<RedirectDocument> {
    let mut client = MediaWikiClient::new(config)?;
    let redirects = harvest(&mut client, &HarvestPacing::from_config(config))?;
    Ok(RedirectDocument::new(redirects, Utc::now()))
}

fn distinct_source_ids(entries: &[RedirectEntry]) -> Vec<u64> {
    let mut seen = HashSet::new();
    entries
        .iter()
        .map(|entry| entry.source_page_id)
        .filter(|id| seen.insert(*id))
        .collect()
}

fn pause(delay: Duration) {
    if !delay.is_zero() {
        sleep(delay);
    }
}
