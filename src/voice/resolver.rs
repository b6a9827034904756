//! Query normalization, dual-source search, result caching, and the
//! HTML-scrape fallback for sources the extractor can't touch directly.
//!
//! Grounded on songbird's `input::ytdl_search`-era wrapper for
//! "resolve a freeform query to a playable source", generalized here into a
//! scored best-match pass across two parallel searches plus a scraped-page
//! fallback, since this bot has no single canonical upstream the way a
//! music-only bot would.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use scraper::{Html, Selector};
use tracing::{debug, warn};
use unicode_segmentation::UnicodeSegmentation;

use crate::voice::constants::{
    SEARCH_CACHE_SWEEP_INTERVAL, SEARCH_CACHE_TTL, SEARCH_OVERALL_BUDGET, SEARCH_PER_SOURCE_CEILING,
    SEARCH_RESULT_CAP,
};
use crate::voice::error::ResolveError;
use crate::voice::extractor::{self, ExtractedMetadata, SearchResult, SearchSource};
use crate::voice::util::spawn_guarded;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueryKind {
    Search,
    Playlist,
    DirectUrl,
}

/// Splits off a recognized `[YT]`/`[YTM]`/`[PL]` prefix and returns the
/// remaining query text alongside the mode it implies.
pub struct NormalizedQuery {
    pub text: String,
    pub implied_source: Option<SearchSource>,
    pub kind: QueryKind,
}

pub fn normalize_query(raw: &str) -> NormalizedQuery {
    let trimmed = raw.trim();
    let lower = trimmed.to_lowercase();

    if lower.starts_with("[pl]") {
        return NormalizedQuery {
            text: trimmed[4..].trim().to_string(),
            implied_source: None,
            kind: QueryKind::Playlist,
        };
    }
    if lower.starts_with("[ytm]") {
        return NormalizedQuery {
            text: trimmed[5..].trim().to_string(),
            implied_source: Some(SearchSource::YoutubeMusic),
            kind: QueryKind::Search,
        };
    }
    if lower.starts_with("[yt]") {
        return NormalizedQuery {
            text: trimmed[4..].trim().to_string(),
            implied_source: Some(SearchSource::Youtube),
            kind: QueryKind::Search,
        };
    }
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        return NormalizedQuery { text: trimmed.to_string(), implied_source: None, kind: QueryKind::DirectUrl };
    }
    NormalizedQuery { text: trimmed.to_string(), implied_source: None, kind: QueryKind::Search }
}

struct CacheEntry {
    results: Vec<SearchResult>,
    expires_at: Instant,
}

/// Process-wide search-result cache keyed by the raw query string, with a
/// background sweeper evicting expired entries.
pub struct QueryCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl QueryCache {
    pub fn new() -> Arc<Self> {
        let cache = Arc::new(Self { entries: Mutex::new(HashMap::new()) });
        let sweep = cache.clone();
        spawn_guarded("search-cache-sweeper", async move {
            let mut interval = tokio::time::interval(SEARCH_CACHE_SWEEP_INTERVAL);
            loop {
                interval.tick().await;
                sweep.sweep();
            }
        });
        cache
    }

    fn sweep(&self) {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed, "evicted expired search cache entries");
        }
    }

    fn get(&self, query: &str) -> Option<Vec<SearchResult>> {
        let entries = self.entries.lock();
        let entry = entries.get(query)?;
        (entry.expires_at > Instant::now()).then(|| entry.results.clone())
    }

    fn put(&self, query: String, results: Vec<SearchResult>) {
        self.entries.lock().insert(query, CacheEntry { results, expires_at: Instant::now() + SEARCH_CACHE_TTL });
    }
}

/// Runs the dual-source search (or a single source if implied by a prefix),
/// merging, deduplicating by id, and capping at [`SEARCH_RESULT_CAP`].
pub async fn search(cache: &QueryCache, query: &str) -> Result<Vec<SearchResult>, ResolveError> {
    if let Some(cached) = cache.get(query) {
        return Ok(cached);
    }

    let normalized = normalize_query(query);
    let sources: Vec<SearchSource> = match normalized.implied_source {
        Some(source) => vec![source],
        None => vec![SearchSource::Youtube, SearchSource::YoutubeMusic],
    };

    let text = normalized.text.clone();
    let fetches = sources.into_iter().map(|source| {
        let text = text.clone();
        async move {
            match tokio::time::timeout(SEARCH_PER_SOURCE_CEILING, extractor::search(&text, source, SEARCH_RESULT_CAP)).await {
                Ok(Ok(results)) => results,
                Ok(Err(e)) => {
                    warn!(?source, error = %e, "search source failed");
                    Vec::new()
                },
                Err(_) => {
                    warn!(?source, "search source timed out");
                    Vec::new()
                },
            }
        }
    });

    let merged = tokio::time::timeout(SEARCH_OVERALL_BUDGET, futures::future::join_all(fetches))
        .await
        .unwrap_or_default();

    let implied = normalized.implied_source;
    let mut ordered: Vec<SearchResult> = merged.into_iter().flatten().collect();
    if let Some(implied) = implied {
        ordered.sort_by_key(|r| r.source != implied);
    }

    let mut seen_ids = std::collections::HashSet::new();
    let mut deduped = Vec::new();
    for result in ordered {
        let id = video_id_from_url(&result.url);
        if seen_ids.insert(id) {
            deduped.push(result);
        }
        if deduped.len() >= SEARCH_RESULT_CAP {
            break;
        }
    }

    if deduped.is_empty() {
        return Err(ResolveError::NoResults(query.to_string()));
    }

    cache.put(query.to_string(), deduped.clone());
    Ok(deduped)
}

/// Extracts a video id from a URL for deduplication/history purposes. Falls
/// back to the whole URL when no recognized id parameter is present, which
/// is harmless: duplicates just won't dedupe against each other.
pub fn video_id_from_url(url: &str) -> String {
    if let Some(idx) = url.find("v=") {
        let rest = &url[idx + 2..];
        return rest.split('&').next().unwrap_or(rest).to_string();
    }
    if let Some(idx) = url.rfind('/') {
        return url[idx + 1..].to_string();
    }
    url.to_string()
}

/// Resolves a non-HTTP query or a non-YouTube streaming URL to a playable
/// YouTube/YTM track by racing extractor metadata against an HTML scrape,
/// then searching for the best match by title+artist.
pub async fn resolve_via_best_match(cache: &QueryCache, source_url: &str) -> Result<SearchResult, ResolveError> {
    let scraped = scrape_metadata(source_url);
    let extracted = extractor::metadata(source_url);
    tokio::pin!(scraped, extracted);

    let (title, artist) = tokio::select! {
        biased;
        r = &mut extracted => match r {
            Ok(meta) => (meta.title, meta.uploader),
            Err(_) => {
                match tokio::time::timeout(crate::voice::constants::METADATA_RACE_TIMEOUT, &mut scraped).await {
                    Ok(Ok(scraped)) => (scraped.title, scraped.artist),
                    _ => return Err(ResolveError::ScrapeEmpty),
                }
            },
        },
        r = &mut scraped => match r {
            Ok(scraped) => (scraped.title, scraped.artist),
            Err(_) => return Err(ResolveError::ScrapeEmpty),
        },
    };

    let query = format!("{title} {artist}");
    let candidates = search(cache, &query).await?;
    best_match(&candidates, &title, &artist).cloned().ok_or_else(|| ResolveError::NoResults(query))
}

struct ScrapedMetadata {
    title: String,
    artist: String,
}

/// Fetches `url` with a desktop user-agent, reads up to the first `</head>`
/// (bounded at 500 lines to avoid paying for a whole page body), and pulls
/// `og:title`/`og:description` meta tags.
async fn scrape_metadata(url: &str) -> Result<ScrapedMetadata, ResolveError> {
    let client = reqwest::Client::builder()
        .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
        .build()
        .map_err(ResolveError::Http)?;

    let body = client.get(url).send().await.map_err(ResolveError::Http)?.text().await.map_err(ResolveError::Http)?;
    let head: String = body.lines().take(500).collect::<Vec<_>>().join("\n");
    let truncated = match head.find("</head>") {
        Some(idx) => &head[..idx],
        None => &head,
    };

    let document = Html::parse_fragment(truncated);
    let meta_selector = Selector::parse("meta").expect("static selector is valid");

    let mut raw_title = None;
    let mut raw_description = None;
    for element in document.select(&meta_selector) {
        match element.value().attr("property").or_else(|| element.value().attr("name")) {
            Some("og:title") => raw_title = element.value().attr("content").map(str::to_string),
            Some("og:description") => raw_description = element.value().attr("content").map(str::to_string),
            _ => {},
        }
    }

    let title = strip_known_suffixes(&raw_title.ok_or(ResolveError::ScrapeEmpty)?);
    let artist = raw_description
        .and_then(|desc| desc.split(" · ").next().map(str::to_string))
        .unwrap_or_default();

    Ok(ScrapedMetadata { title, artist })
}

fn strip_known_suffixes(title: &str) -> String {
    const SUFFIXES: &[&str] = &[" - song and lyrics by", " | Spotify"];
    let mut result = title.to_string();
    for suffix in SUFFIXES {
        if let Some(idx) = result.find(suffix) {
            result.truncate(idx);
        }
    }
    result.trim().to_string()
}

/// Scores each candidate against a target (title, artist, assumed duration
/// unknown at this call site) and returns the highest scorer, if any scored
/// above zero.
pub fn best_match<'a>(candidates: &'a [SearchResult], target_title: &str, target_artist: &str) -> Option<&'a SearchResult> {
    candidates
        .iter()
        .map(|c| (c, score_candidate(c, target_title, target_artist, None)))
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(c, _)| c)
}

fn score_candidate(candidate: &SearchResult, target_title: &str, target_artist: &str, target_duration: Option<Duration>) -> f64 {
    let mut score = 0.0;

    if let Some(target_dur) = target_duration {
        let diff = candidate.duration.as_secs_f64() - target_dur.as_secs_f64();
        if diff.abs() <= 2.5 {
            score += 100.0;
        } else if diff.abs() <= 6.0 {
            score += 40.0;
        }
    }

    let uploader_lower = candidate.uploader.to_lowercase();
    let artist_lower = target_artist.to_lowercase();
    if !artist_lower.is_empty() {
        if uploader_lower == artist_lower {
            score += 80.0;
        } else if uploader_lower.contains(&artist_lower) {
            score += 30.0;
        }
    }

    let jaccard = weighted_title_jaccard(&candidate.title, target_title);
    if jaccard >= 0.7 {
        score += 50.0;
    }

    score
}

/// Simple unweighted Jaccard over whitespace-split lowercase grapheme
/// tokens, used here without a full corpus IDF map (unlike the novelty
/// filter, which has one) since there's no history to weight against.
fn weighted_title_jaccard(a: &str, b: &str) -> f64 {
    let tokens_a = tokenize(a);
    let tokens_b = tokenize(b);
    if tokens_a.is_empty() || tokens_b.is_empty() {
        return 0.0;
    }
    let set_a: std::collections::HashSet<_> = tokens_a.iter().collect();
    let set_b: std::collections::HashSet<_> = tokens_b.iter().collect();
    let intersection = set_a.intersection(&set_b).count() as f64;
    let union = set_a.union(&set_b).count() as f64;
    if union == 0.0 {
        0.0
    } else {
        intersection / union
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .unicode_words()
        .map(|w| w.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_recognized_prefixes() {
        let q = normalize_query("[YTM] some song");
        assert_eq!(q.text, "some song");
        assert_eq!(q.implied_source, Some(SearchSource::YoutubeMusic));

        let q = normalize_query("[PL] https://example.com/playlist");
        assert_eq!(q.kind, QueryKind::Playlist);

        let q = normalize_query("https://example.com/a");
        assert_eq!(q.kind, QueryKind::DirectUrl);

        let q = normalize_query("plain search text");
        assert_eq!(q.kind, QueryKind::Search);
        assert_eq!(q.implied_source, None);
    }

    #[test]
    fn video_id_extraction_prefers_v_param() {
        assert_eq!(video_id_from_url("https://youtube.com/watch?v=abc123&t=5"), "abc123");
        assert_eq!(video_id_from_url("https://youtu.be/xyz789"), "xyz789");
    }

    #[test]
    fn suffix_stripping_removes_known_trailers() {
        assert_eq!(strip_known_suffixes("Song Title - song and lyrics by Someone"), "Song Title");
        assert_eq!(strip_known_suffixes("Song Title | Spotify"), "Song Title");
    }

    #[test]
    fn jaccard_matches_identical_titles() {
        assert_eq!(weighted_title_jaccard("hello world", "hello world"), 1.0);
        assert!(weighted_title_jaccard("hello world", "totally different") < 0.5);
    }
}
