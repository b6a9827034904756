//! Title normalization and the incremental TF-IDF/weighted-Jaccard novelty
//! filter used to keep autoplay from repeating near-duplicate uploads.
//!
//! No direct songbird analogue exists (songbird has no autoplay concept);
//! grounded instead on the document-frequency bookkeeping shape used by
//! text-processing code in `other_examples/` and on songbird's general
//! preference for plain data structures over a crate dependency when the
//! algorithm is this small — a hand-rolled `HashMap<String, u32>` document
//! frequency table, not an external TF-IDF crate.

use std::collections::{HashMap, VecDeque};

use crate::voice::constants::{HISTORY_CAPACITY, NOVELTY_SIMILARITY_THRESHOLD};

/// One played track's normalized title, tokenized and id-tagged, held in
/// the session's rolling history.
#[derive(Clone, Debug)]
pub struct HistoryEntry {
    pub id: String,
    pub tokens: Vec<String>,
}

/// Rolling window of the last [`HISTORY_CAPACITY`] played tracks plus an
/// incrementally maintained document-frequency map over their tokens.
#[derive(Default)]
pub struct History {
    entries: VecDeque<HistoryEntry>,
    doc_freq: HashMap<String, u32>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains_id(&self, id: &str) -> bool {
        self.entries.iter().any(|e| e.id == id)
    }

    pub fn push(&mut self, id: String, raw_title: &str, channel: &str) {
        let tokens = normalize_title_tokens(raw_title, channel);
        for token in tokens.iter().collect::<std::collections::HashSet<_>>() {
            *self.doc_freq.entry(token.clone()).or_insert(0) += 1;
        }

        self.entries.push_back(HistoryEntry { id, tokens });

        if self.entries.len() > HISTORY_CAPACITY {
            if let Some(evicted) = self.entries.pop_front() {
                for token in evicted.tokens.iter().collect::<std::collections::HashSet<_>>() {
                    if let Some(count) = self.doc_freq.get_mut(token) {
                        *count = count.saturating_sub(1);
                        if *count == 0 {
                            self.doc_freq.remove(token);
                        }
                    }
                }
            }
        }
    }

    fn idf(&self, token: &str) -> f64 {
        let n = self.entries.len().max(1) as f64;
        let df = *self.doc_freq.get(token).unwrap_or(&0) as f64;
        ((n + 1.0) / (df + 1.0)).ln() + 1.0
    }

    /// Weighted Jaccard of `candidate_tokens` against every history entry,
    /// returning `true` if the candidate is too similar to any of them.
    pub fn is_too_similar(&self, candidate_tokens: &[String]) -> bool {
        self.entries.iter().any(|entry| self.weighted_jaccard(candidate_tokens, &entry.tokens) >= NOVELTY_SIMILARITY_THRESHOLD)
    }

    fn weighted_jaccard(&self, a: &[String], b: &[String]) -> f64 {
        use std::collections::HashSet;
        let set_a: HashSet<&String> = a.iter().collect();
        let set_b: HashSet<&String> = b.iter().collect();

        let intersection_weight: f64 = set_a.intersection(&set_b).map(|t| self.idf(t)).sum();
        let union_weight: f64 = set_a.union(&set_b).map(|t| self.idf(t)).sum();

        if union_weight == 0.0 {
            0.0
        } else {
            intersection_weight / union_weight
        }
    }
}

/// Picks the first candidate (by id) not already in history, rejecting ones
/// the strict similarity filter flags; falls back to the first
/// different-id candidate if every one is flagged, so autoplay never stalls
/// entirely on an over-eager filter.
pub fn pick_novel<'a, T>(
    history: &History,
    candidates: &'a [T],
    id_of: impl Fn(&T) -> &str,
    title_of: impl Fn(&T) -> &str,
    channel_of: impl Fn(&T) -> &str,
) -> Option<&'a T> {
    let mut first_different_id: Option<&T> = None;

    for candidate in candidates {
        let id = id_of(candidate);
        if history.contains_id(id) {
            continue;
        }
        if first_different_id.is_none() {
            first_different_id = Some(candidate);
        }

        let tokens = normalize_title_tokens(title_of(candidate), channel_of(candidate));
        if !history.is_too_similar(&tokens) {
            return Some(candidate);
        }
    }

    first_different_id
}

/// Splits CamelCase boundaries, lowercases, drops a leading separator
/// section equal to the channel name, strips bracketed groups, removes the
/// channel substring, keeps only `[a-z0-9]` runs, collapses whitespace.
pub fn normalize_title(raw_title: &str, channel: &str) -> String {
    let split = split_camel_case(raw_title);
    let lower = split.to_lowercase();
    let channel_lower = channel.to_lowercase().replace(' ', "");

    const SEPARATORS: &[&str] = &["|", "//", " ─ ", " - "];
    let mut working = lower.clone();
    for sep in SEPARATORS {
        if let Some(idx) = working.find(sep) {
            let (before, after) = working.split_at(idx);
            let after = &after[sep.len()..];
            let before_stripped = before.replace(' ', "");
            if before_stripped == channel_lower {
                working = after.to_string();
            } else {
                let after_stripped = after.replace(' ', "");
                if after_stripped == channel_lower {
                    working = before.to_string();
                }
            }
            break;
        }
    }

    let bracket_stripped = strip_bracketed_groups(&working);
    let channel_removed = bracket_stripped.replace(&channel_lower, "");

    let kept: String = channel_removed.chars().filter(|c| c.is_ascii_alphanumeric() || c.is_whitespace()).collect();
    kept.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn normalize_title_tokens(raw_title: &str, channel: &str) -> Vec<String> {
    normalize_title(raw_title, channel).split_whitespace().map(str::to_string).collect()
}

fn split_camel_case(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + 8);
    let mut prev_lower = false;
    for c in input.chars() {
        if c.is_uppercase() && prev_lower {
            out.push(' ');
        }
        prev_lower = c.is_lowercase();
        out.push(c);
    }
    out
}

fn strip_bracketed_groups(input: &str) -> String {
    let mut result = input.to_string();
    loop {
        let stripped = strip_one_bracket_pass(&result);
        if stripped == result {
            return result;
        }
        result = stripped;
    }
}

fn strip_one_bracket_pass(input: &str) -> String {
    const PAIRS: [(char, char); 3] = [('(', ')'), ('[', ']'), ('{', '}')];
    for (open, close) in PAIRS {
        if let Some(start) = input.find(open) {
            if let Some(rel_end) = input[start..].find(close) {
                let end = start + rel_end;
                let mut out = String::with_capacity(input.len());
                out.push_str(&input[..start]);
                out.push_str(&input[end + close.len_utf8()..]);
                return out;
            }
        }
    }
    input.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_drops_channel_name_at_separator() {
        let title = "Artist Name - Song Title (Official Video)";
        let normalized = normalize_title(title, "Artist Name");
        assert_eq!(normalized, "song title");
    }

    #[test]
    fn normalize_splits_camel_case_and_strips_brackets() {
        let title = "SuperSong [Lyrics] {HQ}";
        let normalized = normalize_title(title, "");
        assert_eq!(normalized, "super song");
    }

    #[test]
    fn history_flags_repeat_uploads_as_too_similar() {
        let mut history = History::new();
        history.push("id1".into(), "Some Great Song", "Channel");
        let tokens = normalize_title_tokens("Some Great Song", "Channel");
        assert!(history.is_too_similar(&tokens));
    }

    #[test]
    fn history_does_not_flag_unrelated_titles() {
        let mut history = History::new();
        history.push("id1".into(), "Some Great Song", "Channel");
        let tokens = normalize_title_tokens("Completely Different Thing", "Other");
        assert!(!history.is_too_similar(&tokens));
    }

    #[test]
    fn history_evicts_beyond_capacity() {
        let mut history = History::new();
        for i in 0..60 {
            history.push(format!("id{i}"), &format!("Song {i}"), "Channel");
        }
        assert_eq!(history.entries.len(), HISTORY_CAPACITY);
        assert!(!history.contains_id("id0"));
        assert!(history.contains_id("id59"));
    }
}
