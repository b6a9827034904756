//! Pure queue-mutation semantics, split out from [`Session`] so the
//! mode logic can be unit tested without any I/O.
//!
//! Grounded on songbird's `tracks/queue.rs` `modify_queue`
//! pattern: mutation is expressed as a function over a `VecDeque`, called
//! under the session's queue lock.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::voice::track::{QueueMode, Track};

/// Applies `mode` by inserting `items` into `queue`:
/// - `Now` is handled specially by the caller (it also clears current/autoplay
///   and cancels the active stream); by the time this runs the queue is
///   already empty, so `Now` behaves like `Append`.
/// - `Next` prepends, preserving the order of `items`.
/// - `Position(k)` inserts before index `k - 1`, clamped to the queue length.
/// - `Append` (the default) appends.
pub fn apply(queue: &mut VecDeque<Arc<Track>>, mode: QueueMode, items: Vec<Arc<Track>>) {
    match mode {
        QueueMode::Now | QueueMode::Append => {
            for item in items {
                queue.push_back(item);
            }
        },
        QueueMode::Next => {
            for item in items.into_iter().rev() {
                queue.push_front(item);
            }
        },
        QueueMode::Position(k) => {
            let index = (k.saturating_sub(1)).min(queue.len());
            for (offset, item) in items.into_iter().enumerate() {
                queue.insert(index + offset, item);
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(url: &str) -> Arc<Track> {
        Track::new(url.to_string())
    }

    fn urls(queue: &VecDeque<Arc<Track>>) -> Vec<String> {
        queue.iter().map(|t| t.url.clone()).collect()
    }

    #[test]
    fn append_default_places_at_end() {
        let mut queue: VecDeque<Arc<Track>> = VecDeque::new();
        queue.push_back(track("a"));
        apply(&mut queue, QueueMode::Append, vec![track("b"), track("c")]);
        assert_eq!(urls(&queue), vec!["a", "b", "c"]);
    }

    #[test]
    fn next_prepends_preserving_order() {
        let mut queue: VecDeque<Arc<Track>> = VecDeque::new();
        queue.push_back(track("a"));
        apply(&mut queue, QueueMode::Next, vec![track("b"), track("c")]);
        assert_eq!(urls(&queue), vec!["b", "c", "a"]);
    }

    #[test]
    fn position_inserts_before_k_minus_one() {
        let mut queue: VecDeque<Arc<Track>> = VecDeque::new();
        for u in ["a", "b", "c"] {
            queue.push_back(track(u));
        }
        apply(&mut queue, QueueMode::Position(2), vec![track("x")]);
        // inserted before index 1
        assert_eq!(urls(&queue), vec!["a", "x", "b", "c"]);
    }

    #[test]
    fn position_clamps_beyond_queue_length() {
        let mut queue: VecDeque<Arc<Track>> = VecDeque::new();
        queue.push_back(track("a"));
        apply(&mut queue, QueueMode::Position(99), vec![track("x")]);
        assert_eq!(urls(&queue), vec!["a", "x"]);
    }

    #[test]
    fn now_behaves_like_append_on_an_emptied_queue() {
        let mut queue: VecDeque<Arc<Track>> = VecDeque::new();
        apply(&mut queue, QueueMode::Now, vec![track("a"), track("b")]);
        assert_eq!(urls(&queue), vec!["a", "b"]);
    }
}
