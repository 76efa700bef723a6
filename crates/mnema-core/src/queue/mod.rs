//! Recommendation queue: the mutable, deduplicated sequence of item IDs a
//! session walks through. Purely in-memory and non-blocking; exclusively
//! owned by one session.

use crate::domain::Item;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Default)]
pub struct RecommendationQueue {
    ids: Vec<String>,
    current_index: usize,
    is_paused: bool,
}

impl RecommendationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the initial queue: every item due at `now`, ascending by next
    /// review time, ties broken by item ID.
    pub fn build_initial(items: &[Item], now: DateTime<Utc>) -> Self {
        let mut due: Vec<&Item> = items.iter().filter(|i| i.is_due(now)).collect();
        due.sort_by(|a, b| {
            a.next_review_time
                .cmp(&b.next_review_time)
                .then_with(|| a.id.cmp(&b.id))
        });
        Self {
            ids: due.into_iter().map(|i| i.id.clone()).collect(),
            current_index: 0,
            is_paused: false,
        }
    }

    /// The item the cursor points at, if any.
    pub fn current(&self) -> Option<&str> {
        self.ids.get(self.current_index).map(String::as_str)
    }

    /// Move the cursor forward. Returns false when already at the end.
    pub fn advance(&mut self) -> bool {
        if self.current_index + 1 < self.ids.len() {
            self.current_index += 1;
            true
        } else {
            false
        }
    }

    /// Stack-style insertion: the freshly due or imported ID goes to
    /// position 0 so the session switches to it on the next advance. An ID
    /// already present is ignored. Returns whether the ID was inserted.
    pub fn add_item(&mut self, id: &str) -> bool {
        if self.contains(id) {
            return false;
        }
        let had_current = self.current().is_some();
        self.ids.insert(0, id.to_string());
        // Keep the cursor on the item it pointed at; the head takes over
        // only through an explicit snap or advance.
        if had_current {
            self.current_index += 1;
        }
        true
    }

    /// Remove an ID, preserving the order of the rest. The cursor is pulled
    /// back when it pointed past the removal.
    pub fn remove_item(&mut self, id: &str) -> bool {
        let Some(pos) = self.ids.iter().position(|i| i == id) else {
            return false;
        };
        self.ids.remove(pos);
        if self.current_index > pos {
            self.current_index -= 1;
        }
        true
    }

    /// Stable re-sort of the whole queue by next review time; IDs the
    /// lookup cannot resolve order last. The cursor follows the item it
    /// pointed at.
    pub fn sort_by_next_review<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<DateTime<Utc>>,
    {
        let current_id = self.current().map(str::to_string);
        self.ids.sort_by_key(|id| {
            lookup(id.as_str())
                .map(|t| t.timestamp_millis())
                .unwrap_or(i64::MAX)
        });
        if let Some(id) = current_id {
            if let Some(pos) = self.ids.iter().position(|i| *i == id) {
                self.current_index = pos;
            }
        }
    }

    /// Snap the cursor to the head of the queue.
    pub fn snap_to_head(&mut self) {
        self.current_index = 0;
    }

    pub fn pause(&mut self) {
        self.is_paused = true;
    }

    pub fn resume(&mut self) {
        self.is_paused = false;
    }

    pub fn is_paused(&self) -> bool {
        self.is_paused
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.iter().any(|i| i == id)
    }

    pub fn head(&self) -> Option<&str> {
        self.ids.first().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn position(&self) -> usize {
        self.current_index
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }
}
