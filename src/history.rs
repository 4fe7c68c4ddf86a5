//! Bounded command history with load/save support.

use log::warn;
use std::collections::VecDeque;
use std::fs;
use std::path::Path;

/// Maximum number of retained history entries.
pub const HISTORY_CAPACITY: usize = 1000;

/// Append-only ring of recent input lines. Consecutive duplicates are
/// suppressed on insert; the oldest entry is evicted once the ring is full.
#[derive(Debug, Default)]
pub struct HistoryRing {
    entries: VecDeque<String>,
}

impl HistoryRing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a line. Empty lines and repeats of the latest entry are
    /// ignored.
    pub fn push(&mut self, line: &str) {
        if line.is_empty() {
            return;
        }
        if self.entries.back().map(String::as_str) == Some(line) {
            return;
        }
        if self.entries.len() == HISTORY_CAPACITY {
            self.entries.pop_front();
        }
        self.entries.push_back(line.to_string());
    }

    /// Fetch entry `index` (1-based, oldest first).
    pub fn get(&self, index: usize) -> Option<&str> {
        index
            .checked_sub(1)
            .and_then(|i| self.entries.get(i))
            .map(String::as_str)
    }

    /// All entries with their 1-based indices.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &str)> {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, line)| (i + 1, line.as_str()))
    }

    /// Entries containing `term` as a substring, with their indices.
    pub fn search<'a>(&'a self, term: &'a str) -> impl Iterator<Item = (usize, &'a str)> {
        self.iter().filter(move |(_, line)| line.contains(term))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Load entries from `path`, newest last. Missing files are fine.
    pub fn load(&mut self, path: &Path) {
        let Ok(contents) = fs::read_to_string(path) else {
            return;
        };
        for line in contents.lines() {
            if !line.is_empty() && self.entries.len() < HISTORY_CAPACITY {
                self.entries.push_back(line.to_string());
            }
        }
    }

    /// Rewrite the history file whole, newest last. Best-effort.
    pub fn save(&self, path: &Path) {
        let mut out = String::new();
        for line in &self.entries {
            out.push_str(line);
            out.push('\n');
        }
        if let Err(err) = fs::write(path, out) {
            warn!("could not save history to {}: {}", path.display(), err);
        }
    }
}
