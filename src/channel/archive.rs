//! Bounded iteration archive
//!
//! Keeps the last K transform outputs of a channel. Oldest entries are evicted
//! on overflow. Lives on the async side only.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;

pub const DEFAULT_ARCHIVE_CAPACITY: usize = 16;

/// One archived cycle
#[derive(Debug, Clone, Serialize)]
pub struct ArchiveEntry {
    pub iteration: u64,
    pub backend: String,
    pub phase: u8,
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    pub samples: Vec<f32>,
}

#[derive(Debug)]
pub struct IterationArchive {
    entries: VecDeque<ArchiveEntry>,
    capacity: usize,
}

impl IterationArchive {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append an entry, evicting the oldest beyond capacity
    pub fn push(&mut self, entry: ArchiveEntry) {
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Entry by age: 0 is the oldest kept
    pub fn get(&self, index: usize) -> Option<&ArchiveEntry> {
        self.entries.get(index)
    }

    pub fn latest(&self) -> Option<&ArchiveEntry> {
        self.entries.back()
    }

    pub fn find_iteration(&self, iteration: u64) -> Option<&ArchiveEntry> {
        self.entries.iter().find(|e| e.iteration == iteration)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ArchiveEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
