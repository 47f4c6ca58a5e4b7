use std::collections::VecDeque;
use std::time::SystemTime;

pub const HISTORY_CAPACITY: usize = 50;

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub query: String,
    pub timestamp: SystemTime,
    pub execution_time_ms: f64,
    pub success: bool,
    pub message: Option<String>,
}

impl HistoryEntry {
    #[must_use]
    pub fn succeeded(query: impl Into<String>, execution_time_ms: f64) -> Self {
        Self {
            query: query.into(),
            timestamp: SystemTime::now(),
            execution_time_ms,
            success: true,
            message: None,
        }
    }

    #[must_use]
    pub fn failed(
        query: impl Into<String>,
        execution_time_ms: f64,
        message: impl Into<String>,
    ) -> Self {
        Self {
            query: query.into(),
            timestamp: SystemTime::now(),
            execution_time_ms,
            success: false,
            message: Some(message.into()),
        }
    }
}

// Newest first; once full, each push evicts the oldest entry.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryLog {
    capacity: usize,
    entries: VecDeque<HistoryEntry>,
}

impl Default for HistoryLog {
    fn default() -> Self {
        Self::new(HISTORY_CAPACITY)
    }
}

impl HistoryLog {
    /// # Panics
    ///
    /// Panics when `capacity` is zero.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "history capacity must be greater than 0");
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn push(&mut self, entry: HistoryEntry) {
        if self.entries.len() == self.capacity {
            self.entries.pop_back();
        }
        self.entries.push_front(entry);
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&HistoryEntry> {
        self.entries.get(index)
    }

    #[must_use]
    pub fn latest(&self) -> Option<&HistoryEntry> {
        self.entries.front()
    }

    pub fn iter(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }
}
