use std::collections::{BTreeSet, HashSet};

use tracing::debug;

use crate::gateway::Row;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

impl SortDirection {
    #[must_use]
    pub fn toggled(self) -> Self {
        match self {
            Self::Ascending => Self::Descending,
            Self::Descending => Self::Ascending,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortConfig {
    pub column: String,
    pub direction: SortDirection,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TableViewState {
    search_term: String,
    filter_columns: BTreeSet<String>,
    sort: Option<SortConfig>,
}

impl TableViewState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn search_term(&self) -> &str {
        &self.search_term
    }

    #[must_use]
    pub fn filter_columns(&self) -> &BTreeSet<String> {
        &self.filter_columns
    }

    #[must_use]
    pub fn sort(&self) -> Option<&SortConfig> {
        self.sort.as_ref()
    }

    #[must_use]
    pub fn filter_active(&self) -> bool {
        !self.search_term.is_empty() && !self.filter_columns.is_empty()
    }

    pub fn set_search_term(&mut self, term: impl Into<String>) {
        self.search_term = term.into();
    }

    pub fn set_filter_columns<I, S>(&mut self, columns: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filter_columns = columns.into_iter().map(Into::into).collect();
    }

    pub fn toggle_filter_column(&mut self, column: &str) -> bool {
        if self.filter_columns.remove(column) {
            return false;
        }
        self.filter_columns.insert(column.to_string());
        true
    }

    /// Same column flips the direction; a different column starts ascending.
    pub fn request_sort(&mut self, column: &str) {
        let direction = match &self.sort {
            Some(current) if current.column == column => current.direction.toggled(),
            _ => SortDirection::Ascending,
        };
        self.sort = Some(SortConfig {
            column: column.to_string(),
            direction,
        });
    }

    pub fn retain_columns(&mut self, columns: &[String]) {
        self.filter_columns
            .retain(|selected| columns.iter().any(|column| column == selected));
        if self
            .sort
            .as_ref()
            .is_some_and(|sort| !columns.contains(&sort.column))
        {
            self.sort = None;
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResultView<'a> {
    pub columns: Vec<String>,
    pub rows: Vec<&'a Row>,
    pub total_count: usize,
    pub filtered_count: usize,
}

impl ResultView<'_> {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.total_count == 0
    }
}

#[must_use]
pub fn derive_columns(rows: &[Row]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut columns = Vec::new();
    for row in rows {
        for column in row.columns() {
            if seen.insert(column) {
                columns.push(column.to_string());
            }
        }
    }
    columns
}

/// Always starts from the full row set; sorting only orders rows that survived
/// filtering.
#[must_use]
pub fn present<'a>(rows: &'a [Row], view: &TableViewState) -> ResultView<'a> {
    let columns = derive_columns(rows);

    let mut displayed = if view.filter_active() {
        let needle = view.search_term.to_lowercase();
        rows.iter()
            .filter(|row| row_matches(row, &view.filter_columns, &needle))
            .collect::<Vec<_>>()
    } else {
        rows.iter().collect::<Vec<_>>()
    };
    let filtered_count = displayed.len();

    if let Some(sort) = &view.sort {
        displayed.sort_by(|left, right| {
            let ordering = left.value(&sort.column).compare(right.value(&sort.column));
            match sort.direction {
                SortDirection::Ascending => ordering,
                SortDirection::Descending => ordering.reverse(),
            }
        });
    }

    debug!(
        total = rows.len(),
        filtered = filtered_count,
        "recomputed result view"
    );

    ResultView {
        columns,
        rows: displayed,
        total_count: rows.len(),
        filtered_count,
    }
}

fn row_matches(row: &Row, filter_columns: &BTreeSet<String>, needle: &str) -> bool {
    filter_columns.iter().any(|column| {
        let value = row.value(column);
        !value.is_null() && value.to_string().to_lowercase().contains(needle)
    })
}
