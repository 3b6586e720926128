use crate::processing::RoutedRow;
use crate::types::Record;

/// Transformed rows awaiting a bulk write, already partitioned by target model.
///
/// Owned by one pipeline run. A flush writes [`Batch::parts`] and only then calls
/// [`Batch::clear`], so rows stay held until every model's write has committed.
#[derive(Debug)]
pub struct Batch {
    parts: Vec<Vec<Record>>,
    rows: usize,
}

impl Batch {
    pub fn new(model_count: usize) -> Self {
        Self::with_capacity(model_count, 0)
    }

    pub fn with_capacity(model_count: usize, capacity: usize) -> Self {
        Self {
            parts: (0..model_count).map(|_| Vec::with_capacity(capacity)).collect(),
            rows: 0,
        }
    }

    /// Append one source row. Records for unknown model indexes are dropped.
    pub fn push(&mut self, row: RoutedRow) {
        for (mi, record) in row {
            if let Some(part) = self.parts.get_mut(mi) {
                part.push(record);
            }
        }
        self.rows += 1;
    }

    /// Number of source rows held.
    pub fn len(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    /// Records per model index, in input order.
    pub fn parts(&self) -> &[Vec<Record>] {
        &self.parts
    }

    /// Drop every held row, keeping the allocations.
    pub fn clear(&mut self) {
        self.parts.iter_mut().for_each(Vec::clear);
        self.rows = 0;
    }
}
