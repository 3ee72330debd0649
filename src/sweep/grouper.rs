use crate::sweep::month::EffectiveMonth;
use crate::sweep::walker::FileRecord;
use serde::Serialize;
use std::fmt;
use std::num::NonZeroUsize;
use std::ops::Range;

/// Half-open index range over one sorted record list, all in `month`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Batch {
    pub start: usize,
    pub end: usize,
    pub month: EffectiveMonth,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }
}

/// Identity of a dispatched batch, used in logs, errors and reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchId {
    pub subdir: String,
    pub seq: u64,
    pub month: EffectiveMonth,
    pub start: usize,
    pub end: usize,
}

impl BatchId {
    pub fn new(
        subdir: impl Into<String>,
        seq: u64,
        month: EffectiveMonth,
        start: usize,
        end: usize,
    ) -> Self {
        Self {
            subdir: subdir.into(),
            seq,
            month,
            start,
            end,
        }
    }

    pub fn for_batch(subdir: impl Into<String>, seq: u64, batch: &Batch) -> Self {
        Self::new(subdir, seq, batch.month, batch.start, batch.end)
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}#{} {} [{}..{})",
            self.subdir, self.seq, self.month, self.start, self.end
        )
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MonthGrouper {
    max_batch_size: Option<NonZeroUsize>,
    current_month: EffectiveMonth,
}

impl MonthGrouper {
    /// `current_month` is fixed here; batches are never re-checked against the
    /// clock at dispatch time.
    pub fn new(max_batch_size: Option<NonZeroUsize>, current_month: EffectiveMonth) -> Self {
        Self {
            max_batch_size,
            current_month,
        }
    }

    pub fn current_month(&self) -> EffectiveMonth {
        self.current_month
    }

    /// Full partition of `records` (which must be sorted by month).
    pub fn batches<'a>(&self, records: &'a [FileRecord]) -> Batches<'a> {
        Batches {
            records,
            cap: self.max_batch_size.map(NonZeroUsize::get),
            start: 0,
        }
    }

    /// Batches that may be dispatched: everything except the current month,
    /// whose files wait for a later run.
    pub fn eligible<'a>(&self, records: &'a [FileRecord]) -> impl Iterator<Item = Batch> + 'a {
        let current = self.current_month;
        self.batches(records).filter(move |batch| batch.month != current)
    }
}

/// Single forward scan over the sorted records. A batch closes at a month
/// boundary or once it holds `cap` records.
#[derive(Debug, Clone)]
pub struct Batches<'a> {
    records: &'a [FileRecord],
    cap: Option<usize>,
    start: usize,
}

impl Iterator for Batches<'_> {
    type Item = Batch;

    fn next(&mut self) -> Option<Batch> {
        let first = self.records.get(self.start)?;
        let start = self.start;
        let month = first.month;

        let mut end = start + 1;
        while end < self.records.len()
            && self.records[end].month == month
            && self.cap.is_none_or(|cap| end - start < cap)
        {
            end += 1;
        }

        self.start = end;
        Some(Batch { start, end, month })
    }
}
