//! Segment planning and shared transfer progress.
//!
//! A checkpoint is the in-memory view of a task's segment rows: the byte
//! ranges to fetch and, per range, an atomic counter of bytes already on
//! disk. Range fetchers bump the counters; the progress reporter reads and
//! flushes them. Counters only ever grow within a run, which is what keeps
//! per-task progress events monotonic.

use crate::db::SegmentRecord;
use crate::types::TaskId;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Sentinel for a span that runs to EOF (unknown total size).
pub(crate) const OPEN_END: u64 = u64::MAX;

/// One contiguous byte range of a transfer. `end` is inclusive;
/// [`OPEN_END`] means "until EOF".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Span {
    pub index: i64,
    pub start: u64,
    pub end: u64,
}

impl Span {
    /// Length of the span, when bounded.
    pub(crate) fn len(&self) -> Option<u64> {
        if self.end == OPEN_END {
            None
        } else {
            Some(self.end - self.start + 1)
        }
    }
}

/// Transfer plan plus live progress counters, shared between the range
/// fetchers and the progress reporter.
#[derive(Debug)]
pub(crate) struct Checkpoint {
    pub spans: Vec<Span>,
    /// Absolute bytes done per span, aligned with `spans`.
    pub counters: Arc<Vec<AtomicU64>>,
    /// Single unresumable stream: restart from zero, nothing persisted.
    pub whole: bool,
    /// Total size, when discovery reported one.
    pub total: Option<u64>,
}

impl Checkpoint {
    /// Plan the transfer for a task.
    ///
    /// Resumable sources with a known size split into up to `max_segments`
    /// ranges, reusing `existing` rows when they still describe the same
    /// total. Resumable sources with unknown size get one open-ended span
    /// that can still resume by offset. Unresumable sources always restart
    /// from byte zero.
    pub(crate) fn plan(
        total: Option<u64>,
        resumable: bool,
        max_segments: usize,
        segment_min_bytes: u64,
        existing: &[SegmentRecord],
    ) -> Self {
        if !resumable {
            return Self::whole(total);
        }

        match total {
            Some(t) if t > 0 => {
                if let Some(checkpoint) = Self::from_records(t, existing) {
                    return checkpoint;
                }
                Self::split(t, max_segments, segment_min_bytes)
            }
            Some(_) => Self::whole(total),
            None => Self {
                spans: vec![Span {
                    index: 0,
                    start: 0,
                    end: OPEN_END,
                }],
                counters: Arc::new(vec![AtomicU64::new(
                    existing.first().map(|s| s.downloaded as u64).unwrap_or(0),
                )]),
                whole: false,
                total: None,
            },
        }
    }

    /// Rebuild a checkpoint from persisted rows, if they cover `total`.
    fn from_records(total: u64, records: &[SegmentRecord]) -> Option<Self> {
        if records.is_empty() {
            return None;
        }
        // Rows from an open-ended plan carry no usable bound; replan
        if records.iter().any(|r| r.end_byte == i64::MAX) {
            return None;
        }

        let covered: u64 = records
            .iter()
            .map(|r| (r.end_byte - r.start_byte + 1) as u64)
            .sum();
        if covered != total {
            return None;
        }

        let spans = records
            .iter()
            .map(|r| Span {
                index: r.seg_index,
                start: r.start_byte as u64,
                end: r.end_byte as u64,
            })
            .collect();
        let counters = records
            .iter()
            .map(|r| AtomicU64::new(r.downloaded as u64))
            .collect();

        Some(Self {
            spans,
            counters: Arc::new(counters),
            whole: false,
            total: Some(total),
        })
    }

    /// Fresh even split of `total` bytes.
    fn split(total: u64, max_segments: usize, segment_min_bytes: u64) -> Self {
        let by_size = (total / segment_min_bytes.max(1)).max(1);
        let count = (max_segments.max(1) as u64).min(by_size);
        let chunk = total / count;

        let spans: Vec<Span> = (0..count)
            .map(|i| {
                let start = i * chunk;
                let end = if i == count - 1 { total - 1 } else { start + chunk - 1 };
                Span {
                    index: i as i64,
                    start,
                    end,
                }
            })
            .collect();
        let counters = spans.iter().map(|_| AtomicU64::new(0)).collect();

        Self {
            spans,
            counters: Arc::new(counters),
            whole: false,
            total: Some(total),
        }
    }

    fn whole(total: Option<u64>) -> Self {
        Self {
            spans: vec![Span {
                index: 0,
                start: 0,
                end: OPEN_END,
            }],
            counters: Arc::new(vec![AtomicU64::new(0)]),
            whole: true,
            total,
        }
    }

    /// Total bytes done across all spans.
    pub(crate) fn total_done(&self) -> u64 {
        self.counters.iter().map(|c| c.load(Ordering::Relaxed)).sum()
    }

    /// Whether every bounded span has fetched its full range.
    pub(crate) fn all_spans_done(&self) -> bool {
        self.spans.iter().enumerate().all(|(i, span)| match span.len() {
            Some(len) => self.counters[i].load(Ordering::Relaxed) >= len,
            None => false,
        })
    }

    /// Persisted form of this checkpoint. Empty for unresumable transfers,
    /// which have nothing worth restarting from.
    pub(crate) fn records(&self, id: TaskId) -> Vec<SegmentRecord> {
        if self.whole {
            return Vec::new();
        }

        self.spans
            .iter()
            .enumerate()
            .map(|(i, span)| SegmentRecord {
                task_id: id.get(),
                seg_index: span.index,
                start_byte: span.start as i64,
                end_byte: if span.end == OPEN_END {
                    i64::MAX
                } else {
                    span.end as i64
                },
                downloaded: self.counters[i].load(Ordering::Relaxed) as i64,
            })
            .collect()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unresumable_source_restarts_whole() {
        let existing = vec![SegmentRecord {
            task_id: 1,
            seg_index: 0,
            start_byte: 0,
            end_byte: 999,
            downloaded: 400,
        }];
        let checkpoint = Checkpoint::plan(Some(1000), false, 4, 1, &existing);

        assert!(checkpoint.whole);
        assert_eq!(checkpoint.total_done(), 0, "restart from byte zero");
    }

    #[test]
    fn small_source_gets_single_span() {
        let checkpoint = Checkpoint::plan(Some(1000), true, 4, 512 * 1024, &[]);
        assert_eq!(checkpoint.spans.len(), 1);
        assert_eq!(checkpoint.spans[0].start, 0);
        assert_eq!(checkpoint.spans[0].end, 999);
    }

    #[test]
    fn large_source_splits_evenly() {
        let checkpoint = Checkpoint::plan(Some(1000), true, 4, 100, &[]);
        assert_eq!(checkpoint.spans.len(), 4);
        assert_eq!(checkpoint.spans[0], Span { index: 0, start: 0, end: 249 });
        assert_eq!(checkpoint.spans[3], Span { index: 3, start: 750, end: 999 });

        let covered: u64 = checkpoint.spans.iter().map(|s| s.len().unwrap()).sum();
        assert_eq!(covered, 1000, "spans must cover the whole source");
    }

    #[test]
    fn existing_records_resume_where_they_left_off() {
        let existing = vec![
            SegmentRecord {
                task_id: 1,
                seg_index: 0,
                start_byte: 0,
                end_byte: 499,
                downloaded: 400,
            },
            SegmentRecord {
                task_id: 1,
                seg_index: 1,
                start_byte: 500,
                end_byte: 999,
                downloaded: 0,
            },
        ];
        let checkpoint = Checkpoint::plan(Some(1000), true, 4, 100, &existing);

        assert_eq!(checkpoint.spans.len(), 2);
        assert_eq!(checkpoint.total_done(), 400);
        assert!(!checkpoint.all_spans_done());
    }

    #[test]
    fn stale_records_are_replanned() {
        // Rows describe a 500-byte source; discovery now says 1000
        let existing = vec![SegmentRecord {
            task_id: 1,
            seg_index: 0,
            start_byte: 0,
            end_byte: 499,
            downloaded: 500,
        }];
        let checkpoint = Checkpoint::plan(Some(1000), true, 2, 100, &existing);

        assert_eq!(checkpoint.total_done(), 0, "stale checkpoint discarded");
        let covered: u64 = checkpoint.spans.iter().map(|s| s.len().unwrap()).sum();
        assert_eq!(covered, 1000);
    }

    #[test]
    fn open_ended_records_replan_once_size_is_known() {
        let existing = vec![SegmentRecord {
            task_id: 1,
            seg_index: 0,
            start_byte: 0,
            end_byte: i64::MAX,
            downloaded: 400,
        }];
        let checkpoint = Checkpoint::plan(Some(1000), true, 2, 100, &existing);

        assert!(!checkpoint.whole);
        let covered: u64 = checkpoint.spans.iter().map(|s| s.len().unwrap()).sum();
        assert_eq!(covered, 1000);
    }

    #[test]
    fn unknown_size_resumes_by_offset() {
        let existing = vec![SegmentRecord {
            task_id: 1,
            seg_index: 0,
            start_byte: 0,
            end_byte: i64::MAX,
            downloaded: 400,
        }];
        let checkpoint = Checkpoint::plan(None, true, 4, 100, &existing);

        assert_eq!(checkpoint.spans.len(), 1);
        assert_eq!(checkpoint.spans[0].end, OPEN_END);
        assert_eq!(checkpoint.total_done(), 400);
    }

    #[test]
    fn done_detection() {
        let checkpoint = Checkpoint::plan(Some(100), true, 1, 1000, &[]);
        assert!(!checkpoint.all_spans_done());
        checkpoint.counters[0].fetch_add(100, Ordering::Relaxed);
        assert!(checkpoint.all_spans_done());
        assert_eq!(checkpoint.total_done(), 100);
    }

    #[test]
    fn whole_checkpoint_persists_nothing() {
        let checkpoint = Checkpoint::plan(None, false, 4, 1, &[]);
        assert!(checkpoint.records(crate::types::TaskId(1)).is_empty());
    }
}
