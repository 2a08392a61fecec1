use super::{MergeError, ResultMerger};
use crate::mapper::QueryRange;
use slice_core::Row;

/// Applies a global offset and limit on top of another merger.
///
/// Each slice was asked for `offset + limit` rows, so skipping and cutting
/// here yields the same window a single store would have returned.
pub struct RangeMerger {
    inner: Box<dyn ResultMerger>,
    range: QueryRange,
    to_skip: usize,
    emitted: usize,
    done: bool,
}

impl RangeMerger {
    pub fn new(inner: Box<dyn ResultMerger>, range: QueryRange) -> Self {
        Self {
            inner,
            to_skip: range.offset,
            range,
            emitted: 0,
            done: false,
        }
    }

    fn exhausted(&self) -> bool {
        self.range.limit.is_some_and(|limit| self.emitted >= limit)
    }
}

impl ResultMerger for RangeMerger {
    fn open(&mut self) -> Result<(), MergeError> {
        self.inner.open()
    }

    fn next(&mut self) -> Result<bool, MergeError> {
        while self.to_skip > 0 {
            if !self.inner.next()? {
                self.to_skip = 0;
                self.done = true;
                return Ok(false);
            }
            self.to_skip -= 1;
        }
        if self.done || self.exhausted() {
            self.done = true;
            return Ok(false);
        }
        if self.inner.next()? {
            self.emitted += 1;
            Ok(true)
        } else {
            self.done = true;
            Ok(false)
        }
    }

    fn current(&self) -> Option<&Row> {
        if self.done || self.emitted == 0 {
            return None;
        }
        self.inner.current()
    }

    fn close(&mut self) -> Result<(), MergeError> {
        self.inner.close()
    }
}
