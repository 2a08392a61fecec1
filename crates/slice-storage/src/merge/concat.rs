use super::{MergeError, ResultMerger, ShardResult, ShardSet};
use slice_core::Row;

/// Exhausts each slice in turn.
///
/// Order within a slice is preserved; order across slices is only the
/// submission order of the cursors and carries no meaning.
pub struct ConcatMerger {
    shards: ShardSet,
    index: usize,
    current: Option<Row>,
}

impl ConcatMerger {
    pub fn new(shards: Vec<ShardResult>) -> Self {
        Self {
            shards: ShardSet::new(shards),
            index: 0,
            current: None,
        }
    }
}

impl ResultMerger for ConcatMerger {
    fn open(&mut self) -> Result<(), MergeError> {
        self.shards.open()
    }

    fn next(&mut self) -> Result<bool, MergeError> {
        self.shards.ensure_open()?;
        while self.index < self.shards.len() {
            match self.shards.advance(self.index) {
                Ok(Some(row)) => {
                    self.current = Some(row);
                    return Ok(true);
                }
                Ok(None) => self.index += 1,
                Err(e) => {
                    self.current = None;
                    return Err(e);
                }
            }
        }
        self.current = None;
        Ok(false)
    }

    fn current(&self) -> Option<&Row> {
        self.current.as_ref()
    }

    fn close(&mut self) -> Result<(), MergeError> {
        self.current = None;
        self.shards.close()
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use slice_core::SliceName;

    #[test]
    fn test_concat_keeps_per_slice_order() {
        let mut merger = ConcatMerger::new(vec![
            shard("A", int_rows(&[3, 1])),
            shard("B", Vec::new()),
            shard("C", int_rows(&[2])),
        ]);
        merger.open().unwrap();
        assert_eq!(drain_ints(&mut merger).unwrap(), vec![3, 1, 2]);
        assert!(!merger.next().unwrap());
        merger.close().unwrap();
    }

    #[test]
    fn test_rows_carry_origin() {
        let mut merger = ConcatMerger::new(vec![shard("A", int_rows(&[1])), shard("B", int_rows(&[2]))]);
        merger.open().unwrap();

        assert!(merger.next().unwrap());
        assert_eq!(merger.current().unwrap().origin, Some(SliceName::new("A")));
        assert!(merger.next().unwrap());
        assert_eq!(merger.current().unwrap().origin, Some(SliceName::new("B")));
    }

    #[test]
    fn test_lifecycle_errors() {
        let mut merger = ConcatMerger::new(vec![shard("A", int_rows(&[1]))]);
        assert_eq!(merger.next(), Err(MergeError::NotOpen));
        merger.open().unwrap();
        merger.close().unwrap();
        merger.close().unwrap();
        assert_eq!(merger.next(), Err(MergeError::Closed));
    }

    #[test]
    fn test_shard_error_surfaces_and_closes() {
        let mut merger = ConcatMerger::new(vec![
            shard("A", int_rows(&[1])),
            failing_shard("B", int_rows(&[2])),
            shard("C", int_rows(&[3])),
        ]);
        merger.open().unwrap();

        assert!(merger.next().unwrap());
        assert!(merger.next().unwrap());
        let err = merger.next().unwrap_err();
        assert!(matches!(err, MergeError::Shard { ref slice, .. } if slice.as_str() == "B"));
        assert!(merger.current().is_none());
        assert_eq!(merger.next(), Err(MergeError::Closed));
    }
}
