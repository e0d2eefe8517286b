//! Positional indexing with Python sequence semantics.
//!
//! Negative positions count from the end.  Slice bounds are clamped to the
//! collection instead of failing, so an out-of-range slice is simply empty.

use crate::error::AppError;

/// `start:stop:step`, each bound optional.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SliceSpec {
    pub start: Option<i64>,
    pub stop: Option<i64>,
    pub step: Option<i64>,
}

impl SliceSpec {
    /// `[:]`
    pub fn full() -> Self {
        Self::default()
    }

    /// `[start:stop]`
    pub fn range(start: i64, stop: i64) -> Self {
        Self { start: Some(start), stop: Some(stop), step: None }
    }

    /// `[start:]`
    pub fn starting(start: i64) -> Self {
        Self { start: Some(start), ..Self::default() }
    }

    /// `[:stop]`
    pub fn until(stop: i64) -> Self {
        Self { stop: Some(stop), ..Self::default() }
    }

    pub fn step(mut self, step: i64) -> Self {
        self.step = Some(step);
        self
    }

    /// Resolve against a sequence of `len` items.
    pub fn resolve(&self, len: usize) -> Result<ResolvedSlice, AppError> {
        let step = self.step.unwrap_or(1);
        if step == 0 {
            return Err(AppError::InvalidIndexer("slice step cannot be zero".into()));
        }
        let len = i64::try_from(len).unwrap_or(i64::MAX);
        let (lower, upper) = if step > 0 { (0, len) } else { (-1, len - 1) };

        let clamp = |bound: i64| {
            if bound < 0 {
                (bound + len).max(lower)
            } else {
                bound.min(upper)
            }
        };
        let start = self.start.map_or(if step > 0 { lower } else { upper }, clamp);
        let stop = self.stop.map_or(if step > 0 { upper } else { lower }, clamp);

        let (near, far) = if step > 0 { (start, stop) } else { (stop, start) };
        let count = if near < far {
            (far - near - 1).unsigned_abs() / step.unsigned_abs() + 1
        } else {
            0
        };

        Ok(ResolvedSlice { start, step, count: count as usize })
    }
}

impl From<std::ops::Range<i64>> for SliceSpec {
    fn from(r: std::ops::Range<i64>) -> Self {
        SliceSpec::range(r.start, r.end)
    }
}

/// A slice pinned to concrete positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedSlice {
    /// First position (meaningless when `count == 0`).
    pub start: i64,
    pub step: i64,
    pub count: usize,
}

impl ResolvedSlice {
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Ascending-from-the-front positions, in yield order.
    pub fn positions(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.count).map(move |i| (self.start + self.step * i as i64) as usize)
    }

    /// Rows spanned by the slice in scan order, stride included.
    pub fn span(&self) -> usize {
        if self.count == 0 {
            0
        } else {
            (self.count - 1) * self.step.unsigned_abs() as usize + 1
        }
    }
}

/// Resolve a single position.  `None` when `|index|` is past the end.
pub fn resolve_position(index: i64, len: usize) -> Option<usize> {
    let len = i64::try_from(len).ok()?;
    let pos = if index < 0 { index.checked_add(len)? } else { index };
    (0..len).contains(&pos).then_some(pos as usize)
}

// ── Indexer ───────────────────────────────────────────────────────────────────

/// Everything a collection can be subscripted with.
#[derive(Debug, Clone, PartialEq)]
pub enum Indexer {
    Position(i64),
    Slice(SliceSpec),
    Field(String),
    Fields(Vec<String>),
}

impl From<i64> for Indexer {
    fn from(i: i64) -> Self { Indexer::Position(i) }
}
impl From<SliceSpec> for Indexer {
    fn from(s: SliceSpec) -> Self { Indexer::Slice(s) }
}
impl From<std::ops::Range<i64>> for Indexer {
    fn from(r: std::ops::Range<i64>) -> Self { Indexer::Slice(r.into()) }
}
impl From<&str> for Indexer {
    fn from(f: &str) -> Self { Indexer::Field(f.to_string()) }
}
impl From<Vec<&str>> for Indexer {
    fn from(fs: Vec<&str>) -> Self { Indexer::Fields(fs.into_iter().map(String::from).collect()) }
}
impl From<&[&str]> for Indexer {
    fn from(fs: &[&str]) -> Self { Indexer::Fields(fs.iter().map(|f| f.to_string()).collect()) }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn positions(spec: SliceSpec, len: usize) -> Vec<usize> {
        spec.resolve(len).unwrap().positions().collect()
    }

    #[test]
    fn plain_ranges() {
        assert_eq!(positions(SliceSpec::range(1, 4), 10), vec![1, 2, 3]);
        assert_eq!(positions(SliceSpec::full(), 3), vec![0, 1, 2]);
        assert_eq!(positions(SliceSpec::starting(8), 10), vec![8, 9]);
        assert_eq!(positions(SliceSpec::until(2), 10), vec![0, 1]);
    }

    #[test]
    fn negative_bounds_wrap() {
        assert_eq!(positions(SliceSpec::starting(-2), 5), vec![3, 4]);
        assert_eq!(positions(SliceSpec::range(-4, -1), 5), vec![1, 2, 3]);
        assert_eq!(positions(SliceSpec::range(1, -1), 4), vec![1, 2]);
    }

    #[test]
    fn bounds_clamp_instead_of_failing() {
        assert_eq!(positions(SliceSpec::range(3, 100), 5), vec![3, 4]);
        assert_eq!(positions(SliceSpec::range(-100, 2), 5), vec![0, 1]);
        assert!(positions(SliceSpec::range(7, 9), 5).is_empty());
        assert!(positions(SliceSpec::range(3, 3), 5).is_empty());
        assert!(positions(SliceSpec::range(4, 2), 5).is_empty());
    }

    #[test]
    fn steps() {
        assert_eq!(positions(SliceSpec::full().step(2), 7), vec![0, 2, 4, 6]);
        assert_eq!(positions(SliceSpec::full().step(-1), 4), vec![3, 2, 1, 0]);
        assert_eq!(positions(SliceSpec::range(5, 1).step(-2), 10), vec![5, 3]);
        assert_eq!(positions(SliceSpec::full().step(-3), 7), vec![6, 3, 0]);
    }

    #[test]
    fn extreme_steps_take_one_element() {
        assert_eq!(positions(SliceSpec::full().step(i64::MIN), 5), vec![4]);
        assert_eq!(positions(SliceSpec::full().step(i64::MAX), 5), vec![0]);
        assert_eq!(SliceSpec::full().step(i64::MIN).resolve(5).unwrap().span(), 1);
    }

    #[test]
    fn zero_step_is_invalid_indexer() {
        let err = SliceSpec::full().step(0).resolve(3).unwrap_err();
        assert!(matches!(err, AppError::InvalidIndexer(_)));
    }

    #[test]
    fn empty_collection() {
        assert!(SliceSpec::full().resolve(0).unwrap().is_empty());
        assert!(SliceSpec::full().step(-1).resolve(0).unwrap().is_empty());
    }

    #[test]
    fn span_includes_stride() {
        let r = SliceSpec::full().step(3).resolve(7).unwrap();
        assert_eq!(r.count, 3);
        assert_eq!(r.span(), 7);
    }

    #[test]
    fn single_positions() {
        assert_eq!(resolve_position(0, 3), Some(0));
        assert_eq!(resolve_position(-1, 3), Some(2));
        assert_eq!(resolve_position(-3, 3), Some(0));
        assert_eq!(resolve_position(3, 3), None);
        assert_eq!(resolve_position(-4, 3), None);
        assert_eq!(resolve_position(0, 0), None);
    }
}
