//! Lazy integer intervals.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A lazy half-open integer interval with a non-zero step. Traversal
/// primitives materialize it on demand; until then it stores three words.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RangeValue {
    pub start: i64,
    pub stop: i64,
    pub step: i64,
}

impl RangeValue {
    pub fn new(start: i64, stop: i64, step: i64) -> Result<Self> {
        if step == 0 {
            return Err(Error::user("range step must not be zero"));
        }
        Ok(Self { start, stop, step })
    }

    #[must_use]
    pub fn upto(stop: i64) -> Self {
        Self { start: 0, stop, step: 1 }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        if self.step > 0 {
            ((self.stop - self.start).max(0) as u64).div_ceil(self.step as u64) as usize
        } else {
            ((self.start - self.stop).max(0) as u64).div_ceil(self.step.unsigned_abs()) as usize
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = i64> + '_ {
        let Self { start, stop, step } = *self;
        std::iter::successors(Some(start), move |v| v.checked_add(step))
            .take_while(move |v| if step > 0 { *v < stop } else { *v > stop })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_range() {
        let r = RangeValue::new(1, 7, 2).unwrap();
        assert_eq!(r.len(), 3);
        assert_eq!(r.iter().collect::<Vec<_>>(), vec![1, 3, 5]);
    }

    #[test]
    fn backward_range() {
        let r = RangeValue::new(3, 0, -1).unwrap();
        assert_eq!(r.iter().collect::<Vec<_>>(), vec![3, 2, 1]);
        assert_eq!(r.len(), 3);
    }

    #[test]
    fn empty_range() {
        assert!(RangeValue::new(5, 5, 1).unwrap().is_empty());
        assert!(RangeValue::new(0, 0, 1).unwrap().iter().next().is_none());
    }

    #[test]
    fn zero_step_is_rejected() {
        assert!(RangeValue::new(0, 3, 0).is_err());
    }
}
