use crate::{
    args::ArgValues,
    exception_private::{ExcType, RunResult},
    value::Value,
};

/// An immutable arithmetic progression, as produced by `range()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub start: i64,
    pub stop: i64,
    pub step: i64,
}

impl Range {
    pub fn new(start: i64, stop: i64, step: i64) -> RunResult<Self> {
        if step == 0 {
            return Err(ExcType::ValueError.msg("range() arg 3 must not be zero"));
        }
        Ok(Self { start, stop, step })
    }

    /// `range(stop)`, `range(start, stop)` or `range(start, stop, step)`.
    pub fn init(args: ArgValues) -> RunResult<Value> {
        args.check_no_kwargs("range")?;
        let values = args.into_positional();
        let ints = values
            .iter()
            .map(|v| v.as_int("range() argument"))
            .collect::<RunResult<Vec<_>>>()?;
        let range = match ints.as_slice() {
            [stop] => Self::new(0, *stop, 1)?,
            [start, stop] => Self::new(*start, *stop, 1)?,
            [start, stop, step] => Self::new(*start, *stop, *step)?,
            [] => return Err(ExcType::type_error_at_least("range", 1, 0)),
            _ => return Err(ExcType::type_error_at_most("range", 3, ints.len())),
        };
        Ok(Value::Range(range))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        let (lo, hi, step) = if self.step > 0 {
            (self.start, self.stop, i128::from(self.step))
        } else {
            (self.stop, self.start, -i128::from(self.step))
        };
        if lo >= hi {
            0
        } else {
            usize::try_from((i128::from(hi) - i128::from(lo) - 1) / step + 1).unwrap_or(usize::MAX)
        }
    }

    /// Element at a non-negative index.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<i64> {
        if index >= self.len() {
            return None;
        }
        i64::try_from(index)
            .ok()
            .and_then(|i| i.checked_mul(self.step))
            .and_then(|offset| self.start.checked_add(offset))
    }

    #[must_use]
    pub fn contains(&self, value: i64) -> bool {
        let in_bounds = if self.step > 0 {
            value >= self.start && value < self.stop
        } else {
            value <= self.start && value > self.stop
        };
        in_bounds && (value - self.start) % self.step == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = i64> + '_ {
        (0..self.len()).filter_map(|index| self.get(index))
    }
}
