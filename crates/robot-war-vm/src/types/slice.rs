use crate::{
    exception_private::{ExcType, RunResult},
    value::Value,
};

/// A `slice(start, stop, step)` object; missing bounds are `None`.
#[derive(Debug, Clone)]
pub struct Slice {
    pub start: Value,
    pub stop: Value,
    pub step: Value,
}

impl Slice {
    #[must_use]
    pub fn new(start: Value, stop: Value, step: Value) -> Self {
        Self { start, stop, step }
    }

    /// Resolves the slice against a sequence length, returning the selected indices
    /// in iteration order.
    #[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
    pub fn indices(&self, len: usize) -> RunResult<Vec<usize>> {
        let len = len as i64;
        let step = match &self.step {
            Value::None => 1,
            other => other.as_int("slice indices")?,
        };
        if step == 0 {
            return Err(ExcType::ValueError.msg("slice step cannot be zero"));
        }
        let clamp = |value: &Value, default: i64| -> RunResult<i64> {
            match value {
                Value::None => Ok(default),
                other => {
                    let mut index = other.as_int("slice indices")?;
                    if index < 0 {
                        index += len;
                    }
                    Ok(if step > 0 {
                        index.clamp(0, len)
                    } else {
                        index.clamp(-1, len - 1)
                    })
                }
            }
        };
        let mut out = Vec::new();
        if step > 0 {
            let (start, stop) = (clamp(&self.start, 0)?, clamp(&self.stop, len)?);
            let mut i = start;
            while i < stop {
                out.push(i as usize);
                i += step;
            }
        } else {
            let (start, stop) = (clamp(&self.start, len - 1)?, clamp(&self.stop, -1)?);
            let mut i = start;
            while i > stop {
                out.push(i as usize);
                i += step;
            }
        }
        Ok(out)
    }

    /// Start and stop of a contiguous (step 1) slice, used for slice assignment.
    #[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
    pub fn contiguous_bounds(&self, len: usize) -> RunResult<(usize, usize)> {
        if !matches!(self.step, Value::None | Value::Int(1)) {
            return Err(ExcType::ValueError.msg("extended slice assignment is not supported"));
        }
        let len_i = len as i64;
        let bound = |value: &Value, default: i64| -> RunResult<usize> {
            match value {
                Value::None => Ok(default as usize),
                other => {
                    let mut index = other.as_int("slice indices")?;
                    if index < 0 {
                        index += len_i;
                    }
                    Ok(index.clamp(0, len_i) as usize)
                }
            }
        };
        let start = bound(&self.start, 0)?;
        let stop = bound(&self.stop, len_i)?.max(start);
        Ok((start, stop))
    }
}
