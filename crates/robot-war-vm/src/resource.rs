use serde::{Deserialize, Serialize};

use crate::exception_private::{ExcType, RunResult};

/// Maximum call depth before `RecursionError` is raised, matching CPython's default.
pub const DEFAULT_MAX_RECURSION_DEPTH: usize = 1000;

/// Maximum number of values on a single frame's data stack.
pub const DEFAULT_MAX_DATA_STACK: usize = 10_000;

/// Largest str, list or tuple a script may build, counted in items (chars for str).
///
/// Checked before the allocation so repetition, concatenation and materialized ranges raise
/// `MemoryError` instead of aborting the host.
pub const MAX_SEQUENCE_LEN: usize = 10_000_000;

/// Raises `MemoryError` unless `len` fits under [`MAX_SEQUENCE_LEN`].
pub(crate) fn check_sequence_len(len: usize) -> RunResult<usize> {
    if len > MAX_SEQUENCE_LEN {
        Err(ExcType::MemoryError.msg(format!("sequence of {len} items exceeds the limit of {MAX_SEQUENCE_LEN}")))
    } else {
        Ok(len)
    }
}

/// Combined length of `count` copies of a `len`-item sequence, checked against the cap.
pub(crate) fn repeated_len(len: usize, count: usize) -> RunResult<usize> {
    let total = len.checked_mul(count).ok_or_else(|| ExcType::MemoryError.bare())?;
    check_sequence_len(total)
}

/// Per-sandbox resource limits.
///
/// Both limits surface as catchable script exceptions rather than host failures:
/// exceeding the call depth raises `RecursionError`, exceeding the data stack `MemoryError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLimits {
    pub max_recursion_depth: usize,
    pub max_data_stack: usize,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_recursion_depth: DEFAULT_MAX_RECURSION_DEPTH,
            max_data_stack: DEFAULT_MAX_DATA_STACK,
        }
    }
}

impl ResourceLimits {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn max_recursion_depth(mut self, depth: usize) -> Self {
        self.max_recursion_depth = depth;
        self
    }

    #[must_use]
    pub fn max_data_stack(mut self, size: usize) -> Self {
        self.max_data_stack = size;
        self
    }
}
