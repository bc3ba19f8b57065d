use std::rc::Rc;

use crate::{
    exception_private::{ExcType, RunResult},
    value::Value,
};

/// Arguments of a call: positional values plus keyword values in call order.
#[derive(Debug, Clone, Default)]
pub struct ArgValues {
    positional: Vec<Value>,
    kwargs: Vec<(Rc<str>, Value)>,
}

impl ArgValues {
    #[must_use]
    pub fn new(positional: Vec<Value>, kwargs: Vec<(Rc<str>, Value)>) -> Self {
        Self { positional, kwargs }
    }

    #[must_use]
    pub fn positional(positional: Vec<Value>) -> Self {
        Self {
            positional,
            kwargs: Vec::new(),
        }
    }

    /// Number of positional arguments.
    #[must_use]
    pub fn count(&self) -> usize {
        self.positional.len()
    }

    #[must_use]
    pub fn has_kwargs(&self) -> bool {
        !self.kwargs.is_empty()
    }

    /// Inserts a leading positional argument (the receiver of a bound method).
    pub fn prepend(&mut self, value: Value) {
        self.positional.insert(0, value);
    }

    pub fn check_no_kwargs(&self, name: &str) -> RunResult<()> {
        if self.kwargs.is_empty() {
            Ok(())
        } else {
            Err(ExcType::type_error_no_kwargs(name))
        }
    }

    /// Removes and returns a keyword argument by name.
    pub fn take_kwarg(&mut self, name: &str) -> Option<Value> {
        let index = self.kwargs.iter().position(|(key, _)| &**key == name)?;
        Some(self.kwargs.remove(index).1)
    }

    /// Checks that zero arguments were passed.
    pub fn check_zero_args(&self, name: &str) -> RunResult<()> {
        self.check_no_kwargs(name)?;
        match self.positional.len() {
            0 => Ok(()),
            n => Err(ExcType::type_error_no_args(name, n)),
        }
    }

    /// Checks that exactly one argument was passed, returning it.
    pub fn get_one_arg(self, name: &str) -> RunResult<Value> {
        self.check_no_kwargs(name)?;
        let count = self.positional.len();
        let mut iter = self.positional.into_iter();
        match (iter.next(), iter.next()) {
            (Some(a), None) => Ok(a),
            _ => Err(ExcType::type_error_arg_count(name, 1, count)),
        }
    }

    /// Checks that exactly two arguments were passed, returning them as a tuple.
    pub fn get_two_args(self, name: &str) -> RunResult<(Value, Value)> {
        self.check_no_kwargs(name)?;
        let count = self.positional.len();
        let mut iter = self.positional.into_iter();
        match (iter.next(), iter.next(), iter.next()) {
            (Some(a), Some(b), None) => Ok((a, b)),
            _ => Err(ExcType::type_error_arg_count(name, 2, count)),
        }
    }

    /// Checks that zero or one arguments were passed.
    pub fn get_zero_one_arg(self, name: &str) -> RunResult<Option<Value>> {
        self.check_no_kwargs(name)?;
        let count = self.positional.len();
        let mut iter = self.positional.into_iter();
        match (iter.next(), iter.next()) {
            (a, None) => Ok(a),
            _ => Err(ExcType::type_error_at_most(name, 1, count)),
        }
    }

    /// Checks that one or two arguments were passed.
    pub fn get_one_two_args(self, name: &str) -> RunResult<(Value, Option<Value>)> {
        self.check_no_kwargs(name)?;
        let count = self.positional.len();
        let mut iter = self.positional.into_iter();
        match (iter.next(), iter.next(), iter.next()) {
            (Some(a), b, None) => Ok((a, b)),
            (None, _, _) => Err(ExcType::type_error_at_least(name, 1, count)),
            _ => Err(ExcType::type_error_at_most(name, 2, count)),
        }
    }

    /// Checks that at most two arguments were passed.
    pub fn get_zero_one_two_args(self, name: &str) -> RunResult<(Option<Value>, Option<Value>)> {
        self.check_no_kwargs(name)?;
        let count = self.positional.len();
        let mut iter = self.positional.into_iter();
        match (iter.next(), iter.next(), iter.next()) {
            (a, b, None) => Ok((a, b)),
            _ => Err(ExcType::type_error_at_most(name, 2, count)),
        }
    }

    /// Returns the positional arguments, dropping keywords.
    #[must_use]
    pub fn into_positional(self) -> Vec<Value> {
        self.positional
    }

    #[must_use]
    pub fn into_parts(self) -> (Vec<Value>, Vec<(Rc<str>, Value)>) {
        (self.positional, self.kwargs)
    }
}
