use std::rc::Rc;

use ahash::RandomState;
use indexmap::IndexMap;

use crate::value::Value;

/// Insertion-ordered name to value mapping used for module globals, class bodies and
/// instance attributes.
#[derive(Debug, Clone, Default)]
pub struct Namespace {
    values: IndexMap<Rc<str>, Value, RandomState>,
}

impl Namespace {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Value> {
        self.values.get(name).cloned()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn set(&mut self, name: impl Into<Rc<str>>, value: Value) {
        self.values.insert(name.into(), value);
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.values.shift_remove(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Rc<str>, &Value)> {
        self.values.iter()
    }

    #[must_use]
    pub fn names(&self) -> Vec<Rc<str>> {
        self.values.keys().cloned().collect()
    }
}
