use ahash::RandomState;
use indexmap::IndexMap;

use crate::{
    exception_private::{ExcType, RunResult},
    value::Value,
};

/// Hashable projection of a [`Value`] used to key dicts and sets.
///
/// Numbers that compare equal hash equal (`1`, `1.0` and `True` are the same key), strings and
/// tuples hash by content, and every object with identity hashes by address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum DictKey {
    None,
    Ellipsis,
    Int(i64),
    Float(u64),
    Str(std::rc::Rc<str>),
    Tuple(Vec<DictKey>),
    Type(&'static str),
    Identity(usize),
}

impl DictKey {
    pub fn new(value: &Value) -> RunResult<Self> {
        Ok(match value {
            Value::None => Self::None,
            Value::Ellipsis => Self::Ellipsis,
            Value::Bool(b) => Self::Int(i64::from(*b)),
            Value::Int(i) => Self::Int(*i),
            Value::Float(f) => float_key(*f),
            Value::Str(s) => Self::Str(s.clone()),
            Value::Tuple(items) => Self::Tuple(items.iter().map(Self::new).collect::<RunResult<_>>()?),
            Value::Range(range) => Self::Tuple(vec![
                Self::Int(range.start),
                Self::Int(range.stop),
                Self::Int(range.step),
            ]),
            Value::Builtin(builtin) => Self::Type(builtin.name()),
            Value::List(_) | Value::Dict(_) | Value::Set(_) | Value::Slice(_) => {
                return Err(ExcType::type_error_unhashable(&value.type_name()));
            }
            other => match other.identity() {
                Some(address) => Self::Identity(address),
                None => return Err(ExcType::type_error_unhashable(&other.type_name())),
            },
        })
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn float_key(f: f64) -> DictKey {
    if f.fract() == 0.0 && f.abs() < 9.0e18 {
        DictKey::Int(f as i64)
    } else {
        DictKey::Float(f.to_bits())
    }
}

/// Insertion-ordered dict storing the original key value alongside each entry.
#[derive(Debug, Clone, Default)]
pub struct Dict {
    map: IndexMap<DictKey, (Value, Value), RandomState>,
}

impl Dict {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs(pairs: impl IntoIterator<Item = (Value, Value)>) -> RunResult<Self> {
        let mut dict = Self::new();
        for (key, value) in pairs {
            dict.insert(key, value)?;
        }
        Ok(dict)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn insert(&mut self, key: Value, value: Value) -> RunResult<()> {
        let hashed = DictKey::new(&key)?;
        match self.map.get_mut(&hashed) {
            // dict assignment keeps the first key object, like CPython
            Some(entry) => entry.1 = value,
            None => {
                self.map.insert(hashed, (key, value));
            }
        }
        Ok(())
    }

    pub fn get(&self, key: &Value) -> RunResult<Option<Value>> {
        Ok(self.map.get(&DictKey::new(key)?).map(|(_, v)| v.clone()))
    }

    /// Looks up a string key without allocating a `Value`.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<Value> {
        self.map.get(&DictKey::Str(key.into())).map(|(_, v)| v.clone())
    }

    pub fn contains(&self, key: &Value) -> RunResult<bool> {
        Ok(self.map.contains_key(&DictKey::new(key)?))
    }

    pub fn remove(&mut self, key: &Value) -> RunResult<Option<Value>> {
        Ok(self.map.shift_remove(&DictKey::new(key)?).map(|(_, v)| v))
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.map.values().map(|(k, v)| (k, v))
    }

    #[must_use]
    pub fn keys(&self) -> Vec<Value> {
        self.map.values().map(|(k, _)| k.clone()).collect()
    }

    #[must_use]
    pub fn values(&self) -> Vec<Value> {
        self.map.values().map(|(_, v)| v.clone()).collect()
    }

    #[must_use]
    pub fn items(&self) -> Vec<Value> {
        self.map
            .values()
            .map(|(k, v)| Value::tuple(vec![k.clone(), v.clone()]))
            .collect()
    }

    pub(crate) fn eq_at(&self, other: &Self, depth: usize) -> RunResult<bool> {
        if self.len() != other.len() {
            return Ok(false);
        }
        for (key, (_, value)) in &self.map {
            match other.map.get(key) {
                Some((_, other_value)) if value.eq_at(other_value, depth)? => {}
                _ => return Ok(false),
            }
        }
        Ok(true)
    }
}

/// Insertion-ordered set of hashable values.
#[derive(Debug, Clone, Default)]
pub struct Set {
    map: IndexMap<DictKey, Value, RandomState>,
}

impl Set {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_values(values: impl IntoIterator<Item = Value>) -> RunResult<Self> {
        let mut set = Self::new();
        for value in values {
            set.add(value)?;
        }
        Ok(set)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn add(&mut self, value: Value) -> RunResult<()> {
        let key = DictKey::new(&value)?;
        self.map.entry(key).or_insert(value);
        Ok(())
    }

    pub fn contains(&self, value: &Value) -> RunResult<bool> {
        Ok(self.map.contains_key(&DictKey::new(value)?))
    }

    pub fn remove(&mut self, value: &Value) -> RunResult<bool> {
        Ok(self.map.shift_remove(&DictKey::new(value)?).is_some())
    }

    pub fn pop(&mut self) -> Option<Value> {
        self.map.shift_remove_index(0).map(|(_, v)| v)
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.map.values()
    }

    #[must_use]
    pub fn to_vec(&self) -> Vec<Value> {
        self.map.values().cloned().collect()
    }

    pub(crate) fn py_eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.map.keys().all(|key| other.map.contains_key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_keys_collapse() {
        let mut dict = Dict::new();
        dict.insert(Value::Int(1), Value::from("int")).unwrap();
        dict.insert(Value::Float(1.0), Value::from("float")).unwrap();
        dict.insert(Value::Bool(true), Value::from("bool")).unwrap();
        assert_eq!(dict.len(), 1);
        assert_eq!(dict.get(&Value::Int(1)).unwrap().unwrap().py_str(), "bool");
        // the first key object is kept
        assert_eq!(dict.keys()[0].py_repr(), "1");
    }

    #[test]
    fn lists_are_unhashable() {
        let mut set = Set::new();
        let err = set.add(Value::list(vec![])).unwrap_err();
        assert!(err.to_string().contains("unhashable type: 'list'"));
    }

    #[test]
    fn dict_preserves_insertion_order() {
        let dict = Dict::from_pairs([
            (Value::from("b"), Value::Int(2)),
            (Value::from("a"), Value::Int(1)),
        ])
        .unwrap();
        assert_eq!(Value::dict(dict).py_repr(), "{'b': 2, 'a': 1}");
    }
}
