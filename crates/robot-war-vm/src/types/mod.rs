mod dict;
mod iter;
mod range;
mod slice;

use strum::{Display, EnumString, IntoStaticStr};

pub(crate) use dict::DictKey;
pub use dict::{Dict, Set};
pub(crate) use iter::collect_items;
pub use iter::ValueIter;
pub use range::Range;
pub use slice::Slice;

/// Builtin types that scripts can name, call as constructors and pass to `isinstance`.
#[derive(Debug, Clone, Copy, Display, EnumString, IntoStaticStr, PartialEq, Eq, Hash)]
#[strum(serialize_all = "lowercase")]
pub enum Type {
    Object,
    Type,
    #[strum(serialize = "NoneType")]
    NoneType,
    Bool,
    Int,
    Float,
    Str,
    List,
    Tuple,
    Dict,
    Set,
    Range,
    Slice,
}

impl Type {
    /// Checks if a value of type `self` is an instance of `other`.
    ///
    /// `bool` is a subtype of `int`, and everything is an `object`.
    #[must_use]
    pub fn is_instance_of(self, other: Self) -> bool {
        self == other || other == Self::Object || (self == Self::Bool && other == Self::Int)
    }
}
