//! Implementation of the isinstance() builtin function.

use super::Builtins;
use crate::{
    exception_private::{ExcType, RunResult},
    value::Value,
};

/// Checks if `value` is an instance of `class_info`: a builtin type, an exception type, a
/// source class, a capability class, or a (possibly nested) tuple of those.
pub(crate) fn isinstance(value: &Value, class_info: &Value) -> RunResult<bool> {
    match class_info {
        Value::Builtin(Builtins::Type(t)) => Ok(match value.builtin_type() {
            Some(value_type) => value_type.is_instance_of(*t),
            None => *t == crate::types::Type::Object,
        }),
        Value::Builtin(Builtins::ExcType(handler)) => Ok(match value {
            Value::Exception(exc) => exc.exc_type().is_subclass_of(*handler),
            Value::Instance(instance) => instance
                .class()
                .exception_base()
                .is_some_and(|base| base.is_subclass_of(*handler)),
            _ => false,
        }),
        Value::Class(class) => Ok(matches!(value, Value::Instance(instance) if instance.class().is_subclass_of(class))),
        Value::ApiClass(api_class) => Ok(match value {
            Value::ApiObject(object) => object.type_name() == api_class.name(),
            Value::Instance(instance) => instance.class().derives_from_api(api_class),
            _ => false,
        }),
        Value::Tuple(options) => {
            for option in options.iter() {
                if isinstance(value, option)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        _ => Err(ExcType::TypeError.msg("isinstance() arg 2 must be a type or tuple of types")),
    }
}
