//! Attribute access on every value kind.
//!
//! Resolution for instances and classes lives in [`crate::class`]; this module maps each value
//! kind onto it and produces CPython-shaped `AttributeError`s when nothing is found.

use std::rc::Rc;

use crate::{
    builtins::methods::BuiltinMethod,
    exception_private::{ExcType, RunResult},
    value::Value,
};

/// `owner.name`
pub(crate) fn load_attr(owner: &Value, name: &str) -> RunResult<Value> {
    let found = match owner {
        Value::Instance(instance) => match name {
            "__class__" => Some(Value::Class(instance.class().clone())),
            "args" if instance.class().exception_base().is_some() => {
                Some(instance.get_value("args").unwrap_or_else(|| Value::tuple(Vec::new())))
            }
            _ => instance.lookup(name),
        },
        Value::Class(class) => match name {
            "__name__" => Some(Value::from(class.name())),
            _ => class.lookup(name),
        },
        Value::Module(module) => {
            return module
                .get(name)
                .ok_or_else(|| ExcType::attribute_error_module(module.name(), name));
        }
        Value::ApiObject(object) => object.clone().get_attr(name),
        Value::ApiClass(class) => (name == "__name__").then(|| Value::from(class.name())),
        Value::Exception(exc) => (name == "args").then(|| Value::tuple(exc.args().to_vec())),
        Value::Function(function) => match name {
            "__name__" => Some(Value::from(function.name())),
            "__qualname__" => Some(Value::from(function.qualname())),
            _ => None,
        },
        Value::BoundMethod(method) => match name {
            "__self__" => Some(method.receiver.clone()),
            "__func__" => Some(Value::Function(method.function.clone())),
            "__name__" => Some(Value::from(method.function.name())),
            _ => None,
        },
        Value::Builtin(builtin) => (name == "__name__").then(|| Value::from(builtin.name())),
        Value::Range(range) => match name {
            "start" => Some(Value::Int(range.start)),
            "stop" => Some(Value::Int(range.stop)),
            "step" => Some(Value::Int(range.step)),
            _ => None,
        },
        Value::Slice(slice) => match name {
            "start" => Some(slice.start.clone()),
            "stop" => Some(slice.stop.clone()),
            "step" => Some(slice.step.clone()),
            _ => None,
        },
        Value::Float(f) => match name {
            "real" => Some(Value::Float(*f)),
            "imag" => Some(Value::Float(0.0)),
            _ => None,
        },
        Value::Int(i) => match name {
            "real" | "numerator" => Some(Value::Int(*i)),
            "imag" => Some(Value::Int(0)),
            "denominator" => Some(Value::Int(1)),
            _ => None,
        },
        other => BuiltinMethod::lookup(other, name).map(|method| Value::BuiltinMethod(Rc::new(method))),
    };
    found.ok_or_else(|| missing_attr(owner, name))
}

/// `owner.name = value`
pub(crate) fn store_attr(owner: &Value, name: &str, value: Value) -> RunResult<()> {
    match owner {
        Value::Instance(instance) => instance.set_value(name, value),
        Value::Class(class) => class.set_attr(name, value),
        Value::Module(module) => module.set(name, value),
        Value::ApiObject(object) => object.set_attr(name, value)?,
        other => {
            return Err(if BuiltinMethod::lookup(other, name).is_some() {
                ExcType::AttributeError.msg(format!(
                    "'{}' object attribute '{name}' is read-only",
                    other.type_name()
                ))
            } else {
                ExcType::attribute_error(&other.type_name(), name)
            })
        }
    }
    Ok(())
}

/// `del owner.name`
pub(crate) fn delete_attr(owner: &Value, name: &str) -> RunResult<()> {
    let removed = match owner {
        Value::Instance(instance) => instance.remove_value(name),
        Value::Class(class) => class.remove_attr(name),
        Value::Module(module) => module.remove(name),
        _ => None,
    };
    removed.map(drop).ok_or_else(|| missing_attr(owner, name))
}

fn missing_attr(owner: &Value, name: &str) -> crate::exception_private::RunError {
    match owner {
        Value::Class(class) => {
            ExcType::AttributeError.msg(format!("type object '{}' has no attribute '{name}'", class.name()))
        }
        Value::ApiClass(class) => {
            ExcType::AttributeError.msg(format!("type object '{}' has no attribute '{name}'", class.name()))
        }
        Value::Module(module) => ExcType::attribute_error_module(module.name(), name),
        other => ExcType::attribute_error(&other.type_name(), name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        class::{ClassParent, SourceClass, SourceInstance},
        module::Module,
    };

    fn class(name: &str, parents: Vec<ClassParent>, module: &Rc<Module>) -> Rc<SourceClass> {
        Rc::new(SourceClass::new(name, parents, module))
    }

    #[test]
    fn leftmost_parent_wins() {
        let module = Module::new("m", None, false);
        let a = class("A", vec![], &module);
        a.set_attr("x", Value::Int(1));
        let b = class("B", vec![], &module);
        b.set_attr("x", Value::Int(2));
        let c = class("C", vec![ClassParent::Source(b), ClassParent::Source(a.clone())], &module);
        let instance = Value::Instance(Rc::new(SourceInstance::new(c.clone(), Vec::new())));
        assert_eq!(load_attr(&instance, "x").unwrap().py_repr(), "2");

        let d = class("D", vec![ClassParent::Source(c)], &module);
        d.set_attr("x", Value::Int(3));
        let instance = Value::Instance(Rc::new(SourceInstance::new(d, Vec::new())));
        assert_eq!(load_attr(&instance, "x").unwrap().py_repr(), "3");
        store_attr(&instance, "x", Value::Int(4)).unwrap();
        assert_eq!(load_attr(&instance, "x").unwrap().py_repr(), "4");
        assert_eq!(load_attr(&Value::Class(a), "x").unwrap().py_repr(), "1");
    }

    #[test]
    fn module_fallback_comes_last() {
        let module = Module::new("m", None, false);
        module.set("helper", Value::Int(9));
        let a = class("A", vec![], &module);
        let instance = Value::Instance(Rc::new(SourceInstance::new(a, Vec::new())));
        assert_eq!(load_attr(&instance, "helper").unwrap().py_repr(), "9");
        let err = load_attr(&instance, "missing").unwrap_err();
        assert!(err.to_string().contains("'A' object has no attribute 'missing'"), "{err}");
    }

    #[test]
    fn builtin_values() {
        let list = Value::list(vec![]);
        assert!(matches!(load_attr(&list, "append").unwrap(), Value::BuiltinMethod(_)));
        assert!(store_attr(&list, "append", Value::None).is_err());
        let err = load_attr(&Value::Int(1), "nope").unwrap_err();
        assert!(err.to_string().contains("'int' object has no attribute 'nope'"), "{err}");
        assert!(delete_attr(&list, "append").is_err());
    }
}
