use std::{cell::RefCell, rc::Rc};

use crate::{
    args::ArgValues,
    bytecode::CodeBlock,
    class::SourceClass,
    exception_private::{ExcType, RunResult},
    types::Dict,
    value::Value,
};

/// A closure cell shared between the defining frame and the functions that capture it.
pub type CellRef = Rc<RefCell<Option<Value>>>;

pub(crate) fn new_cell(value: Option<Value>) -> CellRef {
    Rc::new(RefCell::new(value))
}

/// A function created by `MAKE_FUNCTION`.
#[derive(Debug)]
pub struct Function {
    qualname: Rc<str>,
    code: Rc<CodeBlock>,
    defaults: Vec<Value>,
    kwdefaults: Vec<(Rc<str>, Value)>,
    closure: Vec<CellRef>,
}

/// A class body bound to the class whose namespace it fills.
#[derive(Debug)]
pub struct Constructor {
    pub function: Rc<Function>,
    pub class: Rc<SourceClass>,
}

impl Function {
    pub(crate) fn new(
        qualname: Rc<str>,
        code: Rc<CodeBlock>,
        defaults: Vec<Value>,
        kwdefaults: Vec<(Rc<str>, Value)>,
        closure: Vec<CellRef>,
    ) -> Self {
        Self {
            qualname,
            code,
            defaults,
            kwdefaults,
            closure,
        }
    }

    /// A plain function over engine-synthesized code.
    pub(crate) fn synthetic(code: Rc<CodeBlock>) -> Self {
        Self::new(code.name().into(), code, Vec::new(), Vec::new(), Vec::new())
    }

    #[must_use]
    pub fn qualname(&self) -> &str {
        &self.qualname
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.code.name()
    }

    pub(crate) fn code(&self) -> &Rc<CodeBlock> {
        &self.code
    }

    /// Binds call arguments to the argument slots of the code.
    ///
    /// Slots are ordered params, keyword-only params, `*args`, `**kwargs`. Positional
    /// arguments fill params first, keywords by name, then positional and keyword-only
    /// defaults fill whatever is still empty.
    pub(crate) fn bind_args(&self, args: ArgValues) -> RunResult<Vec<Option<Value>>> {
        let code = &*self.code;
        let name = code.name();
        let params = code.params();
        let kwonly = code.kwonly();
        let nparams = params.len();
        let mut slots: Vec<Option<Value>> = vec![None; code.slot_count()];
        let (positional, kwargs) = args.into_parts();

        if positional.len() > nparams && code.varargs().is_none() {
            return Err(ExcType::type_error_too_many_positional(name, nparams, positional.len()));
        }
        let mut extra = Vec::new();
        for (index, value) in positional.into_iter().enumerate() {
            if index < nparams {
                slots[index] = Some(value);
            } else {
                extra.push(value);
            }
        }
        let mut slot = nparams + kwonly.len();
        if code.varargs().is_some() {
            slots[slot] = Some(Value::tuple(extra));
            slot += 1;
        }

        let mut extra_kwargs = code.varkw().map(|_| Dict::new());
        for (key, value) in kwargs {
            match params.iter().chain(kwonly).position(|param| **param == *key) {
                Some(index) => {
                    if slots[index].is_some() {
                        return Err(ExcType::type_error_multiple_values(name, &key));
                    }
                    slots[index] = Some(value);
                }
                None => match &mut extra_kwargs {
                    Some(dict) => dict.insert(Value::Str(key), value)?,
                    None => return Err(ExcType::type_error_unexpected_keyword(name, &key)),
                },
            }
        }
        if let Some(dict) = extra_kwargs {
            slots[slot] = Some(Value::dict(dict));
        }

        let first_default = nparams.saturating_sub(self.defaults.len());
        let skipped = self.defaults.len().saturating_sub(nparams);
        for (index, default) in self.defaults.iter().skip(skipped).enumerate() {
            let target = &mut slots[first_default + index];
            if target.is_none() {
                *target = Some(default.clone());
            }
        }
        let missing: Vec<&str> = params
            .iter()
            .zip(&slots)
            .filter(|(_, value)| value.is_none())
            .map(|(param, _)| &**param)
            .collect();
        if !missing.is_empty() {
            return Err(ExcType::type_error_missing_positional(name, &missing));
        }

        let mut missing_kwonly = Vec::new();
        for (offset, param) in kwonly.iter().enumerate() {
            let target = &mut slots[nparams + offset];
            if target.is_some() {
                continue;
            }
            match self.kwdefaults.iter().find(|(key, _)| key == param) {
                Some((_, value)) => *target = Some(value.clone()),
                None => missing_kwonly.push(&**param),
            }
        }
        if !missing_kwonly.is_empty() {
            return Err(ExcType::type_error_missing_kwonly(name, &missing_kwonly));
        }
        Ok(slots)
    }

    /// Creates the cell array of a new frame: own cell variables (initialized from a parameter
    /// of the same name) followed by the captured closure cells.
    pub(crate) fn make_cells(&self, fast: &[Option<Value>]) -> Vec<CellRef> {
        let code = &*self.code;
        let mut cells: Vec<CellRef> = code
            .cellvars()
            .iter()
            .map(|cell_name| {
                let initial = code
                    .slot_names()
                    .position(|slot| slot == cell_name)
                    .and_then(|index| fast.get(index).cloned().flatten());
                new_cell(initial)
            })
            .collect();
        cells.extend(self.closure.iter().cloned());
        cells
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bytecode::{parse_listing, MODULE_LABEL},
        module::Module,
    };

    fn function(header: &str, defaults: Vec<Value>, kwdefaults: Vec<(Rc<str>, Value)>) -> (Rc<Module>, Function) {
        let module = Module::new("m", None, false);
        let text = format!("code {MODULE_LABEL}\n 0 NOP\ncode {header}\n 0 RETURN_VALUE\n");
        module.install(parse_listing(&text).unwrap()).unwrap();
        let label = header.split_whitespace().next().unwrap();
        let code = module.code(label).unwrap();
        (module, Function::new(label.into(), code, defaults, kwdefaults, Vec::new()))
    }

    fn reprs(slots: Vec<Option<Value>>) -> Vec<String> {
        slots
            .into_iter()
            .map(|slot| slot.map_or_else(|| "<unset>".to_owned(), |v| v.py_repr()))
            .collect()
    }

    #[test]
    fn positional_keywords_and_defaults() {
        let (_module, f) = function("f params=a,b,c", vec![Value::Int(3)], vec![]);
        let args = ArgValues::new(vec![Value::Int(1)], vec![("b".into(), Value::Int(2))]);
        assert_eq!(reprs(f.bind_args(args).unwrap()), vec!["1", "2", "3"]);
    }

    #[test]
    fn varargs_and_varkw_collect_extras() {
        let (_module, f) = function("f params=a varargs=rest varkw=kw kwonly=k", vec![], vec![("k".into(), Value::Int(9))]);
        let args = ArgValues::new(
            vec![Value::Int(1), Value::Int(2), Value::Int(3)],
            vec![("z".into(), Value::Int(4))],
        );
        assert_eq!(reprs(f.bind_args(args).unwrap()), vec!["1", "9", "(2, 3)", "{'z': 4}"]);
    }

    #[test]
    fn binding_errors_match_cpython() {
        let (_module, f) = function("f params=a,b", vec![], vec![]);
        let err = f.bind_args(ArgValues::positional(vec![Value::Int(1)])).unwrap_err();
        assert!(err.to_string().contains("f() missing 1 required positional argument: 'b'"), "{err}");

        let err = f
            .bind_args(ArgValues::positional(vec![Value::Int(1), Value::Int(2), Value::Int(3)]))
            .unwrap_err();
        assert!(err.to_string().contains("takes 2 positional arguments but 3 were given"), "{err}");

        let err = f
            .bind_args(ArgValues::new(vec![Value::Int(1)], vec![("a".into(), Value::Int(2))]))
            .unwrap_err();
        assert!(err.to_string().contains("multiple values for argument 'a'"), "{err}");

        let err = f
            .bind_args(ArgValues::new(vec![], vec![("q".into(), Value::Int(2))]))
            .unwrap_err();
        assert!(err.to_string().contains("unexpected keyword argument 'q'"), "{err}");
    }

    #[test]
    fn cells_shadowing_params_start_with_the_argument() {
        let (_module, f) = function("f params=a,b cellvars=b,c", vec![], vec![]);
        let slots = f
            .bind_args(ArgValues::positional(vec![Value::Int(1), Value::Int(2)]))
            .unwrap();
        let cells = f.make_cells(&slots);
        assert_eq!(cells.len(), 2);
        assert_eq!(cells[0].borrow().as_ref().unwrap().py_repr(), "2");
        assert!(cells[1].borrow().is_none());
    }
}
