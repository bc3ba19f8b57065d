//! Module resolution and loading.
//!
//! Resolution maps a dotted name onto a chain of steps, one per segment, each either an
//! already loaded module or a file still to run. Loading is itself bytecode: when any step
//! needs a file the resolver synthesizes a small function that runs `LOAD_MODULE` and
//! `LINK_MODULE` for every step, so module bodies execute as ordinary frames and can block,
//! raise or import in turn.

use std::{path::PathBuf, rc::Rc};

use super::{attr::load_attr, ExecResult, Frame, SandBox};
use crate::{
    args::ArgValues,
    bytecode::{builder::CodeBuilder, Opcode},
    exception_private::{ExcType, RunError, RunResult},
    function::Function,
    module::Module,
    playground::Env,
    types::collect_items,
    value::Value,
};

/// One segment of a resolved import.
#[derive(Debug)]
enum ImportStep {
    Loaded(Rc<Module>),
    File { name: String, path: PathBuf },
}

impl ImportStep {
    fn as_item(&self) -> Value {
        match self {
            Self::Loaded(module) => Value::tuple(vec![Value::from(module.name()), Value::None]),
            Self::File { name, path } => Value::tuple(vec![
                Value::from(name.as_str()),
                Value::from(path.to_string_lossy().into_owned()),
            ]),
        }
    }
}

/// Steps of one import. `top` indexes the module a plain `import a.b` binds; the steps before
/// it are only loaded so the imported modules get linked into their package.
#[derive(Debug)]
struct Resolution {
    steps: Vec<ImportStep>,
    top: usize,
}

impl Resolution {
    fn new(steps: Vec<ImportStep>) -> Self {
        Self { steps, top: 0 }
    }
}

/// Resolves `name` imported from `current` with the given relative `level`.
fn resolve(env: &Env, current: &Module, name: &str, level: usize) -> RunResult<Resolution> {
    let parts: Vec<&str> = if name.is_empty() { Vec::new() } else { name.split('.').collect() };

    // capability modules shadow the filesystem
    if level == 0 && parts.first().is_some_and(|first| env.api_modules.contains_key(*first)) {
        let mut steps = Vec::with_capacity(parts.len());
        for end in 1..=parts.len() {
            let prefix = parts[..end].join(".");
            let module = env
                .api_modules
                .get(&prefix)
                .ok_or_else(|| ExcType::module_not_found(&prefix))?;
            steps.push(ImportStep::Loaded(module.clone()));
        }
        return Ok(Resolution::new(steps));
    }

    let mut steps = Vec::new();
    let mut top = 0;
    let (mut prefix, mut dir) = if level > 0 {
        let package = current.package_name();
        if package.is_empty() {
            return Err(ExcType::ImportError.msg("attempted relative import with no known parent package"));
        }
        let segments: Vec<&str> = package.split('.').collect();
        let keep = segments
            .len()
            .checked_sub(level - 1)
            .filter(|keep| *keep > 0)
            .ok_or_else(|| ExcType::ImportError.msg("attempted relative import beyond top-level package"))?;
        let anchor_name = segments[..keep].join(".");
        let anchor = env
            .modules
            .get(&anchor_name)
            .ok_or_else(|| ExcType::module_not_found(&anchor_name))?;
        let dir = anchor
            .dir()
            .map(PathBuf::from)
            .ok_or_else(|| ExcType::ImportError.msg(format!("package '{anchor_name}' has no location")))?;
        steps.push(ImportStep::Loaded(anchor.clone()));
        (anchor_name, dir)
    } else {
        let root = env.config.root_path.clone();
        let first = parts.first().copied().unwrap_or_default();
        let at_root = env.modules.contains_key(first)
            || env.config.package_file(&root, first).is_file()
            || env.config.module_file(&root, first).is_file();
        let package = Some(current.package_name())
            .filter(|package| !at_root && !package.is_empty())
            .and_then(|package| env.modules.get(package));
        match (package, current.dir()) {
            // a sibling inside the importer's package is linked into that package
            (Some(package), Some(dir)) => {
                steps.push(ImportStep::Loaded(package.clone()));
                top = 1;
                (package.name().to_owned(), dir.to_path_buf())
            }
            _ => (String::new(), root),
        }
    };

    for (index, part) in parts.iter().enumerate() {
        let full = if prefix.is_empty() { (*part).to_owned() } else { format!("{prefix}.{part}") };
        let last = index + 1 == parts.len();
        if let Some(module) = env.modules.get(&full) {
            match module.dir() {
                Some(module_dir) if module.is_package() => dir = module_dir.to_path_buf(),
                _ if !last => return Err(not_a_package(&full, parts[index + 1])),
                _ => {}
            }
            steps.push(ImportStep::Loaded(module.clone()));
        } else {
            let package = env.config.package_file(&dir, part);
            let file = env.config.module_file(&dir, part);
            if package.is_file() {
                dir = dir.join(part);
                steps.push(ImportStep::File { name: full.clone(), path: package });
            } else if file.is_file() {
                if !last {
                    return Err(not_a_package(&full, parts[index + 1]));
                }
                steps.push(ImportStep::File { name: full.clone(), path: file });
            } else {
                return Err(ExcType::module_not_found(&full));
            }
        }
        prefix = full;
    }
    Ok(Resolution { steps, top })
}

fn not_a_package(name: &str, next: &str) -> RunError {
    ExcType::ModuleNotFoundError.msg(format!("No module named '{name}.{next}'; '{name}' is not a package"))
}

impl SandBox {
    /// `IMPORT_NAME`: pushes the top-level module (no fromlist) or the innermost one.
    pub(super) fn import_name(&mut self, env: &mut Env, name: &str, fromlist: &Value, level: usize) -> ExecResult {
        let current = self.top()?.globals.clone();
        let resolution = resolve(env, &current, name, level)?;
        let wants_leaf = !fromlist.is_none() && !collect_items(fromlist).is_ok_and(|items| items.is_empty());
        tracing::debug!(sandbox = %self.id, module = name, level, steps = resolution.steps.len(), "import");
        self.run_import(env, resolution, wants_leaf)
    }

    /// Pushes the selected module directly when everything is loaded, otherwise a frame that
    /// loads the missing steps.
    fn run_import(&mut self, env: &mut Env, resolution: Resolution, wants_leaf: bool) -> ExecResult {
        let Resolution { steps, top } = resolution;
        let pick = |modules: &[Rc<Module>]| -> Option<Rc<Module>> {
            let picked = if wants_leaf { modules.last() } else { modules.get(top) };
            picked.cloned()
        };
        let loaded: Option<Vec<Rc<Module>>> = steps
            .iter()
            .map(|step| match step {
                ImportStep::Loaded(module) => Some(module.clone()),
                ImportStep::File { .. } => None,
            })
            .collect();
        if let Some(loaded) = loaded {
            let module = pick(&loaded).ok_or_else(|| RunError::internal("import resolved to no modules"))?;
            self.push(Value::Module(module));
            return Ok(());
        }

        // modules = []; for each step: LOAD_MODULE; LINK_MODULE; return modules[top or -1]
        let mut builder = CodeBuilder::new("<import>");
        builder.load_fast("_modules");
        let mut args = vec![Value::list(Vec::new())];
        let top = i64::try_from(top).map_err(|_| RunError::internal("import chain too long"))?;
        for (index, step) in steps.iter().enumerate() {
            builder
                .load_fast(&format!("_load{index}"))
                .emit(Opcode::LoadModule, 0)
                .emit(Opcode::LinkModule, 0);
            args.push(step.as_item());
        }
        builder
            .load_const(Value::Int(if wants_leaf { -1 } else { top }))
            .emit(Opcode::BinarySubscr, 0)
            .emit(Opcode::ReturnValue, 0);
        let loader = Function::synthetic(builder.build(&env.engine_module));
        self.call_value(env, Value::Function(Rc::new(loader)), ArgValues::positional(args))
    }

    /// `LOAD_MODULE`: pops `(name, path)` and the module list; appends the module, running its
    /// body first when it is not loaded yet.
    pub(super) fn load_module(&mut self, env: &mut Env) -> ExecResult {
        let item = self.pop()?;
        let list = self.pop()?;
        let Value::List(modules) = &list else {
            return Err(RunError::internal("LOAD_MODULE without a module list").into());
        };
        let (name, path) = match collect_items(&item)?.as_slice() {
            [Value::Str(name), path] => (name.clone(), path.as_str().map(PathBuf::from)),
            _ => return Err(RunError::internal("LOAD_MODULE expects a (name, path) tuple").into()),
        };

        if let Some(module) = env.modules.get(&*name).or_else(|| env.api_modules.get(&*name)) {
            modules.borrow_mut().push(Value::Module(module.clone()));
            self.push(list);
            return Ok(());
        }
        let Some(path) = path else {
            return Err(ExcType::module_not_found(&name).into());
        };

        let compiled = env
            .compiler
            .compile(&path)
            .map_err(|error| ExcType::ImportError.msg(format!("cannot load module '{name}': {error}")))?;
        let is_package = env.config.is_package_file(&path);
        let module = Module::new(&name, Some(path), is_package);
        let code = module
            .install(compiled)
            .map_err(|error| ExcType::ImportError.msg(format!("cannot load module '{name}': {error}")))?;
        module.set("__name__", Value::from(&*name));
        env.modules.insert(name.to_string(), module.clone());
        modules.borrow_mut().push(Value::Module(module.clone()));
        tracing::info!(sandbox = %self.id, module = %name, package = is_package, "loading module");

        // the module body's None is dropped, then the list is returned to the importer
        let mut builder = CodeBuilder::new("<loaded>");
        builder
            .emit(Opcode::PopTop, 0)
            .load_fast("_modules")
            .emit(Opcode::ReturnValue, 0);
        let resume = builder.build(&env.engine_module);
        let resume = Frame::new(resume, env.engine_module.clone(), vec![Some(list)], Vec::new());
        self.push_frame(env, resume)?;
        self.push_frame(env, Frame::new(code, module, Vec::new(), Vec::new()))?;
        Ok(())
    }

    /// `LINK_MODULE`: binds the newest module of the list into its parent's namespace.
    pub(super) fn link_module(&mut self) -> RunResult<()> {
        let Value::List(modules) = self.peek(1)? else {
            return Err(RunError::internal("LINK_MODULE without a module list"));
        };
        let modules = modules.borrow();
        if let [.., Value::Module(parent), Value::Module(child)] = modules.as_slice() {
            if let Some((package, segment)) = child.name().rsplit_once('.') {
                if package == parent.name() {
                    parent.set(segment, Value::Module(child.clone()));
                }
            }
        }
        Ok(())
    }

    /// `IMPORT_FROM`: reads `name` from the module on TOS, importing a submodule when the
    /// package does not define it.
    pub(super) fn import_from(&mut self, env: &mut Env, name: &str) -> ExecResult {
        let source = self.peek(1)?;
        let Value::Module(module) = &source else {
            let value = load_attr(&source, name)?;
            self.push(value);
            return Ok(());
        };
        if let Some(value) = module.get(name) {
            self.push(value);
            return Ok(());
        }
        let full = format!("{}.{name}", module.name());
        if let Some(loaded) = env.modules.get(&full) {
            self.push(Value::Module(loaded.clone()));
            return Ok(());
        }
        if module.is_package() {
            if let Some(dir) = module.dir() {
                let candidates = [env.config.package_file(dir, name), env.config.module_file(dir, name)];
                if let Some(path) = candidates.into_iter().find(|path| path.is_file()) {
                    let steps = vec![
                        ImportStep::Loaded(module.clone()),
                        ImportStep::File { name: full, path },
                    ];
                    return self.run_import(env, Resolution::new(steps), true);
                }
            }
        }
        Err(ExcType::cannot_import_name(name, module.name()).into())
    }

    /// `from module import *`: copies `__all__`, or every public name.
    pub(super) fn import_star(&mut self, source: &Value) -> RunResult<()> {
        let Value::Module(module) = source else {
            return Err(ExcType::TypeError.msg("import * only allowed from a module"));
        };
        let exported: Vec<(Rc<str>, Value)> = match module.get("__all__") {
            Some(all) => collect_items(&all)?
                .into_iter()
                .map(|name| match name {
                    Value::Str(name) => {
                        let value = module
                            .get(&name)
                            .ok_or_else(|| ExcType::attribute_error_module(module.name(), &name))?;
                        Ok((name, value))
                    }
                    other => Err(ExcType::TypeError.msg(format!(
                        "Item in {}.__all__ must be str, not {}",
                        module.name(),
                        other.type_name()
                    ))),
                })
                .collect::<RunResult<_>>()?,
            None => module
                .entries()
                .into_iter()
                .filter(|(name, _)| !name.starts_with('_'))
                .collect(),
        };
        for (name, value) in exported {
            self.store_name(&name, value)?;
        }
        Ok(())
    }
}
