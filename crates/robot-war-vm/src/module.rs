use std::{
    cell::RefCell,
    fmt,
    path::{Path, PathBuf},
    rc::Rc,
};

use ahash::AHashMap;

use crate::{
    bytecode::{CodeBlock, CompiledModule, MODULE_LABEL},
    error::CompileError,
    namespace::Namespace,
    value::Value,
};

/// A loaded module: its global namespace plus the code objects of its listing.
pub struct Module {
    name: Rc<str>,
    path: Option<PathBuf>,
    is_package: bool,
    namespace: RefCell<Namespace>,
    codes: RefCell<AHashMap<Rc<str>, Rc<CodeBlock>>>,
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("name", &self.name)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl Module {
    pub(crate) fn new(name: &str, path: Option<PathBuf>, is_package: bool) -> Rc<Self> {
        let mut namespace = Namespace::new();
        namespace.set("__name__", Value::from(name));
        Rc::new(Self {
            name: name.into(),
            path,
            is_package,
            namespace: RefCell::new(namespace),
            codes: RefCell::new(AHashMap::new()),
        })
    }

    /// A capability module populated by the host rather than by running code.
    pub(crate) fn with_entries(name: &str, entries: impl IntoIterator<Item = (&'static str, Value)>) -> Rc<Self> {
        let module = Self::new(name, None, false);
        for (key, value) in entries {
            module.set(key, value);
        }
        module
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    #[must_use]
    pub fn is_package(&self) -> bool {
        self.is_package
    }

    /// Directory searched for this module's submodules (packages) or siblings (files).
    pub(crate) fn dir(&self) -> Option<&Path> {
        self.path.as_deref().and_then(Path::parent)
    }

    /// Dotted name of the package this module belongs to: itself for packages, the parent otherwise.
    pub(crate) fn package_name(&self) -> &str {
        if self.is_package {
            &self.name
        } else {
            self.name.rsplit_once('.').map_or("", |(parent, _)| parent)
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Value> {
        self.namespace.borrow().get(name)
    }

    pub(crate) fn set(&self, name: impl Into<Rc<str>>, value: Value) {
        self.namespace.borrow_mut().set(name, value);
    }

    pub(crate) fn remove(&self, name: &str) -> Option<Value> {
        self.namespace.borrow_mut().remove(name)
    }

    /// Snapshot of the global names and values, in definition order.
    pub(crate) fn entries(&self) -> Vec<(Rc<str>, Value)> {
        self.namespace
            .borrow()
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }

    pub(crate) fn code(&self, label: &str) -> Option<Rc<CodeBlock>> {
        self.codes.borrow().get(label).cloned()
    }

    /// Attaches compiled code to this module and returns its top-level code.
    pub(crate) fn install(self: &Rc<Self>, compiled: CompiledModule) -> Result<Rc<CodeBlock>, CompileError> {
        let mut codes = self.codes.borrow_mut();
        for listing in compiled.codes {
            let code = Rc::new(CodeBlock::from_listing(listing, self));
            codes.insert(code.label().into(), code);
        }
        let main = codes.get(MODULE_LABEL).cloned();
        main.ok_or(CompileError::MissingModuleCode)
    }
}
