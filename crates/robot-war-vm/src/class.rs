//! User-defined classes and their instances.
//!
//! Attribute lookup on an instance searches, in order: the instance's own values, the class
//! hierarchy depth-first and left to right (repeated ancestors are simply visited again), and
//! finally the namespace of the module that defined the most-derived class. Functions found in
//! a source class are bound to the instance; values coming from capability objects are
//! returned as they are.

use std::{
    cell::RefCell,
    fmt,
    rc::{Rc, Weak},
};

use crate::{
    api::{ApiClass, ApiObject},
    exception_private::ExcType,
    function::Function,
    module::Module,
    namespace::Namespace,
    value::Value,
};

/// One entry of a class's base list.
#[derive(Debug, Clone)]
pub enum ClassParent {
    Source(Rc<SourceClass>),
    /// A capability class; each instance gets its own backing object.
    Api(Rc<dyn ApiClass>),
    /// The singleton agent object shared by every class deriving from an agent class.
    Agent(Rc<dyn ApiObject>),
    Exception(ExcType),
}

/// Where a class attribute was found.
#[derive(Debug)]
pub(crate) enum ClassAttr {
    /// In the namespace of a source class; functions get bound.
    Source(Value),
    /// On a capability object; returned unchanged.
    Backed(Value),
}

/// A class defined by script code.
pub struct SourceClass {
    name: Rc<str>,
    module_name: Rc<str>,
    parents: Vec<ClassParent>,
    module: Weak<Module>,
    namespace: RefCell<Namespace>,
}

impl fmt::Debug for SourceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<class '{}.{}'>", self.module_name, self.name)
    }
}

impl SourceClass {
    pub(crate) fn new(name: &str, parents: Vec<ClassParent>, module: &Rc<Module>) -> Self {
        let mut namespace = Namespace::new();
        namespace.set("__module__", Value::from(module.name()));
        namespace.set("__qualname__", Value::from(name));
        Self {
            name: name.into(),
            module_name: module.name().into(),
            parents,
            module: Rc::downgrade(module),
            namespace: RefCell::new(namespace),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    pub(crate) fn module(&self) -> Option<Rc<Module>> {
        self.module.upgrade()
    }

    #[must_use]
    pub fn parents(&self) -> &[ClassParent] {
        &self.parents
    }

    /// Own namespace entry, without consulting parents.
    pub(crate) fn get_own(&self, name: &str) -> Option<Value> {
        self.namespace.borrow().get(name)
    }

    pub(crate) fn set_attr(&self, name: impl Into<Rc<str>>, value: Value) {
        self.namespace.borrow_mut().set(name, value);
    }

    pub(crate) fn remove_attr(&self, name: &str) -> Option<Value> {
        self.namespace.borrow_mut().remove(name)
    }

    /// Searches this class and its ancestry depth-first, left to right.
    ///
    /// `instance` supplies the per-instance backing objects of capability parents; without it
    /// only the shared agent object is consulted.
    pub(crate) fn find(&self, name: &str, instance: Option<&SourceInstance>) -> Option<ClassAttr> {
        if let Some(value) = self.get_own(name) {
            return Some(ClassAttr::Source(value));
        }
        for parent in &self.parents {
            let found = match parent {
                ClassParent::Source(class) => class.find(name, instance),
                ClassParent::Api(api_class) => instance
                    .and_then(|instance| instance.backing_for(api_class))
                    .and_then(|object| object.get_attr(name))
                    .map(ClassAttr::Backed),
                ClassParent::Agent(object) => object.clone().get_attr(name).map(ClassAttr::Backed),
                ClassParent::Exception(_) => None,
            };
            if found.is_some() {
                return found;
            }
        }
        None
    }

    /// Class-level attribute access (`Cls.name`): ancestry, then the defining module.
    pub(crate) fn lookup(&self, name: &str) -> Option<Value> {
        match self.find(name, None) {
            Some(ClassAttr::Source(value) | ClassAttr::Backed(value)) => Some(value),
            None => self.module().and_then(|module| module.get(name)),
        }
    }

    /// The builtin exception type this class ultimately derives from, if any.
    #[must_use]
    pub fn exception_base(&self) -> Option<ExcType> {
        self.parents.iter().find_map(|parent| match parent {
            ClassParent::Exception(exc_type) => Some(*exc_type),
            ClassParent::Source(class) => class.exception_base(),
            _ => None,
        })
    }

    /// True when `self` is `other` or derives from it.
    #[must_use]
    pub fn is_subclass_of(&self, other: &Self) -> bool {
        std::ptr::eq(self, other)
            || self.parents.iter().any(|parent| match parent {
                ClassParent::Source(class) => class.is_subclass_of(other),
                _ => false,
            })
    }

    /// True when the class derives from the given capability class, directly or through the
    /// agent object that stands in for an agent class.
    pub(crate) fn derives_from_api(&self, api_class: &Rc<dyn ApiClass>) -> bool {
        self.parents.iter().any(|parent| match parent {
            ClassParent::Api(class) => api_addr(class) == api_addr(api_class),
            ClassParent::Agent(object) => object.type_name() == api_class.name(),
            ClassParent::Source(class) => class.derives_from_api(api_class),
            ClassParent::Exception(_) => false,
        })
    }

    /// Every capability class in the ancestry, first occurrence only.
    pub(crate) fn api_classes(&self) -> Vec<Rc<dyn ApiClass>> {
        let mut found: Vec<Rc<dyn ApiClass>> = Vec::new();
        self.collect_api_classes(&mut found);
        found
    }

    fn collect_api_classes(&self, found: &mut Vec<Rc<dyn ApiClass>>) {
        for parent in &self.parents {
            match parent {
                ClassParent::Api(class) => {
                    if !found.iter().any(|seen| api_addr(seen) == api_addr(class)) {
                        found.push(class.clone());
                    }
                }
                ClassParent::Source(class) => class.collect_api_classes(found),
                _ => {}
            }
        }
    }
}

fn api_addr(class: &Rc<dyn ApiClass>) -> usize {
    Rc::as_ptr(class).cast::<()>() as usize
}

/// An instance of a [`SourceClass`].
pub struct SourceInstance {
    class: Rc<SourceClass>,
    values: RefCell<Namespace>,
    backings: Vec<(usize, Rc<dyn ApiObject>)>,
}

impl fmt::Debug for SourceInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}.{} object>", self.class.module_name, self.class.name)
    }
}

impl SourceInstance {
    pub(crate) fn new(class: Rc<SourceClass>, backings: Vec<(Rc<dyn ApiClass>, Rc<dyn ApiObject>)>) -> Self {
        Self {
            class,
            values: RefCell::new(Namespace::new()),
            backings: backings
                .into_iter()
                .map(|(api_class, object)| (api_addr(&api_class), object))
                .collect(),
        }
    }

    #[must_use]
    pub fn class(&self) -> &Rc<SourceClass> {
        &self.class
    }

    /// The instance's own attribute, without consulting the class.
    #[must_use]
    pub fn get_value(&self, name: &str) -> Option<Value> {
        self.values.borrow().get(name)
    }

    pub(crate) fn set_value(&self, name: impl Into<Rc<str>>, value: Value) {
        self.values.borrow_mut().set(name, value);
    }

    pub(crate) fn remove_value(&self, name: &str) -> Option<Value> {
        self.values.borrow_mut().remove(name)
    }

    pub(crate) fn backing_for(&self, api_class: &Rc<dyn ApiClass>) -> Option<Rc<dyn ApiObject>> {
        let addr = api_addr(api_class);
        self.backings
            .iter()
            .find(|(key, _)| *key == addr)
            .map(|(_, object)| object.clone())
    }

    /// Full instance attribute lookup, binding source-class functions to `self`.
    pub(crate) fn lookup(self: &Rc<Self>, name: &str) -> Option<Value> {
        if let Some(value) = self.get_value(name) {
            return Some(value);
        }
        match self.class.find(name, Some(self.as_ref())) {
            Some(ClassAttr::Source(Value::Function(function))) => {
                Some(Value::BoundMethod(Rc::new(BoundMethod::new(Value::Instance(self.clone()), function))))
            }
            Some(ClassAttr::Source(value) | ClassAttr::Backed(value)) => Some(value),
            None => self.class.module().and_then(|module| module.get(name)),
        }
    }

    /// Looks up a dunder defined by a source class in the ancestry, ignoring instance values
    /// and the module fallback.
    pub(crate) fn class_function(&self, name: &str) -> Option<Rc<Function>> {
        match self.class.find(name, Some(self)) {
            Some(ClassAttr::Source(Value::Function(function))) => Some(function),
            _ => None,
        }
    }
}

/// A function bound to its receiver.
#[derive(Debug)]
pub struct BoundMethod {
    pub receiver: Value,
    pub function: Rc<Function>,
}

impl BoundMethod {
    #[must_use]
    pub fn new(receiver: Value, function: Rc<Function>) -> Self {
        Self { receiver, function }
    }
}
