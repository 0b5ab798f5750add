//! Name resolution over a forest of files: lexical scoping, `within`
//! qualifiers and the builtin-type short-circuit.

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;
use log::debug;

use crate::ast::{Class, ClassKind, ComponentRef, File, Symbol};
use crate::errors::CompileError;

const ELEMENTARY_TYPES: [&str; 4] = ["Real", "Integer", "String", "Boolean"];
const ELEMENTARY_OR_LIBRARY: [&str; 6] = ["Real", "Integer", "Boolean", "String", "Modelica", "SI"];

/// The result of a successful `find_class`: the class itself, plus the fully
/// qualified path it was found under (useful as the `within` scope for
/// resolving references inside that class).
#[derive(Debug, Clone)]
pub struct Resolution {
    pub class: Rc<Class>,
    pub path: ComponentRef,
}

/// A list of Modelica-like files, pre-flattening. The lookup table is built
/// lazily on first query and cached; appending files invalidates the cache
/// so newly added classes are visible on the next lookup.
#[derive(Debug, Default)]
pub struct Collection {
    pub files: Vec<File>,
    class_lookup: RefCell<Option<IndexMap<Vec<String>, Rc<Class>>>>,
}

impl Clone for Collection {
    fn clone(&self) -> Self {
        Collection {
            files: self.files.clone(),
            class_lookup: RefCell::new(self.class_lookup.borrow().clone()),
        }
    }
}

impl Collection {
    pub fn new(files: Vec<File>) -> Self {
        Collection {
            files,
            class_lookup: RefCell::new(None),
        }
    }

    pub fn extend(&mut self, other: Collection) {
        self.files.extend(other.files);
        *self.class_lookup.borrow_mut() = None;
    }

    fn ensure_lookup(&self) {
        if self.class_lookup.borrow().is_some() {
            return;
        }
        debug!("building class lookup table");
        let mut map = IndexMap::new();
        for file in &self.files {
            let within = file.within.first().cloned();
            for class in file.classes.values() {
                Self::insert_class(&mut map, class.clone(), within.clone());
            }
        }
        *self.class_lookup.borrow_mut() = Some(map);
    }

    fn insert_class(map: &mut IndexMap<Vec<String>, Rc<Class>>, class: Rc<Class>, within: Option<ComponentRef>) {
        let full = match &within {
            Some(w) => ComponentRef::concatenate(&[w.clone(), ComponentRef::leaf(class.name.clone())]),
            None => ComponentRef::leaf(class.name.clone()),
        };
        map.insert(full.to_tuple(), class.clone());
        for nested in class.classes.values() {
            Self::insert_class(map, nested.clone(), Some(full.clone()));
        }
    }

    /// Resolves `reference` starting at lexical scope `within`, walking up
    /// one enclosing scope at a time until the root. When `check_builtin` is
    /// set, `Real`/`Integer`/`String`/`Boolean` short-circuit to a synthetic
    /// class exposing a single `__value` symbol before any lookup happens.
    pub fn find_class(
        &self,
        reference: &ComponentRef,
        within: Option<&ComponentRef>,
        check_builtin: bool,
    ) -> Result<Resolution, CompileError> {
        if check_builtin && ELEMENTARY_TYPES.contains(&reference.name.as_str()) {
            let path = ComponentRef::leaf(reference.name.clone());
            return Ok(Resolution {
                class: Rc::new(Class::builtin(&reference.name)),
                path,
            });
        }

        self.ensure_lookup();
        let lookup = self.class_lookup.borrow();
        let lookup = lookup.as_ref().expect("lookup just built");

        let mut within_tuple: Vec<String> = within.map(|w| w.to_tuple()).unwrap_or_default();
        let cref_tuple = reference.to_tuple();

        loop {
            let mut candidate = within_tuple.clone();
            candidate.extend(cref_tuple.iter().cloned());
            if let Some(class) = lookup.get(&candidate) {
                return Ok(Resolution {
                    class: class.clone(),
                    path: ComponentRef::from_tuple(&candidate),
                });
            }
            if within_tuple.is_empty() {
                break;
            }
            within_tuple.pop();
        }

        if ELEMENTARY_OR_LIBRARY.contains(&reference.name.as_str()) {
            Err(CompileError::ElementaryTypeMiss {
                reference: reference.to_string(),
            })
        } else {
            Err(CompileError::ClassNotFound {
                reference: reference.to_string(),
            })
        }
    }

    /// Dotted lookup that recurses into the type of each intermediate symbol.
    pub fn find_symbol(&self, class: &Class, reference: &ComponentRef) -> Result<Symbol, CompileError> {
        let sym = class
            .symbols
            .get(&reference.name)
            .ok_or_else(|| CompileError::ClassNotFound {
                reference: reference.to_string(),
            })?;
        match &reference.child {
            Some(child) => {
                let inner = self.find_class(&sym.r#type, None, true)?;
                self.find_symbol(&inner.class, child)
            }
            None => Ok(sym.clone()),
        }
    }
}

pub fn is_builtin_kind(kind: ClassKind) -> bool {
    matches!(kind, ClassKind::Builtin)
}
