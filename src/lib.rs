// Allow clippy lints that suggest unstable features or are too strict for generated code
#![allow(clippy::collapsible_if)]
#![allow(clippy::too_many_arguments)]
#![allow(clippy::field_reassign_with_default)]

//! A symbolic front end for a Modelica-like hierarchical modeling language:
//! class lookup and name resolution, flattening (inheritance, modifiers,
//! `connect` clauses) and translation of the flattened class into a flat
//! differential-algebraic-equation `Model`.
//!
//! The parser that produces the [`ast::File`] values fed into [`Collection`]
//! is treated as an external collaborator and is out of scope here, as is
//! the numerical backend that eventually consumes a generated [`Model`].

pub mod alias;
pub mod ast;
pub mod collection;
pub mod errors;
pub mod eval;
pub mod flatten;
pub mod generator;
pub mod kernel;
pub mod model;
pub mod visitor;

pub use collection::Collection;
pub use errors::CompileError;
pub use model::Model;

/// Flattens and generates `target` (a fully qualified class name, e.g.
/// `"pkg.sub.Model"`) found in `collection`.
pub fn generate(collection: &Collection, target: &str) -> Result<Model, CompileError> {
    generator::generate(collection, target)
}
