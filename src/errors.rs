//! Error taxonomy for class lookup, flattening and symbolic generation.
//!
//! Every failure aborts the current translation; nothing here is retried.
//! Diagnostics carry the offending dotted component reference so a caller can
//! point at exactly what went wrong.

use miette::Diagnostic;
use owo_colors::OwoColorize;
use thiserror::Error;

#[derive(Error, Debug, Diagnostic)]
pub enum CompileError {
    #[error("class not found: {reference}", reference = self.reference.cyan().bold())]
    #[diagnostic(
        code(modelica_sym::class_not_found),
        help("check the `within` clause and the spelling of {name}", name = "the class name".yellow())
    )]
    ClassNotFound { reference: String },

    /// A well-known elementary type name (`Real`, `Modelica`, `SI`, …) was
    /// referenced where a user class was expected. The flattener may catch
    /// and ignore this rather than treat it as a hard failure.
    #[error("elementary type referenced as a class: {reference}", reference = self.reference.cyan())]
    #[diagnostic(code(modelica_sym::elementary_type_miss))]
    ElementaryTypeMiss { reference: String },

    #[error("cyclic inheritance through {reference}", reference = self.reference.red().bold())]
    #[diagnostic(
        code(modelica_sym::cyclic_inheritance),
        help("an `extends` chain may not revisit a class that is still being flattened")
    )]
    CyclicInheritance { reference: String },

    #[error("modifier target not found: {target}", target = self.target.cyan())]
    #[diagnostic(code(modelica_sym::modifier_target_not_found))]
    ModifierTargetNotFound { target: String },

    #[error("unsupported construct: {what}")]
    #[diagnostic(code(modelica_sym::unsupported_construct))]
    UnsupportedConstruct { what: String },

    #[error("could not resolve {expression} to an integer constant", expression = self.expression.yellow())]
    #[diagnostic(code(modelica_sym::shape_error))]
    ShapeError { expression: String },

    #[error("{field} is not a valid field for {node}")]
    #[diagnostic(code(modelica_sym::invalid_argument))]
    InvalidArgument { field: String, node: String },
}
