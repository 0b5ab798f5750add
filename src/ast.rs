//! Typed representation of the hierarchical, object-oriented source language.
//!
//! Every non-leaf node carries its children as plain fields or vectors; there is
//! no separate span/location layer here, since that lives in the parser this
//! crate treats as an external collaborator (see the crate-level docs).

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::rc::Rc;

use crate::errors::CompileError;

/// Visibility is totally ordered `Private < Protected < Public`; the ordering
/// is used when a `public extends` of a `protected` base must stay protected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Private,
    Protected,
    Public,
}

impl Default for Visibility {
    fn default() -> Self {
        Visibility::Private
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Visibility::Private => "private",
            Visibility::Protected => "protected",
            Visibility::Public => "public",
        };
        write!(f, "{s}")
    }
}

/// A literal value: `bool | int | float | string | null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Primary {
    Bool(bool),
    Int(i64),
    Real(f64),
    Str(String),
    Null,
}

impl Default for Primary {
    fn default() -> Self {
        Primary::Null
    }
}

impl fmt::Display for Primary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Primary::Bool(b) => write!(f, "{b}"),
            Primary::Int(i) => write!(f, "{i}"),
            Primary::Real(x) => write!(f, "{x}"),
            Primary::Str(s) => write!(f, "{s:?}"),
            Primary::Null => write!(f, "null"),
        }
    }
}

/// `a.b.c[i]` — a dotted path with per-segment indices. `child` nests the next
/// dotted segment; the invariant is that it is either empty or a single node.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ComponentRef {
    pub name: String,
    pub indices: Vec<IndexExpr>,
    pub child: Option<Box<ComponentRef>>,
}

impl fmt::Display for ComponentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_tuple().join("."))
    }
}

impl ComponentRef {
    /// A reference with a single, unqualified name and no indices.
    pub fn leaf(name: impl Into<String>) -> Self {
        ComponentRef {
            name: name.into(),
            indices: Vec::new(),
            child: None,
        }
    }

    /// Flattens the path into a tuple of names, dropping any indices.
    pub fn to_tuple(&self) -> Vec<String> {
        let mut out = vec![self.name.clone()];
        if let Some(child) = &self.child {
            out.extend(child.to_tuple());
        }
        out
    }

    pub fn from_tuple(parts: &[impl AsRef<str>]) -> Self {
        assert!(!parts.is_empty(), "a component reference needs at least one name");
        let mut iter = parts.iter().rev();
        let mut node = ComponentRef::leaf(iter.next().unwrap().as_ref());
        for part in iter {
            node = ComponentRef {
                name: part.as_ref().to_string(),
                indices: Vec::new(),
                child: Some(Box::new(node)),
            };
        }
        node
    }

    pub fn from_string(s: &str) -> Self {
        let parts: Vec<&str> = s.split('.').collect();
        Self::from_tuple(&parts)
    }

    /// Chains several references together by walking to the deepest child of
    /// the first and attaching deep copies of the rest, yielding one path.
    /// Constructs fresh nodes rather than cloning handles, so the inputs are
    /// never aliased by the result.
    pub fn concatenate(refs: &[ComponentRef]) -> ComponentRef {
        assert!(!refs.is_empty(), "concatenate requires at least one reference");
        let mut result = refs[0].clone();
        for next in &refs[1..] {
            let mut tail = &mut result;
            while tail.child.is_some() {
                tail = tail.child.as_mut().unwrap();
            }
            tail.child = Some(Box::new(next.clone()));
        }
        result
    }
}

/// `start : step : stop`, used for ranges in `for` indices and subscripts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slice {
    pub start: Box<Expr>,
    pub step: Box<Expr>,
    pub stop: Box<Expr>,
}

/// One subscript of a `ComponentRef`: either an expression or a range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IndexExpr {
    Expr(Expr),
    Slice(Slice),
}

/// The operator of an `Expression` node: either a named built-in/operator
/// symbol (`"+"`, `"der"`, `"mtimes"`, …) or a reference to a user function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operator {
    Name(String),
    Function(ComponentRef),
}

impl Operator {
    pub fn as_name(&self) -> std::borrow::Cow<'_, str> {
        match self {
            Operator::Name(n) => std::borrow::Cow::Borrowed(n),
            Operator::Function(c) => std::borrow::Cow::Owned(c.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expression {
    pub operator: Operator,
    pub operands: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IfExpression {
    /// invariant: `expressions.len() == conditions.len() + 1`
    pub conditions: Vec<Expr>,
    pub expressions: Vec<Expr>,
}

/// The closed set of expression node kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Primary(Primary),
    ComponentRef(ComponentRef),
    Expression(Expression),
    IfExpression(Box<IfExpression>),
    Array(Vec<Expr>),
}

impl Expr {
    pub fn real(v: f64) -> Expr {
        Expr::Primary(Primary::Real(v))
    }
    pub fn int(v: i64) -> Expr {
        Expr::Primary(Primary::Int(v))
    }
    pub fn cref(c: ComponentRef) -> Expr {
        Expr::ComponentRef(c)
    }
    pub fn op(name: &str, operands: Vec<Expr>) -> Expr {
        Expr::Expression(Expression {
            operator: Operator::Name(name.to_string()),
            operands,
        })
    }
}

/// Left- or right-hand side of an `Equation`: a single expression, or a list
/// (used for the left/right of a tuple-valued function call).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EqSide {
    Single(Expr),
    Tuple(Vec<Expr>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForIndex {
    pub name: String,
    pub expression: Slice,
}

/// `Equation`, `IfEquation`, `ForEquation` and `ConnectClause` collapsed into
/// one closed sum type, as the tree walker dispatches on a node's kind tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Equation {
    Simple {
        left: EqSide,
        right: EqSide,
        comment: String,
    },
    /// invariant: `equations.len()` is an exact multiple of `conditions.len() + 1`
    If {
        conditions: Vec<Expr>,
        equations: Vec<Equation>,
        comment: String,
    },
    For {
        indices: Vec<ForIndex>,
        equations: Vec<Equation>,
    },
    Connect {
        left: ComponentRef,
        right: ComponentRef,
        comment: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Statement {
    Assignment {
        left: Vec<ComponentRef>,
        right: Expr,
        comment: String,
    },
    If {
        conditions: Vec<Expr>,
        statements: Vec<Statement>,
        comment: String,
    },
    For {
        indices: Vec<ForIndex>,
        statements: Vec<Statement>,
    },
}

/// The attributes that a `ClassModification` may assign on a `Symbol`.
pub const SYMBOL_ATTRIBUTES: [&str; 6] = ["value", "min", "max", "start", "fixed", "nominal"];

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Symbol {
    pub name: String,
    pub r#type: ComponentRef,
    pub prefixes: Vec<String>,
    pub redeclare: bool,
    pub final_: bool,
    pub inner: bool,
    pub outer: bool,
    /// invariant: never empty; a scalar is `[Primary::Int(1)]`
    pub dimensions: Vec<Expr>,
    pub comment: String,
    pub start: Option<Expr>,
    pub min: Option<Expr>,
    pub max: Option<Expr>,
    pub nominal: Option<Expr>,
    pub value: Option<Expr>,
    pub fixed: Option<Expr>,
    pub order: usize,
    pub visibility: Visibility,
    pub class_modification: Option<ClassModification>,
}

impl Symbol {
    pub fn scalar(name: impl Into<String>, type_name: &str) -> Symbol {
        Symbol {
            name: name.into(),
            r#type: ComponentRef::leaf(type_name),
            dimensions: vec![Expr::int(1)],
            ..Default::default()
        }
    }

    pub fn has_prefix(&self, p: &str) -> bool {
        self.prefixes.iter().any(|x| x == p)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ModArg {
    ElementModification(ElementModification),
    ComponentClause(ComponentClause),
    ShortClassDefinition(ShortClassDefinition),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ModValue {
    Expr(Expr),
    ClassModification(ClassModification),
    Array(Vec<ModValue>),
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ClassModification {
    pub arguments: Vec<ModArg>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementModification {
    pub component: ComponentRef,
    pub modifications: Vec<ModValue>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ComponentClause {
    pub prefixes: Vec<String>,
    pub r#type: ComponentRef,
    pub dimensions: Vec<Expr>,
    pub symbol_list: Vec<Symbol>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ShortClassDefinition {
    pub name: String,
    pub r#type: String,
    pub component: ComponentRef,
    pub class_modification: ClassModification,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExtendsClause {
    pub component: ComponentRef,
    pub class_modification: Option<ClassModification>,
    pub visibility: Visibility,
}

/// The kind of a `Class` node; serializes to the short names used in source,
/// with the synthetic builtin marker spelled `__builtin` and the unspecified
/// kind as the empty string, matching the reference implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClassKind {
    #[serde(rename = "model")]
    Model,
    #[serde(rename = "block")]
    Block,
    #[serde(rename = "function")]
    Function,
    #[serde(rename = "package")]
    Package,
    #[serde(rename = "record")]
    Record,
    #[serde(rename = "connector")]
    Connector,
    #[serde(rename = "")]
    Empty,
    #[serde(rename = "__builtin")]
    Builtin,
}

impl Default for ClassKind {
    fn default() -> Self {
        ClassKind::Empty
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Class {
    pub name: String,
    pub kind: ClassKind,
    pub encapsulated: bool,
    pub partial: bool,
    pub final_: bool,
    pub imports: Vec<ComponentRef>,
    pub extends: Vec<ExtendsClause>,
    /// insertion order is the declaration order and is load-bearing: it is
    /// what makes the generator's symbol partitioning deterministic.
    pub classes: IndexMap<String, Rc<Class>>,
    pub symbols: IndexMap<String, Symbol>,
    pub equations: Vec<Equation>,
    pub initial_equations: Vec<Equation>,
    pub statements: Vec<Statement>,
    pub initial_statements: Vec<Statement>,
    pub within: Vec<ComponentRef>,
}

impl Class {
    /// The synthetic class returned for `Real`/`Integer`/`Boolean`/`String`
    /// when a lookup explicitly opts into the builtin short-circuit.
    pub fn builtin(type_name: &str) -> Class {
        let mut symbols = IndexMap::new();
        symbols.insert(
            "__value".to_string(),
            Symbol::scalar("__value", type_name),
        );
        Class {
            name: type_name.to_string(),
            kind: ClassKind::Builtin,
            symbols,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct File {
    pub within: Vec<ComponentRef>,
    pub classes: IndexMap<String, Rc<Class>>,
}

/// Validates that `fields` names a subset of `valid`, surfacing the
/// "not a valid field" construction error the AST layer must reject.
pub fn check_fields(node: &str, fields: &[&str], valid: &[&str]) -> Result<(), CompileError> {
    for f in fields {
        if !valid.contains(f) {
            return Err(CompileError::InvalidArgument {
                field: f.to_string(),
                node: node.to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn component_ref_string_round_trip() {
        let cref = ComponentRef::from_string("a.b.c");
        assert_eq!(cref.to_string(), "a.b.c");
    }

    #[test]
    fn component_ref_tuple_round_trip() {
        let parts = vec!["a", "b", "c"];
        let cref = ComponentRef::from_tuple(&parts);
        assert_eq!(cref.to_tuple(), parts);
    }

    #[test]
    fn concatenate_does_not_alias_inputs() {
        let a = ComponentRef::leaf("a");
        let b = ComponentRef::leaf("b");
        let joined = ComponentRef::concatenate(&[a.clone(), b.clone()]);
        assert_eq!(joined.to_string(), "a.b");
        // the inputs themselves must be untouched by the deep-copy join
        assert_eq!(a.to_string(), "a");
        assert_eq!(b.to_string(), "b");
    }

    #[test]
    fn visibility_is_totally_ordered() {
        assert!(Visibility::Private < Visibility::Protected);
        assert!(Visibility::Protected < Visibility::Public);
    }

    #[test]
    fn check_fields_rejects_unknown_names() {
        let err = check_fields("Symbol", &["bogus"], &["name", "type"]).unwrap_err();
        assert!(matches!(err, CompileError::InvalidArgument { .. }));
    }
}
