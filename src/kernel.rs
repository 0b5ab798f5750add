//! A small in-crate symbolic expression kernel.
//!
//! The reference material's own CasADi-backed generators never actually
//! bind the CasADi C++ library from Rust — they emit Python source text
//! through a template engine and hand it off to a separately-run Python
//! process. That is not a real symbolic kernel this crate could depend on,
//! so this module is a genuine, from-scratch implementation of the handful
//! of operations the generator actually needs: shape-aware construction,
//! elementwise and matrix ops, conditional selection, substitution and
//! free-variable extraction.
//!
//! Expression nodes are shared via `Rc` so that common subexpressions
//! introduced by the generator (e.g. a symbol referenced from several
//! equations) are reused rather than duplicated, the same way the rest of
//! this crate shares AST subtrees.

use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

use crate::errors::CompileError;

/// The dimensions of a symbolic value. `(1, 1)` is a scalar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shape(pub usize, pub usize);

impl Shape {
    pub const SCALAR: Shape = Shape(1, 1);

    pub fn is_scalar(&self) -> bool {
        *self == Shape::SCALAR
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.0, self.1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Neg,
    Mtimes,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,
    Not,
    Sin,
    Cos,
    Tan,
    Exp,
    Log,
    Sqrt,
    Abs,
    Floor,
    Ceil,
    Min,
    Max,
    /// Shape-swapping; constructed directly by `transpose`, never through
    /// `apply`'s elementwise broadcast.
    Transpose,
    /// Row-reducing; constructed directly by `sum`, never through `apply`'s
    /// elementwise broadcast.
    Sum,
}

impl Op {
    /// Looks up the operator a flattened expression's name denotes, mirroring
    /// the reference implementation's flat dispatch table from operator
    /// string to symbolic-kernel primitive.
    pub fn from_name(name: &str) -> Option<Op> {
        Some(match name {
            "+" | ".+" => Op::Add,
            "-" | ".-" => Op::Sub,
            "*" | ".*" => Op::Mul,
            "/" | "./" => Op::Div,
            "^" | ".^" => Op::Pow,
            "-u" => Op::Neg,
            "mtimes" => Op::Mtimes,
            "<" => Op::Lt,
            "<=" => Op::Le,
            ">" => Op::Gt,
            ">=" => Op::Ge,
            "==" => Op::Eq,
            "<>" => Op::Ne,
            "and" => Op::And,
            "or" => Op::Or,
            "not" => Op::Not,
            "sin" => Op::Sin,
            "cos" => Op::Cos,
            "tan" => Op::Tan,
            "exp" => Op::Exp,
            "log" => Op::Log,
            "sqrt" => Op::Sqrt,
            "abs" => Op::Abs,
            "floor" => Op::Floor,
            "ceil" => Op::Ceil,
            "min" => Op::Min,
            "max" => Op::Max,
            _ => return None,
        })
    }

    fn arity(&self) -> usize {
        match self {
            Op::Neg | Op::Not | Op::Sin | Op::Cos | Op::Tan | Op::Exp | Op::Log | Op::Sqrt | Op::Abs | Op::Floor | Op::Ceil | Op::Transpose | Op::Sum => 1,
            _ => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Real(f64),
    Int(i64),
    Bool(bool),
}

impl Literal {
    fn as_f64(&self) -> f64 {
        match self {
            Literal::Real(r) => *r,
            Literal::Int(i) => *i as f64,
            Literal::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }
}

#[derive(Debug)]
pub enum ExprKind {
    /// A named free variable (state, algebraic, parameter, constant or input).
    Symbol { name: String },
    Literal(Literal),
    /// An elementwise or matrix operator applied to its operands.
    Op { op: Op, operands: Vec<Sym> },
    /// `if cond then a else b`, lowered from an `IfExpression` chain.
    IfElse { cond: Sym, then_branch: Sym, else_branch: Sym },
    /// A fixed-length row of scalars, for array-valued equations.
    Vector(Vec<Sym>),
    /// `delay(expr, delay_time, max_delay)`.
    Delay { expr: Sym, delay_time: Sym, max_delay: Option<Sym> },
}

/// A node in the symbolic expression graph. Shape is computed once at
/// construction and cached alongside the kind.
#[derive(Debug)]
pub struct ExprNode {
    pub kind: ExprKind,
    pub shape: Shape,
}

pub type Sym = Rc<ExprNode>;

pub fn symbol(name: impl Into<String>) -> Sym {
    Rc::new(ExprNode {
        kind: ExprKind::Symbol { name: name.into() },
        shape: Shape::SCALAR,
    })
}

/// A free variable materialized with an explicit shape, for components whose
/// declaration carries array dimensions.
pub fn symbol_with_shape(name: impl Into<String>, shape: Shape) -> Sym {
    Rc::new(ExprNode {
        kind: ExprKind::Symbol { name: name.into() },
        shape,
    })
}

pub fn real(v: f64) -> Sym {
    Rc::new(ExprNode {
        kind: ExprKind::Literal(Literal::Real(v)),
        shape: Shape::SCALAR,
    })
}

pub fn integer(v: i64) -> Sym {
    Rc::new(ExprNode {
        kind: ExprKind::Literal(Literal::Int(v)),
        shape: Shape::SCALAR,
    })
}

pub fn boolean(v: bool) -> Sym {
    Rc::new(ExprNode {
        kind: ExprKind::Literal(Literal::Bool(v)),
        shape: Shape::SCALAR,
    })
}

pub fn vector(items: Vec<Sym>) -> Sym {
    let n = items.len();
    Rc::new(ExprNode {
        kind: ExprKind::Vector(items),
        shape: Shape(n, 1),
    })
}

/// Applies `op` to `operands`, checking arity and broadcasting shapes the
/// way elementwise array operations do (a scalar broadcasts against any
/// shape; otherwise shapes must match exactly).
pub fn apply(op: Op, operands: Vec<Sym>) -> Result<Sym, CompileError> {
    if operands.len() != op.arity() {
        return Err(CompileError::ShapeError {
            expression: format!("{op:?} expects {} operand(s), got {}", op.arity(), operands.len()),
        });
    }
    let shape = broadcast_shape(&operands)?;
    Ok(Rc::new(ExprNode {
        kind: ExprKind::Op { op, operands },
        shape,
    }))
}

fn broadcast_shape(operands: &[Sym]) -> Result<Shape, CompileError> {
    let mut result = Shape::SCALAR;
    for o in operands {
        if o.shape.is_scalar() {
            continue;
        }
        if result.is_scalar() {
            result = o.shape;
        } else if result != o.shape {
            return Err(CompileError::ShapeError {
                expression: format!("mismatched shapes {} and {}", result, o.shape),
            });
        }
    }
    Ok(result)
}

/// `mtimes(a, b)`: ordinary matrix product, shape `(a.0, b.1)` requiring
/// `a.1 == b.0`.
pub fn mtimes(a: Sym, b: Sym) -> Result<Sym, CompileError> {
    if a.shape.1 != b.shape.0 {
        return Err(CompileError::ShapeError {
            expression: format!("cannot multiply shapes {} and {}", a.shape, b.shape),
        });
    }
    let shape = Shape(a.shape.0, b.shape.1);
    Ok(Rc::new(ExprNode {
        kind: ExprKind::Op {
            op: Op::Mtimes,
            operands: vec![a, b],
        },
        shape,
    }))
}

pub fn if_else(cond: Sym, then_branch: Sym, else_branch: Sym) -> Result<Sym, CompileError> {
    let shape = broadcast_shape(&[then_branch.clone(), else_branch.clone()])?;
    Ok(Rc::new(ExprNode {
        kind: ExprKind::IfElse {
            cond,
            then_branch,
            else_branch,
        },
        shape,
    }))
}

pub fn delay(expr: Sym, delay_time: Sym, max_delay: Option<Sym>) -> Sym {
    let shape = expr.shape;
    Rc::new(ExprNode {
        kind: ExprKind::Delay {
            expr,
            delay_time,
            max_delay,
        },
        shape,
    })
}

/// A flat, row-major buffer interpreted through an explicit `(rows, cols)`
/// shape, underlying `identity`/`diagonal`'s dense matrix construction.
fn matrix(items: Vec<Sym>, rows: usize, cols: usize) -> Sym {
    Rc::new(ExprNode {
        kind: ExprKind::Vector(items),
        shape: Shape(rows, cols),
    })
}

/// `transpose(a)`: swaps `a`'s shape. Never routed through `apply`, since
/// transpose changes shape rather than broadcasting across it.
pub fn transpose(a: Sym) -> Sym {
    let shape = Shape(a.shape.1, a.shape.0);
    Rc::new(ExprNode {
        kind: ExprKind::Op { op: Op::Transpose, operands: vec![a] },
        shape,
    })
}

/// `sum(a)`: the scalar sum of a vector's elements. A literal `Vector` folds
/// into a left-associated chain of `Op::Add` nodes (so `fold_constant` sees
/// straight arithmetic); anything else is wrapped as an opaque `Op::Sum` node.
pub fn sum(a: &Sym) -> Sym {
    if let ExprKind::Vector(items) = &a.kind {
        let mut iter = items.iter();
        let Some(first) = iter.next() else {
            return real(0.0);
        };
        let mut acc = first.clone();
        for item in iter {
            acc = Rc::new(ExprNode {
                kind: ExprKind::Op { op: Op::Add, operands: vec![acc, item.clone()] },
                shape: Shape::SCALAR,
            });
        }
        acc
    } else {
        Rc::new(ExprNode {
            kind: ExprKind::Op { op: Op::Sum, operands: vec![a.clone()] },
            shape: Shape::SCALAR,
        })
    }
}

/// `linspace(a, b, n)`: `n` evenly spaced points from `a` to `b` inclusive.
/// `n` must already be resolved to a generation-time integer constant.
pub fn linspace(a: &Sym, b: &Sym, n: i64) -> Result<Sym, CompileError> {
    if n <= 0 {
        return Err(CompileError::ShapeError {
            expression: format!("linspace() requires a positive point count, got {n}"),
        });
    }
    if n == 1 {
        return Ok(vector(vec![a.clone()]));
    }
    let denom = real((n - 1) as f64);
    let diff = apply(Op::Sub, vec![b.clone(), a.clone()])?;
    let mut items = Vec::with_capacity(n as usize);
    for i in 0..n {
        let t = apply(Op::Div, vec![real(i as f64), denom.clone()])?;
        let offset = apply(Op::Mul, vec![diff.clone(), t])?;
        items.push(apply(Op::Add, vec![a.clone(), offset])?);
    }
    Ok(vector(items))
}

/// `fill(val, n)`: `n` copies of `val`. `val` may itself be symbolic.
pub fn fill(val: Sym, n: i64) -> Result<Sym, CompileError> {
    if n < 0 {
        return Err(CompileError::ShapeError {
            expression: format!("fill() requires a non-negative count, got {n}"),
        });
    }
    Ok(vector(vec![val; n as usize]))
}

/// `zeros(n)`: an `n`-length vector of `0.0`.
pub fn zeros(n: i64) -> Result<Sym, CompileError> {
    if n < 0 {
        return Err(CompileError::ShapeError {
            expression: format!("zeros() requires a non-negative count, got {n}"),
        });
    }
    Ok(vector((0..n).map(|_| real(0.0)).collect()))
}

/// `ones(n)`: an `n`-length vector of `1.0`.
pub fn ones(n: i64) -> Result<Sym, CompileError> {
    if n < 0 {
        return Err(CompileError::ShapeError {
            expression: format!("ones() requires a non-negative count, got {n}"),
        });
    }
    Ok(vector((0..n).map(|_| real(1.0)).collect()))
}

/// `identity(n)`: the dense `n x n` identity matrix.
pub fn identity(n: i64) -> Result<Sym, CompileError> {
    if n < 0 {
        return Err(CompileError::ShapeError {
            expression: format!("identity() requires a non-negative size, got {n}"),
        });
    }
    let n = n as usize;
    let mut items = Vec::with_capacity(n * n);
    for r in 0..n {
        for c in 0..n {
            items.push(if r == c { real(1.0) } else { real(0.0) });
        }
    }
    Ok(matrix(items, n, n))
}

/// `diagonal(v)`: the dense `n x n` matrix with `v`'s elements on the
/// diagonal and zero elsewhere. Only supported when `v` is a literal
/// `Vector` (an array-valued expression this crate already expanded
/// element-by-element); a plain array-shaped symbol has no per-element
/// accessor in this kernel to pull the diagonal entries from.
pub fn diagonal(v: &Sym) -> Result<Sym, CompileError> {
    let ExprKind::Vector(items) = &v.kind else {
        return Err(CompileError::UnsupportedConstruct {
            what: "diagonal() of an expression that isn't a literal vector".to_string(),
        });
    };
    let n = items.len();
    let mut out = Vec::with_capacity(n * n);
    for r in 0..n {
        for c in 0..n {
            out.push(if r == c { items[r].clone() } else { real(0.0) });
        }
    }
    Ok(matrix(out, n, n))
}

/// Returns the free symbol names appearing anywhere in `expr`.
pub fn free_symbols(expr: &Sym) -> HashSet<String> {
    let mut out = HashSet::new();
    collect_free_symbols(expr, &mut out);
    out
}

fn collect_free_symbols(expr: &Sym, out: &mut HashSet<String>) {
    match &expr.kind {
        ExprKind::Symbol { name } => {
            out.insert(name.clone());
        }
        ExprKind::Literal(_) => {}
        ExprKind::Op { operands, .. } => {
            for o in operands {
                collect_free_symbols(o, out);
            }
        }
        ExprKind::IfElse {
            cond,
            then_branch,
            else_branch,
        } => {
            collect_free_symbols(cond, out);
            collect_free_symbols(then_branch, out);
            collect_free_symbols(else_branch, out);
        }
        ExprKind::Vector(items) => {
            for i in items {
                collect_free_symbols(i, out);
            }
        }
        ExprKind::Delay { expr, delay_time, max_delay } => {
            collect_free_symbols(expr, out);
            collect_free_symbols(delay_time, out);
            if let Some(m) = max_delay {
                collect_free_symbols(m, out);
            }
        }
    }
}

/// Substitutes every free occurrence of the symbol named `from` with `to`,
/// sharing unaffected subtrees rather than rebuilding them.
pub fn substitute(expr: &Sym, from: &str, to: &Sym) -> Sym {
    match &expr.kind {
        ExprKind::Symbol { name } if name == from => to.clone(),
        ExprKind::Symbol { .. } | ExprKind::Literal(_) => expr.clone(),
        ExprKind::Op { op, operands } => {
            let new_operands: Vec<Sym> = operands.iter().map(|o| substitute(o, from, to)).collect();
            if new_operands.iter().zip(operands).all(|(a, b)| Rc::ptr_eq(a, b)) {
                expr.clone()
            } else {
                Rc::new(ExprNode {
                    kind: ExprKind::Op { op: *op, operands: new_operands },
                    shape: expr.shape,
                })
            }
        }
        ExprKind::IfElse {
            cond,
            then_branch,
            else_branch,
        } => Rc::new(ExprNode {
            kind: ExprKind::IfElse {
                cond: substitute(cond, from, to),
                then_branch: substitute(then_branch, from, to),
                else_branch: substitute(else_branch, from, to),
            },
            shape: expr.shape,
        }),
        ExprKind::Vector(items) => Rc::new(ExprNode {
            kind: ExprKind::Vector(items.iter().map(|i| substitute(i, from, to)).collect()),
            shape: expr.shape,
        }),
        ExprKind::Delay { expr: inner, delay_time, max_delay } => Rc::new(ExprNode {
            kind: ExprKind::Delay {
                expr: substitute(inner, from, to),
                delay_time: substitute(delay_time, from, to),
                max_delay: max_delay.as_ref().map(|m| substitute(m, from, to)),
            },
            shape: expr.shape,
        }),
    }
}

/// Folds an expression to a constant `f64` if every leaf is a literal,
/// otherwise returns `None`. Used by `get_integer`/`get_mx` when a shape or
/// loop bound must be known at generation time.
pub fn fold_constant(expr: &Sym) -> Option<f64> {
    match &expr.kind {
        ExprKind::Literal(l) => Some(l.as_f64()),
        ExprKind::Op { op, operands } => {
            let values: Vec<f64> = operands.iter().map(fold_constant).collect::<Option<_>>()?;
            Some(match (op, values.as_slice()) {
                (Op::Add, [a, b]) => a + b,
                (Op::Sub, [a, b]) => a - b,
                (Op::Mul, [a, b]) => a * b,
                (Op::Div, [a, b]) => a / b,
                (Op::Pow, [a, b]) => a.powf(*b),
                (Op::Neg, [a]) => -a,
                (Op::Sin, [a]) => a.sin(),
                (Op::Cos, [a]) => a.cos(),
                (Op::Tan, [a]) => a.tan(),
                (Op::Exp, [a]) => a.exp(),
                (Op::Log, [a]) => a.ln(),
                (Op::Sqrt, [a]) => a.sqrt(),
                (Op::Abs, [a]) => a.abs(),
                (Op::Floor, [a]) => a.floor(),
                (Op::Ceil, [a]) => a.ceil(),
                (Op::Min, [a, b]) => a.min(*b),
                (Op::Max, [a, b]) => a.max(*b),
                _ => return None,
            })
        }
        ExprKind::IfElse { cond, then_branch, else_branch } => {
            let c = fold_constant(cond)?;
            if c != 0.0 {
                fold_constant(then_branch)
            } else {
                fold_constant(else_branch)
            }
        }
        _ => None,
    }
}

/// A user-defined function, inlined at each call site: body expressions are
/// substituted with the call's actual arguments rather than generating a
/// standalone callable, matching the reference implementation's treatment
/// of Modelica functions as macro-expanded at generation time.
#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub parameters: Vec<String>,
    pub body: Sym,
}

impl Function {
    /// Inlines a call `name(args...)` by substituting each parameter with
    /// its corresponding argument throughout the body.
    pub fn inline(&self, args: &[Sym]) -> Result<Sym, CompileError> {
        if args.len() != self.parameters.len() {
            return Err(CompileError::ShapeError {
                expression: format!("{} expects {} argument(s), got {}", self.name, self.parameters.len(), args.len()),
            });
        }
        let mut result = self.body.clone();
        for (param, arg) in self.parameters.iter().zip(args) {
            result = substitute(&result, param, arg);
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_ops_broadcast() {
        let a = symbol("a");
        let b = real(2.0);
        let sum = apply(Op::Add, vec![a, b]).unwrap();
        assert!(sum.shape.is_scalar());
    }

    #[test]
    fn mismatched_shapes_are_rejected() {
        let v = vector(vec![real(1.0), real(2.0)]);
        let w = vector(vec![real(1.0), real(2.0), real(3.0)]);
        assert!(apply(Op::Add, vec![v, w]).is_err());
    }

    #[test]
    fn constant_folding_evaluates_arithmetic() {
        let expr = apply(Op::Mul, vec![real(2.0), real(3.0)]).unwrap();
        assert_eq!(fold_constant(&expr), Some(6.0));
    }

    #[test]
    fn folding_stops_at_a_free_symbol() {
        let expr = apply(Op::Add, vec![symbol("x"), real(1.0)]).unwrap();
        assert_eq!(fold_constant(&expr), None);
    }

    #[test]
    fn substitution_replaces_only_the_named_symbol() {
        let expr = apply(Op::Add, vec![symbol("x"), symbol("y")]).unwrap();
        let replaced = substitute(&expr, "x", &real(5.0));
        assert_eq!(fold_constant(&replaced), None);
        let fully_replaced = substitute(&replaced, "y", &real(1.0));
        assert_eq!(fold_constant(&fully_replaced), Some(6.0));
    }

    #[test]
    fn function_inline_substitutes_parameters() {
        let body = apply(Op::Mul, vec![symbol("a"), symbol("a")]).unwrap();
        let square = Function {
            name: "square".to_string(),
            parameters: vec!["a".to_string()],
            body,
        };
        let result = square.inline(&[real(4.0)]).unwrap();
        assert_eq!(fold_constant(&result), Some(16.0));
    }

    #[test]
    fn if_else_requires_matching_branch_shapes() {
        let cond = symbol("c");
        let scalar_branch = real(1.0);
        let vector_branch = vector(vec![real(1.0), real(2.0)]);
        assert!(if_else(cond, scalar_branch, vector_branch).is_err());
    }

    #[test]
    fn min_and_max_fold_like_ordinary_binary_ops() {
        let lo = apply(Op::Min, vec![real(3.0), real(5.0)]).unwrap();
        let hi = apply(Op::Max, vec![real(3.0), real(5.0)]).unwrap();
        assert_eq!(fold_constant(&lo), Some(3.0));
        assert_eq!(fold_constant(&hi), Some(5.0));
    }

    #[test]
    fn transpose_swaps_shape_without_touching_rank() {
        let v = vector(vec![real(1.0), real(2.0), real(3.0)]);
        let t = transpose(v);
        assert_eq!(t.shape, Shape(1, 3));
    }

    #[test]
    fn sum_of_a_literal_vector_constant_folds() {
        let v = vector(vec![real(1.0), real(2.0), real(3.0)]);
        let total = sum(&v);
        assert!(total.shape.is_scalar());
        assert_eq!(fold_constant(&total), Some(6.0));
    }

    #[test]
    fn sum_of_a_symbolic_value_stays_opaque() {
        let total = sum(&symbol("x"));
        assert_eq!(fold_constant(&total), None);
        assert!(free_symbols(&total).contains("x"));
    }

    #[test]
    fn linspace_produces_n_evenly_spaced_points() {
        let span = linspace(&real(0.0), &real(10.0), 5).unwrap();
        if let ExprKind::Vector(items) = &span.kind {
            let values: Vec<f64> = items.iter().map(|i| fold_constant(i).unwrap()).collect();
            assert_eq!(values, vec![0.0, 2.5, 5.0, 7.5, 10.0]);
        } else {
            panic!("expected a vector");
        }
    }

    #[test]
    fn linspace_rejects_a_non_positive_count() {
        assert!(linspace(&real(0.0), &real(1.0), 0).is_err());
    }

    #[test]
    fn fill_zeros_and_ones_build_constant_vectors() {
        let filled = fill(real(7.0), 3).unwrap();
        assert_eq!(fold_constant(&sum(&filled)), Some(21.0));
        assert_eq!(fold_constant(&sum(&zeros(4).unwrap())), Some(0.0));
        assert_eq!(fold_constant(&sum(&ones(4).unwrap())), Some(4.0));
    }

    #[test]
    fn identity_has_ones_on_the_diagonal_only() {
        let eye = identity(2).unwrap();
        assert_eq!(eye.shape, Shape(2, 2));
        if let ExprKind::Vector(items) = &eye.kind {
            let values: Vec<f64> = items.iter().map(|i| fold_constant(i).unwrap()).collect();
            assert_eq!(values, vec![1.0, 0.0, 0.0, 1.0]);
        } else {
            panic!("expected a matrix");
        }
    }

    #[test]
    fn diagonal_of_a_literal_vector_places_entries_on_the_diagonal() {
        let v = vector(vec![real(2.0), real(3.0)]);
        let d = diagonal(&v).unwrap();
        assert_eq!(d.shape, Shape(2, 2));
        if let ExprKind::Vector(items) = &d.kind {
            let values: Vec<f64> = items.iter().map(|i| fold_constant(i).unwrap()).collect();
            assert_eq!(values, vec![2.0, 0.0, 0.0, 3.0]);
        } else {
            panic!("expected a matrix");
        }
    }

    #[test]
    fn diagonal_of_a_non_literal_symbol_is_unsupported() {
        let err = diagonal(&symbol("v")).unwrap_err();
        assert!(matches!(err, CompileError::UnsupportedConstruct { .. }));
    }
}
