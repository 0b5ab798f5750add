//! A tiny constant-folding evaluator used by the flattener to size
//! array-of-component expansions, before any symbolic kernel exists.
//!
//! This is deliberately narrow: it only has to handle the dimension
//! expressions that appear in practice (integer literals and references to
//! already-resolved parameter values). The generator has its own richer
//! `get_integer`, built on the symbolic kernel, for expressions that depend
//! on other symbolic quantities.

use crate::ast::{Expr, Primary, Symbol};
use crate::errors::CompileError;
use indexmap::IndexMap;

pub fn const_int(expr: &Expr, symbols: &IndexMap<String, Symbol>) -> Result<i64, CompileError> {
    match expr {
        Expr::Primary(Primary::Int(i)) => Ok(*i),
        Expr::Primary(Primary::Real(r)) => Ok(*r as i64),
        Expr::ComponentRef(cref) if cref.child.is_none() => {
            let sym = symbols.get(&cref.name).ok_or_else(|| CompileError::ShapeError {
                expression: cref.to_string(),
            })?;
            match &sym.value {
                Some(v) => const_int(v, symbols),
                None => Err(CompileError::ShapeError {
                    expression: cref.to_string(),
                }),
            }
        }
        other => Err(CompileError::ShapeError {
            expression: format!("{other:?}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::ComponentRef;

    #[test]
    fn integer_literal_passes_through() {
        let symbols = IndexMap::new();
        assert_eq!(const_int(&Expr::int(3), &symbols).unwrap(), 3);
    }

    #[test]
    fn real_literal_truncates() {
        let symbols = IndexMap::new();
        assert_eq!(const_int(&Expr::real(4.7), &symbols).unwrap(), 4);
    }

    #[test]
    fn component_ref_dereferences_through_its_value() {
        let mut symbols = IndexMap::new();
        let mut n = Symbol::scalar("n", "Integer");
        n.value = Some(Expr::int(5));
        symbols.insert("n".to_string(), n);
        let expr = Expr::cref(ComponentRef::leaf("n"));
        assert_eq!(const_int(&expr, &symbols).unwrap(), 5);
    }

    #[test]
    fn unresolved_reference_is_a_shape_error() {
        let symbols = IndexMap::new();
        let expr = Expr::cref(ComponentRef::leaf("missing"));
        assert!(const_int(&expr, &symbols).is_err());
    }

    #[test]
    fn a_parameter_with_no_value_cannot_size_an_array() {
        let mut symbols = IndexMap::new();
        symbols.insert("n".to_string(), Symbol::scalar("n", "Integer"));
        let expr = Expr::cref(ComponentRef::leaf("n"));
        assert!(const_int(&expr, &symbols).is_err());
    }
}
