//! A generic pre/post-order visitor over the AST.
//!
//! For each node kind `K` the walker calls `enterK` before descending into
//! its children and `exitK` after. Children are enumerated in a fixed,
//! per-kind schema (for `Class`: extends → classes → symbols → equations →
//! statements). The walker itself carries no state beyond the recursion
//! stack; a listener owns whatever state it needs.

use crate::ast::{Class, ComponentRef, Equation, Expr, ExtendsClause, Statement, Symbol};

#[allow(unused_variables)]
pub trait Visitor {
    fn enter_class(&mut self, node: &Class) {}
    fn exit_class(&mut self, node: &Class) {}

    fn enter_extends(&mut self, node: &ExtendsClause) {}
    fn exit_extends(&mut self, node: &ExtendsClause) {}

    fn enter_symbol(&mut self, node: &Symbol) {}
    fn exit_symbol(&mut self, node: &Symbol) {}

    fn enter_equation(&mut self, node: &Equation) {}
    fn exit_equation(&mut self, node: &Equation) {}

    fn enter_for_equation(&mut self, node: &Equation) {}
    fn exit_for_equation(&mut self, node: &Equation) {}

    fn enter_statement(&mut self, node: &Statement) {}
    fn exit_statement(&mut self, node: &Statement) {}

    fn enter_for_statement(&mut self, node: &Statement) {}
    fn exit_for_statement(&mut self, node: &Statement) {}

    fn enter_expr(&mut self, node: &Expr) {}
    fn exit_expr(&mut self, node: &Expr) {}

    fn enter_component_ref(&mut self, node: &ComponentRef) {}
    fn exit_component_ref(&mut self, node: &ComponentRef) {}
}

pub trait Walk {
    fn walk<V: Visitor>(&self, visitor: &mut V);
}

impl Walk for Class {
    fn walk<V: Visitor>(&self, visitor: &mut V) {
        visitor.enter_class(self);
        for extends in &self.extends {
            visitor.enter_extends(extends);
            visitor.exit_extends(extends);
        }
        for nested in self.classes.values() {
            nested.walk(visitor);
        }
        for symbol in self.symbols.values() {
            symbol.walk(visitor);
        }
        for eq in &self.initial_equations {
            eq.walk(visitor);
        }
        for eq in &self.equations {
            eq.walk(visitor);
        }
        for stmt in &self.initial_statements {
            stmt.walk(visitor);
        }
        for stmt in &self.statements {
            stmt.walk(visitor);
        }
        visitor.exit_class(self);
    }
}

impl Walk for Symbol {
    fn walk<V: Visitor>(&self, visitor: &mut V) {
        visitor.enter_symbol(self);
        visitor.exit_symbol(self);
    }
}

impl Walk for ComponentRef {
    fn walk<V: Visitor>(&self, visitor: &mut V) {
        visitor.enter_component_ref(self);
        visitor.exit_component_ref(self);
    }
}

impl Walk for Expr {
    fn walk<V: Visitor>(&self, visitor: &mut V) {
        visitor.enter_expr(self);
        match self {
            Expr::Primary(_) => {}
            Expr::ComponentRef(cref) => cref.walk(visitor),
            Expr::Expression(e) => {
                for operand in &e.operands {
                    operand.walk(visitor);
                }
            }
            Expr::IfExpression(ie) => {
                for c in &ie.conditions {
                    c.walk(visitor);
                }
                for e in &ie.expressions {
                    e.walk(visitor);
                }
            }
            Expr::Array(items) => {
                for item in items {
                    item.walk(visitor);
                }
            }
        }
        visitor.exit_expr(self);
    }
}

fn walk_eqside<V: Visitor>(side: &crate::ast::EqSide, visitor: &mut V) {
    match side {
        crate::ast::EqSide::Single(e) => e.walk(visitor),
        crate::ast::EqSide::Tuple(items) => {
            for e in items {
                e.walk(visitor);
            }
        }
    }
}

impl Walk for Equation {
    fn walk<V: Visitor>(&self, visitor: &mut V) {
        visitor.enter_equation(self);
        match self {
            Equation::Simple { left, right, .. } => {
                walk_eqside(left, visitor);
                walk_eqside(right, visitor);
            }
            Equation::If {
                conditions,
                equations,
                ..
            } => {
                for c in conditions {
                    c.walk(visitor);
                }
                for eq in equations {
                    eq.walk(visitor);
                }
            }
            Equation::For { indices, equations } => {
                visitor.enter_for_equation(self);
                for idx in indices {
                    idx.expression.start.walk(visitor);
                    idx.expression.step.walk(visitor);
                    idx.expression.stop.walk(visitor);
                }
                for eq in equations {
                    eq.walk(visitor);
                }
                visitor.exit_for_equation(self);
            }
            Equation::Connect { left, right, .. } => {
                left.walk(visitor);
                right.walk(visitor);
            }
        }
        visitor.exit_equation(self);
    }
}

impl Walk for Statement {
    fn walk<V: Visitor>(&self, visitor: &mut V) {
        visitor.enter_statement(self);
        match self {
            Statement::Assignment { left, right, .. } => {
                for l in left {
                    l.walk(visitor);
                }
                right.walk(visitor);
            }
            Statement::If {
                conditions,
                statements,
                ..
            } => {
                for c in conditions {
                    c.walk(visitor);
                }
                for s in statements {
                    s.walk(visitor);
                }
            }
            Statement::For { indices, statements } => {
                visitor.enter_for_statement(self);
                for idx in indices {
                    idx.expression.start.walk(visitor);
                    idx.expression.step.walk(visitor);
                    idx.expression.stop.walk(visitor);
                }
                for s in statements {
                    s.walk(visitor);
                }
                visitor.exit_for_statement(self);
            }
        }
        visitor.exit_statement(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{EqSide, Expr, ForIndex, Slice, Symbol};
    use indexmap::IndexMap;

    struct Recorder(Vec<&'static str>);

    impl Visitor for Recorder {
        fn enter_symbol(&mut self, _node: &Symbol) {
            self.0.push("enter_symbol");
        }
        fn exit_symbol(&mut self, _node: &Symbol) {
            self.0.push("exit_symbol");
        }
        fn enter_equation(&mut self, _node: &Equation) {
            self.0.push("enter_equation");
        }
        fn exit_equation(&mut self, _node: &Equation) {
            self.0.push("exit_equation");
        }
        fn enter_for_equation(&mut self, _node: &Equation) {
            self.0.push("enter_for_equation");
        }
        fn exit_for_equation(&mut self, _node: &Equation) {
            self.0.push("exit_for_equation");
        }
    }

    #[test]
    fn symbol_visits_are_strictly_paired() {
        let mut symbols = IndexMap::new();
        symbols.insert("x".to_string(), Symbol::scalar("x", "Real"));
        let class = Class {
            symbols,
            ..Default::default()
        };
        let mut recorder = Recorder(Vec::new());
        class.walk(&mut recorder);
        assert_eq!(recorder.0, vec!["enter_symbol", "exit_symbol"]);
    }

    #[test]
    fn for_equation_fires_both_the_generic_and_dedicated_hooks() {
        let one = Box::new(Expr::int(1));
        let three = Box::new(Expr::int(3));
        let for_eq = Equation::For {
            indices: vec![ForIndex {
                name: "i".to_string(),
                expression: Slice {
                    start: one.clone(),
                    step: one.clone(),
                    stop: three,
                },
            }],
            equations: Vec::new(),
        };
        let mut recorder = Recorder(Vec::new());
        for_eq.walk(&mut recorder);
        assert_eq!(
            recorder.0,
            vec!["enter_equation", "enter_for_equation", "exit_for_equation", "exit_equation"]
        );
    }

    #[test]
    fn non_for_equation_never_fires_the_for_equation_hooks() {
        let eq = Equation::Simple {
            left: EqSide::Single(Expr::int(1)),
            right: EqSide::Single(Expr::int(1)),
            comment: String::new(),
        };
        let mut recorder = Recorder(Vec::new());
        eq.walk(&mut recorder);
        assert_eq!(recorder.0, vec!["enter_equation", "exit_equation"]);
    }
}
