//! Inlines inheritance, applies class modifications, expands component
//! references and produces a single self-contained class.
//!
//! The six steps below are deterministic and their ordering is part of the
//! contract: target resolution, extends inlining, component expansion,
//! modifier application, connect-clause resolution, then name-mangling
//! (the last of which happens incrementally, as each step prefixes the
//! references it introduces rather than in one final pass).

use std::collections::HashSet;
use std::rc::Rc;

use indexmap::IndexMap;
use log::debug;

use crate::ast::*;
use crate::collection::Collection;
use crate::errors::CompileError;
use crate::eval::const_int;

/// Flattens `target` (a fully qualified class name) found in `collection`
/// into a new `Collection` containing exactly one class.
pub fn flatten(collection: &Collection, target: &ComponentRef) -> Result<Collection, CompileError> {
    let mut in_progress = HashSet::new();
    let flat = flatten_class(collection, target, None, &mut in_progress)?;
    let mut classes = IndexMap::new();
    classes.insert(flat.name.clone(), flat);
    Ok(Collection::new(vec![File {
        within: Vec::new(),
        classes,
    }]))
}

fn flatten_class(
    collection: &Collection,
    reference: &ComponentRef,
    within: Option<&ComponentRef>,
    in_progress: &mut HashSet<Vec<String>>,
) -> Result<Rc<Class>, CompileError> {
    let resolution = collection.find_class(reference, within, false)?;
    let key = resolution.path.to_tuple();

    if resolution.class.kind == ClassKind::Builtin {
        return Ok(resolution.class);
    }

    if !in_progress.insert(key.clone()) {
        return Err(CompileError::CyclicInheritance {
            reference: resolution.path.to_string(),
        });
    }
    debug!("flattening {}", resolution.path);

    let source = resolution.class.as_ref();
    let mut symbols: IndexMap<String, Symbol> = IndexMap::new();
    let mut classes: IndexMap<String, Rc<Class>> = IndexMap::new();
    let mut equations = Vec::new();
    let mut initial_equations = Vec::new();
    let mut statements = Vec::new();
    let mut initial_statements = Vec::new();

    // Step 2: extends inlining. Inherited members land before local ones so
    // that locals win on a name collision.
    for extends in &source.extends {
        let base = flatten_class(collection, &extends.component, Some(&resolution.path), in_progress)?;

        let mut base_symbols = base.symbols.clone();
        if let Some(modification) = &extends.class_modification {
            apply_class_modification(modification, &mut base_symbols)?;
        }
        for sym in base_symbols.values_mut() {
            sym.visibility = sym.visibility.min(extends.visibility);
        }

        for (name, sym) in base_symbols {
            symbols.insert(name, sym);
        }
        for (name, nested) in base.classes.iter() {
            classes.insert(name.clone(), nested.clone());
        }
        equations.extend(base.equations.clone());
        initial_equations.extend(base.initial_equations.clone());
        statements.extend(base.statements.clone());
        initial_statements.extend(base.initial_statements.clone());
    }

    for (name, nested) in &source.classes {
        classes.insert(name.clone(), nested.clone());
    }
    for (name, sym) in &source.symbols {
        symbols.insert(name.clone(), sym.clone());
    }
    equations.extend(source.equations.clone());
    initial_equations.extend(source.initial_equations.clone());
    statements.extend(source.statements.clone());
    initial_statements.extend(source.initial_statements.clone());

    // Step 3: component expansion. Every symbol whose type resolves to a
    // user-defined (non-builtin) class gets its submodel's symbols and
    // equations inlined under `<name>.` (or `<name>[i].` for arrays).
    let component_names: Vec<String> = symbols.keys().cloned().collect();
    for name in component_names {
        let sym = symbols.get(&name).unwrap().clone();
        let sub = match collection.find_class(&sym.r#type, Some(&resolution.path), true) {
            Ok(r) => r,
            Err(CompileError::ElementaryTypeMiss { .. }) => continue,
            Err(e) => return Err(e),
        };
        if sub.class.kind == ClassKind::Builtin {
            continue;
        }

        let flat_sub = flatten_class(collection, &sym.r#type, Some(&resolution.path), in_progress)?;
        let mut sub_symbols = flat_sub.symbols.clone();
        if let Some(modification) = &sym.class_modification {
            apply_class_modification(modification, &mut sub_symbols)?;
        }

        let count = array_count(&sym.dimensions, &symbols)?;
        let prefixes: Vec<String> = if count <= 1 {
            vec![format!("{name}.")]
        } else {
            (1..=count).map(|i| format!("{name}[{i}].")).collect()
        };

        symbols.shift_remove(&name);
        for prefix in &prefixes {
            for (sub_name, mut sub_sym) in sub_symbols.clone() {
                sub_sym.name = format!("{prefix}{sub_name}");
                symbols.insert(sub_sym.name.clone(), sub_sym);
            }
            for eq in &flat_sub.equations {
                equations.push(prefix_equation(eq, prefix));
            }
            for eq in &flat_sub.initial_equations {
                initial_equations.push(prefix_equation(eq, prefix));
            }
        }
    }

    // Step 4: modifier application on the target class's own symbols.
    for (name, modification) in source
        .symbols
        .iter()
        .filter_map(|(n, s)| s.class_modification.as_ref().map(|m| (n.clone(), m.clone())))
    {
        if let Some(sym) = symbols.get_mut(&name) {
            apply_self_modification(sym, &modification)?;
        }
    }

    // Step 5: connect-clause resolution, generating equality/flow-sum
    // equations between the matching variables of each connector.
    let mut resolved_equations = Vec::new();
    for eq in equations {
        if let Equation::Connect { left, right, .. } = &eq {
            resolved_equations.extend(resolve_connect(left, right, &symbols));
        } else {
            resolved_equations.push(eq);
        }
    }

    let flat = Class {
        name: reference.to_tuple().last().cloned().unwrap_or_else(|| source.name.clone()),
        kind: source.kind,
        encapsulated: false,
        partial: false,
        final_: source.final_,
        imports: source.imports.clone(),
        extends: Vec::new(),
        classes,
        symbols,
        equations: resolved_equations,
        initial_equations,
        statements,
        initial_statements,
        within: Vec::new(),
    };

    in_progress.remove(&key);
    Ok(Rc::new(flat))
}

fn array_count(dimensions: &[Expr], symbols: &IndexMap<String, Symbol>) -> Result<i64, CompileError> {
    let mut count = 1;
    for d in dimensions {
        count *= const_int(d, symbols).unwrap_or(1);
    }
    Ok(count)
}

/// Prepends `prefix` to the head name of every component reference appearing
/// in `eq`, used to inline a submodel's equations under its instance name.
fn prefix_equation(eq: &Equation, prefix: &str) -> Equation {
    match eq {
        Equation::Simple { left, right, comment } => Equation::Simple {
            left: prefix_eqside(left, prefix),
            right: prefix_eqside(right, prefix),
            comment: comment.clone(),
        },
        Equation::If {
            conditions,
            equations,
            comment,
        } => Equation::If {
            conditions: conditions.iter().map(|c| prefix_expr(c, prefix)).collect(),
            equations: equations.iter().map(|e| prefix_equation(e, prefix)).collect(),
            comment: comment.clone(),
        },
        Equation::For { indices, equations } => Equation::For {
            indices: indices.clone(),
            equations: equations.iter().map(|e| prefix_equation(e, prefix)).collect(),
        },
        Equation::Connect { left, right, comment } => Equation::Connect {
            left: prefix_cref(left, prefix),
            right: prefix_cref(right, prefix),
            comment: comment.clone(),
        },
    }
}

fn prefix_eqside(side: &EqSide, prefix: &str) -> EqSide {
    match side {
        EqSide::Single(e) => EqSide::Single(prefix_expr(e, prefix)),
        EqSide::Tuple(items) => EqSide::Tuple(items.iter().map(|e| prefix_expr(e, prefix)).collect()),
    }
}

fn prefix_cref(cref: &ComponentRef, prefix: &str) -> ComponentRef {
    ComponentRef {
        name: format!("{prefix}{}", cref.name),
        indices: cref.indices.clone(),
        child: cref.child.clone(),
    }
}

fn prefix_expr(expr: &Expr, prefix: &str) -> Expr {
    match expr {
        Expr::Primary(p) => Expr::Primary(p.clone()),
        Expr::ComponentRef(c) => {
            if c.name == "time" {
                Expr::ComponentRef(c.clone())
            } else {
                Expr::ComponentRef(prefix_cref(c, prefix))
            }
        }
        Expr::Expression(e) => Expr::Expression(Expression {
            operator: e.operator.clone(),
            operands: e.operands.iter().map(|o| prefix_expr(o, prefix)).collect(),
        }),
        Expr::IfExpression(ie) => Expr::IfExpression(Box::new(IfExpression {
            conditions: ie.conditions.iter().map(|c| prefix_expr(c, prefix)).collect(),
            expressions: ie.expressions.iter().map(|e| prefix_expr(e, prefix)).collect(),
        })),
        Expr::Array(items) => Expr::Array(items.iter().map(|e| prefix_expr(e, prefix)).collect()),
    }
}

/// Resolves `connect(left, right)` into Modelica connection semantics: flow
/// variables sum to zero, everything else is asserted equal.
fn resolve_connect(left: &ComponentRef, right: &ComponentRef, symbols: &IndexMap<String, Symbol>) -> Vec<Equation> {
    let left_name = left.to_string();
    let right_name = right.to_string();
    let left_prefix = format!("{left_name}.");
    let mut out = Vec::new();

    for (name, sym) in symbols {
        let Some(suffix) = name.strip_prefix(&left_prefix) else {
            continue;
        };
        let right_name_full = format!("{right_name}.{suffix}");
        if !symbols.contains_key(&right_name_full) {
            continue;
        }
        let l = Expr::cref(ComponentRef::from_string(name));
        let r = Expr::cref(ComponentRef::from_string(&right_name_full));
        if sym.has_prefix("flow") {
            out.push(Equation::Simple {
                left: EqSide::Single(Expr::op("+", vec![l, r])),
                right: EqSide::Single(Expr::real(0.0)),
                comment: String::new(),
            });
        } else {
            out.push(Equation::Simple {
                left: EqSide::Single(l),
                right: EqSide::Single(r),
                comment: String::new(),
            });
        }
    }
    out
}

/// Applies a `ClassModification` whose arguments name symbols in `symbols`
/// (e.g. the modification carried by an `extends` clause, or one passed to
/// a component instance).
fn apply_class_modification(modification: &ClassModification, symbols: &mut IndexMap<String, Symbol>) -> Result<(), CompileError> {
    for arg in &modification.arguments {
        let ModArg::ElementModification(em) = arg else {
            continue;
        };
        let sym = symbols.get_mut(&em.component.name).ok_or_else(|| CompileError::ModifierTargetNotFound {
            target: em.component.to_string(),
        })?;
        for value in &em.modifications {
            apply_symbol_value(sym, value)?;
        }
    }
    Ok(())
}

/// Applies a symbol's own `class_modification` (e.g. `Real x(start=1)`)
/// to its own attributes, rather than to a sub-symbol table.
fn apply_self_modification(sym: &mut Symbol, modification: &ClassModification) -> Result<(), CompileError> {
    for arg in &modification.arguments {
        let ModArg::ElementModification(em) = arg else {
            continue;
        };
        set_attribute(sym, &em.component.name, em.modifications.first())?;
    }
    Ok(())
}

fn apply_symbol_value(sym: &mut Symbol, value: &ModValue) -> Result<(), CompileError> {
    match value {
        ModValue::Expr(e) => {
            sym.value = Some(e.clone());
            Ok(())
        }
        ModValue::ClassModification(cm) => {
            for arg in &cm.arguments {
                let ModArg::ElementModification(em) = arg else {
                    continue;
                };
                set_attribute(sym, &em.component.name, em.modifications.first())?;
            }
            Ok(())
        }
        ModValue::Array(_) => Ok(()),
    }
}

fn set_attribute(sym: &mut Symbol, attribute: &str, value: Option<&ModValue>) -> Result<(), CompileError> {
    let expr = match value {
        Some(ModValue::Expr(e)) => e.clone(),
        _ => {
            return Err(CompileError::ModifierTargetNotFound {
                target: attribute.to_string(),
            })
        }
    };
    match attribute {
        "start" => sym.start = Some(expr),
        "min" => sym.min = Some(expr),
        "max" => sym.max = Some(expr),
        "nominal" => sym.nominal = Some(expr),
        "fixed" => sym.fixed = Some(expr),
        "value" => sym.value = Some(expr),
        other => {
            return Err(CompileError::ModifierTargetNotFound {
                target: other.to_string(),
            })
        }
    }
    Ok(())
}
