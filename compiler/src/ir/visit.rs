//! Traversal of IR trees
//!
//! Two families of free functions: a read-only fold for analysis and a
//! rewriting transform for in-place mutation. Both visit children in target
//! evaluation order.

use super::expr::{Invocation, IrExpr};
use super::stmt::{IrStmt, StmtKind};

/// A node seen by [`fold_stmts`]
#[derive(Debug, Clone, Copy)]
pub enum Node<'a> {
    Stmt(&'a IrStmt),
    Expr(&'a IrExpr),
}

/// Calls `f` on each direct child expression, in evaluation order
pub fn for_each_child<'a>(expr: &'a IrExpr, f: &mut dyn FnMut(&'a IrExpr)) {
    match expr {
        IrExpr::Constant(_)
        | IrExpr::Null
        | IrExpr::Undefined
        | IrExpr::This
        | IrExpr::True
        | IrExpr::False
        | IrExpr::Var(_)
        | IrExpr::FunctionRef(_)
        | IrExpr::ObjectRef(_)
        | IrExpr::OuterThis(_)
        | IrExpr::ThrowNullPointer => {}
        IrExpr::Field { receiver, .. } => {
            if let Some(receiver) = receiver {
                f(receiver);
            }
        }
        IrExpr::Invoke(Invocation { receiver, args, .. }) => {
            if let Some(receiver) = receiver {
                f(receiver);
            }
            args.iter().for_each(|a| f(a));
        }
        IrExpr::New { args, .. } | IrExpr::ArrayOf(args) | IrExpr::Concat(args) => {
            args.iter().for_each(|a| f(a));
        }
        IrExpr::InvokeValue { callee, args } => {
            f(callee);
            args.iter().for_each(|a| f(a));
        }
        IrExpr::Conditional {
            condition,
            then_value,
            else_value,
        } => {
            f(condition);
            f(then_value);
            f(else_value);
        }
        IrExpr::Binary { lhs, rhs, .. } => {
            f(lhs);
            f(rhs);
        }
        IrExpr::ArrayGet { array, index } => {
            f(array);
            f(index);
        }
        IrExpr::Unary { operand: value, .. }
        | IrExpr::InstanceOf { value, .. }
        | IrExpr::Cast { value, .. }
        | IrExpr::PrimitiveCast { value, .. } => f(value),
    }
}

/// Mutable counterpart of [`for_each_child`]
pub fn for_each_child_mut(expr: &mut IrExpr, f: &mut dyn FnMut(&mut IrExpr)) {
    match expr {
        IrExpr::Constant(_)
        | IrExpr::Null
        | IrExpr::Undefined
        | IrExpr::This
        | IrExpr::True
        | IrExpr::False
        | IrExpr::Var(_)
        | IrExpr::FunctionRef(_)
        | IrExpr::ObjectRef(_)
        | IrExpr::OuterThis(_)
        | IrExpr::ThrowNullPointer => {}
        IrExpr::Field { receiver, .. } => {
            if let Some(receiver) = receiver {
                f(receiver);
            }
        }
        IrExpr::Invoke(Invocation { receiver, args, .. }) => {
            if let Some(receiver) = receiver {
                f(receiver);
            }
            args.iter_mut().for_each(|a| f(a));
        }
        IrExpr::New { args, .. } | IrExpr::ArrayOf(args) | IrExpr::Concat(args) => {
            args.iter_mut().for_each(|a| f(a));
        }
        IrExpr::InvokeValue { callee, args } => {
            f(callee);
            args.iter_mut().for_each(|a| f(a));
        }
        IrExpr::Conditional {
            condition,
            then_value,
            else_value,
        } => {
            f(condition);
            f(then_value);
            f(else_value);
        }
        IrExpr::Binary { lhs, rhs, .. } => {
            f(lhs);
            f(rhs);
        }
        IrExpr::ArrayGet { array, index } => {
            f(array);
            f(index);
        }
        IrExpr::Unary { operand: value, .. }
        | IrExpr::InstanceOf { value, .. }
        | IrExpr::Cast { value, .. }
        | IrExpr::PrimitiveCast { value, .. } => f(value),
    }
}

/// Expressions held directly by a statement (not by nested statements), in
/// evaluation order. An assignment target is evaluated before its value.
pub fn stmt_exprs(stmt: &IrStmt) -> Vec<&IrExpr> {
    match &stmt.kind {
        StmtKind::Assign { target, value } => target.iter().chain(std::iter::once(value)).collect(),
        StmtKind::If { condition, .. }
        | StmtKind::While { condition, .. }
        | StmtKind::DoWhile { condition, .. } => vec![condition],
        StmtKind::For { condition, .. } => condition.iter().collect(),
        StmtKind::Switch { value, cases, .. } => std::iter::once(value)
            .chain(cases.iter().flat_map(|c| c.values.iter()))
            .collect(),
        StmtKind::Return { value, .. } => value.iter().collect(),
        StmtKind::Throw(value) => vec![value],
        StmtKind::Block { .. } | StmtKind::Try { .. } | StmtKind::Break(_) | StmtKind::Continue(_) => {
            Vec::new()
        }
    }
}

/// Mutable counterpart of [`stmt_exprs`]
pub fn stmt_exprs_mut(stmt: &mut IrStmt) -> Vec<&mut IrExpr> {
    match &mut stmt.kind {
        StmtKind::Assign { target, value } => target.iter_mut().chain(std::iter::once(value)).collect(),
        StmtKind::If { condition, .. }
        | StmtKind::While { condition, .. }
        | StmtKind::DoWhile { condition, .. } => vec![condition],
        StmtKind::For { condition, .. } => condition.iter_mut().collect(),
        StmtKind::Switch { value, cases, .. } => std::iter::once(value)
            .chain(cases.iter_mut().flat_map(|c| c.values.iter_mut()))
            .collect(),
        StmtKind::Return { value, .. } => value.iter_mut().collect(),
        StmtKind::Throw(value) => vec![value],
        StmtKind::Block { .. } | StmtKind::Try { .. } | StmtKind::Break(_) | StmtKind::Continue(_) => {
            Vec::new()
        }
    }
}

/// Nested statement lists of a statement, in execution order
pub fn child_lists(stmt: &IrStmt) -> Vec<&Vec<IrStmt>> {
    match &stmt.kind {
        StmtKind::Block { body, .. } | StmtKind::While { body, .. } | StmtKind::DoWhile { body, .. } => {
            vec![body]
        }
        StmtKind::If {
            then_body,
            else_body,
            ..
        } => vec![then_body, else_body],
        StmtKind::For { pre, post, body, .. } => vec![pre, body, post],
        StmtKind::Switch { cases, default, .. } => cases
            .iter()
            .map(|c| &c.body)
            .chain(default.iter())
            .collect(),
        StmtKind::Try {
            body,
            catches,
            finally,
        } => std::iter::once(body)
            .chain(catches.iter().map(|c| &c.body))
            .chain(finally.iter())
            .collect(),
        _ => Vec::new(),
    }
}

/// Mutable counterpart of [`child_lists`]
pub fn child_lists_mut(stmt: &mut IrStmt) -> Vec<&mut Vec<IrStmt>> {
    match &mut stmt.kind {
        StmtKind::Block { body, .. } | StmtKind::While { body, .. } | StmtKind::DoWhile { body, .. } => {
            vec![body]
        }
        StmtKind::If {
            then_body,
            else_body,
            ..
        } => vec![then_body, else_body],
        StmtKind::For { pre, post, body, .. } => vec![pre, body, post],
        StmtKind::Switch { cases, default, .. } => cases
            .iter_mut()
            .map(|c| &mut c.body)
            .chain(default.iter_mut())
            .collect(),
        StmtKind::Try {
            body,
            catches,
            finally,
        } => std::iter::once(body)
            .chain(catches.iter_mut().map(|c| &mut c.body))
            .chain(finally.iter_mut())
            .collect(),
        _ => Vec::new(),
    }
}

/// Pre-order fold over an expression tree
pub fn fold_expr<'a, A>(expr: &'a IrExpr, acc: A, f: &mut impl FnMut(A, &'a IrExpr) -> A) -> A {
    let mut acc = f(acc, expr);
    let mut children = Vec::new();
    for_each_child(expr, &mut |child| children.push(child));
    for child in children {
        acc = fold_expr(child, acc, f);
    }
    acc
}

/// Pre-order fold over statements and every expression they contain
pub fn fold_stmts<'a, A>(stmts: &'a [IrStmt], acc: A, f: &mut impl FnMut(A, Node<'a>) -> A) -> A {
    let mut acc = acc;
    for stmt in stmts {
        acc = f(acc, Node::Stmt(stmt));
        let exprs = stmt_exprs(stmt);
        // Expressions of a loop condition/for header come before bodies,
        // except do-while whose condition follows the body
        let condition_last = matches!(stmt.kind, StmtKind::DoWhile { .. });
        if !condition_last {
            for expr in exprs.iter().copied() {
                acc = fold_expr(expr, acc, &mut |a, e| f(a, Node::Expr(e)));
            }
        }
        for list in child_lists(stmt) {
            acc = fold_stmts(list, acc, f);
        }
        if condition_last {
            for expr in exprs.iter().copied() {
                acc = fold_expr(expr, acc, &mut |a, e| f(a, Node::Expr(e)));
            }
        }
    }
    acc
}

/// Calls `f` on every expression in the statements, pre-order
pub fn visit_exprs<'a>(stmts: &'a [IrStmt], f: &mut impl FnMut(&'a IrExpr)) {
    fold_stmts(stmts, (), &mut |(), node| {
        if let Node::Expr(expr) = node {
            f(expr);
        }
    });
}

/// Post-order rewrite: children are transformed first, then `f` maps the
/// node to its replacement (or returns it unchanged)
pub fn transform_expr(mut expr: IrExpr, f: &mut impl FnMut(IrExpr) -> IrExpr) -> IrExpr {
    for_each_child_mut(&mut expr, &mut |child| {
        let taken = std::mem::replace(child, IrExpr::Undefined);
        *child = transform_expr(taken, f);
    });
    f(expr)
}

/// [`transform_expr`] applied through a mutable reference
pub fn transform_expr_in_place(expr: &mut IrExpr, f: &mut impl FnMut(IrExpr) -> IrExpr) {
    let taken = std::mem::replace(expr, IrExpr::Undefined);
    *expr = transform_expr(taken, f);
}

/// Rewrites every expression in the statements, including nested bodies
pub fn transform_stmts(stmts: &mut [IrStmt], f: &mut impl FnMut(IrExpr) -> IrExpr) {
    for stmt in stmts.iter_mut() {
        for expr in stmt_exprs_mut(stmt) {
            transform_expr_in_place(expr, f);
        }
        for list in child_lists_mut(stmt) {
            transform_stmts(list, f);
        }
    }
}

/// Calls `f` on each statement list, innermost lists first
pub fn for_each_list_mut(stmts: &mut Vec<IrStmt>, f: &mut impl FnMut(&mut Vec<IrStmt>)) {
    for stmt in stmts.iter_mut() {
        for list in child_lists_mut(stmt) {
            for_each_list_mut(list, f);
        }
    }
    f(stmts);
}

/// How much an expression's evaluation interacts with program state,
/// ordered so that `max` combines children
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Effect {
    /// Same value anywhere; no observable action
    Pure,
    /// Depends on mutable state but changes nothing
    Reads,
    /// May write state, call user code or throw
    Effects,
}

/// Effect of the node itself, children excluded
pub fn own_effect(expr: &IrExpr) -> Effect {
    use super::expr::{BinaryOp, OperandKind, UnaryOp};

    match expr {
        IrExpr::Constant(_)
        | IrExpr::Null
        | IrExpr::Undefined
        | IrExpr::This
        | IrExpr::True
        | IrExpr::False
        | IrExpr::FunctionRef(_)
        | IrExpr::OuterThis(_)
        | IrExpr::ArrayOf(_)
        | IrExpr::Conditional { .. }
        | IrExpr::PrimitiveCast { .. } => Effect::Pure,
        IrExpr::Var(_) | IrExpr::Field { .. } | IrExpr::ArrayGet { .. } | IrExpr::InstanceOf { .. } => {
            Effect::Reads
        }
        // Singleton access runs the object initializer on first use;
        // concatenation calls toString on its parts
        IrExpr::Invoke(_)
        | IrExpr::New { .. }
        | IrExpr::InvokeValue { .. }
        | IrExpr::ObjectRef(_)
        | IrExpr::Concat(_)
        | IrExpr::ThrowNullPointer => Effect::Effects,
        IrExpr::Cast { safe, .. } => {
            if *safe {
                Effect::Pure
            } else {
                Effect::Effects
            }
        }
        IrExpr::Binary { op, kind, lhs, rhs } => match (op, kind) {
            (BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Compare, OperandKind::Reference)
                if !matches!(**lhs, IrExpr::Null) && !matches!(**rhs, IrExpr::Null) =>
            {
                Effect::Effects
            }
            (BinaryOp::Div | BinaryOp::Rem, OperandKind::Long) => Effect::Effects,
            _ => Effect::Pure,
        },
        IrExpr::Unary { op, kind, .. } => match (op, kind) {
            (UnaryOp::Stringify, OperandKind::Reference) => Effect::Effects,
            (UnaryOp::ArrayLength | UnaryOp::ArrayCopy, _) => Effect::Reads,
            _ => Effect::Pure,
        },
    }
}

/// Effect of evaluating `expr`, children included
pub fn effect_of(expr: &IrExpr) -> Effect {
    let own = own_effect(expr);
    if own == Effect::Effects {
        return own;
    }
    let mut effect = own;
    for_each_child(expr, &mut |child| {
        if effect < Effect::Effects {
            effect = effect.max(effect_of(child));
        }
    });
    effect
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::arena::VarId;
    use crate::ir::expr::{BinaryOp, OperandKind};
    use crate::tast::{DeclId, SourceLocation};

    fn loc() -> SourceLocation {
        SourceLocation::unknown()
    }

    #[test]
    fn test_fold_counts_in_evaluation_order() {
        let a = VarId::from_raw(0);
        let b = VarId::from_raw(1);
        let expr = IrExpr::invoke(
            Some(IrExpr::var(a)),
            DeclId::from_raw(9),
            vec![IrExpr::var(b), IrExpr::int(1)],
            true,
        );
        let seen = fold_expr(&expr, Vec::new(), &mut |mut acc, e| {
            if let Some(v) = e.as_var() {
                acc.push(v.var);
            }
            acc
        });
        assert_eq!(seen, vec![a, b]);
    }

    #[test]
    fn test_effect_of_combines_children() {
        let x = VarId::from_raw(1);
        assert_eq!(effect_of(&IrExpr::int(1)), Effect::Pure);
        assert_eq!(
            effect_of(&IrExpr::binary(BinaryOp::Add, OperandKind::Int, IrExpr::var(x), IrExpr::int(1))),
            Effect::Reads
        );
        let call = IrExpr::invoke(None, DeclId::from_raw(2), Vec::new(), false);
        assert_eq!(
            effect_of(&IrExpr::conditional(IrExpr::True, call, IrExpr::Null)),
            Effect::Effects
        );
        assert_eq!(effect_of(&IrExpr::is_null(IrExpr::var(x))), Effect::Reads);
    }

    #[test]
    fn test_transform_replaces_nested_nodes() {
        let x = VarId::from_raw(3);
        let mut stmts = vec![IrStmt::new(
            StmtKind::If {
                condition: IrExpr::True,
                then_body: vec![IrStmt::eval(
                    IrExpr::binary(BinaryOp::Add, OperandKind::Int, IrExpr::var(x), IrExpr::int(2)),
                    loc(),
                )],
                else_body: Vec::new(),
            },
            loc(),
        )];
        transform_stmts(&mut stmts, &mut |e| match e {
            IrExpr::Var(v) if v.var == x => IrExpr::int(40),
            other => other,
        });

        let mut constants = 0;
        visit_exprs(&stmts, &mut |e| {
            if matches!(e, IrExpr::Constant(_)) {
                constants += 1;
            }
        });
        assert_eq!(constants, 2);
    }
}
