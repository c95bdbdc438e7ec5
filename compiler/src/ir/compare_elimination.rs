//! Relational-Compare Elimination
//!
//! Three-way compares tested against zero become direct relational
//! operators on the compared values:
//!
//! ```text
//! (lt:int (compare:long a b) (const int 0))  =>  (lt:long a b)
//! (lt:int (const int 0) (compare:long a b))  =>  (gt:long a b)
//! ```
//!
//! The operand kind of the compare is kept, so the renderer still picks the
//! right comparison for strings, Longs and references.

use super::arena::FunctionId;
use super::decls::IrModule;
use super::expr::{BinaryOp, IrExpr};
use super::optimization::{OptimizationPass, OptimizationResult, PassId};
use super::stmt::IrStmt;
use super::visit::transform_stmts;

/// Rewrite one node; anything but a relational test of a compare against
/// zero comes back unchanged
pub fn fold_compare(expr: IrExpr) -> (IrExpr, bool) {
    let IrExpr::Binary { op, kind, lhs, rhs } = expr else {
        return (expr, false);
    };
    if !op.is_relational() {
        return (IrExpr::Binary { op, kind, lhs, rhs }, false);
    }
    match (*lhs, *rhs) {
        (
            IrExpr::Binary {
                op: BinaryOp::Compare,
                kind: compare_kind,
                lhs: a,
                rhs: b,
            },
            zero,
        ) if zero.is_zero() => (IrExpr::binary(op, compare_kind, *a, *b), true),
        (
            zero,
            IrExpr::Binary {
                op: BinaryOp::Compare,
                kind: compare_kind,
                lhs: a,
                rhs: b,
            },
        ) if zero.is_zero() => (IrExpr::binary(op.flipped(), compare_kind, *a, *b), true),
        (lhs, rhs) => (IrExpr::binary(op, kind, lhs, rhs), false),
    }
}

#[derive(Debug, Default)]
pub struct CompareEliminationPass;

impl CompareEliminationPass {
    pub fn new() -> Self {
        Self
    }
}

impl OptimizationPass for CompareEliminationPass {
    fn id(&self) -> PassId {
        PassId::CompareElimination
    }

    fn name(&self) -> &'static str {
        "compare-elimination"
    }

    fn run_on_function(&mut self, _module: &mut IrModule, _function: FunctionId, body: &mut Vec<IrStmt>) -> OptimizationResult {
        let mut folded = 0;
        transform_stmts(body, &mut |expr| {
            let (expr, changed) = fold_compare(expr);
            if changed {
                folded += 1;
            }
            expr
        });
        if folded == 0 {
            return OptimizationResult::unchanged();
        }
        let mut result = OptimizationResult::changed();
        result.stats.insert("compares_folded".to_string(), folded);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::arena::VarId;
    use crate::ir::expr::OperandKind;
    use crate::tast::Constant;

    fn compare(kind: OperandKind) -> IrExpr {
        IrExpr::binary(
            BinaryOp::Compare,
            kind,
            IrExpr::var(VarId::from_raw(0)),
            IrExpr::var(VarId::from_raw(1)),
        )
    }

    #[test]
    fn test_compare_on_left() {
        for op in [BinaryOp::Eq, BinaryOp::Ne, BinaryOp::Lt, BinaryOp::Le, BinaryOp::Gt, BinaryOp::Ge] {
            let expr = IrExpr::binary(op, OperandKind::Int, compare(OperandKind::Long), IrExpr::int(0));
            let (folded, changed) = fold_compare(expr);
            assert!(changed);
            assert_eq!(
                folded,
                IrExpr::binary(op, OperandKind::Long, IrExpr::var(VarId::from_raw(0)), IrExpr::var(VarId::from_raw(1)))
            );
        }
    }

    #[test]
    fn test_compare_on_right_flips() {
        let cases = [
            (BinaryOp::Eq, BinaryOp::Eq),
            (BinaryOp::Ne, BinaryOp::Ne),
            (BinaryOp::Lt, BinaryOp::Gt),
            (BinaryOp::Le, BinaryOp::Ge),
            (BinaryOp::Gt, BinaryOp::Lt),
            (BinaryOp::Ge, BinaryOp::Le),
        ];
        for (op, expected) in cases {
            let expr = IrExpr::binary(op, OperandKind::Int, IrExpr::int(0), compare(OperandKind::String));
            let (folded, changed) = fold_compare(expr);
            assert!(changed);
            assert_eq!(
                folded,
                IrExpr::binary(
                    expected,
                    OperandKind::String,
                    IrExpr::var(VarId::from_raw(0)),
                    IrExpr::var(VarId::from_raw(1))
                )
            );
        }
    }

    #[test]
    fn test_other_shapes_untouched() {
        let shapes = vec![
            IrExpr::binary(BinaryOp::Lt, OperandKind::Int, compare(OperandKind::Int), IrExpr::int(1)),
            IrExpr::binary(BinaryOp::Add, OperandKind::Int, compare(OperandKind::Int), IrExpr::int(0)),
            IrExpr::binary(
                BinaryOp::Lt,
                OperandKind::Int,
                IrExpr::var(VarId::from_raw(3)),
                IrExpr::Constant(Constant::Long(0)),
            ),
            compare(OperandKind::Int),
        ];
        for shape in shapes {
            let (folded, changed) = fold_compare(shape.clone());
            assert!(!changed);
            assert_eq!(folded, shape);
        }
    }
}
