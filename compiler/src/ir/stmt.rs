//! IR statements

use super::arena::{LabelId, VarId};
use super::expr::IrExpr;
use crate::tast::{DeclId, SourceLocation, TypeRef};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IrStmt {
    pub kind: StmtKind,
    /// Source position active when the statement was emitted
    pub location: SourceLocation,
}

impl IrStmt {
    pub fn new(kind: StmtKind, location: SourceLocation) -> Self {
        Self { kind, location }
    }

    pub fn assign(target: IrExpr, value: IrExpr, location: SourceLocation) -> Self {
        Self::new(
            StmtKind::Assign {
                target: Some(target),
                value,
            },
            location,
        )
    }

    pub fn eval(value: IrExpr, location: SourceLocation) -> Self {
        Self::new(StmtKind::Assign { target: None, value }, location)
    }

    /// Control never reaches the statement after this one
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.kind,
            StmtKind::Return { .. } | StmtKind::Throw(_) | StmtKind::Break(_) | StmtKind::Continue(_)
        )
    }

    /// Label of a construct that can be targeted by break/continue
    pub fn label(&self) -> Option<LabelId> {
        match &self.kind {
            StmtKind::Block { label, .. } => *label,
            StmtKind::While { label, .. }
            | StmtKind::DoWhile { label, .. }
            | StmtKind::For { label, .. }
            | StmtKind::Switch { label, .. } => Some(*label),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwitchCase {
    pub values: Vec<IrExpr>,
    pub body: Vec<IrStmt>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatchClause {
    pub var: VarId,
    /// Absent filter catches everything
    pub filter: Option<TypeRef>,
    pub body: Vec<IrStmt>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StmtKind {
    /// Absent target evaluates the value for its side effects only
    Assign {
        target: Option<IrExpr>,
        value: IrExpr,
    },
    Block {
        label: Option<LabelId>,
        body: Vec<IrStmt>,
    },
    If {
        condition: IrExpr,
        then_body: Vec<IrStmt>,
        else_body: Vec<IrStmt>,
    },
    While {
        label: LabelId,
        condition: IrExpr,
        body: Vec<IrStmt>,
    },
    DoWhile {
        label: LabelId,
        body: Vec<IrStmt>,
        condition: IrExpr,
    },
    For {
        label: LabelId,
        pre: Vec<IrStmt>,
        condition: Option<IrExpr>,
        post: Vec<IrStmt>,
        body: Vec<IrStmt>,
    },
    Switch {
        label: LabelId,
        value: IrExpr,
        cases: Vec<SwitchCase>,
        default: Option<Vec<IrStmt>>,
    },
    Try {
        body: Vec<IrStmt>,
        catches: Vec<CatchClause>,
        finally: Option<Vec<IrStmt>>,
    },
    Return {
        value: Option<IrExpr>,
        /// Function being returned from
        target: DeclId,
    },
    Throw(IrExpr),
    Break(LabelId),
    Continue(LabelId),
}
