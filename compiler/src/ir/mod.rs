//! Intermediate Representation (IR) for the kjsc translator
//!
//! The IR is a structured tree: declarations own statement lists, statements
//! own expressions, and control flow is expressed with labeled loops and
//! blocks rather than basic blocks. It is designed to be:
//! - Close to the target: every construct has a direct ES5 rendering
//! - Explicit about evaluation order and side effects
//! - Cheap to rewrite in place
//!
//! Pipeline: [`tast_to_ir`] generates the IR, [`closure_lowering`] and
//! [`delegation`] make captures and forwarding explicit, [`intrinsics`]
//! replaces built-in calls by operators and [`optimization`] runs the
//! rewriting passes to a fixpoint.

pub mod arena;
pub mod closure_lowering;
pub mod compare_elimination;
pub mod context;
pub mod decls;
pub mod delegation;
pub mod dump;
pub mod expr;
pub mod intrinsics;
pub mod optimization;
pub mod stmt;
pub mod tast_to_ir;
pub mod temp_elimination;
pub mod validation;
pub mod visit;

pub use arena::{
    Arena, ClassId, ClosureFieldId, DelegateFieldId, FunctionId, IrFileId, LabelId, PropertyId,
    VarId,
};
pub use decls::{
    Capture, ClosureField, Container, DeclMap, DelegateField, IrClass, IrDecl, IrDelegation,
    IrFile, IrFunction, IrModule, IrProperty, Label, Variable, VariableKind,
};
pub use dump::{dump_expr, dump_module, dump_stmt, SexpDumper};
pub use expr::{BinaryOp, Invocation, IrExpr, IrField, OperandKind, UnaryOp, VarRef};
pub use stmt::{CatchClause, IrStmt, StmtKind, SwitchCase};

/// IR version for compatibility checking
pub const IR_VERSION: u32 = 1;
