//! IR expressions
//!
//! Expressions are side-effect-ordered trees: children are listed (and
//! traversed) in the order the target evaluates them.

use super::arena::{ClosureFieldId, DelegateFieldId, VarId};
use crate::tast::{Constant, DeclId, PrimitiveKind, TypeRef};
use serde::{Deserialize, Serialize};

/// Type tag on binary and unary operators. Selects the operator lowering:
/// 32-bit truncation, host Long methods, runtime equality, and so on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperandKind {
    Int,
    Long,
    Short,
    Byte,
    Char,
    Float,
    Double,
    Boolean,
    String,
    Reference,
}

impl From<PrimitiveKind> for OperandKind {
    fn from(kind: PrimitiveKind) -> Self {
        match kind {
            PrimitiveKind::Int => OperandKind::Int,
            PrimitiveKind::Long => OperandKind::Long,
            PrimitiveKind::Short => OperandKind::Short,
            PrimitiveKind::Byte => OperandKind::Byte,
            PrimitiveKind::Char => OperandKind::Char,
            PrimitiveKind::Float => OperandKind::Float,
            PrimitiveKind::Double => OperandKind::Double,
            PrimitiveKind::Boolean => OperandKind::Boolean,
        }
    }
}

impl OperandKind {
    pub fn of_type(ty: &TypeRef) -> Self {
        match ty {
            TypeRef::Primitive(kind) => (*kind).into(),
            TypeRef::String => OperandKind::String,
            _ => OperandKind::Reference,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            OperandKind::Int => "int",
            OperandKind::Long => "long",
            OperandKind::Short => "short",
            OperandKind::Byte => "byte",
            OperandKind::Char => "char",
            OperandKind::Float => "float",
            OperandKind::Double => "double",
            OperandKind::Boolean => "boolean",
            OperandKind::String => "string",
            OperandKind::Reference => "ref",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Ushr,
    /// Value equality (`equals` semantics for references)
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// Reference identity
    IdentityEq,
    IdentityNe,
    /// Three-way compare yielding a negative, zero or positive Int
    Compare,
    LogicalAnd,
    LogicalOr,
}

impl BinaryOp {
    pub fn name(self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::Div => "div",
            BinaryOp::Rem => "rem",
            BinaryOp::BitAnd => "bit-and",
            BinaryOp::BitOr => "bit-or",
            BinaryOp::BitXor => "bit-xor",
            BinaryOp::Shl => "shl",
            BinaryOp::Shr => "shr",
            BinaryOp::Ushr => "ushr",
            BinaryOp::Eq => "eq",
            BinaryOp::Ne => "ne",
            BinaryOp::Lt => "lt",
            BinaryOp::Le => "le",
            BinaryOp::Gt => "gt",
            BinaryOp::Ge => "ge",
            BinaryOp::IdentityEq => "id-eq",
            BinaryOp::IdentityNe => "id-ne",
            BinaryOp::Compare => "compare",
            BinaryOp::LogicalAnd => "and",
            BinaryOp::LogicalOr => "or",
        }
    }

    /// Relational operators a three-way compare can be folded into
    pub fn is_relational(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }

    /// The operator that gives the same result with operands swapped
    pub fn flipped(self) -> BinaryOp {
        match self {
            BinaryOp::Lt => BinaryOp::Gt,
            BinaryOp::Le => BinaryOp::Ge,
            BinaryOp::Gt => BinaryOp::Lt,
            BinaryOp::Ge => BinaryOp::Le,
            other => other,
        }
    }

    pub fn is_short_circuit(self) -> bool {
        matches!(self, BinaryOp::LogicalAnd | BinaryOp::LogicalOr)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    Not,
    Negate,
    BitNot,
    ArrayLength,
    Stringify,
    ArrayCopy,
}

impl UnaryOp {
    pub fn name(self) -> &'static str {
        match self {
            UnaryOp::Not => "not",
            UnaryOp::Negate => "neg",
            UnaryOp::BitNot => "bit-not",
            UnaryOp::ArrayLength => "array-length",
            UnaryOp::Stringify => "stringify",
            UnaryOp::ArrayCopy => "array-copy",
        }
    }
}

/// What a field access reads or writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IrField {
    /// Backing field of a property
    Backing(DeclId),
    /// Link from an inner-class instance to its enclosing instance; keyed by
    /// the inner class
    OuterClass(DeclId),
    Closure(ClosureFieldId),
    Delegate(DelegateFieldId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VarRef {
    pub var: VarId,
    /// The reference crosses the defining function's boundary
    pub free: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invocation {
    pub receiver: Option<Box<IrExpr>>,
    pub function: DeclId,
    pub args: Vec<IrExpr>,
    /// Dispatch through the receiver's prototype chain
    pub virtual_dispatch: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IrExpr {
    Constant(Constant),
    Null,
    Undefined,
    This,
    True,
    False,
    Var(VarRef),
    Field {
        receiver: Option<Box<IrExpr>>,
        field: IrField,
    },
    Invoke(Invocation),
    New {
        class: DeclId,
        constructor: DeclId,
        args: Vec<IrExpr>,
    },
    /// Function value; bound to its captures when rendered
    FunctionRef(DeclId),
    /// Call of a function value
    InvokeValue {
        callee: Box<IrExpr>,
        args: Vec<IrExpr>,
    },
    ObjectRef(DeclId),
    /// `this` of an enclosing class seen from a nested scope; resolved by
    /// closure lowering
    OuterThis(DeclId),
    ArrayOf(Vec<IrExpr>),
    Concat(Vec<IrExpr>),
    Conditional {
        condition: Box<IrExpr>,
        then_value: Box<IrExpr>,
        else_value: Box<IrExpr>,
    },
    Binary {
        op: BinaryOp,
        kind: OperandKind,
        lhs: Box<IrExpr>,
        rhs: Box<IrExpr>,
    },
    Unary {
        op: UnaryOp,
        kind: OperandKind,
        operand: Box<IrExpr>,
    },
    ArrayGet {
        array: Box<IrExpr>,
        index: Box<IrExpr>,
    },
    InstanceOf {
        value: Box<IrExpr>,
        ty: TypeRef,
    },
    Cast {
        value: Box<IrExpr>,
        ty: TypeRef,
        safe: bool,
    },
    PrimitiveCast {
        value: Box<IrExpr>,
        from: PrimitiveKind,
        to: PrimitiveKind,
    },
    ThrowNullPointer,
}

impl IrExpr {
    pub fn var(var: VarId) -> IrExpr {
        IrExpr::Var(VarRef { var, free: false })
    }

    pub fn int(value: i32) -> IrExpr {
        IrExpr::Constant(Constant::Int(value))
    }

    pub fn string(value: impl Into<String>) -> IrExpr {
        IrExpr::Constant(Constant::String(value.into()))
    }

    pub fn boolean(value: bool) -> IrExpr {
        if value {
            IrExpr::True
        } else {
            IrExpr::False
        }
    }

    pub fn binary(op: BinaryOp, kind: OperandKind, lhs: IrExpr, rhs: IrExpr) -> IrExpr {
        IrExpr::Binary {
            op,
            kind,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn unary(op: UnaryOp, kind: OperandKind, operand: IrExpr) -> IrExpr {
        IrExpr::Unary {
            op,
            kind,
            operand: Box::new(operand),
        }
    }

    pub fn not(operand: IrExpr) -> IrExpr {
        IrExpr::unary(UnaryOp::Not, OperandKind::Boolean, operand)
    }

    pub fn field(receiver: Option<IrExpr>, field: IrField) -> IrExpr {
        IrExpr::Field {
            receiver: receiver.map(Box::new),
            field,
        }
    }

    pub fn invoke(
        receiver: Option<IrExpr>,
        function: DeclId,
        args: Vec<IrExpr>,
        virtual_dispatch: bool,
    ) -> IrExpr {
        IrExpr::Invoke(Invocation {
            receiver: receiver.map(Box::new),
            function,
            args,
            virtual_dispatch,
        })
    }

    pub fn conditional(condition: IrExpr, then_value: IrExpr, else_value: IrExpr) -> IrExpr {
        IrExpr::Conditional {
            condition: Box::new(condition),
            then_value: Box::new(then_value),
            else_value: Box::new(else_value),
        }
    }

    /// `value != null`, with host loose equality so `undefined` also fails
    pub fn is_not_null(value: IrExpr) -> IrExpr {
        IrExpr::binary(BinaryOp::Ne, OperandKind::Reference, value, IrExpr::Null)
    }

    pub fn is_null(value: IrExpr) -> IrExpr {
        IrExpr::binary(BinaryOp::Eq, OperandKind::Reference, value, IrExpr::Null)
    }

    pub fn as_var(&self) -> Option<VarRef> {
        match self {
            IrExpr::Var(var_ref) => Some(*var_ref),
            _ => None,
        }
    }

    /// Numeric zero of any kind
    pub fn is_zero(&self) -> bool {
        match self {
            IrExpr::Constant(Constant::Int(0)) | IrExpr::Constant(Constant::Long(0)) => true,
            IrExpr::Constant(Constant::Double(v)) => *v == 0.0,
            IrExpr::Constant(Constant::Float(v)) => *v == 0.0,
            _ => false,
        }
    }

    /// Constants and singletons: evaluation has no effect and no dependency
    pub fn is_literal(&self) -> bool {
        matches!(
            self,
            IrExpr::Constant(_)
                | IrExpr::Null
                | IrExpr::Undefined
                | IrExpr::True
                | IrExpr::False
                | IrExpr::This
        )
    }
}
