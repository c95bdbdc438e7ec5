//! Target AST for ES5 output
//!
//! The renderer builds these nodes from finished IR; [`super::js_printer`]
//! turns them into text. Nodes carry no source positions and no knowledge
//! of the IR: every name in here is already allocated.

// ---------------------------------------------------------------------------
// Operators
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JsBinaryOp {
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
    /// `==`, loose; only used against `null`
    LooseEq,
    LooseNe,
    StrictEq,
    StrictNe,
    Lt,
    Le,
    Gt,
    Ge,
    InstanceOf,
    And,
    Or,
}

impl JsBinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            JsBinaryOp::Add => "+",
            JsBinaryOp::Sub => "-",
            JsBinaryOp::Mul => "*",
            JsBinaryOp::Div => "/",
            JsBinaryOp::Rem => "%",
            JsBinaryOp::BitAnd => "&",
            JsBinaryOp::BitOr => "|",
            JsBinaryOp::BitXor => "^",
            JsBinaryOp::Shl => "<<",
            JsBinaryOp::Shr => ">>",
            JsBinaryOp::Ushr => ">>>",
            JsBinaryOp::LooseEq => "==",
            JsBinaryOp::LooseNe => "!=",
            JsBinaryOp::StrictEq => "===",
            JsBinaryOp::StrictNe => "!==",
            JsBinaryOp::Lt => "<",
            JsBinaryOp::Le => "<=",
            JsBinaryOp::Gt => ">",
            JsBinaryOp::Ge => ">=",
            JsBinaryOp::InstanceOf => "instanceof",
            JsBinaryOp::And => "&&",
            JsBinaryOp::Or => "||",
        }
    }

    /// Binding strength; higher binds tighter
    pub fn precedence(self) -> u8 {
        match self {
            JsBinaryOp::Or => 4,
            JsBinaryOp::And => 5,
            JsBinaryOp::BitOr => 6,
            JsBinaryOp::BitXor => 7,
            JsBinaryOp::BitAnd => 8,
            JsBinaryOp::LooseEq | JsBinaryOp::LooseNe | JsBinaryOp::StrictEq | JsBinaryOp::StrictNe => 9,
            JsBinaryOp::Lt | JsBinaryOp::Le | JsBinaryOp::Gt | JsBinaryOp::Ge | JsBinaryOp::InstanceOf => 10,
            JsBinaryOp::Shl | JsBinaryOp::Shr | JsBinaryOp::Ushr => 11,
            JsBinaryOp::Add | JsBinaryOp::Sub => 12,
            JsBinaryOp::Mul | JsBinaryOp::Div | JsBinaryOp::Rem => 13,
        }
    }

    pub fn from_symbol(symbol: &str) -> Option<Self> {
        Some(match symbol {
            "+" => JsBinaryOp::Add,
            "-" => JsBinaryOp::Sub,
            "*" => JsBinaryOp::Mul,
            "/" => JsBinaryOp::Div,
            "%" => JsBinaryOp::Rem,
            "&" => JsBinaryOp::BitAnd,
            "|" => JsBinaryOp::BitOr,
            "^" => JsBinaryOp::BitXor,
            "<<" => JsBinaryOp::Shl,
            ">>" => JsBinaryOp::Shr,
            ">>>" => JsBinaryOp::Ushr,
            "==" => JsBinaryOp::LooseEq,
            "!=" => JsBinaryOp::LooseNe,
            "===" => JsBinaryOp::StrictEq,
            "!==" => JsBinaryOp::StrictNe,
            "<" => JsBinaryOp::Lt,
            "<=" => JsBinaryOp::Le,
            ">" => JsBinaryOp::Gt,
            ">=" => JsBinaryOp::Ge,
            "instanceof" => JsBinaryOp::InstanceOf,
            "&&" => JsBinaryOp::And,
            "||" => JsBinaryOp::Or,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JsUnaryOp {
    Not,
    Neg,
    Plus,
    BitNot,
    TypeOf,
    Void,
}

impl JsUnaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            JsUnaryOp::Not => "!",
            JsUnaryOp::Neg => "-",
            JsUnaryOp::Plus => "+",
            JsUnaryOp::BitNot => "~",
            JsUnaryOp::TypeOf => "typeof ",
            JsUnaryOp::Void => "void ",
        }
    }
}

// ---------------------------------------------------------------------------
// Expressions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum JsExpr {
    Number(f64),
    String(String),
    Bool(bool),
    Null,
    /// `void 0`
    Undefined,
    Ident(String),
    This,
    /// `object.property`
    Member {
        object: Box<JsExpr>,
        property: String,
    },
    /// `object[index]`
    Index {
        object: Box<JsExpr>,
        index: Box<JsExpr>,
    },
    Call {
        callee: Box<JsExpr>,
        args: Vec<JsExpr>,
    },
    New {
        callee: Box<JsExpr>,
        args: Vec<JsExpr>,
    },
    Binary {
        op: JsBinaryOp,
        lhs: Box<JsExpr>,
        rhs: Box<JsExpr>,
    },
    Unary {
        op: JsUnaryOp,
        operand: Box<JsExpr>,
    },
    /// Assignment in expression position
    Assign {
        target: Box<JsExpr>,
        value: Box<JsExpr>,
    },
    Conditional {
        condition: Box<JsExpr>,
        then_value: Box<JsExpr>,
        else_value: Box<JsExpr>,
    },
    /// Comma expression
    Sequence(Vec<JsExpr>),
    Array(Vec<JsExpr>),
    Object(Vec<(String, JsExpr)>),
    Function(Box<JsFunction>),
}

impl JsExpr {
    pub fn ident(name: impl Into<String>) -> JsExpr {
        JsExpr::Ident(name.into())
    }

    pub fn string(value: impl Into<String>) -> JsExpr {
        JsExpr::String(value.into())
    }

    pub fn member(object: JsExpr, property: impl Into<String>) -> JsExpr {
        JsExpr::Member {
            object: Box::new(object),
            property: property.into(),
        }
    }

    /// Member chain from a dotted path: `a.b.c`
    pub fn path(dotted: &str) -> JsExpr {
        let mut parts = dotted.split('.');
        let head = JsExpr::ident(parts.next().unwrap_or_default());
        parts.fold(head, JsExpr::member)
    }

    pub fn index(object: JsExpr, index: JsExpr) -> JsExpr {
        JsExpr::Index {
            object: Box::new(object),
            index: Box::new(index),
        }
    }

    pub fn call(callee: JsExpr, args: Vec<JsExpr>) -> JsExpr {
        JsExpr::Call {
            callee: Box::new(callee),
            args,
        }
    }

    /// `object.method(args)`
    pub fn method(object: JsExpr, method: &str, args: Vec<JsExpr>) -> JsExpr {
        JsExpr::call(JsExpr::member(object, method), args)
    }

    pub fn new_object(callee: JsExpr, args: Vec<JsExpr>) -> JsExpr {
        JsExpr::New {
            callee: Box::new(callee),
            args,
        }
    }

    pub fn binary(op: JsBinaryOp, lhs: JsExpr, rhs: JsExpr) -> JsExpr {
        JsExpr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn unary(op: JsUnaryOp, operand: JsExpr) -> JsExpr {
        JsExpr::Unary {
            op,
            operand: Box::new(operand),
        }
    }

    pub fn not(operand: JsExpr) -> JsExpr {
        JsExpr::unary(JsUnaryOp::Not, operand)
    }

    pub fn assign(target: JsExpr, value: JsExpr) -> JsExpr {
        JsExpr::Assign {
            target: Box::new(target),
            value: Box::new(value),
        }
    }

    pub fn conditional(condition: JsExpr, then_value: JsExpr, else_value: JsExpr) -> JsExpr {
        JsExpr::Conditional {
            condition: Box::new(condition),
            then_value: Box::new(then_value),
            else_value: Box::new(else_value),
        }
    }

    /// `value | 0`
    pub fn to_int32(value: JsExpr) -> JsExpr {
        JsExpr::binary(JsBinaryOp::BitOr, value, JsExpr::Number(0.0))
    }

    /// Evaluating the node twice is unobservable and cheap
    pub fn is_simple(&self) -> bool {
        matches!(
            self,
            JsExpr::Number(_)
                | JsExpr::String(_)
                | JsExpr::Bool(_)
                | JsExpr::Null
                | JsExpr::Undefined
                | JsExpr::Ident(_)
                | JsExpr::This
        )
    }

    /// Binding strength of the node as an operand
    pub fn precedence(&self) -> u8 {
        match self {
            JsExpr::Sequence(_) => 1,
            JsExpr::Assign { .. } => 2,
            JsExpr::Conditional { .. } => 3,
            JsExpr::Binary { op, .. } => op.precedence(),
            JsExpr::Unary { .. } => 15,
            JsExpr::Call { .. } | JsExpr::New { .. } | JsExpr::Member { .. } | JsExpr::Index { .. } => 18,
            JsExpr::Number(v) if *v < 0.0 || (*v == 0.0 && v.is_sign_negative()) => 15,
            _ => 20,
        }
    }
}

// ---------------------------------------------------------------------------
// Statements
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct JsVarDecl {
    pub name: String,
    pub init: Option<JsExpr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JsSwitchCase {
    /// Absent for `default:`
    pub test: Option<JsExpr>,
    pub body: Vec<JsStmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JsCatch {
    pub param: String,
    pub body: Vec<JsStmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum JsStmt {
    Var(Vec<JsVarDecl>),
    Expr(JsExpr),
    Block(Vec<JsStmt>),
    If {
        condition: JsExpr,
        then_body: Vec<JsStmt>,
        else_body: Vec<JsStmt>,
    },
    While {
        condition: JsExpr,
        body: Vec<JsStmt>,
    },
    DoWhile {
        body: Vec<JsStmt>,
        condition: JsExpr,
    },
    For {
        init: Option<JsExpr>,
        condition: Option<JsExpr>,
        update: Option<JsExpr>,
        body: Vec<JsStmt>,
    },
    Switch {
        discriminant: JsExpr,
        cases: Vec<JsSwitchCase>,
    },
    Labeled {
        label: String,
        body: Box<JsStmt>,
    },
    Break(Option<String>),
    Continue(Option<String>),
    Return(Option<JsExpr>),
    Throw(JsExpr),
    Try {
        body: Vec<JsStmt>,
        catch: Option<JsCatch>,
        finally: Option<Vec<JsStmt>>,
    },
    Function(JsFunction),
}

impl JsStmt {
    pub fn var(name: impl Into<String>, init: Option<JsExpr>) -> JsStmt {
        JsStmt::Var(vec![JsVarDecl {
            name: name.into(),
            init,
        }])
    }

    pub fn assign(target: JsExpr, value: JsExpr) -> JsStmt {
        JsStmt::Expr(JsExpr::assign(target, value))
    }

    /// Control never falls through to the next statement
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JsStmt::Return(_) | JsStmt::Throw(_) | JsStmt::Break(_) | JsStmt::Continue(_)
        )
    }
}

// ---------------------------------------------------------------------------
// Functions and programs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct JsFunction {
    /// Absent for function expressions
    pub name: Option<String>,
    pub params: Vec<String>,
    pub body: Vec<JsStmt>,
}

impl JsFunction {
    pub fn new(name: Option<String>, params: Vec<String>, body: Vec<JsStmt>) -> Self {
        Self { name, params, body }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct JsProgram {
    pub body: Vec<JsStmt>,
}
