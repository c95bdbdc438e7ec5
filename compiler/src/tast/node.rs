//! Typed tree consumed by IR generation
//!
//! Every expression carries its resolved static type and location; every
//! call carries its resolved target and receiver kind. Nothing in here is
//! re-resolved by the backend.

use super::id_types::{DeclId, LocalId};
use super::symbols::{SourceLocation, TypeRef};
use serde::{Deserialize, Serialize};

/// Compile-time constant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Constant {
    Int(i32),
    Long(i64),
    Double(f64),
    Float(f32),
    Char(char),
    String(String),
    Boolean(bool),
}

/// A file of top-level declarations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypedFile {
    pub name: String,
    #[serde(default)]
    pub package: Vec<String>,
    pub declarations: Vec<TypedDeclaration>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TypedDeclaration {
    Class(TypedClass),
    Function(TypedFunction),
    Property(TypedProperty),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypedClass {
    pub decl: DeclId,
    #[serde(default)]
    pub constructors: Vec<TypedConstructor>,
    /// Member functions, properties and nested classes in declaration order
    #[serde(default)]
    pub members: Vec<TypedDeclaration>,
    /// `init` blocks, in declaration order relative to property initializers
    #[serde(default)]
    pub init_blocks: Vec<TypedInitBlock>,
    #[serde(default)]
    pub delegations: Vec<TypedDelegation>,
    pub location: SourceLocation,
}

/// An `init { }` block, ordered by its position among the class members
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypedInitBlock {
    /// Index into `TypedClass::members` before which this block runs
    pub position: usize,
    pub body: Vec<TypedStatement>,
}

/// `: Interface by expression`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypedDelegation {
    pub interface: DeclId,
    /// Evaluated in the scope of the primary constructor
    pub expression: TypedExpression,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypedParam {
    pub local: LocalId,
    pub name: String,
    pub ty: TypeRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypedConstructor {
    pub decl: DeclId,
    pub params: Vec<TypedParam>,
    /// `val`/`var` constructor parameters: (parameter index, property)
    #[serde(default)]
    pub property_params: Vec<(usize, DeclId)>,
    /// `super(...)` or `this(...)` call
    #[serde(default)]
    pub delegation: Option<ConstructorDelegation>,
    #[serde(default)]
    pub body: Vec<TypedStatement>,
    pub location: SourceLocation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstructorDelegation {
    pub constructor: DeclId,
    pub args: Vec<TypedExpression>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypedFunction {
    pub decl: DeclId,
    #[serde(default)]
    pub extension_receiver: Option<TypedParam>,
    pub params: Vec<TypedParam>,
    /// Absent for abstract and native declarations
    pub body: Option<Vec<TypedStatement>>,
    pub location: SourceLocation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypedProperty {
    pub decl: DeclId,
    #[serde(default)]
    pub initializer: Option<TypedExpression>,
    #[serde(default)]
    pub getter: Option<TypedFunction>,
    #[serde(default)]
    pub setter: Option<TypedFunction>,
    pub location: SourceLocation,
}

/// How the receiver of a member access was resolved
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Receiver {
    /// Top-level declaration, no receiver
    None,
    /// Explicit receiver expression
    Expr(Box<TypedExpression>),
    /// Implicit `this` of the given class (possibly an enclosing one)
    Implicit { class: DeclId },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypedExpression {
    pub kind: TypedExpressionKind,
    pub ty: TypeRef,
    pub location: SourceLocation,
}

impl TypedExpression {
    pub fn new(kind: TypedExpressionKind, ty: TypeRef, location: SourceLocation) -> Self {
        Self { kind, ty, location }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WhenCondition {
    /// `value ->`: equality with the subject
    Equals(TypedExpression),
    /// `is T ->` / `!is T ->`
    Is { ty: TypeRef, negated: bool },
    /// A plain boolean condition (subject-less `when`)
    Condition(TypedExpression),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComparisonOp {
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhenBranch {
    pub conditions: Vec<WhenCondition>,
    pub body: TypedExpression,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatchBranch {
    pub local: LocalId,
    pub name: String,
    /// Absent for a catch-all
    pub ty: Option<TypeRef>,
    pub body: TypedExpression,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TypedExpressionKind {
    Literal(Constant),
    Null,
    /// `this` of the given class, explicit or labeled
    This { class: DeclId },
    Local(LocalId),
    Call {
        function: DeclId,
        receiver: Receiver,
        /// Extension receiver, passed ahead of the arguments
        #[serde(default)]
        extension_receiver: Option<Box<TypedExpression>>,
        args: Vec<TypedExpression>,
        /// `receiver?.f()`
        #[serde(default)]
        safe: bool,
        /// `super.f()`: dispatched statically
        #[serde(default)]
        is_super: bool,
    },
    PropertyGet {
        property: DeclId,
        receiver: Receiver,
        #[serde(default)]
        safe: bool,
    },
    New {
        class: DeclId,
        constructor: DeclId,
        /// Enclosing instance for inner classes
        #[serde(default)]
        outer: Option<Box<TypedExpression>>,
        args: Vec<TypedExpression>,
    },
    Lambda(Box<TypedFunction>),
    FunctionReference {
        function: DeclId,
    },
    ObjectRef(DeclId),
    ArrayOf(Vec<TypedExpression>),
    StringTemplate(Vec<TypedExpression>),
    AndAnd(Box<TypedExpression>, Box<TypedExpression>),
    OrOr(Box<TypedExpression>, Box<TypedExpression>),
    /// `==` / `!=`
    Equals {
        lhs: Box<TypedExpression>,
        rhs: Box<TypedExpression>,
        negated: bool,
    },
    /// `===` / `!==`
    IdentityEquals {
        lhs: Box<TypedExpression>,
        rhs: Box<TypedExpression>,
        negated: bool,
    },
    /// `a < b` and friends: a resolved `compareTo` call tested against zero
    Comparison {
        op: ComparisonOp,
        compare: Box<TypedExpression>,
    },
    Elvis(Box<TypedExpression>, Box<TypedExpression>),
    NotNullAssert(Box<TypedExpression>),
    Is {
        value: Box<TypedExpression>,
        ty: TypeRef,
        negated: bool,
    },
    As {
        value: Box<TypedExpression>,
        ty: TypeRef,
        safe: bool,
    },
    If {
        condition: Box<TypedExpression>,
        then_branch: Box<TypedExpression>,
        else_branch: Option<Box<TypedExpression>>,
    },
    When {
        subject: Option<Box<TypedExpression>>,
        branches: Vec<WhenBranch>,
        else_branch: Option<Box<TypedExpression>>,
    },
    Try {
        body: Box<TypedExpression>,
        catches: Vec<CatchBranch>,
        finally: Option<Vec<TypedStatement>>,
    },
    /// Statements followed by an optional result expression
    Block(Vec<TypedStatement>, Option<Box<TypedExpression>>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypedStatement {
    pub kind: TypedStatementKind,
    pub location: SourceLocation,
}

impl TypedStatement {
    pub fn new(kind: TypedStatementKind, location: SourceLocation) -> Self {
        Self { kind, location }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TypedStatementKind {
    LocalVar {
        local: LocalId,
        name: String,
        init: Option<TypedExpression>,
    },
    Expression(TypedExpression),
    AssignLocal {
        local: LocalId,
        value: TypedExpression,
    },
    AssignProperty {
        property: DeclId,
        receiver: Receiver,
        value: TypedExpression,
    },
    Return {
        /// Function or lambda being returned from
        target: DeclId,
        value: Option<TypedExpression>,
    },
    Break {
        label: Option<String>,
    },
    Continue {
        label: Option<String>,
    },
    Throw(TypedExpression),
    While {
        label: Option<String>,
        condition: TypedExpression,
        body: Vec<TypedStatement>,
    },
    DoWhile {
        label: Option<String>,
        body: Vec<TypedStatement>,
        condition: TypedExpression,
    },
    ForIn {
        label: Option<String>,
        local: LocalId,
        name: String,
        iterable: TypedExpression,
        iterator: DeclId,
        has_next: DeclId,
        next: DeclId,
        body: Vec<TypedStatement>,
    },
    LocalClass(TypedClass),
    LocalFunction(TypedFunction),
}
