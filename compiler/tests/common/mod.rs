//! Resolved-unit builder shared by the integration tests

#![allow(dead_code)]

use compiler::logging;
use compiler::pipeline::TranslationInput;
use compiler::tast::{
    Builtins, ClassInfo, ClassKind, Constant, DeclId, DeclInfo, DeclKind, DeclTable,
    FunctionInfo, FunctionKind, LocalId, ParamInfo, PrimitiveKind, PropertyInfo, Receiver,
    SourceLocation, TypeRef, TypedExpression, TypedExpressionKind, TypedParam, TypedStatement,
    TypedStatementKind,
};

pub const MODULE: &str = "app";

pub fn int() -> TypeRef {
    TypeRef::Primitive(PrimitiveKind::Int)
}

pub fn boolean() -> TypeRef {
    TypeRef::Primitive(PrimitiveKind::Boolean)
}

/// Position in the first input file
pub fn at(line: u32) -> SourceLocation {
    SourceLocation::new(0, line, 5, line * 40)
}

/// Declarations of one unit on top of the built-ins
pub struct Unit {
    pub decls: DeclTable,
    pub builtins: Builtins,
    next_local: u32,
}

impl Unit {
    pub fn new() -> Self {
        logging::init_test();
        let mut decls = DeclTable::new();
        let builtins = Builtins::install(&mut decls);
        Self {
            decls,
            builtins,
            next_local: 0,
        }
    }

    pub fn builtin(&self, qualified_name: &str) -> DeclId {
        self.builtins
            .get(qualified_name)
            .unwrap_or_else(|| panic!("no built-in named {}", qualified_name))
    }

    pub fn class(&mut self, name: &str, parent: Option<DeclId>) -> DeclId {
        let info = DeclInfo::new(
            name,
            MODULE,
            DeclKind::Class(ClassInfo {
                kind: ClassKind::Class,
                superclass: None,
                interfaces: Vec::new(),
                is_inner: false,
                delegated_members: Vec::new(),
            }),
        );
        self.decls.add(with_parent(info, parent))
    }

    pub fn primary_constructor(&mut self, class: DeclId, params: &[(&str, TypeRef)]) -> DeclId {
        let info = FunctionInfo::new(FunctionKind::Constructor { primary: true }, param_infos(params), TypeRef::Unit);
        self.decls
            .add(DeclInfo::new("<init>", MODULE, DeclKind::Function(info)).with_parent(class))
    }

    pub fn function(
        &mut self,
        name: &str,
        kind: FunctionKind,
        parent: Option<DeclId>,
        params: &[(&str, TypeRef)],
        return_type: TypeRef,
    ) -> DeclId {
        let info = DeclInfo::new(
            name,
            MODULE,
            DeclKind::Function(FunctionInfo::new(kind, param_infos(params), return_type)),
        );
        self.decls.add(with_parent(info, parent))
    }

    pub fn property(&mut self, name: &str, parent: Option<DeclId>, ty: TypeRef) -> DeclId {
        let info = DeclInfo::new(name, MODULE, DeclKind::Property(PropertyInfo::new(ty, false)));
        self.decls.add(with_parent(info, parent))
    }

    pub fn local(&mut self) -> LocalId {
        let id = LocalId::from_raw(self.next_local);
        self.next_local += 1;
        id
    }

    /// Typed parameters with fresh locals
    pub fn params(&mut self, params: &[(&str, TypeRef)]) -> Vec<TypedParam> {
        params
            .iter()
            .map(|(name, ty)| TypedParam {
                local: self.local(),
                name: name.to_string(),
                ty: ty.clone(),
            })
            .collect()
    }

    pub fn into_input(self, files: Vec<compiler::tast::TypedFile>) -> TranslationInput {
        TranslationInput::new(self.decls, files)
    }
}

fn with_parent(info: DeclInfo, parent: Option<DeclId>) -> DeclInfo {
    match parent {
        Some(parent) => info.with_parent(parent),
        None => info,
    }
}

fn param_infos(params: &[(&str, TypeRef)]) -> Vec<ParamInfo> {
    params.iter().map(|(name, ty)| ParamInfo::new(*name, ty.clone())).collect()
}

// ---------------------------------------------------------------------------
// Typed tree shorthands
// ---------------------------------------------------------------------------

pub fn expr(kind: TypedExpressionKind, ty: TypeRef) -> TypedExpression {
    TypedExpression::new(kind, ty, SourceLocation::unknown())
}

pub fn int_lit(value: i32) -> TypedExpression {
    expr(TypedExpressionKind::Literal(Constant::Int(value)), int())
}

pub fn read(param: &TypedParam) -> TypedExpression {
    expr(TypedExpressionKind::Local(param.local), param.ty.clone())
}

pub fn read_local(local: LocalId, ty: TypeRef) -> TypedExpression {
    expr(TypedExpressionKind::Local(local), ty)
}

/// Call with an explicit receiver
pub fn method_call(function: DeclId, receiver: TypedExpression, args: Vec<TypedExpression>, ty: TypeRef) -> TypedExpression {
    expr(
        TypedExpressionKind::Call {
            function,
            receiver: Receiver::Expr(Box::new(receiver)),
            extension_receiver: None,
            args,
            safe: false,
            is_super: false,
        },
        ty,
    )
}

/// Call of a top-level function
pub fn call(function: DeclId, args: Vec<TypedExpression>, ty: TypeRef) -> TypedExpression {
    expr(
        TypedExpressionKind::Call {
            function,
            receiver: Receiver::None,
            extension_receiver: None,
            args,
            safe: false,
            is_super: false,
        },
        ty,
    )
}

pub fn stmt(kind: TypedStatementKind) -> TypedStatement {
    TypedStatement::new(kind, SourceLocation::unknown())
}

pub fn stmt_at(kind: TypedStatementKind, line: u32) -> TypedStatement {
    TypedStatement::new(kind, at(line))
}

pub fn eval(value: TypedExpression) -> TypedStatement {
    stmt(TypedStatementKind::Expression(value))
}

pub fn ret(target: DeclId, value: TypedExpression) -> TypedStatement {
    stmt(TypedStatementKind::Return {
        target,
        value: Some(value),
    })
}
