//! Intrinsic Substitution
//!
//! Replaces calls of built-in members by IR operators. Callees are
//! recognised by qualified name in the built-in module, so the binding
//! layer in [`crate::tast::builtins`] is the only place that decides what
//! exists.
//!
//! # Matching
//!
//! [`MATCHERS`] is an ordered table. For each call the first matcher that
//! applies wins; statement-only matchers are skipped for calls whose value
//! is used. Calls nothing matches pass through unchanged.
//!
//! ```text
//! (invoke static (var a) kotlin.Int.plus (var b))   =>  (add:int (var a) (var b))
//! (eval (invoke static (var xs) kotlin.Array.set i v))  =>  (assign (array-get (var xs) i) v)
//! ```

use super::decls::IrModule;
use super::expr::{BinaryOp, Invocation, IrExpr, OperandKind, UnaryOp};
use super::stmt::{IrStmt, StmtKind};
use super::visit::{for_each_list_mut, transform_stmts};
use crate::tast::{
    Constant, DeclId, DeclTable, FunctionInfo, PrimitiveKind, BUILTIN_MODULE,
};
use std::collections::HashMap;

// ============================================================================
// Intrinsic operations
// ============================================================================

/// What a matched call is replaced by
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intrinsic {
    /// `receiver OP argument`
    Binary(BinaryOp, OperandKind),
    /// `OP receiver`
    Unary(UnaryOp, OperandKind),
    /// The receiver itself
    Identity,
    /// `receiver OP 1`, for `inc`/`dec`
    Step(BinaryOp, OperandKind),
    ArrayGet,
    /// Statement only: `receiver[index] = value`
    ArraySet,
    Conversion { from: PrimitiveKind, to: PrimitiveKind },
    Concat,
    /// Call of the receiver as a function value
    InvokeValue,
}

/// A built-in callee as the matchers see it
#[derive(Debug)]
pub struct Callee<'a> {
    /// Qualified name of the declaring class, e.g. `kotlin.Int`
    pub owner: &'a str,
    pub method: &'a str,
    pub info: &'a FunctionInfo,
}

impl Callee<'_> {
    fn owner_primitive(&self) -> Option<PrimitiveKind> {
        self.owner
            .strip_prefix("kotlin.")
            .and_then(PrimitiveKind::from_name)
    }

    fn result_kind(&self) -> OperandKind {
        OperandKind::of_type(&self.info.return_type)
    }
}

pub struct Matcher {
    pub name: &'static str,
    pub statement_only: bool,
    pub matches: fn(&Callee<'_>) -> Option<Intrinsic>,
}

/// Ordered matcher table; the first applicable entry wins
pub static MATCHERS: &[Matcher] = &[
    Matcher {
        name: "primitive-arithmetic",
        statement_only: false,
        matches: match_arithmetic,
    },
    Matcher {
        name: "comparison",
        statement_only: false,
        matches: match_comparison,
    },
    Matcher {
        name: "primitive-unary",
        statement_only: false,
        matches: match_unary,
    },
    Matcher {
        name: "boolean-logic",
        statement_only: false,
        matches: match_boolean,
    },
    Matcher {
        name: "array-set",
        statement_only: true,
        matches: match_array_set,
    },
    Matcher {
        name: "array-access",
        statement_only: false,
        matches: match_array,
    },
    Matcher {
        name: "numeric-conversion",
        statement_only: false,
        matches: match_conversion,
    },
    Matcher {
        name: "string",
        statement_only: false,
        matches: match_string,
    },
    Matcher {
        name: "function-invoke",
        statement_only: false,
        matches: match_invoke,
    },
];

fn match_arithmetic(callee: &Callee<'_>) -> Option<Intrinsic> {
    let owner = callee.owner_primitive()?;
    if owner == PrimitiveKind::Boolean {
        return None;
    }
    let op = match callee.method {
        "plus" => BinaryOp::Add,
        "minus" => BinaryOp::Sub,
        "times" => BinaryOp::Mul,
        "div" => BinaryOp::Div,
        "rem" => BinaryOp::Rem,
        "and" => BinaryOp::BitAnd,
        "or" => BinaryOp::BitOr,
        "xor" => BinaryOp::BitXor,
        "shl" => BinaryOp::Shl,
        "shr" => BinaryOp::Shr,
        "ushr" => BinaryOp::Ushr,
        _ => return None,
    };
    Some(Intrinsic::Binary(op, callee.result_kind()))
}

fn match_comparison(callee: &Callee<'_>) -> Option<Intrinsic> {
    let kind = match (callee.owner_primitive(), callee.owner) {
        (Some(kind), _) => OperandKind::from(kind),
        (None, "kotlin.String") => OperandKind::String,
        (None, "kotlin.Comparable") if callee.method == "compareTo" => OperandKind::Reference,
        _ => return None,
    };
    match callee.method {
        "compareTo" => Some(Intrinsic::Binary(BinaryOp::Compare, kind)),
        "equals" => Some(Intrinsic::Binary(BinaryOp::Eq, kind)),
        _ => None,
    }
}

fn match_unary(callee: &Callee<'_>) -> Option<Intrinsic> {
    let owner = callee.owner_primitive()?;
    let kind = OperandKind::from(owner);
    match callee.method {
        "unaryMinus" => Some(Intrinsic::Unary(UnaryOp::Negate, callee.result_kind())),
        "unaryPlus" => Some(Intrinsic::Identity),
        "not" if owner == PrimitiveKind::Boolean => Some(Intrinsic::Unary(UnaryOp::Not, kind)),
        "inv" => Some(Intrinsic::Unary(UnaryOp::BitNot, kind)),
        "inc" => Some(Intrinsic::Step(BinaryOp::Add, kind)),
        "dec" => Some(Intrinsic::Step(BinaryOp::Sub, kind)),
        _ => None,
    }
}

fn match_boolean(callee: &Callee<'_>) -> Option<Intrinsic> {
    if callee.owner_primitive()? != PrimitiveKind::Boolean {
        return None;
    }
    let op = match callee.method {
        "and" => BinaryOp::BitAnd,
        "or" => BinaryOp::BitOr,
        "xor" => BinaryOp::BitXor,
        _ => return None,
    };
    Some(Intrinsic::Binary(op, OperandKind::Boolean))
}

fn match_array_set(callee: &Callee<'_>) -> Option<Intrinsic> {
    (callee.owner == "kotlin.Array" && callee.method == "set").then_some(Intrinsic::ArraySet)
}

fn match_array(callee: &Callee<'_>) -> Option<Intrinsic> {
    if callee.owner != "kotlin.Array" {
        return None;
    }
    match callee.method {
        "get" => Some(Intrinsic::ArrayGet),
        "<get-size>" => Some(Intrinsic::Unary(UnaryOp::ArrayLength, OperandKind::Reference)),
        "copyOf" if callee.info.params.is_empty() => {
            Some(Intrinsic::Unary(UnaryOp::ArrayCopy, OperandKind::Reference))
        }
        _ => None,
    }
}

fn match_conversion(callee: &Callee<'_>) -> Option<Intrinsic> {
    let from = callee.owner_primitive()?;
    let to = callee
        .method
        .strip_prefix("to")
        .and_then(PrimitiveKind::from_name)?;
    if from == PrimitiveKind::Boolean || to == PrimitiveKind::Boolean {
        return None;
    }
    Some(Intrinsic::Conversion { from, to })
}

fn match_string(callee: &Callee<'_>) -> Option<Intrinsic> {
    match (callee.owner, callee.method) {
        ("kotlin.String", "plus") => Some(Intrinsic::Concat),
        ("kotlin.Any", "toString") => Some(Intrinsic::Unary(UnaryOp::Stringify, OperandKind::Reference)),
        _ => None,
    }
}

fn match_invoke(callee: &Callee<'_>) -> Option<Intrinsic> {
    let arity = callee.owner.strip_prefix("kotlin.Function")?;
    (callee.method == "invoke" && arity.parse::<usize>().is_ok()).then_some(Intrinsic::InvokeValue)
}

// ============================================================================
// Resolution
// ============================================================================

/// Resolves callees against [`MATCHERS`], caching per callee and usage
pub struct IntrinsicResolver<'a> {
    decls: &'a DeclTable,
    cache: HashMap<(DeclId, bool), Option<Intrinsic>>,
}

impl<'a> IntrinsicResolver<'a> {
    pub fn new(decls: &'a DeclTable) -> Self {
        Self {
            decls,
            cache: HashMap::new(),
        }
    }

    /// The intrinsic for a call of `function`; `as_statement` when the call's
    /// value is discarded
    pub fn resolve(&mut self, function: DeclId, as_statement: bool) -> Option<Intrinsic> {
        if let Some(cached) = self.cache.get(&(function, as_statement)) {
            return *cached;
        }
        let found = self.lookup(function, as_statement);
        self.cache.insert((function, as_statement), found);
        found
    }

    fn lookup(&self, function: DeclId, as_statement: bool) -> Option<Intrinsic> {
        let decl = self.decls.get(function)?;
        if decl.module != BUILTIN_MODULE {
            return None;
        }
        let info = decl.as_function()?;
        let owner = self.decls.qualified_name(decl.parent?);
        let callee = Callee {
            owner: &owner,
            method: &decl.name,
            info,
        };
        MATCHERS
            .iter()
            .filter(|m| as_statement || !m.statement_only)
            .find_map(|m| {
                let found = (m.matches)(&callee);
                if found.is_some() {
                    tracing::trace!("{}.{} matched {}", callee.owner, callee.method, m.name);
                }
                found
            })
    }
}

// ============================================================================
// Rewriting
// ============================================================================

enum Rewrite {
    Expr(IrExpr),
    Stmt(StmtKind),
}

fn one(kind: OperandKind) -> IrExpr {
    match kind {
        OperandKind::Long => IrExpr::Constant(Constant::Long(1)),
        OperandKind::Double => IrExpr::Constant(Constant::Double(1.0)),
        OperandKind::Float => IrExpr::Constant(Constant::Float(1.0)),
        _ => IrExpr::int(1),
    }
}

fn concat_parts(expr: IrExpr, parts: &mut Vec<IrExpr>) {
    match expr {
        IrExpr::Concat(inner) => parts.extend(inner),
        other => parts.push(other),
    }
}

fn next_arg(args: &mut impl Iterator<Item = IrExpr>) -> IrExpr {
    args.next().unwrap_or(IrExpr::Undefined)
}

/// Build the replacement; calls of an unexpected shape come back unchanged
fn apply(intrinsic: Intrinsic, invocation: Invocation) -> Result<Rewrite, Invocation> {
    let expected = match intrinsic {
        Intrinsic::Binary(..) | Intrinsic::ArrayGet | Intrinsic::Concat => Some(1),
        Intrinsic::ArraySet => Some(2),
        Intrinsic::InvokeValue => None,
        _ => Some(0),
    };
    if invocation.receiver.is_none() || expected.is_some_and(|n| n != invocation.args.len()) {
        return Err(invocation);
    }
    let Invocation { receiver, args, .. } = invocation;
    let Some(receiver) = receiver else {
        unreachable!("receiver checked above");
    };
    let receiver = *receiver;
    let mut args = args.into_iter();

    let expr = match intrinsic {
        Intrinsic::Binary(op, kind) => IrExpr::binary(op, kind, receiver, next_arg(&mut args)),
        Intrinsic::Unary(op, kind) => IrExpr::unary(op, kind, receiver),
        Intrinsic::Identity => receiver,
        Intrinsic::Step(op, kind) => IrExpr::binary(op, kind, receiver, one(kind)),
        Intrinsic::ArrayGet => IrExpr::ArrayGet {
            array: Box::new(receiver),
            index: Box::new(next_arg(&mut args)),
        },
        Intrinsic::ArraySet => {
            let index = next_arg(&mut args);
            let value = next_arg(&mut args);
            return Ok(Rewrite::Stmt(StmtKind::Assign {
                target: Some(IrExpr::ArrayGet {
                    array: Box::new(receiver),
                    index: Box::new(index),
                }),
                value,
            }));
        }
        Intrinsic::Conversion { from, to } if from == to => receiver,
        Intrinsic::Conversion { from, to } => IrExpr::PrimitiveCast {
            value: Box::new(receiver),
            from,
            to,
        },
        Intrinsic::Concat => {
            let mut parts = Vec::new();
            concat_parts(receiver, &mut parts);
            concat_parts(next_arg(&mut args), &mut parts);
            IrExpr::Concat(parts)
        }
        Intrinsic::InvokeValue => IrExpr::InvokeValue {
            callee: Box::new(receiver),
            args: args.collect(),
        },
    };
    Ok(Rewrite::Expr(expr))
}

/// Substitute intrinsics in every function body. Returns the number of
/// calls replaced.
pub fn substitute_intrinsics(module: &mut IrModule, decls: &DeclTable) -> usize {
    let mut resolver = IntrinsicResolver::new(decls);
    let mut substituted = 0;
    for (_, function) in module.functions.iter_mut() {
        let Some(body) = function.body.as_mut() else {
            continue;
        };
        for_each_list_mut(body, &mut |list| {
            for stmt in list.iter_mut() {
                substituted += substitute_statement(&mut resolver, stmt);
            }
        });
        transform_stmts(body, &mut |expr| match expr {
            IrExpr::Invoke(invocation) => match resolver.resolve(invocation.function, false) {
                Some(intrinsic) => match apply(intrinsic, invocation) {
                    Ok(Rewrite::Expr(replaced)) => {
                        substituted += 1;
                        replaced
                    }
                    Ok(Rewrite::Stmt(_)) => unreachable!("statement intrinsic in value position"),
                    Err(invocation) => IrExpr::Invoke(invocation),
                },
                None => IrExpr::Invoke(invocation),
            },
            other => other,
        });
    }
    tracing::debug!("substituted {} intrinsic calls", substituted);
    substituted
}

/// Statement-only rewrites of a call whose value is discarded
fn substitute_statement(resolver: &mut IntrinsicResolver<'_>, stmt: &mut IrStmt) -> usize {
    let StmtKind::Assign {
        target: None,
        value: IrExpr::Invoke(invocation),
    } = &stmt.kind
    else {
        return 0;
    };
    if resolver.resolve(invocation.function, true) != Some(Intrinsic::ArraySet) {
        return 0;
    }
    let placeholder = StmtKind::Assign {
        target: None,
        value: IrExpr::Undefined,
    };
    let StmtKind::Assign {
        value: IrExpr::Invoke(invocation),
        ..
    } = std::mem::replace(&mut stmt.kind, placeholder)
    else {
        return 0;
    };
    match apply(Intrinsic::ArraySet, invocation) {
        Ok(Rewrite::Stmt(kind)) => {
            stmt.kind = kind;
            1
        }
        Ok(Rewrite::Expr(value)) => {
            stmt.kind = StmtKind::Assign { target: None, value };
            1
        }
        Err(invocation) => {
            stmt.kind = StmtKind::Assign {
                target: None,
                value: IrExpr::Invoke(invocation),
            };
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::decls::{Container, IrDecl, IrFunction, VariableKind};
    use crate::ir::dump::SexpDumper;
    use crate::tast::{Builtins, FunctionKind, SourceLocation};

    struct Fixture {
        decls: DeclTable,
        builtins: Builtins,
        module: IrModule,
        function: crate::ir::FunctionId,
    }

    fn fixture() -> Fixture {
        let mut decls = DeclTable::new();
        let builtins = Builtins::install(&mut decls);
        let mut module = IrModule::new("test");
        let file = module.add_file("a.kt", Vec::new());
        let decl = DeclId::from_raw(10_000);
        let function = module.functions.alloc(IrFunction::new(
            decl,
            "f",
            FunctionKind::TopLevel,
            Container::File(file),
            SourceLocation::unknown(),
        ));
        module.register(Container::File(file), decl, IrDecl::Function(function));
        Fixture {
            decls,
            builtins,
            module,
            function,
        }
    }

    fn call(fx: &Fixture, name: &str, receiver: IrExpr, args: Vec<IrExpr>) -> IrExpr {
        IrExpr::invoke(Some(receiver), fx.builtins.get(name).unwrap(), args, false)
    }

    fn run(fx: &mut Fixture, body: Vec<IrStmt>) -> Vec<String> {
        fx.module.functions[fx.function].body = Some(body);
        substitute_intrinsics(&mut fx.module, &fx.decls);
        let dumper = SexpDumper::new(&fx.module, &fx.decls);
        fx.module.functions[fx.function]
            .body
            .as_ref()
            .unwrap()
            .iter()
            .map(|s| dumper.stmt(s))
            .collect()
    }

    #[test]
    fn test_primitive_operators() {
        let mut fx = fixture();
        let a = fx.module.new_variable(Some("a".into()), VariableKind::Local, fx.function);
        let b = fx.module.new_variable(Some("b".into()), VariableKind::Local, fx.function);
        let sum = call(&fx, "kotlin.Int.plus", IrExpr::var(a), vec![IrExpr::var(b)]);
        let cmp = call(&fx, "kotlin.Long.compareTo", IrExpr::var(a), vec![IrExpr::var(b)]);
        let inc = call(&fx, "kotlin.Int.inc", IrExpr::var(a), vec![]);
        let loc = SourceLocation::unknown();
        let dumped = run(
            &mut fx,
            vec![
                IrStmt::assign(IrExpr::var(a), sum, loc),
                IrStmt::assign(IrExpr::var(b), cmp, loc),
                IrStmt::assign(IrExpr::var(a), inc, loc),
            ],
        );
        assert_eq!(dumped[0], "(assign (var a) (add:int (var a) (var b)))");
        assert_eq!(dumped[1], "(assign (var b) (compare:long (var a) (var b)))");
        assert_eq!(dumped[2], "(assign (var a) (add:int (var a) (const int 1)))");
    }

    #[test]
    fn test_array_set_only_as_statement() {
        let mut fx = fixture();
        let xs = fx.module.new_variable(Some("xs".into()), VariableKind::Local, fx.function);
        let set = call(&fx, "kotlin.Array.set", IrExpr::var(xs), vec![IrExpr::int(0), IrExpr::int(7)]);
        let size = call(&fx, "kotlin.Array.<get-size>", IrExpr::var(xs), vec![]);
        let loc = SourceLocation::unknown();
        let dumped = run(
            &mut fx,
            vec![IrStmt::eval(set.clone(), loc), IrStmt::assign(IrExpr::var(xs), set, loc), IrStmt::eval(size, loc)],
        );
        assert_eq!(dumped[0], "(assign (array-get (var xs) (const int 0)) (const int 7))");
        assert!(dumped[1].contains("(invoke "), "value-position set stays a call: {}", dumped[1]);
        assert_eq!(dumped[2], "(eval (array-length:ref (var xs)))");
    }

    #[test]
    fn test_conversions_concat_and_pass_through() {
        let mut fx = fixture();
        let x = fx.module.new_variable(Some("x".into()), VariableKind::Local, fx.function);
        let narrow = call(&fx, "kotlin.Double.toInt", IrExpr::var(x), vec![]);
        let same = call(&fx, "kotlin.Int.toInt", IrExpr::var(x), vec![]);
        let concat = call(
            &fx,
            "kotlin.String.plus",
            call(&fx, "kotlin.String.plus", IrExpr::string("a"), vec![IrExpr::var(x)]),
            vec![IrExpr::string("b")],
        );
        let hash = call(&fx, "kotlin.Any.hashCode", IrExpr::var(x), vec![]);
        let loc = SourceLocation::unknown();
        let dumped = run(
            &mut fx,
            vec![
                IrStmt::eval(narrow, loc),
                IrStmt::eval(same, loc),
                IrStmt::eval(concat, loc),
                IrStmt::eval(hash, loc),
            ],
        );
        assert_eq!(dumped[0], "(eval (prim-cast double->int (var x)))");
        assert_eq!(dumped[1], "(eval (var x))");
        assert_eq!(
            dumped[2],
            "(eval (concat (const string \"a\") (var x) (const string \"b\")))"
        );
        assert!(dumped[3].starts_with("(eval (invoke "));
    }

    #[test]
    fn test_first_matcher_wins() {
        let mut decls = DeclTable::new();
        let builtins = Builtins::install(&mut decls);
        let mut resolver = IntrinsicResolver::new(&decls);
        let compare = builtins.get("kotlin.Char.compareTo").unwrap();
        assert_eq!(
            resolver.resolve(compare, false),
            Some(Intrinsic::Binary(BinaryOp::Compare, OperandKind::Char))
        );
        let get = builtins.get("kotlin.Array.get").unwrap();
        assert_eq!(resolver.resolve(get, true), Some(Intrinsic::ArrayGet));
        let set = builtins.get("kotlin.Array.set").unwrap();
        assert_eq!(resolver.resolve(set, false), None);
    }
}
