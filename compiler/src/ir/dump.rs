//! S-expression dump of IR trees
//!
//! Fully parenthesized, deterministic text for any expression, statement or
//! function. Used by tracing and as a snapshot format in tests; not a
//! persisted format.

use super::arena::{FunctionId, LabelId, VarId};
use super::decls::{Capture, IrDecl, IrModule};
use super::expr::{Invocation, IrExpr, IrField};
use super::stmt::{IrStmt, StmtKind};
use crate::tast::{Constant, DeclId, DeclTable, TypeRef};
use std::fmt::Write;

/// Renders IR as S-expressions, resolving names through the module and the
/// declaration table
pub struct SexpDumper<'a> {
    module: &'a IrModule,
    decls: &'a DeclTable,
}

impl<'a> SexpDumper<'a> {
    pub fn new(module: &'a IrModule, decls: &'a DeclTable) -> Self {
        Self { module, decls }
    }

    pub fn expr(&self, expr: &IrExpr) -> String {
        match expr {
            IrExpr::Constant(c) => dump_constant(c),
            IrExpr::Null => "null".to_string(),
            IrExpr::Undefined => "undefined".to_string(),
            IrExpr::This => "this".to_string(),
            IrExpr::True => "true".to_string(),
            IrExpr::False => "false".to_string(),
            IrExpr::Var(v) => {
                let head = if v.free { "free-var" } else { "var" };
                format!("({} {})", head, self.var(v.var))
            }
            IrExpr::Field { receiver, field } => {
                format!("(field {} {})", self.opt(receiver.as_deref()), self.field(*field))
            }
            IrExpr::Invoke(Invocation {
                receiver,
                function,
                args,
                virtual_dispatch,
            }) => {
                let dispatch = if *virtual_dispatch { "virtual" } else { "static" };
                self.list(
                    &format!("invoke {} {} {}", dispatch, self.opt(receiver.as_deref()), self.decl(*function)),
                    args,
                )
            }
            IrExpr::New { class, args, .. } => self.list(&format!("new {}", self.decl(*class)), args),
            IrExpr::FunctionRef(function) => format!("(fn-ref {})", self.decl(*function)),
            IrExpr::InvokeValue { callee, args } => {
                self.list(&format!("invoke-value {}", self.expr(callee)), args)
            }
            IrExpr::ObjectRef(class) => format!("(object {})", self.decl(*class)),
            IrExpr::OuterThis(class) => format!("(outer-this {})", self.decl(*class)),
            IrExpr::ArrayOf(items) => self.list("array", items),
            IrExpr::Concat(parts) => self.list("concat", parts),
            IrExpr::Conditional {
                condition,
                then_value,
                else_value,
            } => format!(
                "(? {} {} {})",
                self.expr(condition),
                self.expr(then_value),
                self.expr(else_value)
            ),
            IrExpr::Binary { op, kind, lhs, rhs } => {
                format!("({}:{} {} {})", op.name(), kind.name(), self.expr(lhs), self.expr(rhs))
            }
            IrExpr::Unary { op, kind, operand } => {
                format!("({}:{} {})", op.name(), kind.name(), self.expr(operand))
            }
            IrExpr::ArrayGet { array, index } => {
                format!("(array-get {} {})", self.expr(array), self.expr(index))
            }
            IrExpr::InstanceOf { value, ty } => {
                format!("(is {} {})", self.type_name(ty), self.expr(value))
            }
            IrExpr::Cast { value, ty, safe } => format!(
                "({} {} {})",
                if *safe { "as?" } else { "as" },
                self.type_name(ty),
                self.expr(value)
            ),
            IrExpr::PrimitiveCast { value, from, to } => format!(
                "(prim-cast {}->{} {})",
                from.name(),
                to.name(),
                self.expr(value)
            ),
            IrExpr::ThrowNullPointer => "(throw-npe)".to_string(),
        }
    }

    pub fn stmt(&self, stmt: &IrStmt) -> String {
        match &stmt.kind {
            StmtKind::Assign {
                target: Some(target),
                value,
            } => format!("(assign {} {})", self.expr(target), self.expr(value)),
            StmtKind::Assign { target: None, value } => format!("(eval {})", self.expr(value)),
            StmtKind::Block { label, body } => {
                let head = match label {
                    Some(label) => format!("block {}", self.label(*label)),
                    None => "block".to_string(),
                };
                self.stmt_list(&head, body)
            }
            StmtKind::If {
                condition,
                then_body,
                else_body,
            } => {
                let mut out = format!("(if {} {}", self.expr(condition), self.stmt_list("then", then_body));
                if !else_body.is_empty() {
                    out.push(' ');
                    out.push_str(&self.stmt_list("else", else_body));
                }
                out.push(')');
                out
            }
            StmtKind::While {
                label,
                condition,
                body,
            } => format!(
                "(while {} {} {})",
                self.label(*label),
                self.expr(condition),
                self.stmt_list("body", body)
            ),
            StmtKind::DoWhile {
                label,
                body,
                condition,
            } => format!(
                "(do-while {} {} {})",
                self.label(*label),
                self.stmt_list("body", body),
                self.expr(condition)
            ),
            StmtKind::For {
                label,
                pre,
                condition,
                post,
                body,
            } => format!(
                "(for {} {} {} {} {})",
                self.label(*label),
                self.stmt_list("pre", pre),
                self.opt(condition.as_ref()),
                self.stmt_list("post", post),
                self.stmt_list("body", body)
            ),
            StmtKind::Switch {
                label,
                value,
                cases,
                default,
            } => {
                let mut out = format!("(switch {} {}", self.label(*label), self.expr(value));
                for case in cases {
                    out.push(' ');
                    out.push_str(&format!(
                        "(case {} {})",
                        self.list("values", &case.values),
                        self.stmt_list("body", &case.body)
                    ));
                }
                if let Some(default) = default {
                    out.push(' ');
                    out.push_str(&self.stmt_list("default", default));
                }
                out.push(')');
                out
            }
            StmtKind::Try {
                body,
                catches,
                finally,
            } => {
                let mut out = format!("(try {}", self.stmt_list("body", body));
                for clause in catches {
                    let filter = clause
                        .filter
                        .as_ref()
                        .map(|ty| self.type_name(ty))
                        .unwrap_or_else(|| "_".to_string());
                    out.push_str(&format!(
                        " (catch {} {} {})",
                        self.var(clause.var),
                        filter,
                        self.stmt_list("body", &clause.body)
                    ));
                }
                if let Some(finally) = finally {
                    out.push(' ');
                    out.push_str(&self.stmt_list("finally", finally));
                }
                out.push(')');
                out
            }
            StmtKind::Return { value, target } => match value {
                Some(value) => format!("(return {} {})", self.decl(*target), self.expr(value)),
                None => format!("(return {})", self.decl(*target)),
            },
            StmtKind::Throw(value) => format!("(throw {})", self.expr(value)),
            StmtKind::Break(label) => format!("(break {})", self.label(*label)),
            StmtKind::Continue(label) => format!("(continue {})", self.label(*label)),
        }
    }

    pub fn stmts(&self, stmts: &[IrStmt]) -> String {
        stmts.iter().map(|s| self.stmt(s)).collect::<Vec<_>>().join("\n")
    }

    /// Header line plus one statement per line
    pub fn function(&self, id: FunctionId) -> String {
        let function = &self.module.functions[id];
        let mut out = String::new();
        let mut params: Vec<String> = Vec::new();
        if function.captures_this {
            params.push("$this".to_string());
        }
        params.extend(function.captures.iter().map(|v| format!("^{}", self.var(*v))));
        params.extend(function.extension_receiver.iter().map(|v| format!("&{}", self.var(*v))));
        params.extend(function.params.iter().map(|v| self.var(*v)));
        let _ = writeln!(out, "(fun {} ({})", self.decl(function.decl), params.join(" "));
        if let Some(body) = &function.body {
            for stmt in body {
                let _ = writeln!(out, "  {}", self.stmt(stmt));
            }
        }
        out.push(')');
        out
    }

    pub fn module(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "; module {}", self.module.name);
        for (_, file) in self.module.files.iter() {
            let _ = writeln!(out, "; file {}", file.name);
            for (_, decl) in file.decls.iter() {
                self.decl_into(&mut out, decl);
            }
            if let Some(init) = file.initializer {
                let _ = writeln!(out, "{}", self.function(init));
            }
        }
        out
    }

    fn decl_into(&self, out: &mut String, decl: IrDecl) {
        match decl {
            IrDecl::Function(id) => {
                let _ = writeln!(out, "{}", self.function(id));
                for local in self.module.local_decls(id) {
                    self.decl_into(out, local);
                }
            }
            IrDecl::Property(id) => {
                // Accessors are registered beside the property
                let property = &self.module.properties[id];
                let _ = writeln!(out, "(property {})", self.decl(property.decl));
            }
            IrDecl::Class(id) => {
                let class = &self.module.classes[id];
                let closures: Vec<String> = class
                    .closure_fields
                    .iter()
                    .map(|f| self.field(IrField::Closure(*f)))
                    .collect();
                let _ = writeln!(
                    out,
                    "(class {} (closure-fields {}))",
                    self.decl(class.decl),
                    closures.join(" ")
                );
                for (_, member) in class.decls.iter() {
                    self.decl_into(out, member);
                }
            }
        }
    }

    fn list(&self, head: &str, items: &[IrExpr]) -> String {
        let mut out = format!("({}", head);
        for item in items {
            out.push(' ');
            out.push_str(&self.expr(item));
        }
        out.push(')');
        out
    }

    fn stmt_list(&self, head: &str, stmts: &[IrStmt]) -> String {
        let mut out = format!("({}", head);
        for stmt in stmts {
            out.push(' ');
            out.push_str(&self.stmt(stmt));
        }
        out.push(')');
        out
    }

    fn opt(&self, expr: Option<&IrExpr>) -> String {
        expr.map(|e| self.expr(e)).unwrap_or_else(|| "_".to_string())
    }

    fn var(&self, var: VarId) -> String {
        match self.module.variable_name(var) {
            Some(name) => name.to_string(),
            None => format!("%{}", var.as_raw()),
        }
    }

    fn label(&self, label: LabelId) -> String {
        match self.module.labels.get(label).and_then(|l| l.name.as_deref()) {
            Some(name) => format!("@{}", name),
            None => format!("@L{}", label.as_raw()),
        }
    }

    fn decl(&self, id: DeclId) -> String {
        if self.decls.get(id).is_some() {
            self.decls.qualified_name(id)
        } else {
            format!("<decl {}>", id.as_raw())
        }
    }

    fn field(&self, field: IrField) -> String {
        match field {
            IrField::Backing(property) => format!("(backing {})", self.decl(property)),
            IrField::OuterClass(class) => format!("(outer-link {})", self.decl(class)),
            IrField::Closure(id) => {
                let field = &self.module.closure_fields[id];
                let captured = match field.capture {
                    Capture::Variable(var) => self.var(var),
                    Capture::Instance(class) => format!("this@{}", self.decl(class)),
                };
                format!("(closure {} {})", field.name, captured)
            }
            IrField::Delegate(id) => format!("(delegate {})", self.module.delegate_fields[id].name),
        }
    }

    pub fn type_name(&self, ty: &TypeRef) -> String {
        match ty {
            TypeRef::Primitive(kind) => kind.name().to_string(),
            TypeRef::String => "String".to_string(),
            TypeRef::Class(id) => self.decl(*id),
            TypeRef::Array(elem) => format!("Array<{}>", self.type_name(elem)),
            TypeRef::Function(arity) => format!("Function{}", arity),
            TypeRef::Any => "Any".to_string(),
            TypeRef::Unit => "Unit".to_string(),
            TypeRef::Nothing => "Nothing".to_string(),
            TypeRef::Nullable(inner) => format!("{}?", self.type_name(inner)),
        }
    }
}

fn dump_constant(constant: &Constant) -> String {
    match constant {
        Constant::Int(v) => format!("(const int {})", v),
        Constant::Long(v) => format!("(const long {})", v),
        Constant::Double(v) => format!("(const double {:?})", v),
        Constant::Float(v) => format!("(const float {:?})", v),
        Constant::Char(c) => format!("(const char {:?})", c),
        Constant::String(s) => format!("(const string {:?})", s),
        Constant::Boolean(b) => format!("(const boolean {})", b),
    }
}

/// Dump a single expression
pub fn dump_expr(module: &IrModule, decls: &DeclTable, expr: &IrExpr) -> String {
    SexpDumper::new(module, decls).expr(expr)
}

/// Dump a single statement
pub fn dump_stmt(module: &IrModule, decls: &DeclTable, stmt: &IrStmt) -> String {
    SexpDumper::new(module, decls).stmt(stmt)
}

/// Dump a whole module
pub fn dump_module(module: &IrModule, decls: &DeclTable) -> String {
    SexpDumper::new(module, decls).module()
}
