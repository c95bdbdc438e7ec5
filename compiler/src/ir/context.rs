//! Generation context
//!
//! Mutable state threaded through IR generation: the statement sink, the
//! variable scopes, the label stack and the active source position. Every
//! nested scope is entered through a closure so that the previous state is
//! restored on exit, including when the closure fails.

use super::arena::{FunctionId, LabelId, VarId};
use super::decls::{IrModule, VariableKind};
use super::expr::{IrExpr, VarRef};
use super::stmt::{IrStmt, StmtKind};
use crate::error_codes;
use crate::tast::{
    ClassInfo, DeclId, DeclInfo, DeclTable, FunctionInfo, LocalId, PropertyInfo, SourceLocation,
};
use std::collections::HashMap;
use std::fmt;

/// Inconsistent front-end input found while generating IR
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationError {
    pub message: String,
    pub location: SourceLocation,
    pub code: u16,
}

impl GenerationError {
    pub fn new(code: u16, message: impl Into<String>, location: SourceLocation) -> Self {
        Self {
            message: message.into(),
            location,
            code,
        }
    }
}

impl fmt::Display for GenerationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} at {}: {}",
            error_codes::format_error_code(self.code),
            self.location,
            self.message
        )
    }
}

impl std::error::Error for GenerationError {}

pub type GenResult<T> = Result<T, GenerationError>;

/// Target of a `break`/`continue`
#[derive(Debug, Clone)]
struct LabelFrame {
    name: Option<String>,
    label: LabelId,
    /// Loops are default targets of unlabeled jumps; switches and blocks
    /// are not
    is_loop: bool,
}

#[derive(Debug, Clone, Copy)]
struct FunctionFrame {
    function: FunctionId,
    decl: DeclId,
}

/// A statement accumulation buffer
#[derive(Debug, Default)]
struct Sink {
    stmts: Vec<IrStmt>,
    /// A terminal statement was appended; later appends are unreachable
    terminated: bool,
}

pub struct GenerationContext<'a> {
    pub decls: &'a DeclTable,
    pub module: IrModule,
    sinks: Vec<Sink>,
    locals: HashMap<LocalId, VarId>,
    /// Locals introduced by each open variable scope
    scopes: Vec<Vec<LocalId>>,
    functions: Vec<FunctionFrame>,
    labels: Vec<LabelFrame>,
    /// Loop label whose `continue` must instead break out of a block
    continue_replacements: HashMap<LabelId, LabelId>,
    location: SourceLocation,
}

impl<'a> GenerationContext<'a> {
    pub fn new(decls: &'a DeclTable, module_name: impl Into<String>) -> Self {
        Self {
            decls,
            module: IrModule::new(module_name),
            sinks: Vec::new(),
            locals: HashMap::new(),
            scopes: Vec::new(),
            functions: Vec::new(),
            labels: Vec::new(),
            continue_replacements: HashMap::new(),
            location: SourceLocation::unknown(),
        }
    }

    pub fn finish(self) -> IrModule {
        debug_assert!(self.sinks.is_empty(), "unbalanced statement sinks");
        self.module
    }

    // ---------------------------------------------------------------------
    // Errors and declaration facts
    // ---------------------------------------------------------------------

    pub fn error(&self, code: u16, message: impl Into<String>) -> GenerationError {
        GenerationError::new(code, message, self.location)
    }

    pub fn decl(&self, id: DeclId) -> GenResult<&'a DeclInfo> {
        self.decls.get(id).ok_or_else(|| {
            self.error(
                error_codes::UNRESOLVED_DECLARATION,
                format!("declaration {} is not in the declaration table", id),
            )
        })
    }

    pub fn function_info(&self, id: DeclId) -> GenResult<&'a FunctionInfo> {
        let decl = self.decl(id)?;
        decl.as_function().ok_or_else(|| {
            self.error(
                error_codes::DECLARATION_KIND_MISMATCH,
                format!("'{}' is not a function", decl.name),
            )
        })
    }

    pub fn class_info(&self, id: DeclId) -> GenResult<&'a ClassInfo> {
        let decl = self.decl(id)?;
        decl.as_class().ok_or_else(|| {
            self.error(
                error_codes::DECLARATION_KIND_MISMATCH,
                format!("'{}' is not a class", decl.name),
            )
        })
    }

    pub fn property_info(&self, id: DeclId) -> GenResult<&'a PropertyInfo> {
        let decl = self.decl(id)?;
        decl.as_property().ok_or_else(|| {
            self.error(
                error_codes::DECLARATION_KIND_MISMATCH,
                format!("'{}' is not a property", decl.name),
            )
        })
    }

    // ---------------------------------------------------------------------
    // Source positions
    // ---------------------------------------------------------------------

    pub fn location(&self) -> SourceLocation {
        self.location
    }

    /// Run `f` with `location` as the active position
    pub fn at<T>(&mut self, location: SourceLocation, f: impl FnOnce(&mut Self) -> GenResult<T>) -> GenResult<T> {
        let saved = self.location;
        if location.is_valid() {
            self.location = location;
        }
        let result = f(self);
        self.location = saved;
        result
    }

    // ---------------------------------------------------------------------
    // Statement sinks
    // ---------------------------------------------------------------------

    /// Append a statement to the current sink, tagged with the active
    /// position. Appends after a terminal statement are dropped.
    pub fn emit(&mut self, kind: StmtKind) {
        let location = self.location;
        let Some(sink) = self.sinks.last_mut() else {
            panic!("statement emitted outside of any block: {:?}", kind);
        };
        if sink.terminated {
            tracing::trace!("dropping unreachable statement at {}", location);
            return;
        }
        let stmt = IrStmt::new(kind, location);
        sink.terminated = stmt.is_terminal();
        sink.stmts.push(stmt);
    }

    pub fn emit_assign(&mut self, target: IrExpr, value: IrExpr) {
        self.emit(StmtKind::Assign {
            target: Some(target),
            value,
        });
    }

    pub fn emit_eval(&mut self, value: IrExpr) {
        self.emit(StmtKind::Assign { target: None, value });
    }

    /// The current sink ended with a terminal statement
    pub fn is_terminated(&self) -> bool {
        self.sinks.last().is_some_and(|s| s.terminated)
    }

    /// Number of statements in the current sink
    pub fn sink_len(&self) -> usize {
        self.sinks.last().map_or(0, |s| s.stmts.len())
    }

    /// Collect the statements `f` emits into a fresh list
    pub fn nested_block<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> GenResult<T>,
    ) -> GenResult<(T, Vec<IrStmt>)> {
        self.sinks.push(Sink::default());
        let result = f(self);
        let sink = self.sinks.pop().unwrap_or_default();
        result.map(|value| (value, sink.stmts))
    }

    /// Append already generated statements to the current sink
    pub fn splice(&mut self, stmts: Vec<IrStmt>) {
        for stmt in stmts {
            let saved = self.location;
            self.location = stmt.location;
            self.emit(stmt.kind);
            self.location = saved;
        }
    }

    // ---------------------------------------------------------------------
    // Functions and variable scopes
    // ---------------------------------------------------------------------

    /// Generate the body of `function`: a fresh sink, variable scope and
    /// label stack. Returns the collected body.
    pub fn nested_function<T>(
        &mut self,
        function: FunctionId,
        f: impl FnOnce(&mut Self) -> GenResult<T>,
    ) -> GenResult<(T, Vec<IrStmt>)> {
        let decl = self.module.functions[function].decl;
        self.functions.push(FunctionFrame { function, decl });
        let labels = std::mem::take(&mut self.labels);
        let replacements = std::mem::take(&mut self.continue_replacements);

        let result = self.nested_variable_scope(|ctx| ctx.nested_block(f));

        self.continue_replacements = replacements;
        self.labels = labels;
        self.functions.pop();
        result
    }

    /// Locals declared inside `f` are removed from the lookup on exit
    pub fn nested_variable_scope<T>(&mut self, f: impl FnOnce(&mut Self) -> GenResult<T>) -> GenResult<T> {
        self.scopes.push(Vec::new());
        let result = f(self);
        if let Some(scope) = self.scopes.pop() {
            for local in scope {
                self.locals.remove(&local);
            }
        }
        result
    }

    pub fn current_function(&self) -> FunctionId {
        match self.functions.last() {
            Some(frame) => frame.function,
            None => panic!("no function is being generated"),
        }
    }

    pub fn current_function_decl(&self) -> DeclId {
        match self.functions.last() {
            Some(frame) => frame.decl,
            None => panic!("no function is being generated"),
        }
    }

    pub fn in_function(&self) -> bool {
        !self.functions.is_empty()
    }

    /// Functions a `return` may target from here: the current function and,
    /// through lambdas and local functions, the functions enclosing them
    pub fn is_return_target(&self, target: DeclId) -> bool {
        for frame in self.functions.iter().rev() {
            if frame.decl == target {
                return true;
            }
            if !self.module.functions[frame.function].kind.is_local() {
                break;
            }
        }
        false
    }

    /// Class declaration whose `this` is in scope
    pub fn this_class(&self) -> Option<DeclId> {
        let function = self.functions.last()?.function;
        let class = self.module.this_class(function)?;
        Some(self.module.classes[class].decl)
    }

    fn bind(&mut self, local: LocalId, var: VarId) {
        self.locals.insert(local, var);
        if let Some(scope) = self.scopes.last_mut() {
            scope.push(local);
        }
    }

    /// Declare a source local in the current function
    pub fn declare_local(&mut self, local: LocalId, name: &str) -> VarId {
        let function = self.current_function();
        let var = self
            .module
            .new_variable(Some(name.to_string()), VariableKind::Local, function);
        self.bind(local, var);
        var
    }

    /// Declare a parameter of `function`
    pub fn declare_parameter(&mut self, local: LocalId, name: &str, function: FunctionId) -> VarId {
        let var = self.module.new_parameter(name, function);
        self.bind(local, var);
        var
    }

    /// A synthesized temporary of the current function
    pub fn new_temp(&mut self) -> VarId {
        let function = self.current_function();
        self.module.new_variable(None, VariableKind::Temporary, function)
    }

    /// Reference to a variable; free when it belongs to another function
    pub fn var_ref(&self, var: VarId) -> IrExpr {
        let free = self.in_function() && self.module.variables[var].function != self.current_function();
        IrExpr::Var(VarRef { var, free })
    }

    pub fn local_ref(&self, local: LocalId) -> GenResult<IrExpr> {
        let var = self.lookup_local(local)?;
        Ok(self.var_ref(var))
    }

    pub fn lookup_local(&self, local: LocalId) -> GenResult<VarId> {
        self.locals.get(&local).copied().ok_or_else(|| {
            self.error(
                error_codes::UNBOUND_LOCAL,
                format!("local {} is not in scope", local),
            )
        })
    }

    /// Evaluates to the same value wherever it is placed in the current
    /// function
    pub fn is_stable(&self, expr: &IrExpr) -> bool {
        match expr {
            IrExpr::Var(v) => {
                let var = &self.module.variables[v.var];
                let function = &self.module.functions[var.function];
                var.kind == VariableKind::Temporary
                    || function.params.contains(&v.var)
                    || function.extension_receiver == Some(v.var)
            }
            IrExpr::FunctionRef(_) => true,
            other => other.is_literal(),
        }
    }

    /// Store `value` in a temporary unless it is already stable
    pub fn materialize(&mut self, value: IrExpr) -> IrExpr {
        if self.is_stable(&value) {
            return value;
        }
        let temp = self.new_temp();
        self.emit_assign(IrExpr::var(temp), value);
        IrExpr::var(temp)
    }

    // ---------------------------------------------------------------------
    // Labels
    // ---------------------------------------------------------------------

    /// Open a jump target for the duration of `f`. Named labels shadow
    /// outer ones with the same name until `f` returns.
    pub fn with_label<T>(
        &mut self,
        name: Option<String>,
        is_loop: bool,
        f: impl FnOnce(&mut Self, LabelId) -> GenResult<T>,
    ) -> GenResult<T> {
        let label = self.module.new_label(name.clone());
        self.labels.push(LabelFrame { name, label, is_loop });
        let result = f(self, label);
        self.labels.pop();
        result
    }

    fn resolve_label(&self, name: Option<&str>) -> GenResult<LabelId> {
        let found = match name {
            Some(name) => self
                .labels
                .iter()
                .rev()
                .find(|frame| frame.name.as_deref() == Some(name)),
            None => self.labels.iter().rev().find(|frame| frame.is_loop),
        };
        found.map(|frame| frame.label).ok_or_else(|| match name {
            Some(name) => self.error(
                error_codes::INVALID_JUMP,
                format!("no enclosing construct is labeled '{}'", name),
            ),
            None => self.error(error_codes::INVALID_JUMP, "jump outside of a loop"),
        })
    }

    pub fn emit_break(&mut self, name: Option<&str>) -> GenResult<()> {
        let label = self.resolve_label(name)?;
        self.emit(StmtKind::Break(label));
        Ok(())
    }

    /// `continue`, redirected to a `break` out of the replacement block when
    /// one is registered for the target loop
    pub fn emit_continue(&mut self, name: Option<&str>) -> GenResult<()> {
        let label = self.resolve_label(name)?;
        match self.continue_replacements.get(&label) {
            Some(block) => self.emit(StmtKind::Break(*block)),
            None => self.emit(StmtKind::Continue(label)),
        }
        Ok(())
    }

    /// While `f` runs, `continue` of `loop_label` breaks out of `block`
    pub fn with_continue_replacement<T>(
        &mut self,
        loop_label: LabelId,
        block: LabelId,
        f: impl FnOnce(&mut Self) -> GenResult<T>,
    ) -> GenResult<T> {
        let previous = self.continue_replacements.insert(loop_label, block);
        let result = f(self);
        match previous {
            Some(previous) => self.continue_replacements.insert(loop_label, previous),
            None => self.continue_replacements.remove(&loop_label),
        };
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::decls::{Container, IrFunction};
    use crate::tast::FunctionKind;

    fn context_with_function(decls: &DeclTable) -> (GenerationContext<'_>, FunctionId) {
        let mut ctx = GenerationContext::new(decls, "test");
        let file = ctx.module.add_file("a.kt", Vec::new());
        let function = ctx.module.functions.alloc(IrFunction::new(
            DeclId::from_raw(0),
            "f",
            FunctionKind::TopLevel,
            Container::File(file),
            SourceLocation::unknown(),
        ));
        (ctx, function)
    }

    #[test]
    fn test_terminal_statement_suppresses_appends() {
        let decls = DeclTable::new();
        let (mut ctx, function) = context_with_function(&decls);
        let (_, body) = ctx
            .nested_function(function, |ctx| {
                ctx.emit(StmtKind::Return {
                    value: None,
                    target: DeclId::from_raw(0),
                });
                ctx.emit_eval(IrExpr::int(1));
                Ok(())
            })
            .unwrap();
        assert_eq!(body.len(), 1);
    }

    #[test]
    fn test_nested_block_restores_sink_on_error() {
        let decls = DeclTable::new();
        let (mut ctx, function) = context_with_function(&decls);
        let (_, body) = ctx
            .nested_function(function, |ctx| {
                ctx.emit_eval(IrExpr::int(1));
                let failed = ctx.nested_block(|ctx| -> GenResult<()> {
                    ctx.emit_eval(IrExpr::int(2));
                    Err(ctx.error(error_codes::UNEXPECTED_STATE, "boom"))
                });
                assert!(failed.is_err());
                ctx.emit_eval(IrExpr::int(3));
                Ok(())
            })
            .unwrap();
        assert_eq!(body.len(), 2);
    }

    #[test]
    fn test_inner_label_shadows_outer_until_exit() {
        let decls = DeclTable::new();
        let (mut ctx, function) = context_with_function(&decls);
        ctx.nested_function(function, |ctx| {
            ctx.with_label(Some("a".into()), true, |ctx, outer| {
                ctx.with_label(Some("a".into()), true, |ctx, inner| {
                    assert_eq!(ctx.resolve_label(Some("a"))?, inner);
                    Ok(())
                })?;
                assert_eq!(ctx.resolve_label(Some("a"))?, outer);
                Ok(())
            })
        })
        .unwrap();
    }

    #[test]
    fn test_unlabeled_jump_skips_switches() {
        let decls = DeclTable::new();
        let (mut ctx, function) = context_with_function(&decls);
        ctx.nested_function(function, |ctx| {
            ctx.with_label(None, true, |ctx, loop_label| {
                ctx.with_label(None, false, |ctx, _switch| {
                    assert_eq!(ctx.resolve_label(None)?, loop_label);
                    Ok(())
                })
            })
        })
        .unwrap();
    }

    #[test]
    fn test_scoped_locals_are_forgotten() {
        let decls = DeclTable::new();
        let (mut ctx, function) = context_with_function(&decls);
        let local = LocalId::from_raw(7);
        ctx.nested_function(function, |ctx| {
            ctx.nested_variable_scope(|ctx| {
                ctx.declare_local(local, "x");
                assert!(ctx.local_ref(local).is_ok());
                Ok(())
            })?;
            assert!(ctx.local_ref(local).is_err());
            Ok(())
        })
        .unwrap();
    }
}
