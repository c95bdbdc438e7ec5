//! IR Validation
//!
//! Structural checks over lowered IR, run between the transform pipeline
//! and rendering when enabled. Each check reports a [`LoweringError`]
//! instead of stopping at the first problem:
//! - every declaration is registered in the container that owns it
//! - no free variable or outer-instance reference survives closure lowering
//! - variables are referenced only from the function that owns them
//! - break/continue target an enclosing construct
//! - constructor calls supply every parameter, closure parameters included

use super::arena::{FunctionId, LabelId, VarId};
use super::decls::{Container, IrDecl, IrFunction, IrModule};
use super::expr::{Invocation, IrExpr};
use super::stmt::{IrStmt, StmtKind};
use super::visit::{child_lists, fold_expr, stmt_exprs};
use crate::error_codes;
use crate::tast::{DeclId, SourceLocation};
use std::fmt;

/// Types of lowering errors
#[derive(Debug, Clone, PartialEq)]
pub enum LoweringErrorKind {
    /// A free variable or outer-instance reference was not rewritten
    UnloweredCapture { description: String },

    /// A constructor call does not match the constructor's parameters
    ConstructorArity {
        constructor: DeclId,
        expected: usize,
        found: usize,
    },

    /// Variable used outside of the function that declares it
    DanglingVariable { var: VarId },

    /// Jump to a construct that does not enclose it
    DanglingLabel { label: LabelId },

    /// Declaration missing from, or registered twice in, container maps
    OwnershipViolation { decl: DeclId, reason: String },
}

/// Invariant violation found in lowered IR
#[derive(Debug, Clone, PartialEq)]
pub struct LoweringError {
    pub kind: LoweringErrorKind,
    /// Name of the function the problem was found in
    pub function: Option<String>,
    pub location: SourceLocation,
}

impl LoweringError {
    pub fn code(&self) -> u16 {
        match self.kind {
            LoweringErrorKind::UnloweredCapture { .. } => error_codes::UNLOWERED_CAPTURE,
            LoweringErrorKind::ConstructorArity { .. } => error_codes::CONSTRUCTOR_ARITY,
            LoweringErrorKind::DanglingVariable { .. } => error_codes::DANGLING_VARIABLE,
            LoweringErrorKind::DanglingLabel { .. } => error_codes::DANGLING_LABEL,
            LoweringErrorKind::OwnershipViolation { .. } => error_codes::OWNERSHIP_VIOLATION,
        }
    }

    pub fn message(&self) -> String {
        let detail = match &self.kind {
            LoweringErrorKind::UnloweredCapture { description } => {
                format!("capture was not lowered: {}", description)
            }
            LoweringErrorKind::ConstructorArity {
                constructor,
                expected,
                found,
            } => format!(
                "constructor {} called with {} arguments, expected {}",
                constructor, found, expected
            ),
            LoweringErrorKind::DanglingVariable { var } => {
                format!("{} is not owned by the referencing function", var)
            }
            LoweringErrorKind::DanglingLabel { label } => {
                format!("jump target {} does not enclose the jump", label)
            }
            LoweringErrorKind::OwnershipViolation { decl, reason } => format!("{}: {}", decl, reason),
        };
        match &self.function {
            Some(function) => format!("in '{}': {}", function, detail),
            None => detail,
        }
    }
}

impl fmt::Display for LoweringError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} at {}: {}",
            error_codes::format_error_code(self.code()),
            self.location,
            self.message()
        )
    }
}

impl std::error::Error for LoweringError {}

/// Validate a lowered module, collecting every violation
pub fn validate_module(module: &IrModule) -> Result<(), Vec<LoweringError>> {
    let mut errors = Vec::new();
    check_ownership(module, &mut errors);
    for (id, function) in module.functions.iter() {
        if let Some(body) = &function.body {
            let mut checker = FunctionChecker {
                module,
                id,
                function,
                labels: Vec::new(),
                errors: &mut errors,
            };
            checker.check_stmts(body);
        }
    }
    tracing::debug!("validated module '{}': {} problems", module.name, errors.len());
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_ownership(module: &IrModule, errors: &mut Vec<LoweringError>) {
    let mut expect = |decl: DeclId, entry: IrDecl, container: Container, location: SourceLocation| {
        if !decl.is_valid() {
            return;
        }
        let registered = module
            .decl_map(container)
            .and_then(|map| map.get(decl))
            .is_some_and(|found| found == entry);
        if !registered || module.owner(decl) != Some(container) {
            errors.push(LoweringError {
                kind: LoweringErrorKind::OwnershipViolation {
                    decl,
                    reason: "not registered in its owning container".to_string(),
                },
                function: None,
                location,
            });
        }
    };
    for (id, class) in module.classes.iter() {
        expect(class.decl, IrDecl::Class(id), class.container, class.location);
    }
    for (id, function) in module.functions.iter() {
        expect(function.decl, IrDecl::Function(id), function.container, function.location);
    }
    for (id, property) in module.properties.iter() {
        expect(property.decl, IrDecl::Property(id), property.container, SourceLocation::unknown());
    }
}

struct LabelScope {
    label: LabelId,
    is_loop: bool,
}

struct FunctionChecker<'a, 'e> {
    module: &'a IrModule,
    id: FunctionId,
    function: &'a IrFunction,
    labels: Vec<LabelScope>,
    errors: &'e mut Vec<LoweringError>,
}

impl FunctionChecker<'_, '_> {
    fn report(&mut self, kind: LoweringErrorKind, location: SourceLocation) {
        self.errors.push(LoweringError {
            kind,
            function: Some(self.function.name.clone()),
            location,
        });
    }

    fn owns(&self, var: VarId) -> bool {
        let function = self.function;
        let declared = function.variables.contains(&var)
            || function.params.contains(&var)
            || function.extension_receiver == Some(var)
            || function.captures.contains(&var);
        declared && (self.module.variables[var].function == self.id || function.captures.contains(&var))
    }

    fn check_stmts(&mut self, stmts: &[IrStmt]) {
        for stmt in stmts {
            self.check_stmt(stmt);
        }
    }

    fn check_stmt(&mut self, stmt: &IrStmt) {
        for expr in stmt_exprs(stmt) {
            self.check_expr(expr, stmt.location);
        }
        match &stmt.kind {
            StmtKind::Break(label) => {
                if !self.labels.iter().any(|s| s.label == *label) {
                    self.report(LoweringErrorKind::DanglingLabel { label: *label }, stmt.location);
                }
            }
            StmtKind::Continue(label) => {
                if !self.labels.iter().any(|s| s.label == *label && s.is_loop) {
                    self.report(LoweringErrorKind::DanglingLabel { label: *label }, stmt.location);
                }
            }
            _ => {}
        }

        let scope = stmt.label().map(|label| LabelScope {
            label,
            is_loop: matches!(
                stmt.kind,
                StmtKind::While { .. } | StmtKind::DoWhile { .. } | StmtKind::For { .. }
            ),
        });
        let pushed = scope.is_some();
        if let Some(scope) = scope {
            self.labels.push(scope);
        }
        for list in child_lists(stmt) {
            self.check_stmts(list);
        }
        if pushed {
            self.labels.pop();
        }
    }

    fn check_expr(&mut self, expr: &IrExpr, location: SourceLocation) {
        let found = fold_expr(expr, Vec::new(), &mut |mut found, e| {
            found.push(e);
            found
        });
        for e in found {
            match e {
                IrExpr::Var(v) if v.free => self.report(
                    LoweringErrorKind::UnloweredCapture {
                        description: format!("free reference to {}", v.var),
                    },
                    location,
                ),
                IrExpr::Var(v) if !self.owns(v.var) => {
                    self.report(LoweringErrorKind::DanglingVariable { var: v.var }, location)
                }
                IrExpr::OuterThis(class) => self.report(
                    LoweringErrorKind::UnloweredCapture {
                        description: format!("outer instance of {}", class),
                    },
                    location,
                ),
                IrExpr::New {
                    constructor, args, ..
                } => self.check_arity(*constructor, args.len(), location),
                IrExpr::Invoke(Invocation { function, args, .. }) => {
                    let is_constructor = self
                        .module
                        .function_by_decl(*function)
                        .is_some_and(|id| self.module.functions[id].is_constructor());
                    if is_constructor {
                        self.check_arity(*function, args.len(), location);
                    }
                }
                _ => {}
            }
        }
    }

    fn check_arity(&mut self, constructor: DeclId, found: usize, location: SourceLocation) {
        let Some(id) = self.module.function_by_decl(constructor) else {
            return;
        };
        let expected = self.module.functions[id].params.len();
        if expected != found {
            self.report(
                LoweringErrorKind::ConstructorArity {
                    constructor,
                    expected,
                    found,
                },
                location,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::decls::VariableKind;
    use crate::ir::expr::VarRef;
    use crate::tast::FunctionKind;

    fn module_with_function() -> (IrModule, FunctionId) {
        let mut module = IrModule::new("test");
        let file = module.add_file("a.kt", Vec::new());
        let decl = DeclId::from_raw(0);
        let function = module.functions.alloc(IrFunction::new(
            decl,
            "f",
            FunctionKind::TopLevel,
            Container::File(file),
            SourceLocation::unknown(),
        ));
        module.register(Container::File(file), decl, IrDecl::Function(function));
        (module, function)
    }

    #[test]
    fn test_clean_function_validates() {
        let (mut module, function) = module_with_function();
        let x = module.new_variable(Some("x".into()), VariableKind::Local, function);
        let label = module.new_label(None);
        module.functions[function].body = Some(vec![
            IrStmt::assign(IrExpr::var(x), IrExpr::int(1), SourceLocation::unknown()),
            IrStmt::new(
                StmtKind::While {
                    label,
                    condition: IrExpr::True,
                    body: vec![IrStmt::new(StmtKind::Break(label), SourceLocation::unknown())],
                },
                SourceLocation::unknown(),
            ),
        ]);
        assert!(validate_module(&module).is_ok());
    }

    #[test]
    fn test_free_reference_is_reported() {
        let (mut module, function) = module_with_function();
        let x = module.new_variable(Some("x".into()), VariableKind::Local, function);
        module.functions[function].body = Some(vec![IrStmt::eval(
            IrExpr::Var(VarRef { var: x, free: true }),
            SourceLocation::unknown(),
        )]);
        let errors = validate_module(&module).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].code(), error_codes::UNLOWERED_CAPTURE);
    }

    #[test]
    fn test_jump_outside_target_is_reported() {
        let (mut module, function) = module_with_function();
        let label = module.new_label(None);
        module.functions[function].body = Some(vec![
            IrStmt::new(
                StmtKind::Block {
                    label: Some(label),
                    body: Vec::new(),
                },
                SourceLocation::unknown(),
            ),
            IrStmt::new(StmtKind::Break(label), SourceLocation::unknown()),
        ]);
        let errors = validate_module(&module).unwrap_err();
        assert!(matches!(errors[0].kind, LoweringErrorKind::DanglingLabel { .. }));
    }

    #[test]
    fn test_unregistered_declaration_is_reported() {
        let (mut module, function) = module_with_function();
        let decl = module.functions[function].decl;
        module.unregister(decl, IrDecl::Function(function));
        let errors = validate_module(&module).unwrap_err();
        assert_eq!(errors[0].code(), error_codes::OWNERSHIP_VIOLATION);
    }
}
