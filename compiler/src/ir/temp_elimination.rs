//! Temporary Variable Elimination
//!
//! Folds single-definition temporaries back into the expression that uses
//! them. Each statement list is walked forward once with a stack of pending
//! definitions:
//!
//! - a reference to the most recent pending definition is replaced by its
//!   value and the definition statement is deleted
//! - trivial definitions (literals, `this`, reads of named locals) are
//!   copied into every use they reach
//! - anything whose evaluation could observe or change the pending values
//!   flushes them: effectful calls, field writes, stores to a local the
//!   values read, and every loop, branch, switch or try boundary
//!
//! Unused definitions without side effects are deleted together with their
//! variable. Counts are taken per function and the pass repeats on a
//! function until it stops changing, so a second run finds nothing to do.

use super::arena::{FunctionId, VarId};
use super::decls::IrModule;
use super::expr::IrExpr;
use super::optimization::{OptimizationPass, OptimizationResult, PassId};
use super::stmt::{IrStmt, StmtKind};
use super::visit::{child_lists, fold_expr, for_each_child_mut, for_each_list_mut, own_effect, stmt_exprs, Effect};
use std::collections::{BTreeSet, HashMap, HashSet};

/// Upper bound on repetitions over one function
const MAX_ITERATIONS: usize = 16;

#[derive(Debug, Default)]
struct Counts {
    defs: HashMap<VarId, usize>,
    uses: HashMap<VarId, usize>,
    trivial: HashSet<VarId>,
}

impl Counts {
    fn uses(&self, var: VarId) -> usize {
        self.uses.get(&var).copied().unwrap_or(0)
    }

    fn defs(&self, var: VarId) -> usize {
        self.defs.get(&var).copied().unwrap_or(0)
    }
}

fn count_uses(expr: &IrExpr, counts: &mut Counts) {
    fold_expr(expr, (), &mut |(), e| {
        if let IrExpr::Var(v) = e {
            *counts.uses.entry(v.var).or_insert(0) += 1;
        }
    });
}

/// Definitions, uses and trivial definitions of every variable in `stmts`
fn count(module: &IrModule, stmts: &[IrStmt], counts: &mut Counts) {
    for stmt in stmts {
        match &stmt.kind {
            StmtKind::Assign {
                target: Some(IrExpr::Var(target)),
                value,
            } => {
                *counts.defs.entry(target.var).or_insert(0) += 1;
                if is_trivial(module, value) {
                    counts.trivial.insert(target.var);
                }
                count_uses(value, counts);
            }
            StmtKind::Try { catches, .. } => {
                for clause in catches {
                    *counts.defs.entry(clause.var).or_insert(0) += 1;
                }
            }
            _ => {
                for expr in stmt_exprs(stmt) {
                    count_uses(expr, counts);
                }
            }
        }
        for list in child_lists(stmt) {
            count(module, list, counts);
        }
    }
}

/// Copyable without reordering concerns: literals, `this` and reads of
/// named locals or parameters
fn is_trivial(module: &IrModule, value: &IrExpr) -> bool {
    match value {
        IrExpr::Var(v) => !v.free && module.variable_name(v.var).is_some(),
        other => other.is_literal(),
    }
}

/// Effect of a value with local reads treated as pure. Locals are only
/// written by assignments, never by the evaluation of an expression.
fn value_effect(expr: &IrExpr) -> Effect {
    fold_expr(expr, Effect::Pure, &mut |acc, e| match e {
        IrExpr::Var(_) => acc,
        other => acc.max(own_effect(other)),
    })
}

fn reads_var(expr: &IrExpr, var: VarId) -> bool {
    fold_expr(expr, false, &mut |found, e| found || e.as_var().is_some_and(|v| v.var == var))
}

/// Two evaluations can be swapped unless one writes what the other touches
fn commutes(a: Effect, b: Effect) -> bool {
    a == Effect::Pure || b == Effect::Pure || (a == Effect::Reads && b == Effect::Reads)
}

#[derive(Debug)]
struct Pending {
    var: VarId,
    /// Index of the defining statement in the list
    index: usize,
    value: IrExpr,
    effect: Effect,
    trivial: bool,
    copies: usize,
}

/// Forward walk over one statement list
struct ListWalker<'c> {
    counts: &'c Counts,
    candidates: &'c HashSet<VarId>,
    pending: Vec<Pending>,
    /// Definitions put back into their statements
    restored: Vec<(usize, IrExpr)>,
    /// Statements to delete
    dead: BTreeSet<usize>,
    removed: Vec<VarId>,
    substituted: usize,
}

impl<'c> ListWalker<'c> {
    fn new(counts: &'c Counts, candidates: &'c HashSet<VarId>) -> Self {
        Self {
            counts,
            candidates,
            pending: Vec::new(),
            restored: Vec::new(),
            dead: BTreeSet::new(),
            removed: Vec::new(),
            substituted: 0,
        }
    }

    fn retire(&mut self, entry: Pending) {
        if entry.trivial && entry.copies == self.counts.uses(entry.var) {
            self.dead.insert(entry.index);
            self.removed.push(entry.var);
        } else {
            self.restored.push((entry.index, entry.value));
        }
    }

    fn flush(&mut self) {
        for entry in std::mem::take(&mut self.pending) {
            self.retire(entry);
        }
    }

    /// Drop pending values that cannot move across an evaluation with
    /// `effect`
    fn observe(&mut self, effect: Effect) {
        if effect == Effect::Pure {
            return;
        }
        let (keep, drop): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|p| p.trivial || commutes(p.effect, effect));
        self.pending = keep;
        for entry in drop {
            self.retire(entry);
        }
    }

    /// A local is about to be overwritten
    fn store_local(&mut self, var: VarId) {
        let (keep, drop): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|p| !reads_var(&p.value, var));
        self.pending = keep;
        for entry in drop {
            self.retire(entry);
        }
    }

    fn visit_expr(&mut self, expr: &mut IrExpr) {
        match expr {
            IrExpr::Var(v) => {
                let Some(position) = self.pending.iter().rposition(|p| p.var == v.var) else {
                    return;
                };
                if self.pending[position].trivial {
                    let entry = &mut self.pending[position];
                    entry.copies += 1;
                    *expr = entry.value.clone();
                    self.substituted += 1;
                    return;
                }
                let on_top = self.pending[position + 1..].iter().all(|p| p.trivial);
                if !on_top {
                    self.flush();
                    return;
                }
                let entry = self.pending.remove(position);
                self.dead.insert(entry.index);
                self.removed.push(entry.var);
                self.substituted += 1;
                *expr = entry.value;
                self.observe(entry.effect);
            }
            IrExpr::Conditional { condition, .. } => {
                self.visit_expr(condition);
                self.flush();
            }
            IrExpr::Binary { op, lhs, .. } if op.is_short_circuit() => {
                self.visit_expr(lhs);
                self.flush();
            }
            _ => {
                for_each_child_mut(expr, &mut |child| self.visit_expr(child));
                self.observe(own_effect(expr));
            }
        }
    }

    fn visit_target(&mut self, target: &mut IrExpr) {
        match target {
            IrExpr::Var(_) => {}
            IrExpr::Field { receiver, .. } => {
                if let Some(receiver) = receiver {
                    self.visit_expr(receiver);
                }
            }
            IrExpr::ArrayGet { array, index } => {
                self.visit_expr(array);
                self.visit_expr(index);
            }
            other => self.visit_expr(other),
        }
    }

    fn visit_stmt(&mut self, stmt: &mut IrStmt, index: usize) {
        match &mut stmt.kind {
            StmtKind::Assign {
                target: Some(IrExpr::Var(target)),
                value,
            } if self.candidates.contains(&target.var) => {
                let var = target.var;
                self.visit_expr(value);
                let effect = value_effect(value);
                if self.counts.uses(var) == 0 {
                    if effect < Effect::Effects {
                        self.dead.insert(index);
                        self.removed.push(var);
                        self.substituted += 1;
                    } else {
                        self.flush();
                    }
                    return;
                }
                let value = std::mem::replace(value, IrExpr::Undefined);
                self.pending.push(Pending {
                    var,
                    index,
                    trivial: self.counts.trivial.contains(&var),
                    value,
                    effect,
                    copies: 0,
                });
            }
            StmtKind::Assign { target, value } => {
                if let Some(target) = target.as_mut() {
                    self.visit_target(target);
                }
                self.visit_expr(value);
                match target {
                    Some(IrExpr::Var(v)) => self.store_local(v.var),
                    Some(_) => self.observe(Effect::Effects),
                    None => {}
                }
            }
            StmtKind::If { condition, .. } => {
                self.visit_expr(condition);
                self.flush();
            }
            StmtKind::Switch { value, .. } => {
                self.visit_expr(value);
                self.flush();
            }
            StmtKind::Return { value, .. } => {
                if let Some(value) = value {
                    self.visit_expr(value);
                }
                self.flush();
            }
            StmtKind::Throw(value) => {
                self.visit_expr(value);
                self.flush();
            }
            StmtKind::While { .. }
            | StmtKind::DoWhile { .. }
            | StmtKind::For { .. }
            | StmtKind::Try { .. }
            | StmtKind::Block { .. }
            | StmtKind::Break(_)
            | StmtKind::Continue(_) => self.flush(),
        }
    }

    /// Walk `stmts`, then put back what stayed and delete what was folded
    fn run(mut self, stmts: &mut Vec<IrStmt>) -> (usize, Vec<VarId>) {
        for index in 0..stmts.len() {
            let placeholder = IrStmt::eval(IrExpr::Undefined, stmts[index].location);
            let mut stmt = std::mem::replace(&mut stmts[index], placeholder);
            self.visit_stmt(&mut stmt, index);
            stmts[index] = stmt;
        }
        self.flush();

        for (index, restored) in std::mem::take(&mut self.restored) {
            if let StmtKind::Assign { value, .. } = &mut stmts[index].kind {
                *value = restored;
            }
        }
        if !self.dead.is_empty() {
            let mut index = 0;
            stmts.retain(|_| {
                let keep = !self.dead.contains(&index);
                index += 1;
                keep
            });
        }
        (self.substituted, self.removed)
    }
}

/// Candidates: one definition, no display name, not captured by a lifted
/// function, and either trivially defined or used at most once
fn candidates(module: &IrModule, counts: &Counts, captured: &HashSet<VarId>) -> HashSet<VarId> {
    counts
        .defs
        .keys()
        .copied()
        .filter(|var| {
            counts.defs(*var) == 1
                && module.variable_name(*var).is_none()
                && !captured.contains(var)
                && (counts.trivial.contains(var) || counts.uses(*var) <= 1)
        })
        .collect()
}

/// Temporary elimination as an optimization pass
#[derive(Debug)]
pub struct TempEliminationPass {
    captured: HashSet<VarId>,
    max_iterations: usize,
    /// Functions that still had work left when the iteration cap was reached
    capped: usize,
}

impl Default for TempEliminationPass {
    fn default() -> Self {
        Self {
            captured: HashSet::new(),
            max_iterations: MAX_ITERATIONS,
            capped: 0,
        }
    }
}

impl TempEliminationPass {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn capped_functions(&self) -> usize {
        self.capped
    }
}

impl OptimizationPass for TempEliminationPass {
    fn id(&self) -> PassId {
        PassId::TempElimination
    }

    fn name(&self) -> &'static str {
        "temp-elimination"
    }

    fn run_on_module(&mut self, module: &mut IrModule) -> OptimizationResult {
        self.captured = module
            .functions
            .iter()
            .flat_map(|(_, f)| f.captures.iter().copied())
            .collect();
        let mut result = OptimizationResult::unchanged();
        let ids: Vec<FunctionId> = module.functions.ids().collect();
        for id in ids {
            let Some(mut body) = module.functions[id].body.take() else {
                continue;
            };
            result = result.combine(self.run_on_function(module, id, &mut body));
            module.functions[id].body = Some(body);
        }
        result
    }

    fn run_on_function(&mut self, module: &mut IrModule, function: FunctionId, body: &mut Vec<IrStmt>) -> OptimizationResult {
        let mut result = OptimizationResult::unchanged();
        let mut settled = false;
        for _ in 0..self.max_iterations {
            let mut counts = Counts::default();
            count(module, body, &mut counts);
            let candidates = candidates(module, &counts, &self.captured);
            if candidates.is_empty() {
                settled = true;
                break;
            }

            let mut substituted = 0;
            let mut removed = Vec::new();
            for_each_list_mut(body, &mut |list| {
                let (count, vars) = ListWalker::new(&counts, &candidates).run(list);
                substituted += count;
                removed.extend(vars);
            });
            if substituted == 0 {
                settled = true;
                break;
            }

            result.modified = true;
            result.statements_eliminated += removed.len();
            for var in removed {
                if module.unregister_variable(var) {
                    result.variables_eliminated += 1;
                }
            }
        }
        if !settled {
            self.capped += 1;
            tracing::warn!(
                "temp elimination in '{}' stopped after {} iterations",
                module.functions[function].name,
                self.max_iterations
            );
        }
        if result.modified {
            tracing::trace!(
                "temp elimination in '{}': {} statements removed",
                module.functions[function].name,
                result.statements_eliminated
            );
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::decls::{Container, IrDecl, IrFunction, VariableKind};
    use crate::ir::dump::SexpDumper;
    use crate::ir::expr::{BinaryOp, IrField, OperandKind};
    use crate::tast::{DeclId, DeclTable, FunctionKind, SourceLocation};

    fn loc() -> SourceLocation {
        SourceLocation::unknown()
    }

    fn setup() -> (IrModule, FunctionId) {
        let mut module = IrModule::new("test");
        let file = module.add_file("a.kt", Vec::new());
        let decl = DeclId::from_raw(0);
        let function = module.functions.alloc(IrFunction::new(
            decl,
            "f",
            FunctionKind::TopLevel,
            Container::File(file),
            loc(),
        ));
        module.register(Container::File(file), decl, IrDecl::Function(function));
        (module, function)
    }

    fn temp(module: &mut IrModule, function: FunctionId) -> VarId {
        module.new_variable(None, VariableKind::Temporary, function)
    }

    fn call(id: u32, args: Vec<IrExpr>) -> IrExpr {
        IrExpr::invoke(None, DeclId::from_raw(id), args, false)
    }

    fn run(module: &mut IrModule, function: FunctionId, body: Vec<IrStmt>) -> Vec<String> {
        module.functions[function].body = Some(body);
        TempEliminationPass::new().run_on_module(module);
        let decls = DeclTable::new();
        let dumper = SexpDumper::new(module, &decls);
        module.functions[function]
            .body
            .as_ref()
            .unwrap()
            .iter()
            .map(|s| dumper.stmt(s))
            .collect()
    }

    #[test]
    fn test_single_use_temporary_is_folded() {
        let (mut module, f) = setup();
        let t = temp(&mut module, f);
        let x = module.new_variable(Some("x".into()), VariableKind::Local, f);
        let body = vec![
            IrStmt::assign(IrExpr::var(t), call(7, vec![]), loc()),
            IrStmt::assign(
                IrExpr::var(x),
                IrExpr::binary(BinaryOp::Add, OperandKind::Int, IrExpr::var(t), IrExpr::int(1)),
                loc(),
            ),
        ];
        let dumped = run(&mut module, f, body);
        assert_eq!(dumped.len(), 1);
        assert!(dumped[0].starts_with("(assign (var x) (add:int (invoke"));
        assert!(!module.functions[f].variables.contains(&t));
    }

    #[test]
    fn test_side_effect_order_is_preserved() {
        // t1 = f(); t2 = g(); h(t2, t1): folding t2 first would run g before f
        let (mut module, f) = setup();
        let t1 = temp(&mut module, f);
        let t2 = temp(&mut module, f);
        let body = vec![
            IrStmt::assign(IrExpr::var(t1), call(1, vec![]), loc()),
            IrStmt::assign(IrExpr::var(t2), call(2, vec![]), loc()),
            IrStmt::eval(call(3, vec![IrExpr::var(t2), IrExpr::var(t1)]), loc()),
        ];
        let dumped = run(&mut module, f, body);
        assert_eq!(dumped.len(), 2, "{:?}", dumped);
        assert!(dumped[0].starts_with("(assign (var %"));
        assert!(module.functions[f].variables.contains(&t1));
        assert!(!module.functions[f].variables.contains(&t2));
    }

    #[test]
    fn test_field_write_flushes_pending_read() {
        let (mut module, f) = setup();
        let t = temp(&mut module, f);
        let field = IrField::Backing(DeclId::from_raw(5));
        let body = vec![
            IrStmt::assign(IrExpr::var(t), IrExpr::field(Some(IrExpr::This), field), loc()),
            IrStmt::assign(IrExpr::field(Some(IrExpr::This), field), IrExpr::int(0), loc()),
            IrStmt::eval(call(3, vec![IrExpr::var(t)]), loc()),
        ];
        let dumped = run(&mut module, f, body);
        assert_eq!(dumped.len(), 3);
    }

    #[test]
    fn test_trivial_definition_copied_to_every_use() {
        let (mut module, f) = setup();
        let t = temp(&mut module, f);
        let body = vec![
            IrStmt::assign(IrExpr::var(t), IrExpr::int(4), loc()),
            IrStmt::eval(call(1, vec![IrExpr::var(t)]), loc()),
            IrStmt::eval(call(2, vec![IrExpr::var(t)]), loc()),
        ];
        let dumped = run(&mut module, f, body);
        assert_eq!(dumped.len(), 2);
        assert!(dumped.iter().all(|s| s.contains("(const int 4)")));
    }

    #[test]
    fn test_unused_pure_definition_is_deleted() {
        let (mut module, f) = setup();
        let t = temp(&mut module, f);
        let u = temp(&mut module, f);
        let body = vec![
            IrStmt::assign(IrExpr::var(t), IrExpr::int(1), loc()),
            IrStmt::assign(IrExpr::var(u), call(1, vec![]), loc()),
        ];
        let dumped = run(&mut module, f, body);
        assert_eq!(dumped.len(), 1);
        assert!(dumped[0].contains("invoke"));
        assert!(!module.functions[f].variables.contains(&t));
    }

    #[test]
    fn test_second_run_changes_nothing() {
        let (mut module, f) = setup();
        let t = temp(&mut module, f);
        let x = module.new_variable(Some("x".into()), VariableKind::Local, f);
        module.functions[f].body = Some(vec![
            IrStmt::assign(IrExpr::var(t), call(1, vec![IrExpr::var(x)]), loc()),
            IrStmt::new(
                StmtKind::If {
                    condition: IrExpr::var(t),
                    then_body: vec![IrStmt::assign(IrExpr::var(x), IrExpr::int(1), loc())],
                    else_body: Vec::new(),
                },
                loc(),
            ),
        ]);
        TempEliminationPass::new().run_on_module(&mut module);
        let first = module.clone();
        let again = TempEliminationPass::new().run_on_module(&mut module);
        assert!(!again.modified);
        assert_eq!(first, module);
    }

    /// `t = g(); x = t`
    fn folding_module() -> (IrModule, FunctionId) {
        let (mut module, f) = setup();
        let t = temp(&mut module, f);
        let x = module.new_variable(Some("x".into()), VariableKind::Local, f);
        module.functions[f].body = Some(vec![
            IrStmt::assign(IrExpr::var(t), call(7, vec![]), loc()),
            IrStmt::assign(IrExpr::var(x), IrExpr::var(t), loc()),
        ]);
        (module, f)
    }

    #[test]
    fn test_iteration_cap_stops_with_work_left() {
        // One iteration folds the temporary but cannot confirm a fixpoint
        let (mut module, f) = folding_module();
        let mut capped = TempEliminationPass::new().with_max_iterations(1);
        assert!(capped.run_on_module(&mut module).modified);
        assert_eq!(capped.capped_functions(), 1);
        assert_eq!(module.functions[f].body.as_ref().unwrap().len(), 1);

        let (mut module, _) = folding_module();
        let mut pass = TempEliminationPass::new();
        assert!(pass.run_on_module(&mut module).modified);
        assert_eq!(pass.capped_functions(), 0);
    }
}
