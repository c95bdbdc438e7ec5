//! IR Optimization Passes
//!
//! Optimizations are passes over function bodies, scheduled by a work-list
//! driver: every registered pass starts out pending, the driver repeatedly
//! takes one and runs it, and a pass that changed the module puts the passes
//! listed for it in [`RETRIGGERS`] back on the list. The driver stops when
//! nothing is pending, which is a fixpoint of the whole pipeline.

use super::arena::FunctionId;
use super::decls::IrModule;
use super::stmt::IrStmt;
use std::collections::{BTreeSet, HashMap};

pub use super::compare_elimination::CompareEliminationPass;
pub use super::temp_elimination::TempEliminationPass;

/// Identity of a pass in the scheduling tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PassId {
    TempElimination,
    CompareElimination,
}

/// Passes that may find new work after the key pass changed something
pub static RETRIGGERS: &[(PassId, &[PassId])] = &[
    (PassId::TempElimination, &[PassId::CompareElimination]),
    (PassId::CompareElimination, &[PassId::TempElimination]),
];

pub fn retriggered_by(pass: PassId) -> &'static [PassId] {
    RETRIGGERS
        .iter()
        .find(|(id, _)| *id == pass)
        .map_or(&[], |(_, dependents)| dependents)
}

/// Optimization pass trait
pub trait OptimizationPass {
    fn id(&self) -> PassId;

    /// Get the name of this pass
    fn name(&self) -> &'static str;

    /// Run the pass on a module. The default runs [`Self::run_on_function`]
    /// on every function body, with the body detached from the module.
    fn run_on_module(&mut self, module: &mut IrModule) -> OptimizationResult {
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

    /// Run the pass on one function body
    fn run_on_function(
        &mut self,
        module: &mut IrModule,
        function: FunctionId,
        body: &mut Vec<IrStmt>,
    ) -> OptimizationResult;
}

/// Result of an optimization pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OptimizationResult {
    /// Whether the IR was modified
    pub modified: bool,

    /// Number of statements removed
    pub statements_eliminated: usize,

    /// Number of variables unregistered
    pub variables_eliminated: usize,

    /// Other statistics
    pub stats: HashMap<String, usize>,
}

impl OptimizationResult {
    /// Create a result indicating no changes
    pub fn unchanged() -> Self {
        Self::default()
    }

    /// Create a result indicating changes
    pub fn changed() -> Self {
        Self {
            modified: true,
            ..Self::default()
        }
    }

    /// Combine results
    pub fn combine(mut self, other: OptimizationResult) -> Self {
        self.modified |= other.modified;
        self.statements_eliminated += other.statements_eliminated;
        self.variables_eliminated += other.variables_eliminated;

        for (key, value) in other.stats {
            *self.stats.entry(key).or_insert(0) += value;
        }

        self
    }
}

/// Default bound on pass executions per pipeline run
pub const DEFAULT_MAX_ROUNDS: usize = 64;

/// Optimization pass manager
pub struct PassManager {
    passes: Vec<Box<dyn OptimizationPass>>,
    max_rounds: usize,
}

impl Default for PassManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PassManager {
    /// Create a new pass manager
    pub fn new() -> Self {
        Self {
            passes: Vec::new(),
            max_rounds: DEFAULT_MAX_ROUNDS,
        }
    }

    /// Add a pass to the manager
    pub fn add_pass<P: OptimizationPass + 'static>(&mut self, pass: P) {
        self.passes.push(Box::new(pass));
    }

    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    /// Build the default optimization pipeline
    pub fn default_pipeline() -> Self {
        let mut manager = Self::new();
        manager.add_pass(TempEliminationPass::new());
        manager.add_pass(CompareEliminationPass::new());
        manager
    }

    /// Run passes until none is pending
    pub fn run(&mut self, module: &mut IrModule) -> OptimizationResult {
        let mut total_result = OptimizationResult::unchanged();
        let mut pending: BTreeSet<PassId> = self.passes.iter().map(|p| p.id()).collect();
        let mut rounds = 0;

        while let Some(id) = pending.pop_first() {
            if rounds == self.max_rounds {
                tracing::warn!(
                    "optimization stopped after {} rounds with {} passes pending",
                    rounds,
                    pending.len() + 1
                );
                break;
            }
            rounds += 1;

            let Some(pass) = self.passes.iter_mut().find(|p| p.id() == id) else {
                continue;
            };
            let result = pass.run_on_module(module);
            tracing::debug!(
                "pass {} (round {}): modified={}, {} statements eliminated",
                pass.name(),
                rounds,
                result.modified,
                result.statements_eliminated
            );
            if result.modified {
                for dependent in retriggered_by(id) {
                    if self.passes.iter().any(|p| p.id() == *dependent) {
                        pending.insert(*dependent);
                    }
                }
            }
            total_result = total_result.combine(result);
        }

        total_result.stats.insert("rounds".to_string(), rounds);
        total_result
    }
}
