//! Translation pipeline
//!
//! Drives one unit through the three phases:
//!
//! 1. **Generate**: resolved input to IR ([`Translator::generate`])
//! 2. **Transform**: delegation and closure lowering, intrinsic substitution,
//!    the optimization passes and optional validation
//!    ([`Translator::transform`])
//! 3. **Render**: IR to an ES5 tree and its text ([`Translator::render`])
//!
//! A failed phase aborts the unit; nothing is emitted for it. Phases check a
//! shared [`CancellationToken`] before they start, so a host running several
//! units in parallel can stop the rest once one has failed.

use crate::codegen::{print_program, render_module, JsProgram, RenderError, RenderOptions};
use crate::error_codes::{self, format_error_code, get_error_code};
use crate::ir::closure_lowering::lower_closures;
use crate::ir::context::GenerationError;
use crate::ir::delegation::lower_delegations;
use crate::ir::intrinsics::substitute_intrinsics;
use crate::ir::optimization::{PassManager, DEFAULT_MAX_ROUNDS};
use crate::ir::tast_to_ir::generate_module;
use crate::ir::validation::{validate_module, LoweringError};
use crate::ir::IrModule;
use crate::tast::{DeclTable, SourceLocation, TypedFile};
use diagnostics::translator::TranslatorDiagnostics;
use diagnostics::{Diagnostic, Diagnostics, SourceSpan};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Translator settings, loadable from the `[translator]` table of a
/// `kjsc.toml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslatorConfig {
    /// Name of the emitted module object
    pub module_name: String,

    /// Run temp and compare elimination
    pub optimize: bool,

    /// Check the IR invariants after lowering
    pub validate_ir: bool,

    /// Bound on optimization pass executions
    pub max_optimization_rounds: usize,

    /// Attach `$metadata$` to emitted classes
    pub emit_metadata: bool,

    /// Time phases and count rewrites
    pub collect_statistics: bool,
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            module_name: "main".to_string(),
            optimize: true,
            validate_ir: false,
            max_optimization_rounds: DEFAULT_MAX_ROUNDS,
            emit_metadata: true,
            collect_statistics: true,
        }
    }
}

impl TranslatorConfig {
    /// Unoptimized output with every IR check on
    pub fn development() -> Self {
        Self {
            optimize: false,
            validate_ir: true,
            ..Self::default()
        }
    }

    /// Optimized output, no checks or timing
    pub fn release() -> Self {
        Self {
            optimize: true,
            validate_ir: false,
            collect_statistics: false,
            ..Self::default()
        }
    }

    pub fn with_module_name(mut self, name: impl Into<String>) -> Self {
        self.module_name = name.into();
        self
    }

    /// Parse a `kjsc.toml`. Missing keys, or a missing `[translator]`
    /// table, keep their defaults.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        #[derive(Deserialize, Default)]
        #[serde(default)]
        struct ConfigFile {
            translator: TranslatorConfig,
        }

        let file: ConfigFile = toml::from_str(source).map_err(ConfigError::Parse)?;
        Ok(file.translator)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path.as_ref()).map_err(ConfigError::Io)?;
        Self::from_toml_str(&source)
    }

    fn render_options(&self) -> RenderOptions {
        RenderOptions {
            emit_metadata: self.emit_metadata,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "cannot read configuration: {}", err),
            ConfigError::Parse(err) => write!(f, "invalid configuration: {}", err),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(err) => Some(err),
            ConfigError::Parse(err) => Some(err),
        }
    }
}

/// The resolved front-end output the translator consumes
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranslationInput {
    pub decls: DeclTable,
    pub files: Vec<TypedFile>,
}

impl TranslationInput {
    pub fn new(decls: DeclTable, files: Vec<TypedFile>) -> Self {
        Self { decls, files }
    }

    /// Decode JSON input. The name index of the table is not serialized
    /// and is rebuilt here.
    pub fn from_json(source: &str) -> Result<Self, serde_json::Error> {
        let mut input: TranslationInput = serde_json::from_str(source)?;
        input.decls.reindex();
        Ok(input)
    }
}

/// Shared stop flag. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Phase names used in logs and diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Generate,
    Transform,
    Render,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Generate => "IR generation",
            Phase::Transform => "IR transformation",
            Phase::Render => "rendering",
        })
    }
}

/// Why a unit produced no output
#[derive(Debug, Clone)]
pub enum TranslationError {
    Generation(GenerationError),
    /// Lowering failures, or every invariant validation found broken
    Lowering(Vec<LoweringError>),
    Render(RenderError),
    Cancelled(Phase),
}

impl TranslationError {
    /// Numeric code of the first failure
    pub fn code(&self) -> u16 {
        match self {
            TranslationError::Generation(err) => err.code,
            TranslationError::Lowering(errors) => errors
                .first()
                .map(LoweringError::code)
                .unwrap_or(error_codes::UNKNOWN),
            TranslationError::Render(err) => err.code,
            TranslationError::Cancelled(_) => error_codes::CANCELLED,
        }
    }

    /// One diagnostic per failure
    pub fn to_diagnostics(&self) -> Diagnostics {
        let mut diagnostics = Diagnostics::new();
        match self {
            TranslationError::Generation(err) => {
                diagnostics.push(phase_diagnostic(Phase::Generate, err.code, &err.message, err.location));
            }
            TranslationError::Lowering(errors) => {
                for err in errors {
                    diagnostics.push(TranslatorDiagnostics::invariant_violation(
                        format_error_code(err.code()),
                        err.message(),
                        span_of(err.location),
                        err.function.as_deref(),
                    ));
                }
            }
            TranslationError::Render(err) => {
                diagnostics.push(phase_diagnostic(Phase::Render, err.code, &err.message, err.location));
            }
            TranslationError::Cancelled(phase) => {
                diagnostics.push(TranslatorDiagnostics::cancelled(
                    format_error_code(error_codes::CANCELLED),
                    &phase.to_string(),
                ));
            }
        }
        diagnostics
    }
}

impl fmt::Display for TranslationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranslationError::Generation(err) => write!(f, "{}", err),
            TranslationError::Lowering(errors) => {
                write!(f, "{} IR invariant violation(s)", errors.len())?;
                for err in errors {
                    write!(f, "\n  {}", err)?;
                }
                Ok(())
            }
            TranslationError::Render(err) => write!(f, "{}", err),
            TranslationError::Cancelled(phase) => write!(f, "translation cancelled before {}", phase),
        }
    }
}

impl std::error::Error for TranslationError {}

impl From<GenerationError> for TranslationError {
    fn from(err: GenerationError) -> Self {
        TranslationError::Generation(err)
    }
}

impl From<LoweringError> for TranslationError {
    fn from(err: LoweringError) -> Self {
        TranslationError::Lowering(vec![err])
    }
}

impl From<RenderError> for TranslationError {
    fn from(err: RenderError) -> Self {
        TranslationError::Render(err)
    }
}

fn span_of(location: SourceLocation) -> SourceSpan {
    TranslatorDiagnostics::span_at(
        location.file_id as usize,
        location.line as usize,
        location.column as usize,
        location.byte_offset as usize,
    )
}

fn phase_diagnostic(phase: Phase, code: u16, message: &str, location: SourceLocation) -> Diagnostic {
    let help = get_error_code(code).and_then(|entry| entry.help);
    TranslatorDiagnostics::phase_error(&phase.to_string(), format_error_code(code), message, span_of(location), help)
}

/// Counters and timings of the last translation
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TranslationStats {
    pub files: usize,
    pub classes: usize,
    pub functions: usize,

    /// Forwarding members synthesized for class delegation
    pub delegations: usize,

    /// Captured variables turned into closure fields
    pub closure_fields: usize,

    /// Local classes whose constructors received captures
    pub lowered_classes: usize,

    pub intrinsics_substituted: usize,
    pub optimization_rounds: usize,
    pub statements_eliminated: usize,
    pub variables_eliminated: usize,
    pub compares_folded: usize,

    pub generation_time_us: u64,
    pub transform_time_us: u64,
    pub render_time_us: u64,
}

impl TranslationStats {
    pub fn total_time_us(&self) -> u64 {
        self.generation_time_us + self.transform_time_us + self.render_time_us
    }
}

/// Everything a successful translation produced
#[derive(Debug, Clone)]
pub struct Translation {
    pub module: IrModule,
    pub program: JsProgram,
    pub source: String,
}

/// Runs the phases over one unit at a time
pub struct Translator {
    config: TranslatorConfig,
    stats: TranslationStats,
    cancellation: CancellationToken,
}

impl Default for Translator {
    fn default() -> Self {
        Self::new()
    }
}

impl Translator {
    pub fn new() -> Self {
        Self::with_config(TranslatorConfig::default())
    }

    pub fn with_config(config: TranslatorConfig) -> Self {
        Self {
            config,
            stats: TranslationStats::default(),
            cancellation: CancellationToken::new(),
        }
    }

    /// Share a stop flag with other translators
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn config(&self) -> &TranslatorConfig {
        &self.config
    }

    pub fn stats(&self) -> &TranslationStats {
        &self.stats
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    fn check_cancelled(&self, phase: Phase) -> Result<(), TranslationError> {
        if self.cancellation.is_cancelled() {
            log::info!("translation of '{}' cancelled before {}", self.config.module_name, phase);
            return Err(TranslationError::Cancelled(phase));
        }
        Ok(())
    }

    fn elapsed_us(&self, start: Instant) -> u64 {
        if self.config.collect_statistics {
            start.elapsed().as_micros() as u64
        } else {
            0
        }
    }

    /// Lower the resolved declarations of all files into one IR module
    pub fn generate(&mut self, input: &TranslationInput) -> Result<IrModule, TranslationError> {
        self.check_cancelled(Phase::Generate)?;
        log::info!("generating IR for '{}' from {} file(s)", self.config.module_name, input.files.len());
        let start = Instant::now();

        let module = generate_module(&input.decls, &input.files, &self.config.module_name)?;

        self.stats.files = input.files.len();
        self.stats.classes = module.classes.len();
        self.stats.functions = module.functions.len();
        self.stats.generation_time_us = self.elapsed_us(start);
        log::info!(
            "generated {} class(es) and {} function(s)",
            self.stats.classes,
            self.stats.functions
        );
        Ok(module)
    }

    /// Run the transform passes over generated IR, in place
    pub fn transform(&mut self, module: &mut IrModule, decls: &DeclTable) -> Result<(), TranslationError> {
        self.check_cancelled(Phase::Transform)?;
        let start = Instant::now();

        // Forwarders read the delegate field through `this`, which closure
        // lowering must then see
        self.stats.delegations = lower_delegations(module, decls)?;
        let closures = lower_closures(module)?;
        self.stats.closure_fields = closures.closure_fields;
        self.stats.lowered_classes = closures.lowered_classes;
        self.stats.intrinsics_substituted = substitute_intrinsics(module, decls);
        log::info!(
            "lowered {} delegation(s), {} closure field(s), {} intrinsic call(s)",
            self.stats.delegations,
            self.stats.closure_fields,
            self.stats.intrinsics_substituted
        );

        if self.config.optimize {
            self.check_cancelled(Phase::Transform)?;
            let result = PassManager::default_pipeline()
                .with_max_rounds(self.config.max_optimization_rounds)
                .run(module);
            self.stats.optimization_rounds = result.stats.get("rounds").copied().unwrap_or(0);
            self.stats.compares_folded = result.stats.get("compares_folded").copied().unwrap_or(0);
            self.stats.statements_eliminated = result.statements_eliminated;
            self.stats.variables_eliminated = result.variables_eliminated;
            log::info!(
                "optimized in {} round(s): {} statement(s) and {} variable(s) removed",
                self.stats.optimization_rounds,
                self.stats.statements_eliminated,
                self.stats.variables_eliminated
            );
        }

        if self.config.validate_ir {
            validate_module(module).map_err(TranslationError::Lowering)?;
            log::debug!("IR of '{}' passed validation", module.name);
        }

        self.stats.transform_time_us = self.elapsed_us(start);
        Ok(())
    }

    /// Render transformed IR to a target tree
    pub fn render(&mut self, module: &IrModule, decls: &DeclTable) -> Result<JsProgram, TranslationError> {
        self.check_cancelled(Phase::Render)?;
        let start = Instant::now();
        let program = render_module(module, decls, &self.config.render_options())?;
        self.stats.render_time_us = self.elapsed_us(start);
        log::info!("rendered '{}' to {} top-level statement(s)", module.name, program.body.len());
        Ok(program)
    }

    /// All three phases, then printing
    pub fn translate(&mut self, input: &TranslationInput) -> Result<Translation, TranslationError> {
        self.stats = TranslationStats::default();
        let mut module = self.generate(input)?;
        self.transform(&mut module, &input.decls)?;
        let program = self.render(&module, &input.decls)?;
        let source = print_program(&program);
        if self.config.collect_statistics {
            log::info!("translated '{}' in {}us", self.config.module_name, self.stats.total_time_us());
        }
        Ok(Translation { module, program, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::validation::LoweringErrorKind;
    use crate::logging;

    #[test]
    fn test_config_presets() {
        let dev = TranslatorConfig::development();
        assert!(!dev.optimize);
        assert!(dev.validate_ir);

        let release = TranslatorConfig::release();
        assert!(release.optimize);
        assert!(!release.collect_statistics);
        assert_eq!(release.max_optimization_rounds, DEFAULT_MAX_ROUNDS);
    }

    #[test]
    fn test_config_from_toml() {
        let config = TranslatorConfig::from_toml_str(
            r#"
            [translator]
            module_name = "app"
            optimize = false
            max_optimization_rounds = 8
            "#,
        )
        .unwrap();
        assert_eq!(config.module_name, "app");
        assert!(!config.optimize);
        assert_eq!(config.max_optimization_rounds, 8);
        assert!(config.emit_metadata);

        assert_eq!(TranslatorConfig::from_toml_str("").unwrap(), TranslatorConfig::default());
        assert!(matches!(
            TranslatorConfig::from_toml_str("[translator]\noptimize = 3"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_cancelled_translation_produces_nothing() {
        logging::init_test();
        let mut translator = Translator::new();
        let token = translator.cancellation_token();
        token.cancel();

        let err = translator.translate(&TranslationInput::default()).unwrap_err();
        assert!(matches!(err, TranslationError::Cancelled(Phase::Generate)));
        assert_eq!(err.code(), error_codes::CANCELLED);
        assert_eq!(translator.stats().functions, 0);
    }

    #[test]
    fn test_empty_input_translates() {
        logging::init_test();
        let mut translator = Translator::with_config(TranslatorConfig::development().with_module_name("empty"));
        let translation = translator.translate(&TranslationInput::default()).unwrap();
        assert_eq!(translation.module.name, "empty");
        assert!(translation.source.contains("'use strict';"));
    }

    #[test]
    fn test_lowering_errors_become_diagnostics() {
        let location = SourceLocation::new(0, 4, 9, 52);
        let err = TranslationError::Lowering(vec![LoweringError {
            kind: LoweringErrorKind::DanglingLabel {
                label: crate::ir::LabelId::from_raw(3),
            },
            function: Some("run".to_string()),
            location,
        }]);
        assert_eq!(err.code(), error_codes::DANGLING_LABEL);

        let diagnostics = err.to_diagnostics();
        assert!(diagnostics.has_errors());
        let diagnostic = diagnostics.errors().next().unwrap();
        assert_eq!(diagnostic.code.as_deref(), Some("E5304"));
        assert_eq!(diagnostic.span.start.line, 4);
        assert_eq!(diagnostic.span.start.column, 9);
    }

    #[test]
    fn test_render_error_diagnostic_uses_registry_help() {
        let err = TranslationError::from(RenderError::new(
            error_codes::NON_CONSTANT_RAW_CODE,
            "raw code must be a single string constant",
            SourceLocation::unknown(),
        ));
        let diagnostics = err.to_diagnostics();
        let diagnostic = diagnostics.errors().next().unwrap();
        assert_eq!(diagnostic.code.as_deref(), Some("E5401"));
        assert_eq!(diagnostic.notes, vec!["reported during rendering".to_string()]);
    }
}
