//! kjsc - resolved Kotlin-like declarations to ES5 JavaScript
//!
//! # Usage
//!
//! ```bash
//! # Translate a resolved unit to JavaScript
//! kjsc translate app.json -o app.js
//!
//! # Show the IR after the transform passes
//! kjsc dump app.json --stage optimized
//!
//! # Lower and validate without emitting anything
//! kjsc check app.json
//!
//! # Describe a diagnostic code
//! kjsc explain E5401
//! ```

use clap::{Parser, Subcommand, ValueEnum};
use compiler::error_codes::{error_registry, get_error_code, parse_error_code};
use compiler::ir::dump_module;
use compiler::logging;
use compiler::pipeline::{TranslationError, TranslationInput, Translator, TranslatorConfig};
use diagnostics::{ErrorFormatter, FileId, SourceMap};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process;

#[derive(Parser)]
#[command(name = "kjsc")]
#[command(version = "0.1.0")]
#[command(about = "Translate resolved Kotlin-like declarations to ES5 JavaScript", long_about = None)]
struct Cli {
    /// More log output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Translator settings (`[translator]` table)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Translate a JSON-encoded resolved unit to JavaScript
    Translate {
        /// Resolved input
        input: PathBuf,

        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Override the module name
        #[arg(long)]
        module_name: Option<String>,

        /// Skip temp and compare elimination
        #[arg(long)]
        no_optimize: bool,

        /// Validate the IR before rendering
        #[arg(long)]
        validate: bool,

        /// Print translation statistics to stderr
        #[arg(long)]
        stats: bool,
    },

    /// Print the IR of a unit as S-expressions
    Dump {
        input: PathBuf,

        #[arg(long, value_enum, default_value = "optimized")]
        stage: DumpStage,
    },

    /// Generate, lower and validate without emitting
    Check {
        input: PathBuf,
    },

    /// Describe a diagnostic code, or list all of them
    Explain {
        /// Code such as E5401
        code: Option<String>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum DumpStage {
    /// Straight out of generation
    Generated,
    /// After lowering and intrinsic substitution
    Lowered,
    /// After the optimization passes
    Optimized,
}

fn main() {
    let cli = Cli::parse();
    if std::env::var_os("RUST_LOG").is_some() {
        logging::init_from_env();
    } else {
        logging::init_with_level(logging::level_for_verbosity(cli.verbose));
    }

    let result = load_config(cli.config.as_deref()).and_then(|config| match cli.command {
        Commands::Translate { input, output, module_name, no_optimize, validate, stats } => {
            let mut config = config;
            if let Some(name) = module_name {
                config.module_name = name;
            }
            config.optimize &= !no_optimize;
            config.validate_ir |= validate;
            config.collect_statistics |= stats;
            translate(&input, output.as_deref(), config, stats)
        }
        Commands::Dump { input, stage } => dump(&input, config, stage),
        Commands::Check { input } => {
            let config = TranslatorConfig { validate_ir: true, ..config };
            check(&input, config)
        }
        Commands::Explain { code } => explain(code.as_deref()),
    });

    if let Err(e) = result {
        eprintln!("error: {}", e);
        process::exit(1);
    }
}

fn load_config(path: Option<&Path>) -> Result<TranslatorConfig, String> {
    match path {
        Some(path) => TranslatorConfig::load(path).map_err(|e| format!("{}: {}", path.display(), e)),
        None if Path::new("kjsc.toml").exists() => {
            TranslatorConfig::load("kjsc.toml").map_err(|e| format!("kjsc.toml: {}", e))
        }
        None => Ok(TranslatorConfig::default()),
    }
}

fn read_input(path: &Path) -> Result<TranslationInput, String> {
    let source = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    TranslationInput::from_json(&source).map_err(|e| format!("{}: malformed input: {}", path.display(), e))
}

/// Default module name: the input's file stem
fn module_name_for(path: &Path, config: &mut TranslatorConfig) {
    if config.module_name == TranslatorConfig::default().module_name {
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            config.module_name = stem.to_string();
        }
    }
}

/// Source map over the input's files. Text is loaded when a file of that
/// name exists next to the input, so diagnostics can quote it.
fn source_map_for(path: &Path, input: &TranslationInput) -> SourceMap {
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    let mut source_map = SourceMap::new();
    for (index, file) in input.files.iter().enumerate() {
        let content = std::fs::read_to_string(base.join(&file.name)).unwrap_or_default();
        source_map.insert(FileId::new(index), file.name.clone(), content);
    }
    source_map
}

fn report(path: &Path, input: &TranslationInput, error: TranslationError) -> String {
    let source_map = source_map_for(path, input);
    let formatter = if std::io::stderr().is_terminal() {
        ErrorFormatter::with_colors()
    } else {
        ErrorFormatter::new()
    };
    eprint!("{}", formatter.format_diagnostics(&error.to_diagnostics(), &source_map));
    format!("translation of {} failed", path.display())
}

fn translate(
    path: &Path,
    output: Option<&Path>,
    mut config: TranslatorConfig,
    show_stats: bool,
) -> Result<(), String> {
    let input = read_input(path)?;
    module_name_for(path, &mut config);
    let mut translator = Translator::with_config(config);
    let translation = translator
        .translate(&input)
        .map_err(|e| report(path, &input, e))?;

    match output {
        Some(output) => std::fs::write(output, &translation.source)
            .map_err(|e| format!("cannot write {}: {}", output.display(), e))?,
        None => print!("{}", translation.source),
    }

    if show_stats {
        let stats = translator.stats();
        eprintln!("files:                 {}", stats.files);
        eprintln!("classes:               {}", stats.classes);
        eprintln!("functions:             {}", stats.functions);
        eprintln!("delegations:           {}", stats.delegations);
        eprintln!("closure fields:        {}", stats.closure_fields);
        eprintln!("intrinsics:            {}", stats.intrinsics_substituted);
        eprintln!("optimization rounds:   {}", stats.optimization_rounds);
        eprintln!("statements eliminated: {}", stats.statements_eliminated);
        eprintln!("variables eliminated:  {}", stats.variables_eliminated);
        eprintln!("compares folded:       {}", stats.compares_folded);
        eprintln!("total time:            {}us", stats.total_time_us());
    }
    Ok(())
}

fn dump(path: &Path, mut config: TranslatorConfig, stage: DumpStage) -> Result<(), String> {
    let input = read_input(path)?;
    module_name_for(path, &mut config);
    config.optimize = matches!(stage, DumpStage::Optimized);
    let mut translator = Translator::with_config(config);

    let mut module = translator.generate(&input).map_err(|e| report(path, &input, e))?;
    if !matches!(stage, DumpStage::Generated) {
        translator
            .transform(&mut module, &input.decls)
            .map_err(|e| report(path, &input, e))?;
    }
    print!("{}", dump_module(&module, &input.decls));
    Ok(())
}

fn check(path: &Path, mut config: TranslatorConfig) -> Result<(), String> {
    let input = read_input(path)?;
    module_name_for(path, &mut config);
    let mut translator = Translator::with_config(config);
    let mut module = translator.generate(&input).map_err(|e| report(path, &input, e))?;
    translator
        .transform(&mut module, &input.decls)
        .map_err(|e| report(path, &input, e))?;
    translator
        .render(&module, &input.decls)
        .map_err(|e| report(path, &input, e))?;
    println!(
        "{}: ok ({} classes, {} functions)",
        path.display(),
        translator.stats().classes,
        translator.stats().functions
    );
    Ok(())
}

fn explain(code: Option<&str>) -> Result<(), String> {
    let Some(code) = code else {
        for entry in error_registry().get_range(0, u16::MAX) {
            println!("{}", entry);
        }
        return Ok(());
    };
    let entry = parse_error_code(code)
        .and_then(get_error_code)
        .ok_or_else(|| format!("unknown diagnostic code '{}'", code))?;
    println!("{}", entry);
    if let Some(help) = entry.help {
        println!("\nhelp: {}", help);
    }
    Ok(())
}
