//! Global Error Code Registry for the kjsc translator
//!
//! Every error the translator reports carries a stable code. Codes are
//! grouped by range so that a code identifies the phase that raised it.
//!
//! # Error Code Ranges
//!
//! - E5000-E5299: IR generation errors (inconsistent front-end input)
//! - E5300-E5399: Lowering and IR validation errors
//! - E5400-E5499: Rendering errors
//! - E9000-E9999: Internal translator errors
//!
//! # Subcategory Organization
//!
//! Within the generation range, the hundreds digit indicates subcategory:
//! - 0: Declaration resolution
//! - 1: Expressions and statements
//! - 2: Control flow and jump targets

use std::collections::HashMap;
use std::fmt;

/// Unresolved declaration reference
pub const UNRESOLVED_DECLARATION: u16 = 5001;
/// Declaration has the wrong kind for its use
pub const DECLARATION_KIND_MISMATCH: u16 = 5002;
/// Constructor or class facts are inconsistent
pub const INVALID_CONSTRUCTOR: u16 = 5003;
/// Local read before it was declared
pub const UNBOUND_LOCAL: u16 = 5101;
/// `this` of a class that does not enclose the use
pub const THIS_OUT_OF_SCOPE: u16 = 5102;
/// Malformed call arguments
pub const ARGUMENT_MISMATCH: u16 = 5103;
/// break/continue outside a loop or to an unknown label
pub const INVALID_JUMP: u16 = 5201;
/// Return target does not enclose the return
pub const INVALID_RETURN_TARGET: u16 = 5202;

/// Free reference left after closure lowering
pub const UNLOWERED_CAPTURE: u16 = 5301;
/// Construction site arity differs from the constructor
pub const CONSTRUCTOR_ARITY: u16 = 5302;
/// Variable referenced but not registered in any live scope
pub const DANGLING_VARIABLE: u16 = 5303;
/// Jump to a construct that does not enclose it
pub const DANGLING_LABEL: u16 = 5304;
/// Declaration registered in the wrong container
pub const OWNERSHIP_VIOLATION: u16 = 5305;

/// Raw-code argument is not a constant string
pub const NON_CONSTANT_RAW_CODE: u16 = 5401;
/// Raw-code fragment does not parse
pub const INVALID_RAW_CODE: u16 = 5402;
/// IR shape no rendering rule covers
pub const UNSUPPORTED_IR: u16 = 5403;

pub const ASSERTION_FAILED: u16 = 9001;
pub const UNEXPECTED_STATE: u16 = 9002;
pub const CANCELLED: u16 = 9003;
pub const UNKNOWN: u16 = 9999;

/// Error code struct containing the numeric code and human-readable description
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ErrorCode {
    /// The numeric error code (e.g., 5001)
    pub code: u16,
    /// Human-readable error category
    pub category: &'static str,
    /// Brief description of what this error means
    pub description: &'static str,
    /// Optional help text with suggestions for fixing the error
    pub help: Option<&'static str>,
}

impl ErrorCode {
    /// Create a new error code
    pub const fn new(
        code: u16,
        category: &'static str,
        description: &'static str,
        help: Option<&'static str>,
    ) -> Self {
        Self {
            code,
            category,
            description,
            help,
        }
    }

    /// Format the error code as "E{code:04}" (e.g., "E5001")
    pub fn format_code(&self) -> String {
        format!("E{:04}", self.code)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}]: {}",
            self.format_code(),
            self.category,
            self.description
        )
    }
}

/// Registry containing all defined error codes
pub struct ErrorCodeRegistry {
    codes: HashMap<u16, ErrorCode>,
}

impl Default for ErrorCodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorCodeRegistry {
    /// Create a new registry with all predefined error codes
    pub fn new() -> Self {
        let mut registry = Self {
            codes: HashMap::new(),
        };
        registry.register_all_codes();
        registry
    }

    /// Get an error code by its numeric value
    pub fn get(&self, code: u16) -> Option<&ErrorCode> {
        self.codes.get(&code)
    }

    /// Get an error code by its formatted string (e.g., "E5001")
    pub fn get_by_string(&self, code_str: &str) -> Option<&ErrorCode> {
        parse_error_code(code_str).and_then(|code| self.get(code))
    }

    fn register(&mut self, error_code: ErrorCode) {
        self.codes.insert(error_code.code, error_code);
    }

    fn register_all_codes(&mut self) {
        // ===== GENERATION ERRORS (E5000-E5299) =====

        self.register(ErrorCode::new(
            UNRESOLVED_DECLARATION,
            "Generation",
            "Unresolved declaration",
            Some("The front-end referenced a declaration missing from the declaration table"),
        ));
        self.register(ErrorCode::new(
            DECLARATION_KIND_MISMATCH,
            "Generation",
            "Declaration kind mismatch",
            Some("A class, function or property was used where another kind was expected"),
        ));
        self.register(ErrorCode::new(
            INVALID_CONSTRUCTOR,
            "Generation",
            "Inconsistent constructor",
            Some("Check that every class has one primary constructor and that delegation targets exist"),
        ));
        self.register(ErrorCode::new(
            UNBOUND_LOCAL,
            "Generation",
            "Unbound local variable",
            Some("The local is read outside the scope that declares it"),
        ));
        self.register(ErrorCode::new(
            THIS_OUT_OF_SCOPE,
            "Generation",
            "Receiver not in scope",
            Some("`this` of a class can only be used inside that class or its nested scopes"),
        ));
        self.register(ErrorCode::new(
            ARGUMENT_MISMATCH,
            "Generation",
            "Argument list does not match the callee",
            None,
        ));
        self.register(ErrorCode::new(
            INVALID_JUMP,
            "Generation",
            "Invalid jump target",
            Some("break and continue must name an enclosing loop"),
        ));
        self.register(ErrorCode::new(
            INVALID_RETURN_TARGET,
            "Generation",
            "Invalid return target",
            Some("A return must target a function that encloses it"),
        ));

        // ===== LOWERING ERRORS (E5300-E5399) =====

        self.register(ErrorCode::new(
            UNLOWERED_CAPTURE,
            "Lowering",
            "Captured reference survived closure lowering",
            Some("This is an internal translator error; please report it"),
        ));
        self.register(ErrorCode::new(
            CONSTRUCTOR_ARITY,
            "Lowering",
            "Construction site does not match constructor arity",
            Some("This is an internal translator error; please report it"),
        ));
        self.register(ErrorCode::new(
            DANGLING_VARIABLE,
            "Lowering",
            "Variable is not registered in any scope",
            Some("This is an internal translator error; please report it"),
        ));
        self.register(ErrorCode::new(
            DANGLING_LABEL,
            "Lowering",
            "Jump target does not enclose the jump",
            Some("This is an internal translator error; please report it"),
        ));
        self.register(ErrorCode::new(
            OWNERSHIP_VIOLATION,
            "Lowering",
            "Declaration owned by more than one container",
            Some("This is an internal translator error; please report it"),
        ));

        // ===== RENDERING ERRORS (E5400-E5499) =====

        self.register(ErrorCode::new(
            NON_CONSTANT_RAW_CODE,
            "Rendering",
            "Raw code argument must be a constant string",
            Some("Pass a string literal to js(...)"),
        ));
        self.register(ErrorCode::new(
            INVALID_RAW_CODE,
            "Rendering",
            "Raw code fragment is not valid JavaScript",
            None,
        ));
        self.register(ErrorCode::new(
            UNSUPPORTED_IR,
            "Rendering",
            "No rendering rule for this IR construct",
            Some("This is an internal translator error; please report it"),
        ));

        // ===== INTERNAL ERRORS (E9000-E9999) =====

        self.register(ErrorCode::new(
            ASSERTION_FAILED,
            "Internal",
            "Translator assertion failed",
            Some("This is an internal translator error; please report it"),
        ));
        self.register(ErrorCode::new(
            UNEXPECTED_STATE,
            "Internal",
            "Unexpected translator state",
            Some("This is an internal translator error; please report it"),
        ));
        self.register(ErrorCode::new(
            CANCELLED,
            "Internal",
            "Translation cancelled",
            None,
        ));
        self.register(ErrorCode::new(
            UNKNOWN,
            "Internal",
            "Unknown error",
            Some("An unexpected error occurred; please report it with context"),
        ));
    }

    /// Get all error codes in a specific range
    pub fn get_range(&self, start: u16, end: u16) -> Vec<&ErrorCode> {
        let mut codes: Vec<&ErrorCode> = self
            .codes
            .values()
            .filter(|code| code.code >= start && code.code <= end)
            .collect();
        codes.sort_by_key(|code| code.code);
        codes
    }

    /// Get all generation error codes (E5000-E5299)
    pub fn get_generation_errors(&self) -> Vec<&ErrorCode> {
        self.get_range(5000, 5299)
    }

    /// Get all lowering error codes (E5300-E5399)
    pub fn get_lowering_errors(&self) -> Vec<&ErrorCode> {
        self.get_range(5300, 5399)
    }

    /// Get all rendering error codes (E5400-E5499)
    pub fn get_rendering_errors(&self) -> Vec<&ErrorCode> {
        self.get_range(5400, 5499)
    }

    /// Validate that an error code is registered
    pub fn is_valid_code(&self, code: u16) -> bool {
        self.codes.contains_key(&code)
    }
}

/// Global error code registry instance
static REGISTRY: std::sync::OnceLock<ErrorCodeRegistry> = std::sync::OnceLock::new();

/// Get the global error code registry
pub fn error_registry() -> &'static ErrorCodeRegistry {
    REGISTRY.get_or_init(ErrorCodeRegistry::new)
}

/// Helper function to get error code by number
pub fn get_error_code(code: u16) -> Option<&'static ErrorCode> {
    error_registry().get(code)
}

/// Helper function to format error code string (e.g., 5001 -> "E5001")
pub fn format_error_code(code: u16) -> String {
    format!("E{:04}", code)
}

/// Helper function to parse error code from string (e.g., "E5001" -> Some(5001))
pub fn parse_error_code(code_str: &str) -> Option<u16> {
    code_str.strip_prefix('E')?.parse::<u16>().ok()
}
