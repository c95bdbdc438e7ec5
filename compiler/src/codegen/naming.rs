//! Target name allocation
//!
//! Every identifier the renderer emits goes through a [`NameScope`]: source
//! names are sanitized into valid identifiers, reserved words get a `$`
//! suffix and collisions within a scope get a numeric suffix.

use std::collections::HashSet;

/// Words that can never be used as plain identifiers in ES5 output
pub const RESERVED_WORDS: &[&str] = &[
    "break", "case", "catch", "class", "const", "continue", "debugger", "default", "delete", "do",
    "else", "enum", "export", "extends", "false", "finally", "for", "function", "if", "implements",
    "import", "in", "instanceof", "interface", "let", "new", "null", "package", "private",
    "protected", "public", "return", "static", "super", "switch", "this", "throw", "true", "try",
    "typeof", "var", "void", "while", "with", "yield", "arguments", "eval", "undefined", "NaN",
    "Infinity", "Object", "Function", "Array", "String", "Number", "Boolean", "Math", "Error",
    "console", "kotlin",
];

/// Identifier of the module's export object
pub const EXPORTS: &str = "_";

/// Identifier the runtime library is bound to inside the module wrapper
pub const RUNTIME: &str = "$runtime";

pub fn is_reserved(name: &str) -> bool {
    RESERVED_WORDS.contains(&name)
}

pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

/// Turn a source name into a usable identifier.
///
/// Accessor names like `<get-size>` become `get_size`; any other character
/// that cannot appear in an identifier becomes `_`.
pub fn sanitize(name: &str) -> String {
    let trimmed = name.trim_start_matches('<').trim_end_matches('>');
    let mut out = String::with_capacity(trimmed.len());
    for c in trimmed.chars() {
        if c.is_ascii_alphanumeric() || c == '_' || c == '$' {
            out.push(c);
        } else {
            out.push('_');
        }
    }
    if out.is_empty() {
        out.push('_');
    }
    if out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    if is_reserved(&out) {
        out.push('$');
    }
    out
}

/// A set of taken identifiers
#[derive(Debug, Clone, Default)]
pub struct NameScope {
    taken: HashSet<String>,
}

impl NameScope {
    /// A scope where the module-wide identifiers are already taken
    pub fn new() -> Self {
        let mut scope = Self::default();
        scope.reserve(EXPORTS);
        scope.reserve(RUNTIME);
        scope
    }

    /// Mark `name` as taken without allocating it
    pub fn reserve(&mut self, name: &str) {
        self.taken.insert(name.to_string());
    }

    pub fn is_taken(&self, name: &str) -> bool {
        self.taken.contains(name) || is_reserved(name)
    }

    /// Allocate a fresh identifier based on `suggestion`
    pub fn fresh(&mut self, suggestion: &str) -> String {
        let base = sanitize(suggestion);
        if !self.is_taken(&base) {
            self.taken.insert(base.clone());
            return base;
        }
        let mut index = 0usize;
        loop {
            let candidate = format!("{}_{}", base, index);
            if !self.is_taken(&candidate) {
                self.taken.insert(candidate.clone());
                return candidate;
            }
            index += 1;
        }
    }

    /// Nested scope: sees everything taken here, allocations stay local
    pub fn child(&self) -> Self {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("<get-size>"), "get_size");
        assert_eq!(sanitize("plus"), "plus");
        assert_eq!(sanitize("function"), "function$");
        assert_eq!(sanitize("1st"), "_1st");
        assert_eq!(sanitize("a b"), "a_b");
    }

    #[test]
    fn test_collisions_get_suffixes() {
        let mut scope = NameScope::new();
        assert_eq!(scope.fresh("x"), "x");
        assert_eq!(scope.fresh("x"), "x_0");
        assert_eq!(scope.fresh("x"), "x_1");
        assert_eq!(scope.fresh("_"), "__0");
        assert_eq!(scope.fresh("var"), "var$");
    }

    #[test]
    fn test_child_scope_does_not_leak() {
        let mut outer = NameScope::new();
        outer.fresh("a");
        let mut inner = outer.child();
        assert_eq!(inner.fresh("a"), "a_0");
        assert_eq!(inner.fresh("b"), "b");
        assert_eq!(outer.fresh("b"), "b");
    }

    #[test]
    fn test_identifier_validity() {
        assert!(is_valid_identifier("$this"));
        assert!(is_valid_identifier("Outer$Inner"));
        assert!(!is_valid_identifier("2x"));
        assert!(!is_valid_identifier("a-b"));
    }
}
