//! Diagnostics for the kjsc translator
//!
//! A [`Diagnostic`] is one reported failure: severity, an `E`-prefixed code,
//! a message, the span it points at, and any labels, notes and help lines.
//! [`ErrorFormatter`] renders them against a [`SourceMap`], quoting the
//! offending line when the source text is known. Translated units usually
//! arrive without source text, so every part of the output degrades to the
//! bare `file:line:column` location.

use std::fmt;

pub use source_map::{FileId, SourceFile, SourceMap, SourcePosition, SourceSpan};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DiagnosticSeverity {
    Error,
    Warning,
    Info,
}

impl DiagnosticSeverity {
    fn color(self) -> &'static str {
        match self {
            DiagnosticSeverity::Error => "\x1b[31m",
            DiagnosticSeverity::Warning => "\x1b[33m",
            DiagnosticSeverity::Info => "\x1b[36m",
        }
    }
}

impl fmt::Display for DiagnosticSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DiagnosticSeverity::Error => "error",
            DiagnosticSeverity::Warning => "warning",
            DiagnosticSeverity::Info => "info",
        })
    }
}

/// Message attached to a span
#[derive(Debug, Clone, PartialEq)]
pub struct Label {
    pub span: SourceSpan,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: DiagnosticSeverity,
    pub code: Option<String>,
    pub message: String,
    pub span: SourceSpan,
    pub labels: Vec<Label>,
    pub notes: Vec<String>,
    pub help: Vec<String>,
}

impl Diagnostic {
    pub fn is_error(&self) -> bool {
        self.severity == DiagnosticSeverity::Error
    }
}

/// Diagnostics of one translation, in report order
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    pub diagnostics: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.diagnostics.extend(other.diagnostics);
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn len(&self) -> usize {
        self.diagnostics.len()
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_error)
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(|d| d.is_error())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter()
    }
}

pub struct DiagnosticBuilder {
    diagnostic: Diagnostic,
}

impl DiagnosticBuilder {
    fn new(severity: DiagnosticSeverity, message: impl Into<String>, span: SourceSpan) -> Self {
        Self {
            diagnostic: Diagnostic {
                severity,
                code: None,
                message: message.into(),
                span,
                labels: Vec::new(),
                notes: Vec::new(),
                help: Vec::new(),
            },
        }
    }

    pub fn error(message: impl Into<String>, span: SourceSpan) -> Self {
        Self::new(DiagnosticSeverity::Error, message, span)
    }

    pub fn warning(message: impl Into<String>, span: SourceSpan) -> Self {
        Self::new(DiagnosticSeverity::Warning, message, span)
    }

    pub fn info(message: impl Into<String>, span: SourceSpan) -> Self {
        Self::new(DiagnosticSeverity::Info, message, span)
    }

    pub fn code(mut self, code: impl Into<String>) -> Self {
        self.diagnostic.code = Some(code.into());
        self
    }

    pub fn label(mut self, span: SourceSpan, message: impl Into<String>) -> Self {
        self.diagnostic.labels.push(Label {
            span,
            message: message.into(),
        });
        self
    }

    pub fn note(mut self, note: impl Into<String>) -> Self {
        self.diagnostic.notes.push(note.into());
        self
    }

    pub fn help(mut self, help: impl Into<String>) -> Self {
        self.diagnostic.help.push(help.into());
        self
    }

    pub fn build(self) -> Diagnostic {
        self.diagnostic
    }
}

/// Renders diagnostics as text, rustc style:
///
/// ```text
/// error[E5003]: class 'Broken' must declare exactly one primary constructor, found 0
///  --> main.kt:2:1
///   |
/// 2 | class Broken
///   | ^^^^^ class 'Broken' must declare exactly one primary constructor, found 0
///   = note: reported during IR generation
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorFormatter {
    use_colors: bool,
}

impl ErrorFormatter {
    pub fn new() -> Self {
        Self { use_colors: false }
    }

    pub fn with_colors() -> Self {
        Self { use_colors: true }
    }

    fn paint(&self, color: &str, text: &str) -> String {
        if self.use_colors {
            format!("{}{}\x1b[0m", color, text)
        } else {
            text.to_string()
        }
    }

    pub fn format_diagnostics(&self, diagnostics: &Diagnostics, source_map: &SourceMap) -> String {
        diagnostics
            .iter()
            .map(|d| self.format_diagnostic(d, source_map))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn format_diagnostic(&self, diagnostic: &Diagnostic, source_map: &SourceMap) -> String {
        let mut out = String::new();

        let mut header = diagnostic.severity.to_string();
        if let Some(code) = &diagnostic.code {
            header.push_str(&format!("[{}]", code));
        }
        out.push_str(&self.paint(diagnostic.severity.color(), &header));
        out.push_str(": ");
        out.push_str(&self.paint("\x1b[1m", &diagnostic.message));
        out.push('\n');

        let start = diagnostic.span.start;
        let width = start.line.to_string().len();
        let gutter = " ".repeat(width);
        let bar = self.paint("\x1b[96m", "|");

        if let Some(file) = source_map.get_file(diagnostic.span.file_id) {
            out.push_str(&format!(
                "{}{} {}:{}:{}\n",
                gutter,
                self.paint("\x1b[96m", "-->"),
                file.name,
                start.line,
                start.column
            ));

            if let Some(line) = file.get_line(start.line) {
                out.push_str(&format!("{} {}\n", gutter, bar));
                out.push_str(&format!("{:>width$} {} {}\n", start.line, bar, line, width = width));
                let marker = "^".repeat(underline_len(&diagnostic.span, line));
                out.push_str(&format!(
                    "{} {} {}{}",
                    gutter,
                    bar,
                    " ".repeat(start.column.saturating_sub(1)),
                    self.paint(diagnostic.severity.color(), &marker)
                ));
                if let Some(label) = diagnostic.labels.first() {
                    out.push(' ');
                    out.push_str(&label.message);
                }
                out.push('\n');
            }
        }

        for note in &diagnostic.notes {
            out.push_str(&format!("{} = {}: {}\n", gutter, self.paint("\x1b[1m", "note"), note));
        }
        for help in &diagnostic.help {
            out.push_str(&format!("{} = {}: {}\n", gutter, self.paint("\x1b[32m", "help"), help));
        }
        out
    }
}

/// Width of the `^^^` marker: the span on one line, else the identifier
/// starting at the span, else a single column
fn underline_len(span: &SourceSpan, line: &str) -> usize {
    if span.start.line == span.end.line && span.end.column > span.start.column + 1 {
        return span.end.column - span.start.column;
    }
    let start = span.start.column.saturating_sub(1);
    line.get(start..)
        .map(|rest| {
            rest.chars()
                .take_while(|c| c.is_alphanumeric() || *c == '_' || *c == '$')
                .count()
        })
        .unwrap_or(0)
        .max(1)
}

pub mod translator;

#[cfg(test)]
mod tests {
    use super::*;

    fn span(line: usize, column: usize) -> SourceSpan {
        SourceSpan::single_position(SourcePosition::new(line, column, 0), FileId::new(0))
    }

    #[test]
    fn test_builder_collects_parts() {
        let diagnostic = DiagnosticBuilder::error("unbound local 'x'", span(3, 9))
            .code("E5101")
            .label(span(3, 9), "read here")
            .note("in function 'main'")
            .help("declare the local before reading it")
            .build();

        assert!(diagnostic.is_error());
        assert_eq!(diagnostic.code.as_deref(), Some("E5101"));
        assert_eq!(diagnostic.labels.len(), 1);
        assert_eq!(diagnostic.notes, vec!["in function 'main'".to_string()]);
        assert_eq!(diagnostic.help.len(), 1);
    }

    #[test]
    fn test_errors_filter() {
        let mut diagnostics = Diagnostics::new();
        diagnostics.push(DiagnosticBuilder::info("cancelled", span(0, 0)).build());
        assert!(!diagnostics.has_errors());
        diagnostics.push(DiagnosticBuilder::error("bad jump", span(1, 1)).build());
        assert!(diagnostics.has_errors());
        assert_eq!(diagnostics.errors().count(), 1);
        assert_eq!(diagnostics.len(), 2);
    }

    #[test]
    fn test_format_quotes_source_line() {
        let mut source_map = SourceMap::new();
        let file = source_map.add_file("main.kt".to_string(), "fun main() {\n    return@outer 1\n}".to_string());
        let diagnostic = DiagnosticBuilder::error("return to 'outer' from outside of it", SourceSpan::single_position(SourcePosition::new(2, 5, 17), file))
            .code("E5202")
            .label(SourceSpan::single_position(SourcePosition::new(2, 5, 17), file), "reported here")
            .note("reported during IR generation")
            .build();

        let text = ErrorFormatter::new().format_diagnostic(&diagnostic, &source_map);
        let expected = [
            "error[E5202]: return to 'outer' from outside of it",
            " --> main.kt:2:5",
            "  |",
            "2 |     return@outer 1",
            "  |     ^^^^^^ reported here",
            "  = note: reported during IR generation",
            "",
        ];
        assert_eq!(text, expected.join("\n"));
    }

    #[test]
    fn test_format_without_source_text() {
        let mut source_map = SourceMap::new();
        source_map.insert(FileId::new(0), "main.kt".to_string(), String::new());
        let diagnostic = DiagnosticBuilder::info("translation cancelled before rendering", span(0, 0))
            .code("E9003")
            .build();

        let text = ErrorFormatter::new().format_diagnostic(&diagnostic, &source_map);
        assert_eq!(text, "info[E9003]: translation cancelled before rendering\n --> main.kt:0:0\n");
    }
}
