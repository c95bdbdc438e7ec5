//! Diagnostic builders for translator failures
//!
//! Every phase reports through these, so codes, labels and notes look the
//! same whether IR generation, a lowering pass or the renderer gave up.

use crate::{Diagnostic, DiagnosticBuilder, FileId, SourcePosition, SourceSpan};

pub struct TranslatorDiagnostics;

impl TranslatorDiagnostics {
    /// One-character span at a resolved position
    pub fn span_at(file_id: usize, line: usize, column: usize, byte_offset: usize) -> SourceSpan {
        SourceSpan::single_position(
            SourcePosition::new(line, column, byte_offset),
            FileId::new(file_id),
        )
    }

    /// A phase rejected its input
    pub fn phase_error(
        phase: &str,
        code: impl Into<String>,
        message: impl Into<String>,
        span: SourceSpan,
        help: Option<&str>,
    ) -> Diagnostic {
        let message = message.into();
        let mut builder = DiagnosticBuilder::error(message.clone(), span.clone())
            .code(code)
            .label(span, message)
            .note(format!("reported during {}", phase));
        if let Some(help) = help {
            builder = builder.help(help);
        }
        builder.build()
    }

    /// Lowered IR broke an invariant a later phase depends on
    pub fn invariant_violation(
        code: impl Into<String>,
        message: impl Into<String>,
        span: SourceSpan,
        function: Option<&str>,
    ) -> Diagnostic {
        let message = message.into();
        let mut builder = DiagnosticBuilder::error(message.clone(), span.clone())
            .code(code)
            .label(span, "in code lowered from here");
        if let Some(function) = function {
            builder = builder.note(format!("in function '{}'", function));
        }
        builder
            .help("this is a translator bug; the IR failed validation after lowering")
            .build()
    }

    /// Translation stopped on request before `phase`
    pub fn cancelled(code: impl Into<String>, phase: &str) -> Diagnostic {
        let span = Self::span_at(0, 0, 0, 0);
        DiagnosticBuilder::info(format!("translation cancelled before {}", phase), span)
            .code(code)
            .note("no output was produced")
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DiagnosticSeverity;

    #[test]
    fn test_phase_error_carries_code_and_phase() {
        let span = TranslatorDiagnostics::span_at(1, 3, 7, 40);
        let diagnostic = TranslatorDiagnostics::phase_error(
            "rendering",
            "E5401",
            "raw code must be a single string constant",
            span,
            Some("pass a string literal"),
        );
        assert_eq!(diagnostic.severity, DiagnosticSeverity::Error);
        assert_eq!(diagnostic.code.as_deref(), Some("E5401"));
        assert_eq!(diagnostic.span.start.line, 3);
        assert_eq!(diagnostic.span.end.column, 8);
        assert_eq!(diagnostic.notes, vec!["reported during rendering".to_string()]);
        assert_eq!(diagnostic.help.len(), 1);
    }

    #[test]
    fn test_invariant_violation_names_function() {
        let span = TranslatorDiagnostics::span_at(0, 1, 1, 0);
        let diagnostic =
            TranslatorDiagnostics::invariant_violation("E5303", "dangling variable", span, Some("main"));
        assert_eq!(diagnostic.notes, vec!["in function 'main'".to_string()]);
    }

    #[test]
    fn test_cancelled_is_informational() {
        let diagnostic = TranslatorDiagnostics::cancelled("E9003", "rendering");
        assert_eq!(diagnostic.severity, DiagnosticSeverity::Info);
        assert!(diagnostic.message.contains("rendering"));
    }
}
