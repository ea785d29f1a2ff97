//! Error types and diagnostic reporting

use codespan_reporting::diagnostic::{Diagnostic, Label};
use codespan_reporting::files::SimpleFiles;
use codespan_reporting::term;
use codespan_reporting::term::termcolor::{ColorChoice, StandardStream};
use thiserror::Error;

use super::Span;

/// Assembly error with source location
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AsmError {
    #[error("Syntax error at {span:?}: {message}")]
    Syntax { message: String, span: Span },

    #[error("Unknown instruction `{mnemonic}`")]
    UnknownMnemonic { mnemonic: String, span: Span },

    #[error("Operand error at {span:?}: {message}")]
    Operand { message: String, span: Span },

    #[error("`{mnemonic}` requires the {feature} extension")]
    MissingFeature {
        mnemonic: String,
        feature: &'static str,
        span: Span,
    },

    #[error("Predication error: {message}")]
    Predication { message: String, span: Span },

    #[error("Encoding overflow: {message}")]
    Overflow { message: String },

    #[error("Symbol `{name}` defined more than once")]
    DuplicateSymbol { name: String, span: Span },
}

impl AsmError {
    pub fn syntax(message: impl Into<String>, span: Span) -> Self {
        Self::Syntax {
            message: message.into(),
            span,
        }
    }

    pub fn operand(message: impl Into<String>, span: Span) -> Self {
        Self::Operand {
            message: message.into(),
            span,
        }
    }

    pub fn predication(message: impl Into<String>, span: Span) -> Self {
        Self::Predication {
            message: message.into(),
            span,
        }
    }

    pub fn overflow(message: impl Into<String>) -> Self {
        Self::Overflow {
            message: message.into(),
        }
    }

    /// The span this error points at, if it carries one
    pub fn span(&self) -> Option<Span> {
        match self {
            AsmError::Syntax { span, .. }
            | AsmError::UnknownMnemonic { span, .. }
            | AsmError::Operand { span, .. }
            | AsmError::MissingFeature { span, .. }
            | AsmError::Predication { span, .. }
            | AsmError::DuplicateSymbol { span, .. } => Some(*span),
            AsmError::Overflow { .. } => None,
        }
    }
}

pub type AsmResult<T> = Result<T, AsmError>;

/// Severity of a collected diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

/// A diagnostic tied to a source location, collected during assembly
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diag {
    pub severity: Severity,
    pub message: String,
    pub span: Span,
}

impl Diag {
    pub fn error(error: &AsmError, line_span: Span) -> Self {
        Self {
            severity: Severity::Error,
            message: error.to_string(),
            span: error.span().unwrap_or(line_span),
        }
    }

    pub fn warning(message: impl Into<String>, span: Span) -> Self {
        Self {
            severity: Severity::Warning,
            message: message.into(),
            span,
        }
    }
}

/// Diagnostic reporter for pretty error output
pub struct DiagnosticReporter {
    files: SimpleFiles<String, String>,
    writer: StandardStream,
    config: term::Config,
}

impl DiagnosticReporter {
    pub fn new() -> Self {
        Self {
            files: SimpleFiles::new(),
            writer: StandardStream::stderr(ColorChoice::Auto),
            config: term::Config::default(),
        }
    }

    pub fn add_file(&mut self, name: impl Into<String>, source: impl Into<String>) -> usize {
        self.files.add(name.into(), source.into())
    }

    pub fn report(&self, file_id: usize, diag: &Diag) {
        let diagnostic = match diag.severity {
            Severity::Error => Diagnostic::error(),
            Severity::Warning => Diagnostic::warning(),
        }
        .with_message(match diag.severity {
            Severity::Error => "Assembly error",
            Severity::Warning => "Warning",
        })
        .with_labels(vec![
            Label::primary(file_id, diag.span.start..diag.span.end).with_message(&diag.message),
        ]);

        let _ = term::emit(&mut self.writer.lock(), &self.config, &self.files, &diagnostic);
    }
}

impl Default for DiagnosticReporter {
    fn default() -> Self {
        Self::new()
    }
}
