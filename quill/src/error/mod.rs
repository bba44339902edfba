//! Error types and reporting

use crate::ast::{SourceMap, Span};
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, CompileError>;

/// Outcome of a pipeline stage, ordered by severity
///
/// The worst status of several errors is their maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, serde::Serialize)]
pub enum Status {
    #[default]
    Success,
    Runtime,
    Type,
    Bind,
    Parse,
    Scan,
}

impl Status {
    pub fn is_success(self) -> bool {
        self == Status::Success
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Status::Success => "success",
            Status::Runtime => "runtime",
            Status::Type => "type",
            Status::Bind => "bind",
            Status::Parse => "parse",
            Status::Scan => "scan",
        };
        write!(f, "{s}")
    }
}

/// Secondary message attached to an error, e.g. a previous declaration
#[derive(Debug, Clone, PartialEq)]
pub struct Note {
    pub message: String,
    pub span: Option<Span>,
}

/// Compile error
#[derive(Debug, Clone, Error)]
pub enum CompileError {
    #[error("scan error: {message}")]
    Scan { message: String, span: Span, note: Option<Note> },

    #[error("parse error: {message}")]
    Parse { message: String, span: Span, note: Option<Note> },

    #[error("bind error: {message}")]
    Bind { message: String, span: Span, note: Option<Note> },

    #[error("type error: {message}")]
    Type { message: String, span: Span, note: Option<Note> },

    #[error("runtime error: {message}")]
    Runtime { message: String, span: Span, note: Option<Note> },
}

impl CompileError {
    pub fn scan(message: impl Into<String>, span: Span) -> Self {
        Self::Scan { message: message.into(), span, note: None }
    }

    pub fn parse(message: impl Into<String>, span: Span) -> Self {
        Self::Parse { message: message.into(), span, note: None }
    }

    pub fn bind(message: impl Into<String>, span: Span) -> Self {
        Self::Bind { message: message.into(), span, note: None }
    }

    pub fn type_error(message: impl Into<String>, span: Span) -> Self {
        Self::Type { message: message.into(), span, note: None }
    }

    pub fn runtime(message: impl Into<String>, span: Span) -> Self {
        Self::Runtime { message: message.into(), span, note: None }
    }

    /// Attach a note, optionally pointing at another location
    pub fn with_note(mut self, message: impl Into<String>, at: Option<Span>) -> Self {
        let new = Some(Note { message: message.into(), span: at });
        match &mut self {
            Self::Scan { note, .. }
            | Self::Parse { note, .. }
            | Self::Bind { note, .. }
            | Self::Type { note, .. }
            | Self::Runtime { note, .. } => *note = new,
        }
        self
    }

    pub fn status(&self) -> Status {
        match self {
            Self::Scan { .. } => Status::Scan,
            Self::Parse { .. } => Status::Parse,
            Self::Bind { .. } => Status::Bind,
            Self::Type { .. } => Status::Type,
            Self::Runtime { .. } => Status::Runtime,
        }
    }

    pub fn span(&self) -> Span {
        match self {
            Self::Scan { span, .. }
            | Self::Parse { span, .. }
            | Self::Bind { span, .. }
            | Self::Type { span, .. }
            | Self::Runtime { span, .. } => *span,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Scan { message, .. }
            | Self::Parse { message, .. }
            | Self::Bind { message, .. }
            | Self::Type { message, .. }
            | Self::Runtime { message, .. } => message,
        }
    }

    pub fn note(&self) -> Option<&Note> {
        match self {
            Self::Scan { note, .. }
            | Self::Parse { note, .. }
            | Self::Bind { note, .. }
            | Self::Type { note, .. }
            | Self::Runtime { note, .. } => note.as_ref(),
        }
    }

    /// `file:line:col: <kind> error: <message>` followed by an optional note line
    pub fn render(&self, sources: &SourceMap) -> String {
        let mut out = format!("{}: {self}", sources.describe(self.span()));
        if let Some(note) = self.note() {
            match note.span {
                Some(span) => {
                    out.push_str(&format!("\n{}: note: {}", sources.describe(span), note.message));
                }
                None => out.push_str(&format!("\nnote: {}", note.message)),
            }
        }
        out
    }
}

/// Accumulator used by passes that keep going after the first error
#[derive(Debug, Default)]
pub struct Diagnostics {
    errors: Vec<CompileError>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, error: CompileError) {
        tracing::trace!(status = %error.status(), message = error.message(), "diagnostic");
        self.errors.push(error);
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.errors.extend(other.errors);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Worst status reported so far
    pub fn status(&self) -> Status {
        self.errors.iter().map(CompileError::status).max().unwrap_or_default()
    }

    pub fn errors(&self) -> &[CompileError] {
        &self.errors
    }

    pub fn into_errors(self) -> Vec<CompileError> {
        self.errors
    }

    /// All errors rendered one after another
    pub fn render(&self, sources: &SourceMap) -> String {
        self.errors.iter().map(|e| e.render(sources)).collect::<Vec<_>>().join("\n")
    }
}

impl From<CompileError> for Diagnostics {
    fn from(error: CompileError) -> Self {
        Self { errors: vec![error] }
    }
}

/// Report error with ariadne
pub fn report_error(
    sources: &SourceMap,
    error: &CompileError,
    out: &mut impl std::io::Write,
) -> std::io::Result<()> {
    use ariadne::{Color, Label, Report, ReportKind};

    let name = |span: Span| {
        sources
            .get(span.file)
            .map(|f| f.name.clone())
            .unwrap_or_else(|| "<unknown>".to_string())
    };
    let span = error.span();
    let file = name(span);

    let mut report = Report::build(ReportKind::Error, (file.clone(), span.start..span.end))
        .with_message(format!("{} error", error.status()))
        .with_label(
            Label::new((file.clone(), span.start..span.end))
                .with_message(error.message())
                .with_color(Color::Red),
        );
    if let Some(note) = error.note() {
        match note.span {
            Some(at) => {
                report = report.with_label(
                    Label::new((name(at), at.start..at.end))
                        .with_message(&note.message)
                        .with_color(Color::Blue),
                );
            }
            None => report = report.with_note(&note.message),
        }
    }

    let cache = ariadne::sources(
        (0..sources.len() as u32)
            .filter_map(|id| sources.get(crate::ast::FileId(id)))
            .map(|f| (f.name.clone(), f.text.clone())),
    );
    report.finish().write(cache, out)
}
