//! Engine error types with source-mapped template diagnostics

use kdo_core::CoreError;
use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

/// Main engine error type
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Template error")]
    Template(#[from] TemplateError),

    #[error("Overlay error in {file}: {message}")]
    Overlay { file: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl EngineError {
    /// Attribute the error to `chart` as a render failure
    pub fn into_core(self, chart: &str) -> CoreError {
        match self {
            EngineError::Core(err) => err,
            EngineError::Template(err) => CoreError::Render {
                chart: chart.to_string(),
                message: err.describe(),
            },
            other => CoreError::Render {
                chart: chart.to_string(),
                message: other.to_string(),
            },
        }
    }
}

/// Error kind for categorizing template errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum TemplateErrorKind {
    UndefinedVariable,
    UnknownFilter,
    UnknownFunction,
    SyntaxError,
    TypeError,
    InvalidOperation,
    YamlParseError,
    Other,
}

/// Template-specific error with source information
#[derive(Error, Debug, Diagnostic, Clone)]
#[error("{message}")]
#[diagnostic(code(kdo::template::render))]
pub struct TemplateError {
    pub message: String,

    pub kind: TemplateErrorKind,

    /// Template source code
    #[source_code]
    pub src: NamedSource<String>,

    #[label("error occurred here")]
    pub span: Option<SourceSpan>,

    #[help]
    pub suggestion: Option<String>,

    /// Line of the error, 1-based
    pub line: Option<usize>,
}

impl TemplateError {
    pub fn from_minijinja(err: minijinja::Error, template_name: &str, template_source: &str) -> Self {
        let kind = categorize(&err);
        let line = err.line();
        let span = line.and_then(|line_num| calculate_span(template_source, line_num));
        let message = err
            .detail()
            .map(str::to_string)
            .unwrap_or_else(|| err.to_string())
            .replace("undefined value", "undefined variable");

        Self {
            suggestion: suggest(kind, &message),
            message,
            kind,
            src: NamedSource::new(template_name, template_source.to_string()),
            span,
            line,
        }
    }

    /// A document that does not parse after rendering
    pub fn yaml(template_name: &str, rendered: &str, err: &serde_yaml::Error) -> Self {
        let line = err.location().map(|l| l.line());
        Self {
            message: format!("rendered output is not valid YAML: {}", err),
            kind: TemplateErrorKind::YamlParseError,
            src: NamedSource::new(template_name, rendered.to_string()),
            span: line.and_then(|l| calculate_span(rendered, l)),
            suggestion: Some("check indentation of included blocks (nindent)".to_string()),
            line,
        }
    }

    pub fn simple(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: TemplateErrorKind::Other,
            src: NamedSource::new("<unknown>", String::new()),
            span: None,
            suggestion: None,
            line: None,
        }
    }

    pub fn kind(&self) -> TemplateErrorKind {
        self.kind
    }

    /// One-line description naming the template and line
    pub fn describe(&self) -> String {
        let location = match self.line {
            Some(line) => format!("{}:{}", self.src.name(), line),
            None => self.src.name().to_string(),
        };
        match &self.suggestion {
            Some(help) => format!("{}: {} ({})", location, self.message, help),
            None => format!("{}: {}", location, self.message),
        }
    }
}

fn categorize(err: &minijinja::Error) -> TemplateErrorKind {
    match err.kind() {
        minijinja::ErrorKind::UndefinedError => TemplateErrorKind::UndefinedVariable,
        minijinja::ErrorKind::UnknownFilter => TemplateErrorKind::UnknownFilter,
        minijinja::ErrorKind::UnknownFunction => TemplateErrorKind::UnknownFunction,
        minijinja::ErrorKind::SyntaxError => TemplateErrorKind::SyntaxError,
        minijinja::ErrorKind::InvalidOperation => TemplateErrorKind::InvalidOperation,
        minijinja::ErrorKind::NonPrimitive | minijinja::ErrorKind::NonKey => {
            TemplateErrorKind::TypeError
        }
        _ => TemplateErrorKind::Other,
    }
}

fn suggest(kind: TemplateErrorKind, message: &str) -> Option<String> {
    match kind {
        TemplateErrorKind::UndefinedVariable if message.contains("value.") => {
            Some("use `values` (plural) to access the values object".to_string())
        }
        TemplateErrorKind::UndefinedVariable => Some(
            "available globals: values, methods, chart, release, files, template, capabilities, k8s"
                .to_string(),
        ),
        TemplateErrorKind::UnknownFilter => Some(format!(
            "available filters: {}",
            crate::engine::FILTERS.join(", ")
        )),
        _ => None,
    }
}

/// Span covering line `line_num` of `source`
fn calculate_span(source: &str, line_num: usize) -> Option<SourceSpan> {
    let mut offset = 0;
    for (index, line) in source.lines().enumerate() {
        if index + 1 == line_num {
            return Some(SourceSpan::new(offset.into(), line.len()));
        }
        offset += line.len() + 1;
    }
    None
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calculate_span() {
        let source = "a: 1\nbb: 2\nccc: 3";
        let span = calculate_span(source, 2).unwrap();
        assert_eq!(span.offset(), 5);
        assert_eq!(span.len(), 5);
        assert!(calculate_span(source, 9).is_none());
    }

    #[test]
    fn test_into_core_keeps_core_errors() {
        let err = EngineError::Core(CoreError::StreamCancelled);
        assert!(err.into_core("x").is_cancelled());

        let err = EngineError::Template(TemplateError::simple("boom"));
        match err.into_core("shop") {
            CoreError::Render { chart, message } => {
                assert_eq!(chart, "shop");
                assert!(message.contains("boom"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
