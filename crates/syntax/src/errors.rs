//! Error reporting with source locations.
//!
//! Every stage of the pipeline converts its own error type into a
//! [`SourceError`]. A `SourceError` renders either as the compact snippet
//! format used in messages returned to the host, or as a rich ariadne report.

use ariadne::{Color, ColorGenerator, Label, Report, ReportKind, Source as AriadneSource};
use std::fmt;
use std::io::Write;

use crate::lexer::Lexeme;
use crate::source::{Location, Source};

/// The pipeline stage an error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Unterminated literal, bad escape, unknown character
    Lex,
    /// Syntax error
    Parse,
    /// Type checking error
    Type,
    /// Lowering to bytecode failed
    Compile,
    /// Error raised while running a program
    Runtime,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Lex => write!(f, "lex error"),
            ErrorKind::Parse => write!(f, "parse error"),
            ErrorKind::Type => write!(f, "type error"),
            ErrorKind::Compile => write!(f, "compile error"),
            ErrorKind::Runtime => write!(f, "runtime error"),
        }
    }
}

/// A source-located error with optional hints and notes.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceError {
    /// The main error message
    pub message: String,
    /// Where the error happened
    pub location: Location,
    /// The kind of error
    pub kind: ErrorKind,
    /// An optional hint for fixing the error
    pub hint: Option<String>,
    /// Additional notes providing context
    pub notes: Vec<String>,
    /// Secondary labels pointing to related code
    pub labels: Vec<(Location, String)>,
}

impl SourceError {
    pub fn new(kind: ErrorKind, message: impl Into<String>, location: Location) -> Self {
        Self {
            message: message.into(),
            location,
            kind,
            hint: None,
            notes: Vec::new(),
            labels: Vec::new(),
        }
    }

    pub fn lex(message: impl Into<String>, location: Location) -> Self {
        Self::new(ErrorKind::Lex, message, location)
    }

    pub fn parse(message: impl Into<String>, location: Location) -> Self {
        Self::new(ErrorKind::Parse, message, location)
    }

    pub fn type_error(message: impl Into<String>, location: Location) -> Self {
        Self::new(ErrorKind::Type, message, location)
    }

    pub fn compile(message: impl Into<String>, location: Location) -> Self {
        Self::new(ErrorKind::Compile, message, location)
    }

    pub fn runtime(message: impl Into<String>, location: Location) -> Self {
        Self::new(ErrorKind::Runtime, message, location)
    }

    /// Add a hint for how to fix the error.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Add a note providing additional context.
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    /// Add a secondary label pointing to related code.
    pub fn with_label(mut self, location: Location, message: impl Into<String>) -> Self {
        self.labels.push((location, message.into()));
        self
    }

    /// Fill in line/column from the source if the location only has offsets.
    pub fn resolve(mut self, source: &Source) -> Self {
        if self.location.line == 0 {
            source.resolve(&mut self.location);
        }
        for (location, _) in &mut self.labels {
            if location.line == 0 {
                source.resolve(location);
            }
        }
        self
    }

    /// Render as `message (line:column)` followed by the offending line and a
    /// caret under the error column.
    pub fn render(&self, source: &Source) -> String {
        let mut out = self.to_string();
        let Some(snippet) = source.snippet(self.location.line) else {
            return out;
        };
        // Tabs are kept so the caret lines up with the snippet.
        let pad: String = snippet
            .chars()
            .take(self.location.column)
            .map(|ch| if ch == '\t' { '\t' } else { ' ' })
            .collect();
        out.push_str("\n | ");
        out.push_str(snippet);
        out.push_str("\n | ");
        out.push_str(&pad);
        out.push('^');
        out
    }

    /// Format the error as an ariadne report.
    pub fn report(&self, filename: &str, source: &str) -> String {
        let mut output = Vec::new();
        self.write_report(&mut output, filename, source)
            .expect("writing to Vec should not fail");
        String::from_utf8_lossy(&output).into_owned()
    }

    /// Write the ariadne report to a writer.
    pub fn write_report<W: Write>(
        &self,
        writer: &mut W,
        filename: &str,
        source: &str,
    ) -> std::io::Result<()> {
        let primary_color = match self.kind {
            ErrorKind::Lex | ErrorKind::Parse => Color::Red,
            ErrorKind::Type | ErrorKind::Compile => Color::Magenta,
            ErrorKind::Runtime => Color::Yellow,
        };

        // ariadne counts characters, locations count bytes.
        let range = |location: &Location| {
            let start = char_offset(source, location.from);
            let end = char_offset(source, location.to.max(location.from + 1));
            start..end
        };

        let mut colors = ColorGenerator::new();
        let primary = range(&self.location);
        let mut builder = Report::build(ReportKind::Error, filename, primary.start)
            .with_message(format!("{}: {}", self.kind, self.message))
            .with_label(
                Label::new((filename, primary))
                    .with_message(&self.message)
                    .with_color(primary_color),
            );

        for (location, message) in &self.labels {
            builder = builder.with_label(
                Label::new((filename, range(location)))
                    .with_message(message)
                    .with_color(colors.next()),
            );
        }
        if let Some(hint) = &self.hint {
            builder = builder.with_help(hint);
        }
        for note in &self.notes {
            builder = builder.with_note(note);
        }

        builder
            .finish()
            .write((filename, AriadneSource::from(source)), writer)
    }

    /// Print the ariadne report to stderr.
    pub fn eprint(&self, filename: &str, source: &str) {
        let _ = self.write_report(&mut std::io::stderr(), filename, source);
    }
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.location)
    }
}

impl std::error::Error for SourceError {}

fn char_offset(source: &str, byte: usize) -> usize {
    let byte = byte.min(source.len());
    source
        .char_indices()
        .take_while(|(index, _)| *index < byte)
        .count()
}

/// Convert a chumsky parse error to a SourceError.
pub fn parse_error_to_source_error(error: &chumsky::error::Simple<Lexeme>) -> SourceError {
    let span = error.span();
    let location = Location::span(span.start, span.end);

    if let chumsky::error::SimpleReason::Custom(message) = error.reason() {
        return SourceError::parse(message.clone(), location);
    }

    let found = error
        .found()
        .map(|lexeme| format!("token {}", lexeme))
        .unwrap_or_else(|| "end of input".to_string());
    let expected: Vec<String> = error
        .expected()
        .filter_map(|lexeme| lexeme.as_ref().map(|l| format!("{}", l)))
        .collect();

    let message = match expected.len() {
        0 => format!("unexpected {}", found),
        1 => format!("unexpected {}, expected {}", found, expected[0]),
        2..=4 => format!("unexpected {}, expected one of {}", found, expected.join(", ")),
        _ => format!("unexpected {}", found),
    };

    let mut err = SourceError::parse(message, location);
    if let chumsky::error::SimpleReason::Unclosed { span, delimiter } = error.reason() {
        err = err
            .with_label(
                Location::span(span.start, span.end),
                format!("unclosed {}", delimiter),
            )
            .with_hint("make sure all brackets are properly closed");
    }
    err
}
