use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// The error taxonomy of the runtime.
///
/// Compile-time failures (`Parse`, `Name`, `Arity`) carry a source span;
/// runtime failures carry the full name of the primitive that raised them,
/// which encodes the originating source position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, Serialize, Deserialize)]
#[strum(serialize_all = "kebab-case")]
pub enum ErrorKind {
    /// Malformed source text.
    ParseError,
    /// Unresolved identifier at compile time, or a failed frame lookup.
    NameError,
    /// Call with a wrong argument count for the selected pattern.
    ArityError,
    /// Value of an unexpected tagged-sum variant at runtime.
    TypeError,
    /// Non-broadcastable shapes or mismatched contraction axes.
    ShapeError,
    /// `store` into a non-mutable target.
    MutationError,
    /// Incompatible tile partitions, or a missing tile on a participating
    /// locality.
    LocalityError,
    /// `assert_condition` with a false condition.
    AssertionFailure,
    /// A primitive's domain-specific failure (division by zero, ...).
    UserError,
}

/// A half-open byte range into the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    #[must_use]
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    #[must_use]
    pub fn point(offset: usize) -> Self {
        Self { start: offset, end: offset }
    }
}

/// The crate-wide error type.
///
/// Every failure mode maps onto an `ErrorKind`; the message is
/// human-readable and, where available, the error carries the full name of
/// the raising primitive and/or the source span.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
#[error("{}", render(.kind, .message, .primitive, .span))]
pub struct Error {
    kind: ErrorKind,
    message: String,
    /// Full primitive name, e.g. `/tessera$0/add$1/2$13`.
    primitive: Option<String>,
    /// Source byte range, set on compile-time errors.
    span: Option<Span>,
}

fn render(kind: &ErrorKind, message: &str, primitive: &Option<String>, span: &Option<Span>) -> String {
    let mut out = format!("{kind}: {message}");
    if let Some(primitive) = primitive {
        out.push_str(&format!(" (in {primitive})"));
    }
    if let Some(span) = span {
        out.push_str(&format!(" at offset {}", span.start));
    }
    out
}

impl Error {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            primitive: None,
            span: None,
        }
    }

    /// Attaches the name of the raising primitive, unless one is already
    /// recorded (the innermost primitive wins).
    #[must_use]
    pub fn with_primitive(mut self, name: &str) -> Self {
        if self.primitive.is_none() {
            self.primitive = Some(name.to_owned());
        }
        self
    }

    #[must_use]
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn primitive(&self) -> Option<&str> {
        self.primitive.as_deref()
    }

    #[must_use]
    pub fn span(&self) -> Option<Span> {
        self.span
    }

    /// Parse error with the expected-token set and what was found instead.
    #[must_use]
    pub fn parse(offset: usize, expected: &[&str], found: impl std::fmt::Display) -> Self {
        let expected = expected.join(", ");
        Self::new(
            ErrorKind::ParseError,
            format!("expected one of [{expected}], found {found}"),
        )
        .with_span(Span::point(offset))
    }

    #[must_use]
    pub fn name(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NameError, message)
    }

    #[must_use]
    pub fn arity(primitive: &str, expected: impl std::fmt::Display, received: usize) -> Self {
        Self::new(
            ErrorKind::ArityError,
            format!("{primitive} expects {expected} argument(s), received {received}"),
        )
    }

    #[must_use]
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TypeError, message)
    }

    #[must_use]
    pub fn shape(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ShapeError, message)
    }

    #[must_use]
    pub fn mutation(target_kind: &str) -> Self {
        Self::new(
            ErrorKind::MutationError,
            format!("store target of kind '{target_kind}' is not mutable"),
        )
    }

    #[must_use]
    pub fn locality(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::LocalityError, message)
    }

    #[must_use]
    pub fn assertion(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AssertionFailure, message)
    }

    #[must_use]
    pub fn user(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UserError, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips_through_display() {
        assert_eq!(ErrorKind::ShapeError.to_string(), "shape-error");
        assert_eq!("type-error".parse::<ErrorKind>().unwrap(), ErrorKind::TypeError);
    }

    #[test]
    fn display_includes_primitive_name() {
        let err = Error::type_error("cannot add string and matrix").with_primitive("/tessera$0/add$1/2$13");
        let text = err.to_string();
        assert!(text.starts_with("type-error: cannot add"));
        assert!(text.contains("/tessera$0/add$1/2$13"));
    }

    #[test]
    fn innermost_primitive_wins() {
        let err = Error::user("boom").with_primitive("/tessera/inner$1/0$1").with_primitive("/tessera/outer$1/0$2");
        assert_eq!(err.primitive(), Some("/tessera/inner$1/0$1"));
    }
}
