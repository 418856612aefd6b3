// Copyright (c) The orchestrator Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use miette::{Diagnostic, SourceSpan};
use thiserror::Error;

/// An error constructing a glob pattern out of a parsed atom.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum GlobConstructError {
    /// The glob syntax itself was invalid.
    #[error("{}", .0.kind())]
    InvalidGlob(globset::Error),
    /// The glob compiled to a regex that failed to build; should not
    /// normally happen given `globset`'s own regex output.
    #[error("{0}")]
    InvalidRegex(String),
}

/// An error parsing an entity pattern, in either the boolean-expression or
/// the glob dialect.
#[derive(Clone, Debug, Error, Diagnostic)]
#[non_exhaustive]
pub enum EntityPatternParseError {
    /// An operator other than `&&`, `||`, `!`, `(`, `)` was found inside a
    /// boolean expression.
    #[error("unknown operator in boolean expression")]
    UnknownOperator {
        /// The offending span.
        #[label("expected `&&`, `||`, `!`, `(` or `)`")]
        span: SourceSpan,
    },

    /// The expression ended with an unmatched `(`.
    #[error("unmatched `(` in boolean expression")]
    UnmatchedOpenParen {
        /// The span of the offending `(`.
        #[label("this `(` has no matching `)`")]
        span: SourceSpan,
    },

    /// A `)` appeared with no matching `(`.
    #[error("unmatched `)` in boolean expression")]
    UnmatchedCloseParen {
        /// The span of the offending `)`.
        #[label("this `)` has no matching `(`")]
        span: SourceSpan,
    },

    /// A quoted atom string was never closed.
    #[error("unterminated quoted atom")]
    UnterminatedQuote {
        /// The span of the opening quote.
        #[label("this `\"` is never closed")]
        span: SourceSpan,
    },

    /// An atom was expected but the expression ended instead.
    #[error("expected an atom, operator, or `(`")]
    ExpectedAtom {
        /// The offending span (typically end-of-input).
        #[label("expected an atom here")]
        span: SourceSpan,
    },

    /// An atom failed to compile as a glob (only possible for quoted atoms
    /// containing invalid glob syntax, e.g. an unclosed `[`).
    #[error("invalid pattern in atom")]
    InvalidAtomGlob {
        /// The span of the offending atom.
        #[label("{error}")]
        span: SourceSpan,
        /// The underlying glob construction error.
        error: GlobConstructError,
    },

    /// A glob pattern (non-boolean-expression dialect) failed to compile.
    #[error("invalid glob pattern `{pattern}`")]
    InvalidGlobPattern {
        /// The pattern that failed.
        pattern: String,
        /// The underlying glob construction error.
        #[source]
        error: GlobConstructError,
    },
}
