// Copyright (c) The orchestrator Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Recursive-descent parser for the boolean-expression pattern dialect.
//!
//! Grammar (standard precedence, `!` binds tighter than `&&`, which binds
//! tighter than `||`):
//!
//! ```text
//! or_expr   := and_expr ("||" and_expr)*
//! and_expr  := unary ("&&" unary)*
//! unary     := "!" unary | "(" or_expr ")" | atom
//! atom      := ident | '"' ... '"'
//! ```

use crate::errors::EntityPatternParseError;
use crate::expr::BoolExpr;
use crate::glob::EntityGlob;
use winnow::Parser;
use winnow::token::take_while;

/// Parses the inside of a `(...)` entity pattern into a [`BoolExpr`].
pub(crate) fn parse_bool_expr(input: &str) -> Result<BoolExpr, EntityPatternParseError> {
    let orig_len = input.len();
    let mut remaining = input;
    let expr = parse_or(&mut remaining, orig_len)?;
    skip_ws(&mut remaining);
    if let Some(rest) = remaining.strip_prefix(')') {
        let start = orig_len - remaining.len();
        let _ = rest;
        return Err(EntityPatternParseError::UnmatchedCloseParen {
            span: (start, 1).into(),
        });
    }
    if !remaining.is_empty() {
        let start = orig_len - remaining.len();
        return Err(EntityPatternParseError::UnknownOperator {
            span: (start, remaining.len()).into(),
        });
    }
    Ok(expr)
}

fn skip_ws(input: &mut &str) {
    let _: Result<&str, winnow::error::ErrMode<winnow::error::ContextError>> =
        take_while(0.., |c: char| c == ' ' || c == '\t').parse_next(input);
}

fn try_literal(input: &mut &str, lit: &str) -> bool {
    skip_ws(input);
    if let Some(rest) = input.strip_prefix(lit) {
        *input = rest;
        true
    } else {
        false
    }
}

fn parse_or(input: &mut &str, orig_len: usize) -> Result<BoolExpr, EntityPatternParseError> {
    let mut lhs = parse_and(input, orig_len)?;
    loop {
        let save = *input;
        if try_literal(input, "||") {
            let rhs = parse_and(input, orig_len)?;
            lhs = BoolExpr::Or(Box::new(lhs), Box::new(rhs));
        } else {
            *input = save;
            break;
        }
    }
    Ok(lhs)
}

fn parse_and(input: &mut &str, orig_len: usize) -> Result<BoolExpr, EntityPatternParseError> {
    let mut lhs = parse_unary(input, orig_len)?;
    loop {
        let save = *input;
        if try_literal(input, "&&") {
            let rhs = parse_unary(input, orig_len)?;
            lhs = BoolExpr::And(Box::new(lhs), Box::new(rhs));
        } else {
            *input = save;
            break;
        }
    }
    Ok(lhs)
}

fn parse_unary(input: &mut &str, orig_len: usize) -> Result<BoolExpr, EntityPatternParseError> {
    if try_literal(input, "!") {
        let inner = parse_unary(input, orig_len)?;
        return Ok(BoolExpr::Not(Box::new(inner)));
    }

    skip_ws(input);
    let paren_start = orig_len - input.len();
    if try_literal(input, "(") {
        let inner = parse_or(input, orig_len)?;
        skip_ws(input);
        if !try_literal(input, ")") {
            return Err(EntityPatternParseError::UnmatchedOpenParen {
                span: (paren_start, 1).into(),
            });
        }
        return Ok(inner);
    }

    parse_atom(input, orig_len)
}

fn parse_atom(input: &mut &str, orig_len: usize) -> Result<BoolExpr, EntityPatternParseError> {
    skip_ws(input);
    let start = orig_len - input.len();

    if input.starts_with('"') {
        return parse_quoted_atom(input, orig_len, start);
    }

    let ident: Result<&str, winnow::error::ErrMode<winnow::error::ContextError>> = take_while(
        1..,
        |c: char| c.is_alphanumeric() || matches!(c, '_' | '-' | ':' | '.' | '/'),
    )
    .parse_next(input);

    match ident {
        Ok(text) => {
            let glob = EntityGlob::new(text).map_err(|error| {
                EntityPatternParseError::InvalidAtomGlob {
                    span: (start, text.len()).into(),
                    error,
                }
            })?;
            Ok(BoolExpr::Atom(glob))
        }
        Err(_) => Err(EntityPatternParseError::ExpectedAtom {
            span: (start, input.len().min(1)).into(),
        }),
    }
}

fn parse_quoted_atom(
    input: &mut &str,
    orig_len: usize,
    quote_start: usize,
) -> Result<BoolExpr, EntityPatternParseError> {
    let body = &input[1..];
    let Some(end_rel) = body.find('"') else {
        return Err(EntityPatternParseError::UnterminatedQuote {
            span: (quote_start, 1).into(),
        });
    };
    let content = &body[..end_rel];
    let glob = EntityGlob::new(content).map_err(|error| {
        EntityPatternParseError::InvalidAtomGlob {
            span: (quote_start, end_rel + 2).into(),
            error,
        }
    })?;
    *input = &body[end_rel + 1..];
    Ok(BoolExpr::Atom(glob))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(expr_src: &str, attrs: &[&str]) -> bool {
        parse_bool_expr(expr_src).unwrap().eval(attrs.iter().copied())
    }

    #[test]
    fn bare_identifier_matches_exactly() {
        assert!(eval("dep1", &["dep1", "dep2"]));
        assert!(!eval("dep1", &["dep10"]));
    }

    #[test]
    fn quoted_wildcard_matches_substring() {
        assert!(eval(r#""dep:*""#, &["dep:gpu"]));
        assert!(!eval(r#""dep:*""#, &["other"]));
    }

    #[test]
    fn operators_compose_with_precedence() {
        // !no && (yes || maybe)
        assert!(eval("!no && (yes || maybe)", &["yes"]));
        assert!(!eval("!no && (yes || maybe)", &["no", "yes"]));
    }

    #[test]
    fn unmatched_open_paren_is_reported() {
        let err = parse_bool_expr("(yes").unwrap_err();
        assert!(matches!(
            err,
            EntityPatternParseError::UnmatchedOpenParen { .. }
        ));
    }

    #[test]
    fn unmatched_close_paren_is_reported() {
        let err = parse_bool_expr("yes)").unwrap_err();
        assert!(matches!(
            err,
            EntityPatternParseError::UnmatchedCloseParen { .. }
        ));
    }

    #[test]
    fn unterminated_quote_is_reported() {
        let err = parse_bool_expr(r#""dep1"#).unwrap_err();
        assert!(matches!(
            err,
            EntityPatternParseError::UnterminatedQuote { .. }
        ));
    }

    #[test]
    fn unknown_operator_is_reported() {
        let err = parse_bool_expr("yes ^ no").unwrap_err();
        assert!(matches!(
            err,
            EntityPatternParseError::UnknownOperator { .. }
        ));
    }
}
