// Copyright (c) The orchestrator Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::errors::EntityPatternParseError;
use crate::expr::BoolExpr;
use crate::glob::EntityGlob;
use crate::parser::parse_bool_expr;

/// Anything an [`EntityPattern`] can be matched against.
///
/// `orchestrator-runner` implements this for its entity registry type; kept
/// as a trait here so this crate has no dependency on that one.
pub trait MatchTarget {
    /// The entity's stable name, matched in the glob dialect.
    fn entity_name(&self) -> &str;

    /// Flat attribute strings (software/hardware tags, bundle name, kind,
    /// variable `key=value` pairs, ...), matched in the boolean-expression
    /// dialect.
    fn attribute_tags(&self) -> &[String];
}

/// A parsed entity pattern, in either dialect (see the module docs).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EntityPattern {
    /// The `(...)` boolean-expression dialect.
    Expression(BoolExpr),
    /// One or more glob patterns over the entity name; matches if any one
    /// of them does.
    Globs(Vec<EntityGlob>),
}

impl EntityPattern {
    /// Parses a list of pattern strings per §4.1.1's dialect-selection rule:
    /// a single `(...)`-shaped pattern is a boolean expression, anything
    /// else is one or more globs.
    pub fn parse<S: AsRef<str>>(patterns: &[S]) -> Result<Self, EntityPatternParseError> {
        if let [only] = patterns {
            let only = only.as_ref();
            if let Some(inner) = as_parenthesized(only) {
                return Ok(Self::Expression(parse_bool_expr(inner)?));
            }
        }

        let globs = patterns
            .iter()
            .map(|p| {
                let p = p.as_ref();
                EntityGlob::new(p).map_err(|error| EntityPatternParseError::InvalidGlobPattern {
                    pattern: p.to_string(),
                    error,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::Globs(globs))
    }

    /// Returns true if `target` matches this pattern.
    pub fn matches(&self, target: &impl MatchTarget) -> bool {
        match self {
            Self::Expression(expr) => {
                expr.eval(target.attribute_tags().iter().map(String::as_str))
            }
            Self::Globs(globs) => globs.iter().any(|g| g.is_match(target.entity_name())),
        }
    }
}

fn as_parenthesized(s: &str) -> Option<&str> {
    let inner = s.strip_prefix('(')?.strip_suffix(')')?;
    Some(inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Entity {
        name: &'static str,
        tags: Vec<String>,
    }

    impl MatchTarget for Entity {
        fn entity_name(&self) -> &str {
            self.name
        }
        fn attribute_tags(&self) -> &[String] {
            &self.tags
        }
    }

    #[test]
    fn single_parenthesized_pattern_is_an_expression() {
        let pattern = EntityPattern::parse(&["(dep1 && !dep2)"]).unwrap();
        assert!(matches!(pattern, EntityPattern::Expression(_)));
        let e = Entity {
            name: "pkg.Test",
            tags: vec!["dep1".into()],
        };
        assert!(pattern.matches(&e));
    }

    #[test]
    fn bare_patterns_are_globs_over_name() {
        let pattern = EntityPattern::parse(&["pkg.Test*", "other.*"]).unwrap();
        assert!(matches!(pattern, EntityPattern::Globs(_)));
        let matching = Entity {
            name: "pkg.TestFoo",
            tags: vec![],
        };
        let non_matching = Entity {
            name: "pkg2.TestFoo",
            tags: vec![],
        };
        assert!(pattern.matches(&matching));
        assert!(!pattern.matches(&non_matching));
    }

    #[test]
    fn multiple_patterns_with_parens_are_not_an_expression() {
        // Only a *single* pattern argument shaped like `(...)` is the
        // expression dialect; with two patterns it falls back to globs.
        let pattern = EntityPattern::parse(&["(dep1)", "(dep2)"]).unwrap();
        assert!(matches!(pattern, EntityPattern::Globs(_)));
    }
}
