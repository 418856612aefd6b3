// Copyright (c) The orchestrator Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Glob matching against entity names and attribute strings.

use crate::errors::GlobConstructError;

/// A compiled glob pattern.
///
/// We don't use `globset::GlobMatcher` directly, since it has path-like
/// semantics (`*` does not cross `/`). Entity names and attribute tags
/// aren't paths, so we convert the glob to a plain regex instead and match
/// against the whole string.
#[derive(Clone, Debug)]
pub struct EntityGlob {
    glob_str: String,
    regex: regex::Regex,
}

impl EntityGlob {
    /// Compiles a glob pattern.
    ///
    /// An empty `*`-free pattern behaves as an exact-match literal, which is
    /// exactly what bare identifier atoms need.
    pub fn new(glob_str: impl Into<String>) -> Result<Self, GlobConstructError> {
        let glob_str = glob_str.into();
        let glob = globset::GlobBuilder::new(&glob_str)
            .backslash_escape(false)
            .literal_separator(false)
            .build()
            .map_err(GlobConstructError::InvalidGlob)?;
        let regex = regex::Regex::new(glob.regex())
            .map_err(|error| GlobConstructError::InvalidRegex(error.to_string()))?;
        Ok(Self { glob_str, regex })
    }

    /// Returns the original glob string.
    pub fn as_str(&self) -> &str {
        &self.glob_str
    }

    /// Returns true if `s` matches this glob in full.
    pub fn is_match(&self, s: &str) -> bool {
        self.regex.is_match(s)
    }
}

impl PartialEq for EntityGlob {
    fn eq(&self, other: &Self) -> bool {
        self.glob_str == other.glob_str
    }
}

impl Eq for EntityGlob {}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("pkg.TestFoo", "pkg.TestFoo", true; "exact literal")]
    #[test_case("pkg.*", "pkg.TestFoo", true; "suffix wildcard")]
    #[test_case("pkg.*", "other.TestFoo", false; "no match across prefix")]
    #[test_case("*Foo*", "pkg.TestFooBar", true; "substring wildcard")]
    #[test_case("exact", "exactly", false; "no implicit substring without wildcard")]
    fn glob_matching(pattern: &str, candidate: &str, expected: bool) {
        let glob = EntityGlob::new(pattern).unwrap();
        assert_eq!(glob.is_match(candidate), expected);
    }

    #[test]
    fn invalid_glob_is_rejected() {
        assert!(EntityGlob::new("[").is_err());
    }
}
