//! Wildcard routing table for request paths.
//!
//! Patterns come in three shapes:
//!
//! - `/pricing` — exact match
//! - `/api*` — prefix match (single trailing wildcard)
//! - `*.svg` — suffix match (single leading wildcard)
//!
//! Anything else (two wildcards, a wildcard in the middle) is rejected when the
//! map is built, never at lookup time.
//!
//! ## Rule order matters
//!
//! Lookup is first-match-wins in registration order, not longest-prefix-wins:
//!
//! 1. an exact rule wins outright;
//! 2. otherwise the first prefix rule that matches is taken, and if its value
//!    short-circuits (see [`ShortCircuit`]) it is returned immediately;
//! 3. otherwise the first matching suffix rule is taken, with the same
//!    short-circuit behaviour;
//! 4. otherwise the prefix match is preferred over the suffix match.
//!
//! Put specific rules before catch-alls like `/*`.

use std::collections::HashMap;

use crate::error::{ConfigError, ConfigResult};

/// Values that end the lookup as soon as a wildcard rule yields them.
pub trait ShortCircuit {
    fn short_circuits(&self) -> bool;
}

#[derive(Debug, Clone)]
pub struct PrefixMap<T> {
    exact: HashMap<String, T>,
    prefixes: Vec<(String, T)>,
    suffixes: Vec<(String, T)>,
}

enum PatternKind {
    Exact,
    Prefix(String),
    Suffix(String),
}

fn parse_pattern(pattern: &str) -> ConfigResult<PatternKind> {
    let wildcards = pattern.matches('*').count();
    match wildcards {
        0 => Ok(PatternKind::Exact),
        1 if pattern.ends_with('*') => Ok(PatternKind::Prefix(
            pattern[..pattern.len() - 1].to_string(),
        )),
        1 if pattern.starts_with('*') => Ok(PatternKind::Suffix(pattern[1..].to_string())),
        1 => Err(ConfigError::invalid_pattern(
            pattern,
            "the wildcard must be at the beginning or at the end",
        )),
        n => Err(ConfigError::invalid_pattern(
            pattern,
            format!("only one wildcard is supported, found {n}"),
        )),
    }
}

impl<T: ShortCircuit> PrefixMap<T> {
    /// Compile an ordered list of `(pattern, value)` rules.
    ///
    /// If the same exact pattern is registered twice, the later value wins.
    pub fn new<P>(rules: impl IntoIterator<Item = (P, T)>) -> ConfigResult<Self>
    where
        P: AsRef<str>,
    {
        let mut map = Self {
            exact: HashMap::new(),
            prefixes: Vec::new(),
            suffixes: Vec::new(),
        };

        for (pattern, value) in rules {
            match parse_pattern(pattern.as_ref())? {
                PatternKind::Exact => {
                    map.exact.insert(pattern.as_ref().to_string(), value);
                }
                PatternKind::Prefix(prefix) => map.prefixes.push((prefix, value)),
                PatternKind::Suffix(suffix) => map.suffixes.push((suffix, value)),
            }
        }

        Ok(map)
    }

    /// Resolve a path. `None` means no rule matched.
    pub fn get(&self, path: &str) -> Option<&T> {
        if let Some(value) = self.exact.get(path) {
            return Some(value);
        }

        let prefix_match = self
            .prefixes
            .iter()
            .find(|(prefix, _)| path.starts_with(prefix.as_str()))
            .map(|(_, value)| value);
        if let Some(value) = prefix_match {
            if value.short_circuits() {
                return Some(value);
            }
        }

        let suffix_match = self
            .suffixes
            .iter()
            .find(|(suffix, _)| path.ends_with(suffix.as_str()))
            .map(|(_, value)| value);
        if let Some(value) = suffix_match {
            if value.short_circuits() {
                return Some(value);
            }
        }

        prefix_match.or(suffix_match)
    }

    pub fn len(&self) -> usize {
        self.exact.len() + self.prefixes.len() + self.suffixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Route {
        Event(&'static str),
        Ignore,
    }

    impl ShortCircuit for Route {
        fn short_circuits(&self) -> bool {
            matches!(self, Route::Ignore)
        }
    }

    fn sample() -> PrefixMap<Route> {
        PrefixMap::new([
            ("/api/endpoint", Route::Ignore),
            ("/favicon.ico", Route::Ignore),
            ("/specific/page", Route::Event("page2")),
            ("/img*", Route::Ignore),
            ("*.svg", Route::Ignore),
            ("/api*", Route::Event("api_event")),
            ("/*", Route::Event("page_event")),
        ])
        .unwrap()
    }

    #[test]
    fn exact_rule_wins_outright() {
        let map = sample();
        assert_eq!(map.get("/specific/page"), Some(&Route::Event("page2")));
        assert_eq!(map.get("/api/endpoint"), Some(&Route::Ignore));
    }

    #[test]
    fn first_registered_prefix_wins() {
        let map = sample();
        assert_eq!(map.get("/api/test"), Some(&Route::Event("api_event")));
        assert_eq!(map.get("/any_path"), Some(&Route::Event("page_event")));
        assert_eq!(map.get("/img/cat.png"), Some(&Route::Ignore));
    }

    #[test]
    fn suffix_short_circuit_beats_non_terminal_prefix() {
        let map = sample();
        // `/*` matches as a prefix but does not short-circuit, `*.svg` does.
        assert_eq!(map.get("/logo.svg"), Some(&Route::Ignore));
    }

    #[test]
    fn prefix_short_circuit_stops_before_suffixes() {
        let map = PrefixMap::new([
            ("/static*", Route::Ignore),
            ("*.html", Route::Event("doc")),
        ])
        .unwrap();
        assert_eq!(map.get("/static/index.html"), Some(&Route::Ignore));
    }

    #[test]
    fn prefix_preferred_over_suffix_when_neither_short_circuits() {
        let map = PrefixMap::new([
            ("*.html", Route::Event("doc")),
            ("/blog*", Route::Event("blog")),
        ])
        .unwrap();
        assert_eq!(map.get("/blog/post.html"), Some(&Route::Event("blog")));
        assert_eq!(map.get("/about.html"), Some(&Route::Event("doc")));
    }

    #[test]
    fn no_rule_matches() {
        let map = PrefixMap::new([("/api*", Route::Event("api"))]).unwrap();
        assert_eq!(map.get("/home"), None);
    }

    #[test]
    fn bare_wildcard_matches_everything() {
        let map = PrefixMap::new([("*", Route::Event("all"))]).unwrap();
        assert_eq!(map.get("/whatever"), Some(&Route::Event("all")));
        assert_eq!(map.get(""), Some(&Route::Event("all")));
    }

    #[test]
    fn rejects_two_wildcards() {
        let err = PrefixMap::new([("*a*", Route::Ignore)]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPattern { .. }));
    }

    #[test]
    fn rejects_wildcard_in_the_middle() {
        let err = PrefixMap::new([("/a*b", Route::Ignore)]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPattern { .. }));
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 500,
                ..ProptestConfig::default()
            })]

            /// Property: exact rules match iff the path equals the pattern.
            #[test]
            fn exact_matches_iff_equal(pattern in "/[a-z/]{0,12}", path in "/[a-z/]{0,12}") {
                let map = PrefixMap::new([(pattern.clone(), Route::Event("e"))]).unwrap();
                prop_assert_eq!(map.get(&path).is_some(), path == pattern);
            }

            /// Property: a prefix rule matches every path that starts with the prefix.
            #[test]
            fn prefix_matches_extensions(prefix in "/[a-z]{0,8}", rest in "[a-z/.]{0,12}") {
                let map = PrefixMap::new([(format!("{prefix}*"), Route::Event("p"))]).unwrap();
                let path = format!("{prefix}{rest}");
                prop_assert_eq!(map.get(&path), Some(&Route::Event("p")));
            }

            /// Property: with two matching prefixes the first registered wins.
            #[test]
            fn first_prefix_wins(a in "/[a-z]{0,6}", b in "/[a-z]{0,6}", rest in "[a-z]{0,6}") {
                let map = PrefixMap::new([
                    (format!("{a}*"), Route::Event("first")),
                    (format!("{b}*"), Route::Event("second")),
                ])
                .unwrap();
                let path = format!("{a}{b}{rest}");
                prop_assert_eq!(map.get(&path), Some(&Route::Event("first")));
            }

            /// Property: a wildcard anywhere but the ends is a construction error.
            #[test]
            fn inner_wildcard_rejected(left in "[a-z/]{1,6}", right in "[a-z/]{1,6}") {
                let pattern = format!("{left}*{right}");
                prop_assert!(PrefixMap::new([(pattern, Route::Ignore)]).is_err());
            }

            /// Property: a short-circuiting prefix wins over any later suffix rule.
            #[test]
            fn skip_prefix_short_circuits(prefix in "/[a-z]{1,6}", suffix in "\\.[a-z]{1,4}") {
                let map = PrefixMap::new([
                    (format!("{prefix}*"), Route::Ignore),
                    (format!("*{suffix}"), Route::Event("by_suffix")),
                ])
                .unwrap();
                let path = format!("{prefix}/file{suffix}");
                prop_assert_eq!(map.get(&path), Some(&Route::Ignore));
            }
        }
    }
}
