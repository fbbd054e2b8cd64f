//! Hierarchical attribute predicates with wildcard matching.
//!
//! A [`FilterPredicate`] maps attribute names to either a [`Pattern`] or a
//! nested predicate applied to an attribute group. A descriptor matches when
//! every constrained attribute matches; attributes the predicate does not
//! mention impose no constraint.

use std::collections::BTreeMap;

/// A single attribute value exposed by a [`Filterable`] descriptor.
#[derive(Clone, Copy)]
pub enum AttributeValue<'a> {
    /// Plain string attribute. `None` means the attribute is unset.
    Scalar(Option<&'a str>),
    /// Nested attribute group.
    Group(&'a dyn Filterable),
}

/// Attribute access used by the filter engine.
///
/// Returning `None` means the descriptor has no attribute of that name, which
/// never matches a constraint on it.
pub trait Filterable {
    fn attribute(&self, name: &str) -> Option<AttributeValue<'_>>;
}

/// Match pattern for one scalar attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pattern {
    /// Literal string comparison.
    Exact(String),
    /// Wildcard expression: `*` matches any sequence, `?` one character.
    Glob(String),
    /// The attribute must be absent.
    Unset,
}

impl Pattern {
    /// Classify a raw pattern string; anything containing `*` or `?` is a glob.
    pub fn parse(raw: &str) -> Self {
        if raw.contains(['*', '?']) {
            Pattern::Glob(raw.to_string())
        } else {
            Pattern::Exact(raw.to_string())
        }
    }

    /// The match-anything pattern.
    pub fn any() -> Self {
        Pattern::Glob("*".to_string())
    }

    /// Evaluate against an attribute value.
    ///
    /// An absent value is seen by globs as the empty string, so `*` also
    /// accepts it; literals never match an absent value.
    pub fn matches(&self, value: Option<&str>) -> bool {
        match self {
            Pattern::Exact(expected) => value == Some(expected.as_str()),
            Pattern::Glob(glob) => glob_match(glob, value.unwrap_or("")),
            Pattern::Unset => value.is_none(),
        }
    }
}

impl From<&str> for Pattern {
    fn from(raw: &str) -> Self {
        Pattern::parse(raw)
    }
}

impl From<String> for Pattern {
    fn from(raw: String) -> Self {
        Pattern::parse(&raw)
    }
}

/// Constraint on one attribute: a pattern, or a predicate on a nested group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constraint {
    Pattern(Pattern),
    Nested(FilterPredicate),
}

/// Conjunctive, possibly nested attribute predicate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterPredicate {
    constraints: BTreeMap<String, Constraint>,
}

impl FilterPredicate {
    /// The identity predicate: matches every descriptor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Constrain a scalar attribute.
    pub fn with(mut self, attribute: impl Into<String>, pattern: impl Into<Pattern>) -> Self {
        self.constraints
            .insert(attribute.into(), Constraint::Pattern(pattern.into()));
        self
    }

    /// Constrain a nested attribute group.
    pub fn with_group(mut self, attribute: impl Into<String>, nested: FilterPredicate) -> Self {
        self.constraints
            .insert(attribute.into(), Constraint::Nested(nested));
        self
    }

    /// Whether this predicate (recursively) constrains nothing.
    pub fn is_identity(&self) -> bool {
        self.constraints.values().all(|c| match c {
            Constraint::Pattern(_) => false,
            Constraint::Nested(nested) => nested.is_identity(),
        })
    }

    pub fn constraints(&self) -> impl Iterator<Item = (&str, &Constraint)> {
        self.constraints.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Evaluate this predicate against a descriptor.
    pub fn matches(&self, descriptor: &dyn Filterable) -> bool {
        matches(descriptor, self)
    }
}

/// Evaluate `predicate` against `descriptor`. Pure and deterministic.
pub fn matches(descriptor: &dyn Filterable, predicate: &FilterPredicate) -> bool {
    predicate
        .constraints
        .iter()
        .all(|(name, constraint)| match constraint {
            Constraint::Nested(nested) if nested.is_identity() => true,
            Constraint::Nested(nested) => match descriptor.attribute(name) {
                Some(AttributeValue::Group(group)) => matches(group, nested),
                _ => false,
            },
            Constraint::Pattern(pattern) => match descriptor.attribute(name) {
                Some(AttributeValue::Scalar(value)) => pattern.matches(value),
                _ => false,
            },
        })
}

/// Wildcard matcher: `*` matches any sequence (including empty), `?` exactly
/// one character. Every other character matches itself.
pub fn glob_match(pattern: &str, value: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let v: Vec<char> = value.chars().collect();

    let mut pi = 0usize;
    let mut vi = 0usize;
    let mut last_star: Option<usize> = None;
    let mut last_match_vi = 0usize;

    while vi < v.len() {
        if pi < p.len() && p[pi] == '*' {
            last_star = Some(pi);
            pi += 1;
            last_match_vi = vi;
            continue;
        }

        if pi < p.len() && (p[pi] == '?' || p[pi] == v[vi]) {
            pi += 1;
            vi += 1;
            continue;
        }

        if let Some(star_idx) = last_star {
            last_match_vi += 1;
            vi = last_match_vi;
            pi = star_idx + 1;
            continue;
        }

        return false;
    }

    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }

    pi == p.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Platform {
        arch: &'static str,
    }

    impl Filterable for Platform {
        fn attribute(&self, name: &str) -> Option<AttributeValue<'_>> {
            match name {
                "arch" => Some(AttributeValue::Scalar(Some(self.arch))),
                _ => None,
            }
        }
    }

    struct Image {
        name: &'static str,
        variant: Option<&'static str>,
        platform: Platform,
    }

    impl Filterable for Image {
        fn attribute(&self, name: &str) -> Option<AttributeValue<'_>> {
            match name {
                "name" => Some(AttributeValue::Scalar(Some(self.name))),
                "variant" => Some(AttributeValue::Scalar(self.variant)),
                "platform" => Some(AttributeValue::Group(&self.platform)),
                _ => None,
            }
        }
    }

    fn image() -> Image {
        Image {
            name: "ubuntu-cpp",
            variant: None,
            platform: Platform { arch: "amd64" },
        }
    }

    #[test]
    fn test_glob_match_wildcards() {
        assert!(glob_match("*", ""));
        assert!(glob_match("*", "anything/with/slashes"));
        assert!(glob_match("ubuntu-*", "ubuntu-cpp"));
        assert!(glob_match("*-cpp", "ubuntu-cpp"));
        assert!(glob_match("a?c", "abc"));
        assert!(!glob_match("a?c", "ac"));
        assert!(!glob_match("?", ""));
        assert!(glob_match("a*b*c", "aXXbYYc"));
        assert!(!glob_match("a*b*c", "aXXbYY"));
    }

    #[test]
    fn test_pattern_parse_classifies() {
        assert_eq!(Pattern::parse("amd64"), Pattern::Exact("amd64".to_string()));
        assert_eq!(Pattern::parse("amd*"), Pattern::Glob("amd*".to_string()));
        assert_eq!(Pattern::parse("amd6?"), Pattern::Glob("amd6?".to_string()));
    }

    #[test]
    fn test_unset_marker_requires_absence() {
        assert!(Pattern::Unset.matches(None));
        assert!(!Pattern::Unset.matches(Some("")));
        assert!(!Pattern::Unset.matches(Some("python")));
    }

    #[test]
    fn test_absent_value_against_glob_and_literal() {
        assert!(Pattern::any().matches(None));
        assert!(!Pattern::parse("?").matches(None));
        assert!(!Pattern::parse("python").matches(None));
    }

    #[test]
    fn test_identity_predicate_matches() {
        let predicate = FilterPredicate::new();
        assert!(predicate.is_identity());
        assert!(predicate.matches(&image()));

        let nested_identity = FilterPredicate::new().with_group("platform", FilterPredicate::new());
        assert!(nested_identity.is_identity());
        assert!(nested_identity.matches(&image()));
    }

    #[test]
    fn test_nested_group_is_conjunctive() {
        let hit = FilterPredicate::new()
            .with("name", "ubuntu-*")
            .with_group("platform", FilterPredicate::new().with("arch", "amd64"));
        assert!(hit.matches(&image()));

        let miss = FilterPredicate::new()
            .with("name", "ubuntu-*")
            .with_group("platform", FilterPredicate::new().with("arch", "arm64v8"));
        assert!(!miss.matches(&image()));
    }

    #[test]
    fn test_missing_attribute_is_non_match() {
        let predicate = FilterPredicate::new().with("tag", "*");
        assert!(!predicate.matches(&image()));

        let wrong_shape =
            FilterPredicate::new().with_group("name", FilterPredicate::new().with("x", "y"));
        assert!(!wrong_shape.matches(&image()));
    }
}
