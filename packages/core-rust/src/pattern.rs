//! Route patterns: dot-separated segments with named parameters and wildcards.
//!
//! A pattern such as `USER.UPDATE_PROFILE.:id` is parsed once into a list of
//! [`Segment`]s and compiled into an anchored matcher. Matching is always
//! against the whole incoming pattern: a route with N segments never matches
//! a message pattern with a different number of segments.
//!
//! | Segment      | Matches                               |
//! |--------------|---------------------------------------|
//! | `USER`       | the literal text `USER`               |
//! | `:id`        | one non-empty run without `.`, captured as `id` |
//! | `*`          | one non-empty run without `.`, not captured |

use std::fmt;
use std::str::FromStr;

use regex::Regex;

/// One parsed segment of a route pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Param(String),
    Wildcard,
}

/// Errors from parsing a pattern or expanding it into a concrete one.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatternError {
    #[error("route pattern is empty")]
    Empty,
    #[error("route pattern {pattern:?} has an empty segment at position {index}")]
    EmptySegment { pattern: String, index: usize },
    #[error("route pattern {pattern:?} has a parameter with no name at position {index}")]
    UnnamedParam { pattern: String, index: usize },
    #[error("route pattern {pattern:?} declares parameter {name:?} more than once")]
    DuplicateParam { pattern: String, name: String },
    #[error("failed to compile matcher for {pattern:?}: {reason}")]
    Compile { pattern: String, reason: String },
    #[error("missing value for parameter {name:?}")]
    MissingParam { name: String },
    #[error("value {value:?} for parameter {name:?} is empty or contains '.'")]
    InvalidParamValue { name: String, value: String },
    #[error("wildcard segment at position {index} cannot be expanded")]
    WildcardExpansion { index: usize },
}

/// Parameters captured from a matched pattern, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteParams(Vec<(String, String)>);

impl RouteParams {
    /// Looks up a captured value by parameter name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RouteParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// A compiled route pattern.
#[derive(Debug, Clone)]
pub struct RoutePattern {
    source: String,
    segments: Vec<Segment>,
    param_names: Vec<String>,
    matcher: Regex,
}

impl RoutePattern {
    /// Parses and compiles `source`.
    ///
    /// # Errors
    ///
    /// Returns a [`PatternError`] for an empty pattern, an empty segment
    /// (leading, trailing or doubled dots), a `:` with no name, or a
    /// parameter name used twice.
    pub fn parse(source: &str) -> Result<Self, PatternError> {
        if source.is_empty() {
            return Err(PatternError::Empty);
        }

        let mut segments = Vec::new();
        let mut param_names: Vec<String> = Vec::new();
        for (index, part) in source.split('.').enumerate() {
            if part.is_empty() {
                return Err(PatternError::EmptySegment {
                    pattern: source.to_string(),
                    index,
                });
            }
            let segment = if let Some(name) = part.strip_prefix(':') {
                if name.is_empty() {
                    return Err(PatternError::UnnamedParam {
                        pattern: source.to_string(),
                        index,
                    });
                }
                if param_names.iter().any(|existing| existing == name) {
                    return Err(PatternError::DuplicateParam {
                        pattern: source.to_string(),
                        name: name.to_string(),
                    });
                }
                param_names.push(name.to_string());
                Segment::Param(name.to_string())
            } else if part == "*" {
                Segment::Wildcard
            } else {
                Segment::Literal(part.to_string())
            };
            segments.push(segment);
        }

        let body = segments
            .iter()
            .map(|segment| match segment {
                Segment::Literal(text) => regex::escape(text),
                Segment::Param(_) => "([^.]+)".to_string(),
                Segment::Wildcard => "[^.]+".to_string(),
            })
            .collect::<Vec<_>>()
            .join(r"\.");
        let matcher = Regex::new(&format!("^{body}$")).map_err(|e| PatternError::Compile {
            pattern: source.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            source: source.to_string(),
            segments,
            param_names,
            matcher,
        })
    }

    /// The pattern string as registered.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Parameter names in the order they appear.
    #[must_use]
    pub fn param_names(&self) -> &[String] {
        &self.param_names
    }

    #[must_use]
    pub fn is_match(&self, pattern: &str) -> bool {
        self.matcher.is_match(pattern)
    }

    /// Matches `pattern` in full and returns the captured parameters.
    #[must_use]
    pub fn captures(&self, pattern: &str) -> Option<RouteParams> {
        let caps = self.matcher.captures(pattern)?;
        Some(
            self.param_names
                .iter()
                .enumerate()
                .filter_map(|(i, name)| caps.get(i + 1).map(|m| (name.clone(), m.as_str())))
                .collect(),
        )
    }

    /// Builds a concrete message pattern by substituting parameter values.
    ///
    /// ```
    /// use hashwire_core::RoutePattern;
    ///
    /// let route = RoutePattern::parse("USER.UPDATE_PROFILE.:id").unwrap();
    /// assert_eq!(route.expand(&[("id", "60f1a")]).unwrap(), "USER.UPDATE_PROFILE.60f1a");
    /// ```
    ///
    /// # Errors
    ///
    /// Returns a [`PatternError`] if a parameter has no value, a value is
    /// empty or contains `.`, or the pattern contains a wildcard.
    pub fn expand(&self, values: &[(&str, &str)]) -> Result<String, PatternError> {
        let mut parts = Vec::with_capacity(self.segments.len());
        for (index, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Literal(text) => parts.push(text.as_str()),
                Segment::Param(name) => {
                    let value = values
                        .iter()
                        .find(|(key, _)| key == name)
                        .map(|(_, value)| *value)
                        .ok_or_else(|| PatternError::MissingParam { name: name.clone() })?;
                    if value.is_empty() || value.contains('.') {
                        return Err(PatternError::InvalidParamValue {
                            name: name.clone(),
                            value: value.to_string(),
                        });
                    }
                    parts.push(value);
                }
                Segment::Wildcard => return Err(PatternError::WildcardExpansion { index }),
            }
        }
        Ok(parts.join("."))
    }
}

impl FromStr for RoutePattern {
    type Err = PatternError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for RoutePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_pattern_matches_exactly() {
        let route = RoutePattern::parse("USER.GET_PROFILE").unwrap();
        assert!(route.is_match("USER.GET_PROFILE"));
        assert!(!route.is_match("USER.GET_PROFILES"));
        assert!(!route.is_match("XUSER.GET_PROFILE"));
        assert!(!route.is_match("USER.GET_PROFILE.1"));
        assert!(route.param_names().is_empty());
    }

    #[test]
    fn param_segment_extracts_value() {
        let route = RoutePattern::parse("USER.UPDATE_PROFILE.:id").unwrap();
        let params = route.captures("USER.UPDATE_PROFILE.60f1a").unwrap();
        assert_eq!(params.get("id"), Some("60f1a"));
        assert_eq!(params.len(), 1);
    }

    #[test]
    fn param_segment_requires_same_segment_count() {
        let route = RoutePattern::parse("USER.UPDATE_PROFILE.:id").unwrap();
        assert!(route.captures("USER.UPDATE_PROFILE").is_none());
        assert!(route.captures("USER.UPDATE_PROFILE.60f1a.extra").is_none());
        assert!(route.captures("USER.UPDATE_PROFILE.").is_none());
    }

    #[test]
    fn literal_dot_is_not_a_wildcard() {
        let route = RoutePattern::parse("A.B").unwrap();
        assert!(!route.is_match("AxB"));
    }

    #[test]
    fn regex_metacharacters_are_literal() {
        let route = RoutePattern::parse("DEVICE-SVC.GET+ALL.(x)").unwrap();
        assert!(route.is_match("DEVICE-SVC.GET+ALL.(x)"));
        assert!(!route.is_match("DEVICE-SVC.GETTALL.(x)"));
    }

    #[test]
    fn wildcard_matches_one_segment_without_capture() {
        let route = RoutePattern::parse("ROLE.*.:id").unwrap();
        let params = route.captures("ROLE.GET_PERMISSION_BY_ROLE.42").unwrap();
        assert_eq!(params.iter().collect::<Vec<_>>(), vec![("id", "42")]);
        assert!(!route.is_match("ROLE.42"));
        assert!(!route.is_match("ROLE.A.B.42"));
    }

    #[test]
    fn params_keep_declaration_order() {
        let route = RoutePattern::parse("ORG.:org.USER.:user").unwrap();
        let params = route.captures("ORG.acme.USER.u7").unwrap();
        assert_eq!(
            params.iter().collect::<Vec<_>>(),
            vec![("org", "acme"), ("user", "u7")]
        );
        assert_eq!(
            route.segments(),
            &[
                Segment::Literal("ORG".to_string()),
                Segment::Param("org".to_string()),
                Segment::Literal("USER".to_string()),
                Segment::Param("user".to_string()),
            ]
        );
    }

    #[test]
    fn rejects_malformed_patterns() {
        assert_eq!(RoutePattern::parse("").unwrap_err(), PatternError::Empty);
        assert!(matches!(
            RoutePattern::parse("USER..GET").unwrap_err(),
            PatternError::EmptySegment { index: 1, .. }
        ));
        assert!(matches!(
            RoutePattern::parse(".USER").unwrap_err(),
            PatternError::EmptySegment { index: 0, .. }
        ));
        assert!(matches!(
            RoutePattern::parse("USER.:").unwrap_err(),
            PatternError::UnnamedParam { index: 1, .. }
        ));
        assert!(matches!(
            RoutePattern::parse("A.:id.:id").unwrap_err(),
            PatternError::DuplicateParam { name, .. } if name == "id"
        ));
    }

    #[test]
    fn expand_round_trips_with_captures() {
        let route = RoutePattern::parse("ROLE.GET_PERMISSION_BY_ROLE.:id").unwrap();
        let concrete = route.expand(&[("id", "42")]).unwrap();
        assert_eq!(concrete, "ROLE.GET_PERMISSION_BY_ROLE.42");
        assert_eq!(route.captures(&concrete).unwrap().get("id"), Some("42"));
    }

    #[test]
    fn expand_rejects_bad_values() {
        let route = RoutePattern::parse("USER.UPDATE_USER.:id").unwrap();
        assert_eq!(
            route.expand(&[]).unwrap_err(),
            PatternError::MissingParam {
                name: "id".to_string()
            }
        );
        assert!(matches!(
            route.expand(&[("id", "a.b")]).unwrap_err(),
            PatternError::InvalidParamValue { .. }
        ));
        assert!(matches!(
            route.expand(&[("id", "")]).unwrap_err(),
            PatternError::InvalidParamValue { .. }
        ));

        let wildcard = RoutePattern::parse("USER.*").unwrap();
        assert_eq!(
            wildcard.expand(&[]).unwrap_err(),
            PatternError::WildcardExpansion { index: 1 }
        );
    }

    #[test]
    fn from_str_and_display() {
        let route: RoutePattern = "USER.VERIFY".parse().unwrap();
        assert_eq!(route.to_string(), "USER.VERIFY");
        assert_eq!(route.source(), "USER.VERIFY");
    }
}
